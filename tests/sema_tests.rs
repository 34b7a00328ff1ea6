// SPDX-License-Identifier: PMPL-1.0-or-later

//! Type checker behavior: pointer states, casts, matches, literals,
//! permissions, capabilities, contracts.

use cursive0::sema::check::{check, CheckResult};
use cursive0::sema::symbols::collect;
use cursive0::source::load_source;
use cursive0::syntax::parser::parse_module;

fn check_source(text: &str) -> CheckResult {
    let loaded = load_source("t.cursive", text.as_bytes());
    let parsed = parse_module(&loaded.source.unwrap(), "app");
    assert!(
        !parsed.diags.has_error(),
        "parse failed: {:?}",
        parsed.diags.ordered()
    );
    let collected = collect("app", vec![parsed.module]);
    assert!(
        !collected.diags.has_error(),
        "collect failed: {:?}",
        collected.diags.ordered()
    );
    check(&collected.sigma)
}

fn assert_clean(text: &str) {
    let result = check_source(text);
    assert!(
        !result.diags.has_error(),
        "expected clean, got {:?}",
        result.diags.ordered()
    );
}

fn assert_code(text: &str, code: &str) {
    let result = check_source(text);
    assert!(
        result.diags.has_code(code),
        "expected {code}, got {:?}",
        result.diags.ordered()
    );
}

// -- pointer states ---------------------------------------------------------

#[test]
fn deref_null_is_e_ptr_0001() {
    assert_code("procedure foo(p: Ptr<i32>@Null) -> i32 { *p }\n", "E-PTR-0001");
}

#[test]
fn deref_expired_is_e_ptr_0002() {
    assert_code(
        "procedure foo(p: Ptr<i32>@Expired) -> i32 { *p }\n",
        "E-PTR-0002",
    );
}

#[test]
fn deref_valid_is_accepted() {
    assert_clean("procedure foo(p: Ptr<i32>@Valid) -> i32 { *p }\n");
}

#[test]
fn raw_deref_outside_unsafe_is_rejected() {
    assert_code(
        "procedure foo(p: rawptr[mut, i32]) -> i32 { *p }\n",
        "E-PTR-0003",
    );
}

#[test]
fn raw_deref_inside_unsafe_is_accepted() {
    assert_clean(
        "procedure foo(p: rawptr[mut, i32]) -> i32 {\nvar out = 0\nunsafe { out = *p }\nout\n}\n",
    );
}

#[test]
fn transmute_outside_unsafe_is_rejected() {
    assert_code(
        "procedure f(x: u32) -> i32 { transmute<i32>(x) }\n",
        "E-PTR-0004",
    );
}

#[test]
fn transmute_size_mismatch_is_rejected() {
    let result = check_source(
        "procedure f(x: u8) -> i32 {\nvar out = 0\nunsafe { out = transmute<i32>(x) }\nout\n}\n",
    );
    assert!(result.diags.has_code("E-SEM-0122"));
}

// -- address-of and places --------------------------------------------------

#[test]
fn address_of_place_yields_valid_pointer() {
    assert_clean("procedure f() -> i32 {\nlet x = 4\nlet p = &x\n*p\n}\n");
}

#[test]
fn address_of_temporary_is_rejected() {
    assert_code("procedure f() -> i32 {\nlet p = &(1 + 2)\n0\n}\n", "E-SEM-0105");
}

// -- casts ------------------------------------------------------------------

#[test]
fn numeric_bool_char_cast_table() {
    assert_clean("procedure a(x: i32) -> f64 { x as f64 }\n");
    assert_clean("procedure b(x: bool) -> i32 { x as i32 }\n");
    assert_clean("procedure c(x: i32) -> bool { x as bool }\n");
    assert_clean("procedure d(x: char) -> u32 { x as u32 }\n");
    assert_code("procedure e(x: bool) -> f32 { x as f32 }\n", "E-SEM-0107");
    assert_code("procedure g(x: char) -> u8 { x as u8 }\n", "E-SEM-0107");
}

// -- literals ---------------------------------------------------------------

#[test]
fn integer_literal_defaults_to_i32_and_range_checks() {
    assert_clean("procedure f() -> i32 { 2147483647 }\n");
    assert_code("procedure f() -> u8 { 300 }\n", "E-SEM-0126");
}

#[test]
fn null_needs_a_pointer_context() {
    assert_clean("procedure f() -> i32 {\nlet p: Ptr<i32>@Null = null\n0\n}\n");
    assert_code("procedure f() -> i32 {\nlet x = null\n0\n}\n", "E-SEM-0101");
}

// -- if / match -------------------------------------------------------------

#[test]
fn if_condition_must_be_bool() {
    assert_code("procedure f(x: i32) -> i32 { if x { 1 } else { 2 } }\n", "E-SEM-0109");
}

#[test]
fn if_without_else_must_be_unit() {
    assert_code(
        "procedure f(c: bool) -> i32 {\nif c { 4 }\n0\n}\n",
        "E-SEM-0110",
    );
}

#[test]
fn u8_match_without_wildcard_is_non_exhaustive() {
    assert_code(
        "procedure f(x: u8) -> i32 { match x { 0 => 1, 1 => 2 } }\n",
        "E-SEM-0111",
    );
}

#[test]
fn full_range_match_is_exhaustive() {
    assert_clean(
        "procedure f(x: u8) -> i32 { match x { 0..=127 => 1, 128..=255 => 2 } }\n",
    );
}

#[test]
fn duplicate_arm_is_unreachable() {
    assert_code(
        "procedure f(x: bool) -> i32 { match x { true => 1, false => 2, true => 3 } }\n",
        "E-SEM-0112",
    );
}

#[test]
fn enum_match_covers_variants() {
    let text = "enum Shape { Dot, Line(i32, i32) }\n\
                procedure f(s: Shape) -> i32 { match s { Shape::Dot => 0, Shape::Line(a, b) => a + b } }\n";
    assert_clean(text);
    assert_code(
        "enum Shape { Dot, Line(i32, i32) }\n\
         procedure f(s: Shape) -> i32 { match s { Shape::Dot => 0 } }\n",
        "E-SEM-0111",
    );
}

// -- records and moves ------------------------------------------------------

#[test]
fn record_literal_field_set_is_exact() {
    let decl = "record P { pub x: i32\npub y: i32 }\n";
    assert_code(
        &format!("{decl}procedure f() -> i32 {{\nlet p = P {{ x: 1 }}\n0\n}}\n"),
        "E-SEM-0103",
    );
    assert_code(
        &format!("{decl}procedure f() -> i32 {{\nlet p = P {{ x: 1, y: 2, z: 3 }}\n0\n}}\n"),
        "E-SEM-0102",
    );
    assert_code(
        &format!("{decl}procedure f() -> i32 {{\nlet p = P {{ x: 1, x: 2, y: 3 }}\n0\n}}\n"),
        "E-SEM-0104",
    );
}

#[test]
fn bitcopy_record_passes_by_value_twice() {
    assert_clean(
        "record P implements Bitcopy { pub x: i32 }\n\
         procedure take(move p: P) -> i32 { p.x }\n\
         procedure main() -> i32 {\nlet v = P { x: 1 }\ntake(v) + take(v)\n}\n",
    );
}

#[test]
fn non_bitcopy_value_use_requires_move() {
    assert_code(
        "record Buf { pub data: String@Managed }\n\
         procedure take(move b: Buf) -> i32 { 0 }\n\
         procedure main() -> i32 {\nlet v = Buf { data: \"x\".to_managed() }\ntake(v)\n}\n",
        "E-SEM-0106",
    );
}

#[test]
fn moved_value_use_is_accepted() {
    assert_clean(
        "record Buf { pub data: String@Managed }\n\
         procedure take(move b: Buf) -> i32 { 0 }\n\
         procedure main() -> i32 {\nlet v = Buf { data: \"x\".to_managed() }\ntake(move v)\n}\n",
    );
}

#[test]
fn bitcopy_record_with_managed_field_is_rejected() {
    assert_code(
        "record Bad implements Bitcopy { pub data: String@Managed }\n",
        "E-SEM-0101",
    );
}

// -- methods and permissions ------------------------------------------------

#[test]
fn const_receiver_accepts_any_provider() {
    assert_clean(
        "record P { pub x: i32\nprocedure get(const self) -> i32 { self.x } }\n\
         procedure f(p: const P) -> i32 { p.get() }\n",
    );
}

#[test]
fn unique_receiver_rejects_const_provider() {
    assert_code(
        "record P { pub x: i32\nprocedure bump(unique self) -> i32 { self.x } }\n\
         procedure f(p: const P) -> i32 { p.bump() }\n",
        "E-SEM-0115",
    );
}

#[test]
fn assignment_through_const_is_rejected() {
    assert_code(
        "record P { pub x: i32 }\nprocedure f(p: const P) {\np.x = 3\n}\n",
        "E-SEM-0119",
    );
}

// -- unions and propagate ---------------------------------------------------

#[test]
fn propagate_splits_the_union() {
    assert_clean(
        "enum Err { Io }\n\
         procedure inner() -> i32 | Err { 3 }\n\
         procedure outer() -> i32 | Err { inner()? }\n",
    );
}

#[test]
fn propagate_needs_a_union_operand() {
    assert_code(
        "procedure inner() -> i32 { 3 }\nprocedure outer() -> i32 { inner()? }\n",
        "E-SEM-0116",
    );
}

// -- modal states ------------------------------------------------------------

#[test]
fn transition_must_change_state() {
    assert_code(
        "modal Door {\nid: i32\nstate Open {\n\
         transition stay(self) -> Door@Open { Door::Open { id: 0 } }\n}\nstate Closed {\n}\n}\n",
        "E-MOD-0202",
    );
}

#[test]
fn state_field_access_is_state_scoped() {
    let decl = "modal Door {\nid: i32\nstate Open {\nangle: i32\n}\nstate Closed {\n}\n}\n";
    assert_clean(&format!(
        "{decl}procedure f(d: Door@Open) -> i32 {{ d.angle + d.id }}\n"
    ));
    assert_code(
        &format!("{decl}procedure f(d: Door@Closed) -> i32 {{ d.angle }}\n"),
        "E-MOD-0201",
    );
}

#[test]
fn widened_modal_hides_state_fields() {
    let decl = "modal Door {\nid: i32\nstate Open {\nangle: i32\n}\nstate Closed {\n}\n}\n";
    assert_code(
        &format!("{decl}procedure f(d: Door) -> i32 {{ d.angle }}\n"),
        "E-MOD-0203",
    );
}

// -- capabilities ------------------------------------------------------------

#[test]
fn extern_with_capability_param_is_e_cap_0011() {
    assert_code(
        "extern \"C\" { procedure ext_read(fs: dyn $FileSystem) -> i32 }\n\
         procedure main() -> i32 { 0 }\n",
        "E-CAP-0011",
    );
}

#[test]
fn capability_requirement_propagates_to_callers() {
    assert_code(
        "procedure uses(fs: dyn $FileSystem) -> i32 { fs.open() }\n\
         procedure needs(fs: dyn $FileSystem) -> i32 { uses(fs) }\n\
         procedure bare() -> i32 { needs(bare_fs()) }\n\
         procedure bare_fs() -> dyn $FileSystem { bare_fs() }\n",
        "E-CAP-0010",
    );
}

// -- contracts ---------------------------------------------------------------

#[test]
fn contract_predicates_must_be_bool() {
    assert_code(
        "procedure f(x: i32) -> i32 |= x { x }\n",
        "E-CON-0101",
    );
}

#[test]
fn result_is_postcondition_only() {
    assert_code(
        "procedure f(x: i32) -> i32 |= @result >= 0 { x }\n",
        "E-CON-0103",
    );
    assert_clean("procedure f(x: i32) -> i32 |= x >= 0 => @result >= 0 { x }\n");
}

#[test]
fn entry_argument_must_be_bitcopy() {
    assert_clean(
        "procedure f(x: i32) -> i32 |= => @result >= @entry(x) { x }\n",
    );
    assert_code(
        "record Buf { pub s: String@Managed }\n\
         procedure f(b: Buf) -> i32 |= => @entry(b) == @entry(b) { 0 }\n",
        "E-CON-0104",
    );
}

// -- regions -----------------------------------------------------------------

#[test]
fn alloc_needs_an_active_region() {
    assert_code("procedure f() -> i32 {\nlet p = ^4\n0\n}\n", "E-SEM-0120");
    assert_clean(
        "procedure f() -> i32 {\nvar out = 0\nregion r {\nlet p = ^4\nout = *p\n}\nout\n}\n",
    );
}

#[test]
fn ambiguous_implicit_region_is_rejected() {
    assert_code(
        "procedure f() -> i32 {\nregion a {\nregion b {\nlet p = ^4\n}\n}\n0\n}\n",
        "E-SEM-0121",
    );
}

// -- visibility ---------------------------------------------------------------

#[test]
fn private_field_is_module_scoped() {
    // Same module: fine.
    assert_clean("record P { x: i32 }\nprocedure f(p: const P) -> i32 { p.x }\n");
}

// -- tau totality --------------------------------------------------------------

#[test]
fn accepted_body_has_a_populated_tau_map() {
    let result = check_source(
        "procedure f(x: i32) -> i32 {\nlet y = x + 1\nif y > 0 { y } else { 0 - y }\n}\n",
    );
    assert!(!result.diags.has_error());
    assert!(result.tau.len() >= 8, "tau has {} entries", result.tau.len());
}
