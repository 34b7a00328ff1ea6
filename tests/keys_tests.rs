// SPDX-License-Identifier: PMPL-1.0-or-later

//! Key system: conflicts in parallel arms, key blocks, suspension points.

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
    check(&collected.sigma)
}

const DATA: &str = "record Data { pub field: i32\npub other: i32 }\n";

#[test]
fn parallel_arms_writing_the_same_field_conflict() {
    let result = check_source(&format!(
        "{DATA}procedure run(d: unique Data) {{\nparallel {{\n{{ d.field = 1 }},\n{{ d.field = 2 }},\n}}\n}}\n"
    ));
    assert!(
        result.diags.has_code("E-KEY-0001"),
        "{:?}",
        result.diags.ordered()
    );
}

#[test]
fn parallel_arms_on_disjoint_fields_are_fine() {
    let result = check_source(&format!(
        "{DATA}procedure run(d: unique Data) {{\nparallel {{\n{{ d.field = 1 }},\n{{ d.other = 2 }},\n}}\n}}\n"
    ));
    assert!(
        !result.diags.has_error(),
        "{:?}",
        result.diags.ordered()
    );
}

#[test]
fn read_read_overlap_is_fine() {
    let result = check_source(&format!(
        "{DATA}procedure run(d: unique Data) {{\nparallel {{\n{{ let a = d.field }},\n{{ let b = d.field }},\n}}\n}}\n"
    ));
    assert!(!result.diags.has_error(), "{:?}", result.diags.ordered());
}

#[test]
fn whole_root_write_conflicts_with_field_read() {
    let result = check_source(&format!(
        "{DATA}procedure run(d: unique Data, e: unique Data) {{\nparallel {{\n{{ d.field = 1 }},\n{{ let a = d.other\nd.other = a }},\n}}\n}}\n"
    ));
    // Arm two writes d.other; arm one writes d.field: disjoint fields, no
    // conflict. The same root with a whole-root assignment does conflict.
    assert!(!result.diags.has_code("E-KEY-0001"));
    let result = check_source(&format!(
        "{DATA}procedure run(d: unique Data, e: unique Data) {{\nparallel {{\n{{ d = move e }},\n{{ let a = d.field }},\n}}\n}}\n"
    ));
    assert!(result.diags.has_code("E-KEY-0001"));
}

#[test]
fn distinct_literal_indices_do_not_conflict() {
    let result = check_source(
        "procedure run(xs: unique [i32; 4]) {\nparallel {\n{ xs[0] = 1 },\n{ xs[1] = 2 },\n}\n}\n",
    );
    assert!(!result.diags.has_error(), "{:?}", result.diags.ordered());
}

#[test]
fn symbolic_indices_conservatively_conflict() {
    let result = check_source(
        "procedure run(xs: unique [i32; 4], i: usize, j: usize) {\nparallel {\n{ xs[i] = 1 },\n{ xs[j] = 2 },\n}\n}\n",
    );
    assert!(result.diags.has_code("E-KEY-0001"));
}

#[test]
fn key_block_reacquisition_conflicts() {
    let result = check_source(&format!(
        "{DATA}procedure run(d: unique Data) {{\n#(write d.field) {{\n#(write d.field) {{\nd.field = 1\n}}\n}}\n}}\n"
    ));
    assert!(
        result.diags.has_code("E-KEY-0002"),
        "{:?}",
        result.diags.ordered()
    );
}

#[test]
fn non_canonical_acquisition_order_warns_only() {
    let result = check_source(&format!(
        "{DATA}procedure run(d: unique Data) {{\n#(write d.other, write d.field) {{\nd.field = 1\n}}\n}}\n"
    ));
    assert!(result.diags.has_code("W-CON-0001"));
    assert!(!result.diags.has_error(), "{:?}", result.diags.ordered());
}

#[test]
fn suspension_with_held_key_is_rejected() {
    let result = check_source(&format!(
        "{DATA}procedure run(d: unique Data, t: Spawned<i32>) -> i32 {{\nvar out = 0\n#(write d.field) {{\nout = wait t\n}}\nout\n}}\n"
    ));
    assert!(
        result.diags.has_code("E-KEY-0003"),
        "{:?}",
        result.diags.ordered()
    );
}

#[test]
fn wait_without_held_keys_is_fine() {
    let result = check_source(
        "procedure run(t: Spawned<i32>) -> i32 { wait t }\n",
    );
    assert!(!result.diags.has_error(), "{:?}", result.diags.ordered());
}

#[test]
fn boundary_marked_fields_truncate_conflict_paths() {
    let result = check_source(
        "record Halves { #left: i32\n#right: i32 }\n\
         procedure run(h: unique Halves) {\nparallel {\n{ h.left = 1 },\n{ h.right = 2 },\n}\n}\n",
    );
    // The `#` marker truncates traversal, so both arms claim the whole
    // root and conflict.
    assert!(result.diags.has_code("E-KEY-0001"));
}
