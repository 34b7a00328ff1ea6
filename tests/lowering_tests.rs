// SPDX-License-Identifier: PMPL-1.0-or-later

//! IR lowering and the textual LLVM emitter.

use cursive0::backend::llvm::emit_ll;
use cursive0::ir::lower::{lower_assembly, LowerCtx};
use cursive0::ir::{IrDecl, IrModule};
use cursive0::sema::check::check;
use cursive0::sema::symbols::collect;
use cursive0::source::load_source;
use cursive0::syntax::parser::parse_module;

fn lower_source(text: &str) -> (Vec<IrModule>, LowerCtx) {
    let loaded = load_source("t.cursive", text.as_bytes());
    let parsed = parse_module(&loaded.source.unwrap(), "app");
    assert!(!parsed.diags.has_error(), "{:?}", parsed.diags.ordered());
    let collected = collect("app", vec![parsed.module]);
    let checked = check(&collected.sigma);
    assert!(!checked.diags.has_error(), "{:?}", checked.diags.ordered());
    lower_assembly(&collected.sigma, &checked)
}

fn proc_body_text(modules: &[IrModule], symbol: &str) -> String {
    modules
        .iter()
        .flat_map(|m| m.decls.iter())
        .find_map(|d| match d {
            IrDecl::Proc {
                symbol: s, body, ..
            } if s == symbol => Some(format!("{body:?}")),
            _ => None,
        })
        .unwrap_or_else(|| panic!("{symbol} not lowered"))
}

#[test]
fn main_sets_up_the_panic_handle() {
    let (modules, ctx) = lower_source("procedure main() -> i32 { 0 }\n");
    assert_eq!(ctx.main_symbol.as_deref(), Some("app::main"));
    let body = proc_body_text(&modules, "app::main");
    assert!(body.contains("InitPanicHandle"));
    assert!(!body.contains("ClearPanic"));
}

#[test]
fn non_main_procs_clear_the_panic_flag_and_take_the_out_param() {
    let (modules, _) = lower_source("procedure helper() -> i32 { 1 }\n");
    let body = proc_body_text(&modules, "app::helper");
    assert!(body.contains("ClearPanic"));
    let IrDecl::Proc { params, .. } = modules[0]
        .decls
        .iter()
        .find(|d| matches!(d, IrDecl::Proc { symbol, .. } if symbol == "app::helper"))
        .unwrap()
    else {
        unreachable!()
    };
    assert_eq!(params.last().unwrap().name, "__panic");
}

#[test]
fn user_calls_are_panic_checked() {
    let (modules, _) = lower_source(
        "procedure helper() -> i32 { 1 }\nprocedure main() -> i32 { helper() }\n",
    );
    let body = proc_body_text(&modules, "app::main");
    assert!(body.contains("PanicCheck"));
}

#[test]
fn managed_string_binding_produces_drop_glue() {
    let (_, ctx) = lower_source(
        "procedure main() -> i32 {\nlet s: String@Managed = \"x\".to_managed()\n0\n}\n",
    );
    assert!(
        ctx.drop_glue_types
            .keys()
            .any(|sym| sym.starts_with("drop_glue_")),
        "{:?}",
        ctx.drop_glue_types
    );
    assert!(ctx
        .extra_procs
        .iter()
        .any(|d| matches!(d, IrDecl::Proc { symbol, .. } if symbol.starts_with("drop_glue_"))));
}

#[test]
fn region_statement_lowers_to_a_region_scope() {
    let (modules, _) = lower_source(
        "procedure main() -> i32 {\nvar out = 0\nregion r {\nlet p = ^4\nout = *p\n}\nout\n}\n",
    );
    let body = proc_body_text(&modules, "app::main");
    assert!(body.contains("Region"));
    assert!(body.contains("Alloc"));
}

#[test]
fn dynamic_dispatch_goes_through_the_vtable() {
    let (modules, _) = lower_source(
        "class Drawable { procedure draw(const self) -> i32 }\n\
         procedure render(d: dyn Drawable) -> i32 { d.draw() }\n",
    );
    let body = proc_body_text(&modules, "app::render");
    assert!(body.contains("CallVTable"), "{body}");
    // Slot 3 is the first method: the header holds size, align, drop.
    assert!(body.contains("slot: 3"), "{body}");
}

#[test]
fn vtables_are_emitted_per_record_class_pair() {
    let (modules, _) = lower_source(
        "class Drawable { procedure draw(const self) -> i32 }\n\
         record Dot implements Drawable {\npub x: i32\n\
         procedure draw(const self) -> i32 { self.x }\n}\n\
         procedure main() -> i32 { 0 }\n",
    );
    let vtables: Vec<_> = modules
        .iter()
        .flat_map(|m| m.decls.iter())
        .filter(|d| matches!(d, IrDecl::GlobalVTable { .. }))
        .collect();
    assert_eq!(vtables.len(), 1);
}

#[test]
fn emitted_ll_has_the_win64_header() {
    let (modules, ctx) = lower_source("procedure main() -> i32 { 0 }\n");
    let text = emit_ll(&modules[0], &ctx);
    assert!(text.contains("target triple = \"x86_64-pc-windows-msvc\""));
    assert!(text.contains(
        "e-m:w-p270:32:32-p271:32:32-p272:64:64-i64:64-f80:128-n8:16:32:64-S128"
    ));
    assert!(text.contains("define ccc i64 @\"app::main\""));
}

#[test]
fn emitted_ll_declares_the_runtime_surface() {
    let (modules, ctx) = lower_source("procedure main() -> i32 { 0 }\n");
    let text = emit_ll(&modules[0], &ctx);
    assert!(text.contains("declare ccc i64 @\"cursive::runtime::panic\""));
    assert!(text.contains("declare ccc i64 @\"cursive::runtime::region::alloc\""));
}

#[test]
fn cross_module_calls_check_the_poison_flag() {
    let loaded_a = load_source("a.cursive", b"pub procedure helper() -> i32 { 1 }\n");
    let parsed_a = parse_module(&loaded_a.source.unwrap(), "app::util");
    let loaded_b = load_source(
        "b.cursive",
        b"import app::util\nprocedure main() -> i32 { helper() }\n",
    );
    let parsed_b = parse_module(&loaded_b.source.unwrap(), "app");
    let collected = collect("app", vec![parsed_a.module, parsed_b.module]);
    assert!(!collected.diags.has_error(), "{:?}", collected.diags.ordered());
    let checked = check(&collected.sigma);
    assert!(!checked.diags.has_error(), "{:?}", checked.diags.ordered());
    let (modules, _) = lower_assembly(&collected.sigma, &checked);
    let body = proc_body_text(&modules, "app::main");
    assert!(body.contains("CheckPoison"), "{body}");
}

#[test]
fn bitcopy_values_pass_twice_without_synthesized_moves() {
    let (modules, _) = lower_source(
        "record P implements Bitcopy { pub x: i32 }\n\
         procedure take(move p: P) -> i32 { p.x }\n\
         procedure main() -> i32 {\nlet v = P { x: 1 }\ntake(v) + take(v)\n}\n",
    );
    let body = proc_body_text(&modules, "app::main");
    assert!(!body.contains("MoveState"), "{body}");
}

#[test]
fn async_procedures_get_frame_creator_and_resume() {
    let (_, ctx) = lower_source(
        "async procedure ticker(n: i32) -> Future<i32, i32> { n }\n",
    );
    let symbols: Vec<&str> = ctx
        .extra_procs
        .iter()
        .filter_map(|d| match d {
            IrDecl::Proc { symbol, .. } => Some(symbol.as_str()),
            _ => None,
        })
        .collect();
    assert!(symbols.contains(&"app::ticker"), "{symbols:?}");
    assert!(symbols.contains(&"app::ticker::resume"), "{symbols:?}");
}

#[test]
fn async_frame_slots_are_addressed_off_the_frame_pointer() {
    let (_, ctx) = lower_source(
        "async procedure ticker(n: i32) -> Future<i32, i32> { n }\n",
    );
    let creator = ctx
        .extra_procs
        .iter()
        .find_map(|d| match d {
            IrDecl::Proc { symbol, body, .. } if symbol == "app::ticker" => {
                Some(format!("{body:?}"))
            }
            _ => None,
        })
        .expect("creator lowered");
    // The resume fn and every capture write through a computed slot
    // pointer, never a bare offset immediate.
    assert!(creator.contains("__gep"), "{creator}");
    assert!(!creator.contains("WritePtr { ptr: Immediate"), "{creator}");
    assert!(creator.contains("app::ticker::resume"), "{creator}");
}
