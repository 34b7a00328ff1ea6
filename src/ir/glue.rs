// SPDX-License-Identifier: PMPL-1.0-or-later

//! Synthesized procedures: drop glue and v-tables.
//!
//! For every non-Bitcopy type that can occur in a binding or temporary,
//! the lowering phase synthesizes
//! `drop_glue_<mangled-type>(data: *const (), panic_out)` with
//! LinkOnceODR linkage so duplicate instantiations fold at link time.
//! Bitcopy types have no glue.

use crate::diag::DiagnosticStream;
use crate::ir::layout::{align_up, discriminant_size, field_offset, size_align, VTableLayout};
use crate::ir::{Inst, InstNode, IrDecl, IrParam, Linkage, Value};
use crate::sema::check::is_bitcopy;
use crate::sema::resolve::lower_type;
use crate::sema::symbols::{Declaration, SymbolTable};
use crate::sema::types::{render, StrState, Ty, TypeRef};
use crate::source::Span;

/// Symbol-safe mangling of a rendered type.
pub fn mangle_type(ty: &TypeRef) -> String {
    render(ty)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn drop_glue_symbol(ty: &TypeRef) -> String {
    format!("drop_glue_{}", mangle_type(ty))
}

/// Build the drop-glue procedure for one non-bitcopy type. Recursive
/// descent through fields dispatches to nested glue; leaves call the
/// runtime's managed-buffer drops.
pub fn synthesize_drop_glue(sigma: &SymbolTable, ty: &TypeRef) -> Option<IrDecl> {
    if is_bitcopy(sigma, ty) {
        return None;
    }
    let body = drop_body(sigma, ty, Value::Local(0))?;
    Some(IrDecl::Proc {
        symbol: drop_glue_symbol(ty),
        params: vec![
            IrParam {
                name: "data".into(),
                pass: crate::ir::abi::PassKind::ByRef,
                ptr_valid: true,
            },
            IrParam {
                name: "__panic".into(),
                pass: crate::ir::abi::PassKind::ByValue,
                ptr_valid: false,
            },
        ],
        ret: crate::ir::abi::PassKind::ByValue,
        has_sret: false,
        linkage: Linkage::LinkOnceOdr,
        body,
    })
}

fn call_runtime(symbol: &str, data: Value) -> Inst {
    Inst::new(
        InstNode::Call {
            callee: Value::Symbol(symbol.to_string()),
            args: vec![data],
            result: None,
        },
        Span::default(),
    )
}

fn glue_call(ty: &TypeRef, data: &Value, offset: u64) -> Inst {
    Inst::new(
        InstNode::Call {
            callee: Value::Symbol(drop_glue_symbol(ty)),
            args: vec![data.clone(), Value::imm_u64(offset)],
            result: None,
        },
        Span::default(),
    )
}

/// Load the tag word at the base pointer and switch on it. Glue
/// procedures use locals 0 (data) and 1 (panic out); the tag takes 2.
fn tag_dispatch(data: Value, arms: Vec<(u64, Inst)>) -> Inst {
    let tag_local = 2;
    Inst::seq(
        vec![
            Inst::new(
                InstNode::ReadPtr {
                    ptr: data,
                    result: tag_local,
                },
                Span::default(),
            ),
            Inst::new(
                InstNode::Match {
                    scrutinee: Value::Local(tag_local),
                    arms,
                    default: Some(Box::new(Inst::seq(Vec::new(), Span::default()))),
                    result: None,
                },
                Span::default(),
            ),
        ],
        Span::default(),
    )
}

/// Drop steps for a payload laid out after a tag of `disc` bytes: the
/// payload block starts at its own alignment past the tag, each member
/// rounds up to its alignment.
fn payload_drop_steps(
    sigma: &SymbolTable,
    parts: &[TypeRef],
    disc: u64,
    data: &Value,
) -> Option<Vec<Inst>> {
    let mut rel = Vec::with_capacity(parts.len());
    let mut offset = 0u64;
    let mut payload_align = 1u64;
    for ty in parts {
        let (size, align) = size_align(sigma, ty)?;
        let align = align.max(1);
        offset = align_up(offset, align);
        rel.push(offset);
        offset += size;
        payload_align = payload_align.max(align);
    }
    let base = align_up(disc, payload_align);
    let mut steps = Vec::new();
    for (ty, rel_offset) in parts.iter().zip(rel) {
        if is_bitcopy(sigma, ty) {
            continue;
        }
        steps.push(glue_call(ty, data, base + rel_offset));
    }
    Some(steps)
}

fn drop_body(sigma: &SymbolTable, ty: &TypeRef, data: Value) -> Option<Inst> {
    let node = match &**ty {
        Ty::StringTy(Some(StrState::Managed)) | Ty::StringTy(None) => {
            return Some(call_runtime("cursive::runtime::string::drop_managed", data));
        }
        Ty::BytesTy(Some(StrState::Managed)) | Ty::BytesTy(None) => {
            return Some(call_runtime("cursive::runtime::bytes::drop_managed", data));
        }
        Ty::Path { key, .. } => match sigma.lookup(key) {
            Some(Declaration::Record(record)) => {
                let module = key.rsplit_once("::").map(|(m, _)| m).unwrap_or("");
                let mut steps = Vec::new();
                for field in &record.fields {
                    let mut scratch = DiagnosticStream::new();
                    let field_ty = lower_type(sigma, module, &field.ty, &mut scratch)?;
                    if is_bitcopy(sigma, &field_ty) {
                        continue;
                    }
                    // Each non-bitcopy field dispatches to its own glue at
                    // the field's offset.
                    let offset = field_offset(sigma, key, &field.name)?;
                    steps.push(glue_call(&field_ty, &data, offset));
                }
                InstNode::Seq(steps)
            }
            Some(Declaration::Enum(decl)) => {
                // Load the discriminant, then switch: each variant's arm
                // dispatches to nested glue at its payload offsets.
                let module = key.rsplit_once("::").map(|(m, _)| m).unwrap_or("");
                let disc = discriminant_size(decl.variants.len());
                let mut arms = Vec::new();
                for (tag, variant) in decl.variants.iter().enumerate() {
                    let mut payload = Vec::new();
                    for ty in &variant.payload {
                        let mut scratch = DiagnosticStream::new();
                        payload.push(lower_type(sigma, module, ty, &mut scratch)?);
                    }
                    let steps = payload_drop_steps(sigma, &payload, disc, &data)?;
                    arms.push((tag as u64, Inst::seq(steps, Span::default())));
                }
                InstNode::Seq(vec![tag_dispatch(data, arms)])
            }
            Some(Declaration::Modal(decl)) => {
                // Common fields drop unconditionally after the selector;
                // the switch covers each state's own payload.
                let module = key.rsplit_once("::").map(|(m, _)| m).unwrap_or("");
                let selector = discriminant_size(decl.states.len());
                let mut steps = Vec::new();
                let mut offset = selector;
                let mut prefix_align = selector.max(1);
                for field in &decl.common_fields {
                    let mut scratch = DiagnosticStream::new();
                    let field_ty = lower_type(sigma, module, &field.ty, &mut scratch)?;
                    let (size, align) = size_align(sigma, &field_ty)?;
                    let align = align.max(1);
                    offset = align_up(offset, align);
                    if !is_bitcopy(sigma, &field_ty) {
                        steps.push(glue_call(&field_ty, &data, offset));
                    }
                    offset += size;
                    prefix_align = prefix_align.max(align);
                }
                let prefix_size = align_up(offset, prefix_align);
                let mut arms = Vec::new();
                for (tag, state) in decl.states.iter().enumerate() {
                    let mut payload = Vec::new();
                    for field in &state.fields {
                        let mut scratch = DiagnosticStream::new();
                        payload.push(lower_type(sigma, module, &field.ty, &mut scratch)?);
                    }
                    let arm_steps = payload_drop_steps(sigma, &payload, prefix_size, &data)?;
                    arms.push((tag as u64, Inst::seq(arm_steps, Span::default())));
                }
                steps.push(tag_dispatch(data, arms));
                InstNode::Seq(steps)
            }
            _ => return None,
        },
        Ty::Perm { base, .. } => return drop_body(sigma, base, data),
        Ty::ModalState { key, .. } => {
            return drop_body(
                sigma,
                &crate::sema::types::path(key.clone()),
                data,
            );
        }
        _ => InstNode::Seq(Vec::new()),
    };
    Some(Inst::new(node, Span::default()))
}

/// Emit one v-table global per (record, implemented class) pair. Slots
/// follow the class's method order; the header carries the record's size,
/// alignment, and drop slot.
pub fn synthesize_vtables(sigma: &SymbolTable) -> Vec<IrDecl> {
    let mut out = Vec::new();
    for module in &sigma.parsed {
        for item in &module.items {
            let crate::syntax::ast::Item::Record(record) = item else {
                continue;
            };
            let record_key = format!("{}::{}", module.path_key, record.name);
            let record_ty = crate::sema::types::path(record_key.clone());
            let Some((size, align)) = size_align(sigma, &record_ty) else {
                continue;
            };
            for class_path in &record.implements {
                let Some(class_key) =
                    crate::sema::resolve::resolve_path(sigma, &module.path_key, class_path)
                else {
                    continue;
                };
                let Some(layout) = VTableLayout::of(sigma, &class_key) else {
                    continue;
                };
                if layout.methods.is_empty() && class_key == "Bitcopy" {
                    // Marker classes dispatch nothing.
                    continue;
                }
                let slots = layout
                    .methods
                    .iter()
                    .map(|m| format!("{record_key}::{m}"))
                    .collect();
                let drop_symbol = (!is_bitcopy(sigma, &record_ty))
                    .then(|| drop_glue_symbol(&record_ty));
                out.push(IrDecl::GlobalVTable {
                    symbol: vtable_symbol(&record_key, &class_key),
                    size,
                    align,
                    drop_symbol,
                    slots,
                });
            }
        }
    }
    out
}

pub fn vtable_symbol(record_key: &str, class_key: &str) -> String {
    format!(
        "vtable_{}__{}",
        record_key.replace("::", "_"),
        class_key.replace(['$', ':'], "_")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::symbols::collect;
    use crate::source::load_source;
    use crate::syntax::parser::parse_module;
    use std::rc::Rc;

    fn sigma_of(text: &str) -> SymbolTable {
        let loaded = load_source("t.cursive", text.as_bytes());
        let parsed = parse_module(&loaded.source.unwrap(), "app");
        collect("app", vec![parsed.module]).sigma
    }

    #[test]
    fn bitcopy_types_have_no_glue() {
        let sigma = sigma_of("");
        assert!(synthesize_drop_glue(&sigma, &crate::sema::types::prim("i32")).is_none());
    }

    #[test]
    fn managed_string_glue_calls_the_runtime() {
        let sigma = sigma_of("");
        let ty: TypeRef = Rc::new(Ty::StringTy(Some(StrState::Managed)));
        let decl = synthesize_drop_glue(&sigma, &ty).expect("glue expected");
        match decl {
            IrDecl::Proc { linkage, body, .. } => {
                assert_eq!(linkage, Linkage::LinkOnceOdr);
                assert!(matches!(
                    body.node,
                    InstNode::Call { callee: Value::Symbol(ref s), .. }
                        if s == "cursive::runtime::string::drop_managed"
                ));
            }
            _ => panic!("expected a Proc"),
        }
    }

    #[test]
    fn enum_glue_dispatches_per_variant() {
        let sigma = sigma_of("enum Message { Quit, Text(String@Managed) }\n");
        let ty = crate::sema::types::path("app::Message");
        let decl = synthesize_drop_glue(&sigma, &ty).expect("glue expected");
        let IrDecl::Proc { body, .. } = decl else {
            panic!("expected a Proc");
        };
        let text = format!("{body:?}");
        assert!(text.contains("Match"), "{text}");
        assert!(text.contains("drop_glue_String_Managed"), "{text}");
        // One-byte tag, 8-aligned payload: the managed string sits at 8.
        assert!(text.contains("Immediate([8, 0,"), "{text}");
    }

    #[test]
    fn modal_glue_covers_common_and_state_payloads() {
        let sigma = sigma_of(
            "modal Session {\nname: String@Managed\nstate Idle {\n}\nstate Busy {\njob: String@Managed\n}\n}\n",
        );
        let ty = crate::sema::types::path("app::Session");
        let decl = synthesize_drop_glue(&sigma, &ty).expect("glue expected");
        let IrDecl::Proc { body, .. } = decl else {
            panic!("expected a Proc");
        };
        let text = format!("{body:?}");
        assert!(text.contains("Match"), "{text}");
        // The common `name` drops unconditionally; the Busy arm drops
        // `job` on top of that.
        assert_eq!(text.matches("drop_glue_String_Managed").count(), 2, "{text}");
    }

    #[test]
    fn vtable_per_implemented_class() {
        let sigma = sigma_of(
            "class Drawable { procedure draw(const self) -> i32 }\n\
             record Dot implements Drawable {\npub x: i32\n\
             procedure draw(const self) -> i32 { self.x }\n}\n",
        );
        let tables = synthesize_vtables(&sigma);
        assert_eq!(tables.len(), 1);
        match &tables[0] {
            IrDecl::GlobalVTable { slots, .. } => {
                assert_eq!(slots, &vec!["app::Dot::draw".to_string()]);
            }
            _ => panic!("expected a vtable"),
        }
    }
}
