// SPDX-License-Identifier: PMPL-1.0-or-later

//! Win64 layout rules.
//!
//! Record layout walks fields in declaration order, rounding each offset
//! up to the field's alignment; struct alignment is the max field
//! alignment and the size rounds up to it. Enums pick the smallest
//! discriminant that distinguishes their variants. Pointers are 8/8;
//! slices and `dyn` values are two pointers.

use crate::diag::DiagnosticStream;
use crate::sema::resolve::lower_type;
use crate::sema::symbols::{Declaration, SymbolTable};
use crate::sema::types::{StrState, Ty, TypeRef};

pub const PTR_SIZE: u64 = 8;
pub const PTR_ALIGN: u64 = 8;

/// Async frame header: `(resume_state: u64, resume_fn: *const ())`.
pub const ASYNC_FRAME_RESUME_STATE_OFFSET: u64 = 0;
pub const ASYNC_FRAME_RESUME_FN_OFFSET: u64 = 8;
pub const ASYNC_FRAME_HEADER_SIZE: u64 = 16;
pub const ASYNC_FRAME_HEADER_ALIGN: u64 = 8;

pub fn align_up(offset: u64, align: u64) -> u64 {
    if align <= 1 {
        return offset;
    }
    offset.div_ceil(align) * align
}

fn prim_size_align(name: &str) -> Option<(u64, u64)> {
    Some(match name {
        "()" | "!" => (0, 1),
        "bool" | "i8" | "u8" => (1, 1),
        "i16" | "u16" => (2, 2),
        "char" | "i32" | "u32" | "f32" => (4, 4),
        "i64" | "u64" | "usize" | "f64" => (8, 8),
        _ => return None,
    })
}

/// The smallest unsigned discriminant that distinguishes `count` cases.
pub fn discriminant_size(count: usize) -> u64 {
    match count {
        0..=0x100 => 1,
        0x101..=0x1_0000 => 2,
        0x1_0001..=0x1_0000_0000 => 4,
        _ => 8,
    }
}

/// `(size, align)` of a type, or `None` while Σ is inconsistent (an
/// unresolved field type, a recursive record without indirection).
pub fn size_align(sigma: &SymbolTable, ty: &TypeRef) -> Option<(u64, u64)> {
    size_align_guarded(sigma, ty, &mut Vec::new())
}

fn size_align_guarded(
    sigma: &SymbolTable,
    ty: &TypeRef,
    visiting: &mut Vec<String>,
) -> Option<(u64, u64)> {
    match &**ty {
        Ty::Prim(name) => prim_size_align(name),
        Ty::Ptr { .. } | Ty::RawPtr { .. } | Ty::Func { .. } => Some((PTR_SIZE, PTR_ALIGN)),
        Ty::Slice(_) | Ty::Dynamic { .. } => Some((2 * PTR_SIZE, PTR_ALIGN)),
        Ty::StringTy(state) | Ty::BytesTy(state) => match state {
            Some(StrState::View) => Some((2 * PTR_SIZE, PTR_ALIGN)),
            _ => Some((3 * PTR_SIZE, PTR_ALIGN)),
        },
        Ty::Range => Some((16, 8)),
        Ty::Array { elem, len } => {
            let (size, align) = size_align_guarded(sigma, elem, visiting)?;
            let stride = align_up(size, align);
            Some((stride * len, align))
        }
        Ty::Tuple(elems) => {
            let lowered: Option<Vec<(u64, u64)>> = elems
                .iter()
                .map(|e| size_align_guarded(sigma, e, visiting))
                .collect();
            Some(struct_of(&lowered?))
        }
        Ty::Union(members) => {
            let tag = discriminant_size(members.len());
            let mut size = 0u64;
            let mut align = tag;
            for member in members {
                let (s, a) = size_align_guarded(sigma, member, visiting)?;
                align = align.max(a);
                size = size.max(s);
            }
            let payload = align_up(tag, align);
            Some((align_up(payload + size, align), align))
        }
        Ty::Perm { base, .. } => size_align_guarded(sigma, base, visiting),
        Ty::ModalState { key, .. } => modal_size_align(sigma, key, visiting),
        Ty::Path { key, .. } => {
            if visiting.iter().any(|k| k == key) {
                return None;
            }
            visiting.push(key.clone());
            let out = match sigma.lookup(key) {
                Some(Declaration::Record(record)) => {
                    let module = owner_module(key);
                    let mut parts = Vec::new();
                    for field in &record.fields {
                        let mut scratch = DiagnosticStream::new();
                        let ty = lower_type(sigma, module, &field.ty, &mut scratch)?;
                        parts.push(size_align_guarded(sigma, &ty, visiting)?);
                    }
                    Some(struct_of(&parts))
                }
                Some(Declaration::Enum(decl)) => {
                    let disc = discriminant_size(decl.variants.len());
                    let module = owner_module(key);
                    let mut size = 0u64;
                    let mut align = disc;
                    for variant in &decl.variants {
                        let mut parts = Vec::new();
                        for ty in &variant.payload {
                            let mut scratch = DiagnosticStream::new();
                            let lowered = lower_type(sigma, module, ty, &mut scratch)?;
                            parts.push(size_align_guarded(sigma, &lowered, visiting)?);
                        }
                        let (psize, palign) = struct_of(&parts);
                        align = align.max(palign);
                        size = size.max(align_up(disc, palign.max(1)) + psize);
                    }
                    Some((align_up(size.max(disc), align), align))
                }
                Some(Declaration::Modal(_)) => modal_size_align(sigma, key, visiting),
                _ => None,
            };
            visiting.pop();
            out
        }
    }
}

/// Modal layout: state selector, then the common-field prefix, then the
/// largest state payload.
fn modal_size_align(
    sigma: &SymbolTable,
    key: &str,
    visiting: &mut Vec<String>,
) -> Option<(u64, u64)> {
    match key {
        // Runtime handles.
        "Region" | "Spawned" | "CancelToken" => return Some((PTR_SIZE, PTR_ALIGN)),
        _ => {}
    }
    let Some(Declaration::Modal(decl)) = sigma.lookup(key) else {
        return None;
    };
    if visiting.iter().any(|k| k == key) {
        return None;
    }
    visiting.push(key.to_string());
    let module = owner_module(key);
    let selector = discriminant_size(decl.states.len());

    let mut common = vec![(selector, selector)];
    let mut out = None;
    'build: {
        for field in &decl.common_fields {
            let mut scratch = DiagnosticStream::new();
            let Some(ty) = lower_type(sigma, module, &field.ty, &mut scratch) else {
                break 'build;
            };
            let Some(part) = size_align_guarded(sigma, &ty, visiting) else {
                break 'build;
            };
            common.push(part);
        }
        let (prefix_size, prefix_align) = struct_of(&common);
        let mut size = prefix_size;
        let mut align = prefix_align;
        for state in &decl.states {
            let mut parts = Vec::new();
            for field in &state.fields {
                let mut scratch = DiagnosticStream::new();
                let Some(ty) = lower_type(sigma, module, &field.ty, &mut scratch) else {
                    break 'build;
                };
                let Some(part) = size_align_guarded(sigma, &ty, visiting) else {
                    break 'build;
                };
                parts.push(part);
            }
            let (psize, palign) = struct_of(&parts);
            align = align.max(palign);
            size = size.max(align_up(prefix_size, palign.max(1)) + psize);
        }
        out = Some((align_up(size, align), align));
    }
    visiting.pop();
    out
}

/// Aggregate `(size, align)` from ordered member layouts.
fn struct_of(parts: &[(u64, u64)]) -> (u64, u64) {
    let mut offset = 0u64;
    let mut align = 1u64;
    for (size, a) in parts {
        let a = (*a).max(1);
        offset = align_up(offset, a) + size;
        align = align.max(a);
    }
    (align_up(offset, align), align)
}

/// Byte offset of `field` inside `record_key`.
pub fn field_offset(sigma: &SymbolTable, record_key: &str, field: &str) -> Option<u64> {
    let Some(Declaration::Record(record)) = sigma.lookup(record_key) else {
        return None;
    };
    let module = owner_module(record_key);
    let mut offset = 0u64;
    for decl in &record.fields {
        let mut scratch = DiagnosticStream::new();
        let ty = lower_type(sigma, module, &decl.ty, &mut scratch)?;
        let (size, align) = size_align(sigma, &ty)?;
        offset = align_up(offset, align.max(1));
        if decl.name == field {
            return Some(offset);
        }
        offset += size;
    }
    None
}

fn owner_module(key: &str) -> &str {
    key.rsplit_once("::").map(|(m, _)| m).unwrap_or("")
}

/// V-table layout for a class: size/align header, the drop slot, then one
/// slot per method in declaration order.
#[derive(Debug, Clone)]
pub struct VTableLayout {
    pub class_key: String,
    pub methods: Vec<String>,
}

pub const VTABLE_HEADER_SLOTS: usize = 3;

impl VTableLayout {
    pub fn of(sigma: &SymbolTable, class_key: &str) -> Option<VTableLayout> {
        let Some(Declaration::Class(class)) = sigma.lookup(class_key) else {
            return None;
        };
        Some(VTableLayout {
            class_key: class_key.to_string(),
            methods: class.methods.iter().map(|m| m.name.clone()).collect(),
        })
    }

    /// Slot index of a method: header (size, align, drop) comes first.
    pub fn slot_of(&self, method: &str) -> Option<usize> {
        self.methods
            .iter()
            .position(|m| m == method)
            .map(|i| VTABLE_HEADER_SLOTS + i)
    }
}

/// Frame layout for an async procedure: header plus one slot per captured
/// variable, in declaration order.
#[derive(Debug, Clone)]
pub struct AsyncFrame {
    pub size: u64,
    pub align: u64,
    pub slots: Vec<(String, u64)>,
}

pub fn async_frame(
    sigma: &SymbolTable,
    captures: &[(String, TypeRef)],
) -> Option<AsyncFrame> {
    let mut offset = ASYNC_FRAME_HEADER_SIZE;
    let mut align = ASYNC_FRAME_HEADER_ALIGN;
    let mut slots = Vec::with_capacity(captures.len());
    for (name, ty) in captures {
        let (size, a) = size_align(sigma, ty)?;
        let a = a.max(1);
        offset = align_up(offset, a);
        slots.push((name.clone(), offset));
        offset += size;
        align = align.max(a);
    }
    Some(AsyncFrame {
        size: align_up(offset, align),
        align,
        slots,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::symbols::collect;
    use crate::sema::types::{self, PtrState};
    use crate::source::load_source;
    use crate::syntax::parser::parse_module;
    use std::rc::Rc;

    fn sigma_of(text: &str) -> SymbolTable {
        let loaded = load_source("t.cursive", text.as_bytes());
        let parsed = parse_module(&loaded.source.unwrap(), "app");
        collect("app", vec![parsed.module]).sigma
    }

    #[test]
    fn primitive_table() {
        let sigma = sigma_of("");
        assert_eq!(size_align(&sigma, &types::prim("bool")), Some((1, 1)));
        assert_eq!(size_align(&sigma, &types::prim("char")), Some((4, 4)));
        assert_eq!(size_align(&sigma, &types::prim("usize")), Some((8, 8)));
        assert_eq!(size_align(&sigma, &types::unit()), Some((0, 1)));
    }

    #[test]
    fn record_field_offsets_round_up() {
        let sigma = sigma_of("record Mixed { pub a: u8\npub b: u32\npub c: u8 }\n");
        let key = "app::Mixed";
        assert_eq!(field_offset(&sigma, key, "a"), Some(0));
        assert_eq!(field_offset(&sigma, key, "b"), Some(4));
        assert_eq!(field_offset(&sigma, key, "c"), Some(8));
        let ty = types::path(key);
        assert_eq!(size_align(&sigma, &ty), Some((12, 4)));
    }

    #[test]
    fn enum_discriminant_is_minimal() {
        assert_eq!(discriminant_size(2), 1);
        assert_eq!(discriminant_size(257), 2);
        let sigma = sigma_of("enum Tag { A, B, C }\n");
        let ty = types::path("app::Tag");
        assert_eq!(size_align(&sigma, &ty), Some((1, 1)));
    }

    #[test]
    fn pointers_are_word_sized() {
        let sigma = sigma_of("");
        let p = types::ptr(types::prim("i64"), PtrState::Valid);
        assert_eq!(size_align(&sigma, &p), Some((8, 8)));
        let d = Rc::new(crate::sema::types::Ty::Dynamic {
            class_key: "$FileSystem".into(),
        });
        assert_eq!(size_align(&sigma, &d), Some((16, 8)));
    }

    #[test]
    fn async_frame_header_is_fixed() {
        let sigma = sigma_of("");
        let frame = async_frame(
            &sigma,
            &[
                ("a".to_string(), types::prim("u8")),
                ("b".to_string(), types::prim("u64")),
            ],
        )
        .unwrap();
        assert_eq!(frame.slots[0].1, 16);
        assert_eq!(frame.slots[1].1, 24);
        assert_eq!(frame.size, 32);
    }
}
