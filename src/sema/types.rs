// SPDX-License-Identifier: PMPL-1.0-or-later

//! The semantic type universe τ.
//!
//! Types are immutable and shared through `Rc`. Recursive record fields go
//! through `Path` handles resolved against Σ, so no type value is ever
//! cyclic. Union members are kept deduplicated and sorted by rendered text
//! so structural equality is set equality.

use std::rc::Rc;

pub type TypeRef = Rc<Ty>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PtrState {
    Valid,
    Null,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawPtrQual {
    Imm,
    Mut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrState {
    View,
    Managed,
}

/// Permission lattice: `Unique ≤ Shared ≤ Const` when read as
/// "provided-for-required".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Permission {
    Const,
    Shared,
    Unique,
}

impl Permission {
    /// `provided` satisfies `required`: a Const requirement accepts any
    /// provider, Shared accepts Shared or Unique, Unique only Unique.
    pub fn satisfies(provided: Permission, required: Permission) -> bool {
        match required {
            Permission::Const => true,
            Permission::Shared => matches!(provided, Permission::Shared | Permission::Unique),
            Permission::Unique => provided == Permission::Unique,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    /// `bool`, `char`, fixed-width ints, `usize`, floats, `"()"`, `"!"`.
    Prim(&'static str),
    Ptr {
        elem: TypeRef,
        state: PtrState,
    },
    RawPtr {
        qual: RawPtrQual,
        elem: TypeRef,
    },
    Slice(TypeRef),
    Array {
        elem: TypeRef,
        len: u64,
    },
    Tuple(Vec<TypeRef>),
    /// Unordered set of non-union members, at least two.
    Union(Vec<TypeRef>),
    StringTy(Option<StrState>),
    BytesTy(Option<StrState>),
    /// Nominal reference into Σ by path key.
    Path {
        key: String,
        args: Vec<TypeRef>,
    },
    Dynamic {
        class_key: String,
    },
    /// A modal value pinned to one state. Builtin modals (`Spawned`)
    /// carry generic arguments.
    ModalState {
        key: String,
        state: String,
        args: Vec<TypeRef>,
    },
    Func {
        params: Vec<TypeRef>,
        ret: TypeRef,
    },
    Range,
    Perm {
        perm: Permission,
        base: TypeRef,
    },
}

pub fn prim(name: &'static str) -> TypeRef {
    Rc::new(Ty::Prim(name))
}

pub fn unit() -> TypeRef {
    prim("()")
}

pub fn never() -> TypeRef {
    prim("!")
}

pub fn boolean() -> TypeRef {
    prim("bool")
}

pub fn usize_ty() -> TypeRef {
    prim("usize")
}

pub fn i32_ty() -> TypeRef {
    prim("i32")
}

pub fn ptr(elem: TypeRef, state: PtrState) -> TypeRef {
    Rc::new(Ty::Ptr { elem, state })
}

pub fn raw_ptr(qual: RawPtrQual, elem: TypeRef) -> TypeRef {
    Rc::new(Ty::RawPtr { qual, elem })
}

pub fn tuple(elems: Vec<TypeRef>) -> TypeRef {
    Rc::new(Ty::Tuple(elems))
}

pub fn path(key: impl Into<String>) -> TypeRef {
    Rc::new(Ty::Path {
        key: key.into(),
        args: Vec::new(),
    })
}

pub fn perm(perm: Permission, base: TypeRef) -> TypeRef {
    // Collapse nested wrappers; the innermost qualifier is the binding one.
    if let Ty::Perm { base: inner, .. } = &*base {
        let inner = inner.clone();
        return Rc::new(Ty::Perm { perm, base: inner });
    }
    Rc::new(Ty::Perm { perm, base })
}

/// Build a union from arbitrary members: flattens nested unions,
/// deduplicates, and sorts. A single surviving member is returned bare.
pub fn union(members: Vec<TypeRef>) -> TypeRef {
    let mut flat: Vec<TypeRef> = Vec::new();
    for member in members {
        match &*member {
            Ty::Union(inner) => flat.extend(inner.iter().cloned()),
            _ => flat.push(member),
        }
    }
    flat.sort_by(|a, b| render(a).cmp(&render(b)));
    flat.dedup_by(|a, b| eq_ty(a, b));
    if flat.len() == 1 {
        return flat.pop().unwrap();
    }
    Rc::new(Ty::Union(flat))
}

pub fn eq_ty(a: &TypeRef, b: &TypeRef) -> bool {
    a == b
}

/// Remove a top-level permission wrapper.
pub fn strip_perm(ty: &TypeRef) -> TypeRef {
    match &**ty {
        Ty::Perm { base, .. } => base.clone(),
        _ => ty.clone(),
    }
}

/// The permission a place of this type provides. Unwrapped types provide
/// Unique (the binding owns them).
pub fn perm_of(ty: &TypeRef) -> Permission {
    match &**ty {
        Ty::Perm { perm, .. } => *perm,
        _ => Permission::Unique,
    }
}

pub fn is_integer(ty: &TypeRef) -> bool {
    matches!(
        &**ty,
        Ty::Prim(name) if matches!(
            *name,
            "i8" | "i16" | "i32" | "i64" | "u8" | "u16" | "u32" | "u64" | "usize"
        )
    )
}

pub fn is_float(ty: &TypeRef) -> bool {
    matches!(&**ty, Ty::Prim("f32") | Ty::Prim("f64"))
}

pub fn is_numeric(ty: &TypeRef) -> bool {
    is_integer(ty) || is_float(ty)
}

pub fn is_bool(ty: &TypeRef) -> bool {
    matches!(&**ty, Ty::Prim("bool"))
}

pub fn is_unit(ty: &TypeRef) -> bool {
    matches!(&**ty, Ty::Prim("()"))
}

pub fn is_never(ty: &TypeRef) -> bool {
    matches!(&**ty, Ty::Prim("!"))
}

/// Inclusive value range of an integer primitive.
pub fn integer_bounds(name: &str) -> Option<(i128, i128)> {
    Some(match name {
        "i8" => (i8::MIN as i128, i8::MAX as i128),
        "i16" => (i16::MIN as i128, i16::MAX as i128),
        "i32" => (i32::MIN as i128, i32::MAX as i128),
        "i64" => (i64::MIN as i128, i64::MAX as i128),
        "u8" => (0, u8::MAX as i128),
        "u16" => (0, u16::MAX as i128),
        "u32" => (0, u32::MAX as i128),
        "u64" | "usize" => (0, u64::MAX as i128),
        _ => return None,
    })
}

/// Nearest common supertype of two types: equal types join to themselves,
/// `!` is absorbed, anything else joins into a union.
pub fn join(a: &TypeRef, b: &TypeRef) -> TypeRef {
    if is_never(a) {
        return b.clone();
    }
    if is_never(b) {
        return a.clone();
    }
    if eq_ty(a, b) {
        return a.clone();
    }
    union(vec![a.clone(), b.clone()])
}

/// Render a type for diagnostics. Stable across runs: used as the sort key
/// for union members.
pub fn render(ty: &TypeRef) -> String {
    match &**ty {
        Ty::Prim(name) => (*name).to_string(),
        Ty::Ptr { elem, state } => {
            let state = match state {
                PtrState::Valid => "Valid",
                PtrState::Null => "Null",
                PtrState::Expired => "Expired",
            };
            format!("Ptr<{}>@{state}", render(elem))
        }
        Ty::RawPtr { qual, elem } => {
            let qual = match qual {
                RawPtrQual::Imm => "imm",
                RawPtrQual::Mut => "mut",
            };
            format!("rawptr[{qual}, {}]", render(elem))
        }
        Ty::Slice(elem) => format!("[{}]", render(elem)),
        Ty::Array { elem, len } => format!("[{}; {len}]", render(elem)),
        Ty::Tuple(elems) => format!(
            "({})",
            elems.iter().map(render).collect::<Vec<_>>().join(", ")
        ),
        Ty::Union(members) => members
            .iter()
            .map(render)
            .collect::<Vec<_>>()
            .join(" | "),
        Ty::StringTy(state) => format!("String{}", str_state(state)),
        Ty::BytesTy(state) => format!("Bytes{}", str_state(state)),
        Ty::Path { key, args } => {
            if args.is_empty() {
                key.clone()
            } else {
                format!(
                    "{key}<{}>",
                    args.iter().map(render).collect::<Vec<_>>().join(", ")
                )
            }
        }
        Ty::Dynamic { class_key } => format!("dyn {class_key}"),
        Ty::ModalState { key, state, args } => {
            if args.is_empty() {
                format!("{key}@{state}")
            } else {
                format!(
                    "{key}<{}>@{state}",
                    args.iter().map(render).collect::<Vec<_>>().join(", ")
                )
            }
        }
        Ty::Func { params, ret } => format!(
            "proc({}) -> {}",
            params.iter().map(render).collect::<Vec<_>>().join(", "),
            render(ret)
        ),
        Ty::Range => "Range".to_string(),
        Ty::Perm { perm, base } => {
            let perm = match perm {
                Permission::Const => "const",
                Permission::Shared => "shared",
                Permission::Unique => "unique",
            };
            format!("{perm} {}", render(base))
        }
    }
}

fn str_state(state: &Option<StrState>) -> &'static str {
    match state {
        Some(StrState::View) => "@View",
        Some(StrState::Managed) => "@Managed",
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_lattice() {
        use Permission::*;
        assert!(Permission::satisfies(Unique, Const));
        assert!(Permission::satisfies(Shared, Const));
        assert!(Permission::satisfies(Unique, Shared));
        assert!(!Permission::satisfies(Const, Shared));
        assert!(!Permission::satisfies(Shared, Unique));
    }

    #[test]
    fn union_is_a_set() {
        let a = union(vec![prim("i32"), prim("bool"), prim("i32")]);
        let b = union(vec![prim("bool"), prim("i32")]);
        assert!(eq_ty(&a, &b));
    }

    #[test]
    fn join_absorbs_never() {
        let joined = join(&never(), &prim("u8"));
        assert!(eq_ty(&joined, &prim("u8")));
    }
}
