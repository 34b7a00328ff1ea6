// SPDX-License-Identifier: PMPL-1.0-or-later

//! Name resolution (phase P2, resolution half).
//!
//! Lowers written type expressions to τ against Σ, expanding aliases and
//! validating visibility. Signatures and fields resolve here; identifiers
//! inside procedure bodies resolve through the type environment in P3,
//! which reuses [`lower_type`] for every annotation it meets.

use crate::diag::{Diagnostic, DiagnosticStream};
use crate::sema::symbols::{Declaration, SymbolTable};
use crate::sema::types::{self, Permission, PtrState, RawPtrQual, StrState, Ty, TypeRef};
use crate::syntax::ast::{
    self, Item, PermName, PtrStateName, TypeExpr, TypeNode,
};
use std::rc::Rc;

/// Resolve a written path (`a::b::C` or bare `C`) to a Σ key as seen from
/// `module_key`.
pub fn resolve_path(
    sigma: &SymbolTable,
    module_key: &str,
    path: &[String],
) -> Option<String> {
    if path.len() == 1 {
        return sigma.resolve_in_module(module_key, &path[0]);
    }
    let joined = path.join("::");
    if sigma.decls.contains_key(&joined) {
        return Some(joined);
    }
    // The head may be a `using` alias for a module.
    if let Some(head) = path.first() {
        if let Some(target) = sigma.resolve_in_module(module_key, head) {
            let rest = path[1..].join("::");
            let key = format!("{target}::{rest}");
            if sigma.decls.contains_key(&key) {
                return Some(key);
            }
        }
    }
    None
}

/// Lower one written type to τ. Emits diagnostics for unresolved or
/// inaccessible names; returns `None` only on such failures.
pub fn lower_type(
    sigma: &SymbolTable,
    module_key: &str,
    ty: &TypeExpr,
    diags: &mut DiagnosticStream,
) -> Option<TypeRef> {
    match &ty.node {
        TypeNode::Prim(name) => Some(types::prim(intern_prim(name)?)),
        TypeNode::Ptr { elem, state } => {
            let elem = lower_type(sigma, module_key, elem, diags)?;
            let state = match state {
                Some(PtrStateName::Valid) | None => PtrState::Valid,
                Some(PtrStateName::Null) => PtrState::Null,
                Some(PtrStateName::Expired) => PtrState::Expired,
            };
            Some(types::ptr(elem, state))
        }
        TypeNode::RawPtr { qual, elem } => {
            let elem = lower_type(sigma, module_key, elem, diags)?;
            let qual = match qual {
                ast::RawPtrQual::Imm => RawPtrQual::Imm,
                ast::RawPtrQual::Mut => RawPtrQual::Mut,
            };
            Some(types::raw_ptr(qual, elem))
        }
        TypeNode::Slice { elem } => {
            let elem = lower_type(sigma, module_key, elem, diags)?;
            Some(Rc::new(Ty::Slice(elem)))
        }
        TypeNode::Array { elem, len } => {
            let elem = lower_type(sigma, module_key, elem, diags)?;
            Some(Rc::new(Ty::Array { elem, len: *len }))
        }
        TypeNode::Tuple(elems) => {
            let mut out = Vec::with_capacity(elems.len());
            for elem in elems {
                out.push(lower_type(sigma, module_key, elem, diags)?);
            }
            Some(types::tuple(out))
        }
        TypeNode::Union(members) => {
            let mut out = Vec::with_capacity(members.len());
            for member in members {
                out.push(lower_type(sigma, module_key, member, diags)?);
            }
            Some(types::union(out))
        }
        TypeNode::StringTy(state) => Some(Rc::new(Ty::StringTy(lower_str_state(state)))),
        TypeNode::BytesTy(state) => Some(Rc::new(Ty::BytesTy(lower_str_state(state)))),
        TypeNode::PathTy { path, args } => {
            lower_path_type(sigma, module_key, path, args, ty, diags)
        }
        TypeNode::Dynamic { path } => {
            let key = resolve_path(sigma, module_key, path).or_else(|| {
                diags.emit(Diagnostic::from_code(
                    "E-SEM-3007",
                    Some(ty.span.clone()),
                    Some(&path.join("::")),
                ));
                None
            })?;
            match sigma.lookup(&key) {
                Some(Declaration::Class(_)) => Some(Rc::new(Ty::Dynamic { class_key: key })),
                _ => {
                    diags.emit(Diagnostic::from_code(
                        "E-SEM-3007",
                        Some(ty.span.clone()),
                        Some(&format!("{key} is not a class")),
                    ));
                    None
                }
            }
        }
        TypeNode::ModalState { path, state } => {
            // Builtin `Region@…` states resolve without a Σ entry.
            if path.len() == 1 && path[0] == "Region" {
                if !matches!(state.as_str(), "Active" | "Frozen" | "Freed") {
                    diags.emit(Diagnostic::from_code(
                        "E-MOD-0204",
                        Some(ty.span.clone()),
                        Some(state),
                    ));
                    return None;
                }
                return Some(Rc::new(Ty::ModalState {
                    key: "Region".into(),
                    state: state.clone(),
                    args: Vec::new(),
                }));
            }
            let key = resolve_path(sigma, module_key, path).or_else(|| {
                diags.emit(Diagnostic::from_code(
                    "E-SEM-3007",
                    Some(ty.span.clone()),
                    Some(&path.join("::")),
                ));
                None
            })?;
            match sigma.lookup(&key) {
                Some(Declaration::Modal(modal)) => {
                    if !modal.states.iter().any(|s| s.name == *state) {
                        diags.emit(Diagnostic::from_code(
                            "E-MOD-0204",
                            Some(ty.span.clone()),
                            Some(&format!("{key}@{state}")),
                        ));
                        return None;
                    }
                    Some(Rc::new(Ty::ModalState {
                        key,
                        state: state.clone(),
                        args: Vec::new(),
                    }))
                }
                _ => {
                    diags.emit(Diagnostic::from_code(
                        "E-SEM-3007",
                        Some(ty.span.clone()),
                        Some(&format!("{key} is not a modal type")),
                    ));
                    None
                }
            }
        }
        TypeNode::Func { params, ret } => {
            let mut lowered = Vec::with_capacity(params.len());
            for param in params {
                lowered.push(lower_type(sigma, module_key, param, diags)?);
            }
            let ret = lower_type(sigma, module_key, ret, diags)?;
            Some(Rc::new(Ty::Func {
                params: lowered,
                ret,
            }))
        }
        TypeNode::Range => Some(Rc::new(Ty::Range)),
        TypeNode::Perm { perm, base } => {
            let base = lower_type(sigma, module_key, base, diags)?;
            let perm = match perm {
                PermName::Const => Permission::Const,
                PermName::Shared => Permission::Shared,
                PermName::Unique => Permission::Unique,
            };
            Some(types::perm(perm, base))
        }
    }
}

fn lower_path_type(
    sigma: &SymbolTable,
    module_key: &str,
    path: &[String],
    args: &[ast::TypePtr],
    ty: &TypeExpr,
    diags: &mut DiagnosticStream,
) -> Option<TypeRef> {
    // Builtin generic carriers.
    if path.len() == 1 {
        match path[0].as_str() {
            "Region" => {
                return Some(Rc::new(Ty::ModalState {
                    key: "Region".into(),
                    state: "Active".into(),
                    args: Vec::new(),
                }))
            }
            "Spawned" | "Async" | "Future" | "Stream" | "Sequence" | "CancelToken" => {
                let mut lowered = Vec::with_capacity(args.len());
                for arg in args {
                    lowered.push(lower_type(sigma, module_key, arg, diags)?);
                }
                return Some(normalize_async(&path[0], lowered));
            }
            _ => {}
        }
    }

    let key = resolve_path(sigma, module_key, path).or_else(|| {
        diags.emit(Diagnostic::from_code(
            "E-SEM-3007",
            Some(ty.span.clone()),
            Some(&path.join("::")),
        ));
        None
    })?;
    if !sigma.is_accessible(&key, module_key) {
        diags.emit(Diagnostic::from_code(
            "E-SEM-3010",
            Some(ty.span.clone()),
            Some(&key),
        ));
        return None;
    }
    match sigma.lookup(&key) {
        Some(Declaration::TypeAlias(alias)) => {
            // Aliases expand at resolution so τ never mentions them.
            lower_type(sigma, module_key, &alias.ty, diags)
        }
        Some(Declaration::Record(_)) | Some(Declaration::Enum(_)) | Some(Declaration::Modal(_)) => {
            let mut lowered = Vec::with_capacity(args.len());
            for arg in args {
                lowered.push(lower_type(sigma, module_key, arg, diags)?);
            }
            Some(Rc::new(Ty::Path { key, args: lowered }))
        }
        Some(Declaration::Class(_)) => Some(Rc::new(Ty::Dynamic { class_key: key })),
        Some(_) => {
            diags.emit(Diagnostic::from_code(
                "E-SEM-3007",
                Some(ty.span.clone()),
                Some(&format!("{key} is not a type")),
            ));
            None
        }
        None => None,
    }
}

/// Canonical forms for the async surface:
/// `Future<T,E> = Async<(),(),T,E>`, `Stream<T,E> = Async<T,(),(),E>`,
/// `Sequence<T> = Async<T,(),(),!>`.
fn normalize_async(head: &str, mut args: Vec<TypeRef>) -> TypeRef {
    let unit = types::unit;
    match head {
        "Spawned" => {
            let result = args.pop().unwrap_or_else(unit);
            Rc::new(Ty::ModalState {
                key: "Spawned".into(),
                state: "Pending".into(),
                args: vec![result],
            })
        }
        "CancelToken" => Rc::new(Ty::Path {
            key: "CancelToken".into(),
            args: Vec::new(),
        }),
        "Future" => {
            let e = args.pop().unwrap_or_else(types::never);
            let t = args.pop().unwrap_or_else(unit);
            async_ty(unit(), unit(), t, e)
        }
        "Stream" => {
            let e = args.pop().unwrap_or_else(types::never);
            let t = args.pop().unwrap_or_else(unit);
            async_ty(t, unit(), unit(), e)
        }
        "Sequence" => {
            let t = args.pop().unwrap_or_else(unit);
            async_ty(t, unit(), unit(), types::never())
        }
        _ => {
            while args.len() < 4 {
                args.push(unit());
            }
            Rc::new(Ty::Path {
                key: "Async".into(),
                args,
            })
        }
    }
}

pub fn async_ty(out: TypeRef, input: TypeRef, result: TypeRef, err: TypeRef) -> TypeRef {
    Rc::new(Ty::Path {
        key: "Async".into(),
        args: vec![out, input, result, err],
    })
}

/// Decompose an `Async` carrier into (Out, In, Result, E).
pub fn as_async(ty: &TypeRef) -> Option<(TypeRef, TypeRef, TypeRef, TypeRef)> {
    match &**ty {
        Ty::Path { key, args } if key == "Async" && args.len() == 4 => Some((
            args[0].clone(),
            args[1].clone(),
            args[2].clone(),
            args[3].clone(),
        )),
        _ => None,
    }
}

fn lower_str_state(state: &Option<ast::StrState>) -> Option<StrState> {
    state.map(|s| match s {
        ast::StrState::View => StrState::View,
        ast::StrState::Managed => StrState::Managed,
    })
}

fn intern_prim(name: &str) -> Option<&'static str> {
    Some(match name {
        "bool" => "bool",
        "char" => "char",
        "i8" => "i8",
        "i16" => "i16",
        "i32" => "i32",
        "i64" => "i64",
        "u8" => "u8",
        "u16" => "u16",
        "u32" => "u32",
        "u64" => "u64",
        "usize" => "usize",
        "f32" => "f32",
        "f64" => "f64",
        "()" => "()",
        "!" => "!",
        _ => return None,
    })
}

/// Resolve every signature- and field-level type in the table. Body-level
/// names resolve in P3.
pub fn resolve_signatures(sigma: &SymbolTable) -> DiagnosticStream {
    let mut diags = DiagnosticStream::new();
    for module in &sigma.parsed {
        let module_key = &module.path_key;
        for item in &module.items {
            match item {
                Item::Procedure(p) => {
                    for param in &p.params {
                        lower_type(sigma, module_key, &param.ty, &mut diags);
                    }
                    if let Some(ret) = &p.ret {
                        lower_type(sigma, module_key, ret, &mut diags);
                    }
                }
                Item::Record(r) => {
                    for field in &r.fields {
                        lower_type(sigma, module_key, &field.ty, &mut diags);
                    }
                    for method in &r.methods {
                        for param in &method.params {
                            lower_type(sigma, module_key, &param.ty, &mut diags);
                        }
                        if let Some(ret) = &method.ret {
                            lower_type(sigma, module_key, ret, &mut diags);
                        }
                    }
                }
                Item::Enum(e) => {
                    for variant in &e.variants {
                        for ty in &variant.payload {
                            lower_type(sigma, module_key, ty, &mut diags);
                        }
                    }
                }
                Item::Modal(m) => {
                    for field in &m.common_fields {
                        lower_type(sigma, module_key, &field.ty, &mut diags);
                    }
                    for state in &m.states {
                        for field in &state.fields {
                            lower_type(sigma, module_key, &field.ty, &mut diags);
                        }
                        for method in &state.methods {
                            for param in &method.params {
                                lower_type(sigma, module_key, &param.ty, &mut diags);
                            }
                            if let Some(ret) = &method.ret {
                                lower_type(sigma, module_key, ret, &mut diags);
                            }
                        }
                    }
                }
                Item::Class(c) => {
                    for method in &c.methods {
                        for param in &method.params {
                            lower_type(sigma, module_key, &param.ty, &mut diags);
                        }
                        if let Some(ret) = &method.ret {
                            lower_type(sigma, module_key, ret, &mut diags);
                        }
                    }
                }
                Item::TypeAlias(t) => {
                    lower_type(sigma, module_key, &t.ty, &mut diags);
                }
                Item::Static(s) => {
                    lower_type(sigma, module_key, &s.ty, &mut diags);
                }
                Item::Extern(block) => {
                    for proc in &block.procs {
                        for param in &proc.params {
                            lower_type(sigma, module_key, &param.ty, &mut diags);
                        }
                        if let Some(ret) = &proc.ret {
                            lower_type(sigma, module_key, ret, &mut diags);
                        }
                    }
                }
                Item::Import(_) | Item::Using(_) | Item::Error(_) => {}
            }
        }
    }
    diags
}
