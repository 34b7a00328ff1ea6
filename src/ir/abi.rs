// SPDX-License-Identifier: PMPL-1.0-or-later

//! ABI decisions for the Win64 C calling convention.
//!
//! Three passing modes: ByValue, ByRef (pointer to a stack or heap copy),
//! and SRet (caller-allocated return slot as the first argument). The
//! decision table keys on size and alignment only; Win64 passes at most
//! one register's worth by value.

use crate::ir::layout::size_align;
use crate::sema::symbols::SymbolTable;
use crate::sema::types::{self, RawPtrQual, TypeRef};
use crate::syntax::ast::ParamMode;

pub const BY_VAL_MAX: u64 = 8;
pub const BY_VAL_ALIGN: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    ByValue,
    ByRef,
    SRet,
}

/// `ByValOk(T) ⟺ sizeof(T) ≤ ByValMax ∧ alignof(T) ≤ ByValAlign`.
pub fn by_val_ok(sigma: &SymbolTable, ty: &TypeRef) -> bool {
    match size_align(sigma, ty) {
        Some((size, align)) => size <= BY_VAL_MAX && align <= BY_VAL_ALIGN,
        None => false,
    }
}

/// `ABIParam(mode, T)`: borrowed parameters always pass by reference;
/// moved parameters pass by value when they fit, by reference otherwise.
pub fn abi_param(
    sigma: &SymbolTable,
    mode: Option<ParamMode>,
    ty: &TypeRef,
) -> Option<PassKind> {
    let (size, _) = size_align(sigma, ty)?;
    match mode {
        None => Some(PassKind::ByRef),
        Some(ParamMode::Move) => {
            if size == 0 || by_val_ok(sigma, ty) {
                Some(PassKind::ByValue)
            } else {
                Some(PassKind::ByRef)
            }
        }
    }
}

/// `ABIRet(T)`: zero-sized or register-sized returns pass by value, the
/// rest through a caller-allocated sret slot.
pub fn abi_ret(sigma: &SymbolTable, ty: &TypeRef) -> Option<PassKind> {
    let (size, _) = size_align(sigma, ty)?;
    if size == 0 || by_val_ok(sigma, ty) {
        Some(PassKind::ByValue)
    } else {
        Some(PassKind::SRet)
    }
}

/// A call's full ABI: per-parameter kinds, return kind, and whether
/// argument index 0 is consumed by the sret pointer.
#[derive(Debug, Clone)]
pub struct AbiCallInfo {
    pub param_kinds: Vec<PassKind>,
    pub ret_kind: PassKind,
    pub has_sret: bool,
}

impl AbiCallInfo {
    /// Argument index carrying the StructRet attribute.
    pub fn sret_index(&self) -> Option<usize> {
        self.has_sret.then_some(0)
    }

    /// Argument indices carrying the "ptr-valid" attribute set (every
    /// by-reference argument, shifted past the sret slot).
    pub fn ptr_valid_indices(&self) -> Vec<usize> {
        let shift = usize::from(self.has_sret);
        self.param_kinds
            .iter()
            .enumerate()
            .filter(|(_, k)| **k == PassKind::ByRef)
            .map(|(i, _)| i + shift)
            .collect()
    }
}

pub fn abi_call(
    sigma: &SymbolTable,
    params: &[(Option<ParamMode>, TypeRef)],
    ret: &TypeRef,
) -> Option<AbiCallInfo> {
    let mut param_kinds = Vec::with_capacity(params.len());
    for (mode, ty) in params {
        param_kinds.push(abi_param(sigma, *mode, ty)?);
    }
    let ret_kind = abi_ret(sigma, ret)?;
    Some(AbiCallInfo {
        param_kinds,
        ret_kind,
        has_sret: ret_kind == PassKind::SRet,
    })
}

/// `PanicRecord = { panic: bool, code: u32 }`, carried behind
/// `rawptr[mut, PanicRecord]` as every user procedure's trailing
/// parameter.
pub fn panic_record_type() -> TypeRef {
    types::tuple(vec![types::boolean(), types::prim("u32")])
}

pub fn panic_out_type() -> TypeRef {
    types::raw_ptr(RawPtrQual::Mut, panic_record_type())
}

pub const ENTRY_SYMBOL: &str = "main";

/// Everything except the entry point and the runtime's own symbols gets
/// the panic out-parameter.
pub fn needs_panic_out(symbol: &str) -> bool {
    if symbol == ENTRY_SYMBOL || symbol.ends_with("::main") {
        return false;
    }
    !crate::project::link::RUNTIME_REQUIRED_SYMS.contains(&symbol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::symbols::collect;
    use crate::sema::types::PtrState;

    fn sigma() -> SymbolTable {
        collect("app", vec![]).sigma
    }

    #[test]
    fn borrowed_params_pass_by_ref() {
        let sigma = sigma();
        let ty = types::prim("i32");
        assert_eq!(abi_param(&sigma, None, &ty), Some(PassKind::ByRef));
    }

    #[test]
    fn small_moves_pass_by_value() {
        let sigma = sigma();
        assert_eq!(
            abi_param(&sigma, Some(ParamMode::Move), &types::prim("u64")),
            Some(PassKind::ByValue)
        );
        assert_eq!(
            abi_param(&sigma, Some(ParamMode::Move), &types::unit()),
            Some(PassKind::ByValue)
        );
    }

    #[test]
    fn large_moves_fall_back_to_by_ref() {
        let sigma = sigma();
        let big = types::tuple(vec![types::prim("u64"), types::prim("u64")]);
        assert_eq!(
            abi_param(&sigma, Some(ParamMode::Move), &big),
            Some(PassKind::ByRef)
        );
    }

    #[test]
    fn large_returns_use_sret_at_index_zero() {
        let sigma = sigma();
        let big = types::tuple(vec![types::prim("u64"), types::prim("u64"), types::prim("u64")]);
        let info = abi_call(&sigma, &[(None, types::prim("i32"))], &big).unwrap();
        assert_eq!(info.ret_kind, PassKind::SRet);
        assert_eq!(info.sret_index(), Some(0));
        assert_eq!(info.ptr_valid_indices(), vec![1]);
    }

    #[test]
    fn pointer_params_fit_a_register() {
        let sigma = sigma();
        let ty = types::ptr(types::prim("i64"), PtrState::Valid);
        assert_eq!(
            abi_param(&sigma, Some(ParamMode::Move), &ty),
            Some(PassKind::ByValue)
        );
    }

    #[test]
    fn runtime_symbols_skip_the_panic_out_param() {
        assert!(!needs_panic_out("main"));
        assert!(!needs_panic_out("cursive::runtime::panic"));
        assert!(needs_panic_out("app::helper"));
    }
}
