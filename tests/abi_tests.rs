// SPDX-License-Identifier: PMPL-1.0-or-later

//! The ABI decision table, exercised over a generated family of types.

use cursive0::ir::abi::{
    abi_call, abi_param, abi_ret, by_val_ok, needs_panic_out, panic_out_type, PassKind,
    BY_VAL_MAX,
};
use cursive0::ir::layout::size_align;
use cursive0::sema::symbols::{collect, SymbolTable};
use cursive0::sema::types::{self, PtrState, TypeRef};
use cursive0::syntax::ast::ParamMode;

fn sigma() -> SymbolTable {
    collect("app", vec![]).sigma
}

/// Tuples of `u8 × n` step the size through and past the register limit.
fn byte_tuple(n: usize) -> TypeRef {
    types::tuple(vec![types::prim("u8"); n])
}

#[test]
fn decision_table_matches_the_predicates() {
    let sigma = sigma();
    for n in 0..=32usize {
        let ty = byte_tuple(n);
        let (size, align) = size_align(&sigma, &ty).expect("layout");
        let ok = size <= BY_VAL_MAX && align <= 8;
        assert_eq!(by_val_ok(&sigma, &ty), ok, "ByValOk at n={n}");

        // Borrowed: always ByRef regardless of size.
        assert_eq!(abi_param(&sigma, None, &ty), Some(PassKind::ByRef));

        // Moved: ByValue iff zero-sized or register-sized.
        let expected = if size == 0 || ok {
            PassKind::ByValue
        } else {
            PassKind::ByRef
        };
        assert_eq!(
            abi_param(&sigma, Some(ParamMode::Move), &ty),
            Some(expected),
            "ABIParam(move) at n={n}"
        );

        // Return: ByValue iff zero-sized or register-sized, else SRet.
        let expected_ret = if size == 0 || ok {
            PassKind::ByValue
        } else {
            PassKind::SRet
        };
        assert_eq!(abi_ret(&sigma, &ty), Some(expected_ret), "ABIRet at n={n}");
    }
}

#[test]
fn sret_consumes_index_zero() {
    let sigma = sigma();
    let big = byte_tuple(24);
    let info = abi_call(
        &sigma,
        &[
            (None, types::prim("i32")),
            (Some(ParamMode::Move), types::prim("u64")),
        ],
        &big,
    )
    .unwrap();
    assert!(info.has_sret);
    assert_eq!(info.sret_index(), Some(0));
    assert_eq!(info.param_kinds, vec![PassKind::ByRef, PassKind::ByValue]);
    // The ByRef argument shifts one slot past the sret pointer.
    assert_eq!(info.ptr_valid_indices(), vec![1]);
}

#[test]
fn small_returns_have_no_sret() {
    let sigma = sigma();
    let info = abi_call(&sigma, &[], &types::prim("i32")).unwrap();
    assert!(!info.has_sret);
    assert_eq!(info.sret_index(), None);
}

#[test]
fn pointers_always_fit_a_register() {
    let sigma = sigma();
    for ty in [
        types::ptr(byte_tuple(32), PtrState::Valid),
        types::raw_ptr(cursive0::sema::types::RawPtrQual::Mut, byte_tuple(32)),
    ] {
        assert_eq!(
            abi_param(&sigma, Some(ParamMode::Move), &ty),
            Some(PassKind::ByValue)
        );
    }
}

#[test]
fn high_alignment_disqualifies_by_value() {
    let sigma = sigma();
    // A 16-byte-aligned value cannot ride a register even at size 8.
    // The union of two u64s has max-size payload plus a tag.
    let ty = types::union(vec![types::prim("u64"), types::prim("i64")]);
    let (size, _) = size_align(&sigma, &ty).unwrap();
    assert!(size > BY_VAL_MAX);
    assert_eq!(
        abi_param(&sigma, Some(ParamMode::Move), &ty),
        Some(PassKind::ByRef)
    );
}

#[test]
fn panic_out_parameter_policy() {
    assert!(!needs_panic_out("main"));
    assert!(!needs_panic_out("app::main"));
    assert!(!needs_panic_out("cursive::runtime::string::from"));
    assert!(needs_panic_out("app::util::helper"));
    // The out-parameter is a raw mutable pointer to the panic record.
    let ty = panic_out_type();
    let rendered = types::render(&ty);
    assert!(rendered.contains("rawptr[mut"), "{rendered}");
}
