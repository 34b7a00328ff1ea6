// SPDX-License-Identifier: PMPL-1.0-or-later

//! The linear intermediate representation (phase P4 output).
//!
//! A small, language-agnostic form: a handful of declarations and a
//! span-tagged instruction tree. The backend consumes this and nothing
//! else; no AST or τ types leak past this boundary.

pub mod abi;
pub mod glue;
pub mod layout;
pub mod lower;

use crate::source::Span;

pub type LocalId = u32;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Local(LocalId),
    Symbol(String),
    /// Little-endian constant bytes.
    Immediate(Vec<u8>),
    Opaque,
}

impl Value {
    pub fn imm_i32(v: i32) -> Value {
        Value::Immediate(v.to_le_bytes().to_vec())
    }

    pub fn imm_u64(v: u64) -> Value {
        Value::Immediate(v.to_le_bytes().to_vec())
    }

    pub fn imm_bool(v: bool) -> Value {
        Value::Immediate(vec![v as u8])
    }

    pub fn unit() -> Value {
        Value::Immediate(Vec::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Loop,
    While,
    For,
}

#[derive(Debug, Clone)]
pub struct Inst {
    pub node: InstNode,
    pub span: Span,
}

impl Inst {
    pub fn new(node: InstNode, span: Span) -> Self {
        Self { node, span }
    }

    pub fn seq(insts: Vec<Inst>, span: Span) -> Self {
        Self::new(InstNode::Seq(insts), span)
    }
}

#[derive(Debug, Clone)]
pub enum InstNode {
    /// Introduce a local slot holding `value`.
    BindVar {
        local: LocalId,
        value: Value,
    },
    /// Overwrite a local, running drop glue on the old value first.
    StoreVar {
        local: LocalId,
        value: Value,
        drop_glue: Option<String>,
    },
    /// Overwrite a local with no drop (bitcopy or moved-from slot).
    StoreVarNoDrop {
        local: LocalId,
        value: Value,
    },
    ReadVar {
        local: LocalId,
        result: LocalId,
    },
    ReadPtr {
        ptr: Value,
        result: LocalId,
    },
    WritePtr {
        ptr: Value,
        value: Value,
    },
    AddrOf {
        local: LocalId,
        result: LocalId,
    },
    /// Bump-allocate `value` inside `region`.
    Alloc {
        region: Value,
        value: Value,
        result: LocalId,
    },
    If {
        cond: Value,
        then_body: Box<Inst>,
        else_body: Option<Box<Inst>>,
        result: Option<LocalId>,
    },
    Loop {
        kind: LoopKind,
        body: Box<Inst>,
        result: Option<LocalId>,
    },
    Block {
        setup: Box<Inst>,
        body: Box<Inst>,
        value: Value,
    },
    Match {
        scrutinee: Value,
        arms: Vec<(u64, Inst)>,
        default: Option<Box<Inst>>,
        result: Option<LocalId>,
    },
    Call {
        callee: Value,
        args: Vec<Value>,
        result: Option<LocalId>,
    },
    /// Dynamic dispatch through the v-table half of a fat pointer.
    CallVTable {
        base: Value,
        slot: usize,
        args: Vec<Value>,
        result: Option<LocalId>,
    },
    /// Read a global by symbol.
    ReadPath {
        symbol: String,
        result: LocalId,
    },
    StoreGlobal {
        symbol: String,
        value: Value,
    },
    Phi {
        sources: Vec<Value>,
        result: LocalId,
    },
    Branch {
        target: u32,
    },
    /// Stack frame marker for scoped cleanup.
    Frame {
        body: Box<Inst>,
    },
    Region {
        owner: LocalId,
        body: Box<Inst>,
        value: Value,
    },
    /// Mark a place as moved-from so scope exit skips its drop.
    MoveState {
        local: LocalId,
    },
    /// Guard against calling into a module whose initializer panicked.
    CheckPoison {
        module: String,
    },
    ClearPanic,
    /// Inspect the panic out-parameter after a call; runs `cleanup` and
    /// propagates on a set flag.
    PanicCheck {
        cleanup: Box<Inst>,
    },
    /// Raise a panic with a reason code, running `cleanup` first.
    LowerPanic {
        reason: u32,
        cleanup: Box<Inst>,
    },
    InitPanicHandle {
        module: String,
        poison_modules: Vec<String>,
    },
    Seq(Vec<Inst>),
    /// Backend-specific escape hatch.
    Opaque,
}

/// Parameter of a lowered procedure.
#[derive(Debug, Clone)]
pub struct IrParam {
    pub name: String,
    pub pass: abi::PassKind,
    /// Carries the "ptr-valid" attribute for the backend.
    pub ptr_valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    External,
    /// LinkOnceODR + Comdat; used for synthesized glue.
    LinkOnceOdr,
}

#[derive(Debug, Clone)]
pub enum IrDecl {
    Proc {
        symbol: String,
        params: Vec<IrParam>,
        ret: abi::PassKind,
        /// Index 0 is consumed by the sret pointer.
        has_sret: bool,
        linkage: Linkage,
        body: Inst,
    },
    ExternProc {
        symbol: String,
        param_count: usize,
    },
    GlobalConst {
        symbol: String,
        bytes: Vec<u8>,
    },
    GlobalZero {
        symbol: String,
        size: u64,
    },
    GlobalVTable {
        symbol: String,
        size: u64,
        align: u64,
        drop_symbol: Option<String>,
        slots: Vec<String>,
    },
}

/// One lowered module.
#[derive(Debug, Clone, Default)]
pub struct IrModule {
    pub name: String,
    pub decls: Vec<IrDecl>,
}
