// SPDX-License-Identifier: PMPL-1.0-or-later

//! Backend boundary (phase P5).
//!
//! The core hands the backend an IR module plus the lower context and
//! nothing else. The interface is deliberately narrow so the LLVM
//! emitter can be swapped for another target later.

pub mod llvm;

use crate::ir::lower::LowerCtx;
use crate::ir::{IrDecl, IrModule};

pub const TARGET_TRIPLE: &str = "x86_64-pc-windows-msvc";
pub const DATA_LAYOUT: &str =
    "e-m:w-p270:32:32-p271:32:32-p272:64:64-i64:64-f80:128-n8:16:32:64-S128";

pub trait Backend {
    /// Forward-declare an external symbol.
    fn declare_function(&mut self, symbol: &str, param_count: usize);
    /// Define one lowered declaration.
    fn define_function(&mut self, decl: &IrDecl, ctx: &LowerCtx);
    /// Finish the module and return the emitted artifact bytes.
    fn emit_object(&mut self, module: &IrModule) -> Vec<u8>;
}
