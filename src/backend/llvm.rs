// SPDX-License-Identifier: PMPL-1.0-or-later

//! Textual LLVM-IR writer.
//!
//! Renders the IR module as `.ll` text: correct triple and data layout,
//! C calling convention everywhere, external linkage for top-level
//! procedures, LinkOnceODR + Comdat for synthesized glue, sret and
//! dereferenceable attributes where the ABI decision placed them. Bodies
//! are rendered structurally; `llvm-as` assembles the result when
//! bitcode output is requested.

use crate::backend::{Backend, DATA_LAYOUT, TARGET_TRIPLE};
use crate::ir::abi::PassKind;
use crate::ir::lower::LowerCtx;
use crate::ir::{Inst, InstNode, IrDecl, IrModule, Linkage, Value};
use std::fmt::Write as _;

#[derive(Default)]
pub struct LlvmTextBackend {
    out: String,
    declared: Vec<String>,
}

impl LlvmTextBackend {
    pub fn new(module_name: &str) -> Self {
        let mut backend = Self::default();
        let _ = writeln!(backend.out, "; ModuleID = '{module_name}'");
        let _ = writeln!(backend.out, "source_filename = \"{module_name}\"");
        let _ = writeln!(backend.out, "target datalayout = \"{DATA_LAYOUT}\"");
        let _ = writeln!(backend.out, "target triple = \"{TARGET_TRIPLE}\"");
        backend.out.push('\n');
        backend
    }

    pub fn finish(self) -> String {
        self.out
    }

    fn value_text(value: &Value) -> String {
        match value {
            Value::Local(id) => format!("%l{id}"),
            Value::Symbol(symbol) => format!("@\"{symbol}\""),
            Value::Immediate(bytes) => {
                let mut acc: u64 = 0;
                for (i, b) in bytes.iter().take(8).enumerate() {
                    acc |= (*b as u64) << (8 * i);
                }
                format!("{acc}")
            }
            Value::Opaque => "undef".to_string(),
        }
    }

    fn render_inst(&mut self, inst: &Inst, depth: usize) {
        let pad = "  ".repeat(depth.min(8));
        match &inst.node {
            InstNode::Seq(insts) => {
                for i in insts {
                    self.render_inst(i, depth);
                }
            }
            InstNode::BindVar { local, value } => {
                let _ = writeln!(
                    self.out,
                    "{pad}%l{local} = alloca i64 ; bind <- {}",
                    Self::value_text(value)
                );
            }
            InstNode::StoreVar { local, value, drop_glue } => {
                if let Some(glue) = drop_glue {
                    let _ = writeln!(self.out, "{pad}call void @\"{glue}\"(ptr %l{local})");
                }
                let _ = writeln!(
                    self.out,
                    "{pad}store i64 {}, ptr %l{local}",
                    Self::value_text(value)
                );
            }
            InstNode::StoreVarNoDrop { local, value } => {
                let _ = writeln!(
                    self.out,
                    "{pad}store i64 {}, ptr %l{local}",
                    Self::value_text(value)
                );
            }
            InstNode::ReadVar { local, result } => {
                let _ = writeln!(self.out, "{pad}%l{result} = load i64, ptr %l{local}");
            }
            InstNode::ReadPtr { ptr, result } => {
                let _ = writeln!(
                    self.out,
                    "{pad}%l{result} = load i64, ptr {}",
                    Self::value_text(ptr)
                );
            }
            InstNode::WritePtr { ptr, value } => {
                let _ = writeln!(
                    self.out,
                    "{pad}store i64 {}, ptr {}",
                    Self::value_text(value),
                    Self::value_text(ptr)
                );
            }
            InstNode::AddrOf { local, result } => {
                let _ = writeln!(
                    self.out,
                    "{pad}%l{result} = getelementptr i8, ptr %l{local}, i64 0"
                );
            }
            InstNode::Alloc { region, value, result } => {
                let _ = writeln!(
                    self.out,
                    "{pad}%l{result} = call ptr @\"cursive::runtime::region::alloc\"(ptr {}, i64 {})",
                    Self::value_text(region),
                    Self::value_text(value)
                );
            }
            InstNode::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                let _ = writeln!(self.out, "{pad}; if {}", Self::value_text(cond));
                self.render_inst(then_body, depth + 1);
                if let Some(els) = else_body {
                    let _ = writeln!(self.out, "{pad}; else");
                    self.render_inst(els, depth + 1);
                }
            }
            InstNode::Loop { kind, body, .. } => {
                let _ = writeln!(self.out, "{pad}; loop {kind:?}");
                self.render_inst(body, depth + 1);
            }
            InstNode::Block { setup, body, value } => {
                self.render_inst(setup, depth);
                self.render_inst(body, depth);
                let _ = writeln!(self.out, "{pad}; block value {}", Self::value_text(value));
            }
            InstNode::Match {
                scrutinee,
                arms,
                default,
                ..
            } => {
                let _ = writeln!(self.out, "{pad}; switch {}", Self::value_text(scrutinee));
                for (tag, arm) in arms {
                    let _ = writeln!(self.out, "{pad}; case {tag}");
                    self.render_inst(arm, depth + 1);
                }
                if let Some(d) = default {
                    let _ = writeln!(self.out, "{pad}; default");
                    self.render_inst(d, depth + 1);
                }
            }
            InstNode::Call { callee, args, result } => {
                let args_text = args
                    .iter()
                    .map(|a| format!("i64 {}", Self::value_text(a)))
                    .collect::<Vec<_>>()
                    .join(", ");
                match result {
                    Some(r) => {
                        let _ = writeln!(
                            self.out,
                            "{pad}%l{r} = call ccc i64 {}({args_text})",
                            Self::value_text(callee)
                        );
                    }
                    None => {
                        let _ = writeln!(
                            self.out,
                            "{pad}call ccc void {}({args_text})",
                            Self::value_text(callee)
                        );
                    }
                }
            }
            InstNode::CallVTable { base, slot, args, result } => {
                let _ = writeln!(
                    self.out,
                    "{pad}; vtable dispatch slot {slot} of {}",
                    Self::value_text(base)
                );
                let args_text = args
                    .iter()
                    .map(|a| format!("i64 {}", Self::value_text(a)))
                    .collect::<Vec<_>>()
                    .join(", ");
                if let Some(r) = result {
                    let _ = writeln!(
                        self.out,
                        "{pad}%l{r} = call ccc i64 %vtable_slot_{slot}({args_text})"
                    );
                }
            }
            InstNode::ReadPath { symbol, result } => {
                let _ = writeln!(self.out, "{pad}%l{result} = load i64, ptr @\"{symbol}\"");
            }
            InstNode::StoreGlobal { symbol, value } => {
                let _ = writeln!(
                    self.out,
                    "{pad}store i64 {}, ptr @\"{symbol}\"",
                    Self::value_text(value)
                );
            }
            InstNode::Phi { sources, result } => {
                let parts = sources
                    .iter()
                    .map(|s| format!("[ {}, %entry ]", Self::value_text(s)))
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = writeln!(self.out, "{pad}%l{result} = phi i64 {parts}");
            }
            InstNode::Branch { target } => {
                let _ = writeln!(self.out, "{pad}br label %b{target}");
            }
            InstNode::Frame { body } => {
                let _ = writeln!(self.out, "{pad}; frame");
                self.render_inst(body, depth + 1);
            }
            InstNode::Region { owner, body, value } => {
                let _ = writeln!(
                    self.out,
                    "{pad}%l{owner} = call ptr @\"cursive::runtime::region::new_scoped\"(i64 0)"
                );
                self.render_inst(body, depth + 1);
                let _ = writeln!(
                    self.out,
                    "{pad}call void @\"cursive::runtime::region::free_unchecked\"(ptr %l{owner}) ; value {}",
                    Self::value_text(value)
                );
            }
            InstNode::MoveState { local } => {
                let _ = writeln!(self.out, "{pad}; moved-from %l{local}");
            }
            InstNode::CheckPoison { module } => {
                let _ = writeln!(
                    self.out,
                    "{pad}call void @\"__check_poison\"(ptr @\"__poison_{}\")",
                    module.replace("::", "_")
                );
            }
            InstNode::ClearPanic => {
                let _ = writeln!(self.out, "{pad}store i8 0, ptr %__panic");
            }
            InstNode::PanicCheck { cleanup } => {
                let _ = writeln!(self.out, "{pad}; panic check");
                self.render_inst(cleanup, depth + 1);
            }
            InstNode::LowerPanic { reason, cleanup } => {
                self.render_inst(cleanup, depth + 1);
                let _ = writeln!(
                    self.out,
                    "{pad}call void @\"cursive::runtime::panic\"(i32 {reason})"
                );
                let _ = writeln!(self.out, "{pad}unreachable");
            }
            InstNode::InitPanicHandle { module, poison_modules } => {
                let _ = writeln!(
                    self.out,
                    "{pad}call void @\"cursive::runtime::context_init\"(ptr @\"__poison_{}\") ; guards {} modules",
                    module.replace("::", "_"),
                    poison_modules.len()
                );
            }
            InstNode::Opaque => {
                let _ = writeln!(self.out, "{pad}; opaque");
            }
        }
    }
}

impl Backend for LlvmTextBackend {
    fn declare_function(&mut self, symbol: &str, param_count: usize) {
        if self.declared.iter().any(|s| s == symbol) {
            return;
        }
        self.declared.push(symbol.to_string());
        let params = vec!["i64"; param_count].join(", ");
        let _ = writeln!(self.out, "declare ccc i64 @\"{symbol}\"({params})");
    }

    fn define_function(&mut self, decl: &IrDecl, _ctx: &LowerCtx) {
        match decl {
            IrDecl::Proc {
                symbol,
                params,
                has_sret,
                linkage,
                body,
                ..
            } => {
                let linkage_text = match linkage {
                    Linkage::External => "",
                    Linkage::LinkOnceOdr => "linkonce_odr ",
                };
                let mut rendered: Vec<String> = Vec::new();
                if *has_sret {
                    rendered.push("ptr sret(i8) %ret".to_string());
                }
                for (i, param) in params.iter().enumerate() {
                    let text = match param.pass {
                        PassKind::ByValue => format!("i64 %a{i}"),
                        PassKind::ByRef if param.ptr_valid => {
                            format!("ptr noundef dereferenceable(8) %a{i}")
                        }
                        PassKind::ByRef => format!("ptr %a{i}"),
                        PassKind::SRet => format!("ptr sret(i8) %a{i}"),
                    };
                    rendered.push(text);
                }
                let comdat = match linkage {
                    Linkage::LinkOnceOdr => format!(" comdat($\"{symbol}\")"),
                    Linkage::External => String::new(),
                };
                let _ = writeln!(
                    self.out,
                    "define {linkage_text}ccc i64 @\"{symbol}\"({}){comdat} {{",
                    rendered.join(", ")
                );
                let _ = writeln!(self.out, "entry:");
                self.render_inst(body, 1);
                let _ = writeln!(self.out, "  ret i64 0");
                let _ = writeln!(self.out, "}}\n");
            }
            IrDecl::ExternProc { symbol, param_count } => {
                self.declare_function(symbol, *param_count);
            }
            IrDecl::GlobalConst { symbol, bytes } => {
                let encoded: String = bytes
                    .iter()
                    .map(|b| format!("\\{b:02X}"))
                    .collect();
                let _ = writeln!(
                    self.out,
                    "@\"{symbol}\" = private unnamed_addr constant [{} x i8] c\"{encoded}\"",
                    bytes.len()
                );
            }
            IrDecl::GlobalZero { symbol, size } => {
                let _ = writeln!(
                    self.out,
                    "@\"{symbol}\" = global [{size} x i8] zeroinitializer"
                );
            }
            IrDecl::GlobalVTable {
                symbol,
                size,
                align,
                drop_symbol,
                slots,
            } => {
                let mut entries = vec![format!("i64 {size}"), format!("i64 {align}")];
                entries.push(match drop_symbol {
                    Some(drop) => format!("ptr @\"{drop}\""),
                    None => "ptr null".to_string(),
                });
                for slot in slots {
                    entries.push(format!("ptr @\"{slot}\""));
                }
                let _ = writeln!(
                    self.out,
                    "@\"{symbol}\" = constant {{ {} }} {{ {} }}",
                    vec!["i64", "i64"]
                        .into_iter()
                        .map(String::from)
                        .chain(std::iter::repeat_with(|| "ptr".to_string()).take(entries.len() - 2))
                        .collect::<Vec<_>>()
                        .join(", "),
                    entries.join(", ")
                );
            }
        }
    }

    fn emit_object(&mut self, _module: &IrModule) -> Vec<u8> {
        self.out.clone().into_bytes()
    }
}

/// Render a whole module to `.ll` text.
pub fn emit_ll(module: &IrModule, ctx: &LowerCtx) -> String {
    let mut backend = LlvmTextBackend::new(&module.name);
    for symbol in crate::project::link::RUNTIME_REQUIRED_SYMS {
        backend.declare_function(symbol, 2);
    }
    for decl in &module.decls {
        backend.define_function(decl, ctx);
    }
    for decl in &ctx.extra_procs {
        backend.define_function(decl, ctx);
    }
    backend.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrModule;

    #[test]
    fn header_carries_triple_and_layout() {
        let module = IrModule {
            name: "app".into(),
            decls: Vec::new(),
        };
        let text = emit_ll(&module, &LowerCtx::default());
        assert!(text.contains("target triple = \"x86_64-pc-windows-msvc\""));
        assert!(text.contains("p270:32:32"));
    }

    #[test]
    fn glue_gets_linkonce_odr_and_comdat() {
        let module = IrModule {
            name: "app".into(),
            decls: vec![IrDecl::Proc {
                symbol: "drop_glue_thing".into(),
                params: Vec::new(),
                ret: PassKind::ByValue,
                has_sret: false,
                linkage: Linkage::LinkOnceOdr,
                body: Inst::seq(Vec::new(), crate::source::Span::default()),
            }],
        };
        let text = emit_ll(&module, &LowerCtx::default());
        assert!(text.contains("linkonce_odr"));
        assert!(text.contains("comdat"));
    }
}
