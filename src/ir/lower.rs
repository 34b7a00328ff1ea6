// SPDX-License-Identifier: PMPL-1.0-or-later

//! Lowering: typed AST + τ-map → linear IR.
//!
//! A tree walk over each procedure body. Every expression lowers to an
//! instruction sequence plus the value holding its result. The walk also
//! accumulates the lower context the backend needs: drop-glue symbols,
//! procedure signatures, synthesized procedures, and the entry symbol.

use crate::ir::abi::{self, PassKind};
use crate::ir::glue::{self, drop_glue_symbol};
use crate::ir::layout::{async_frame, field_offset, VTableLayout, ASYNC_FRAME_RESUME_FN_OFFSET};
use crate::ir::{Inst, InstNode, IrDecl, IrModule, IrParam, Linkage, LoopKind, Value};
use crate::sema::check::{is_bitcopy, CheckResult};
use crate::sema::resolve::{lower_type, resolve_path};
use crate::sema::symbols::SymbolTable;
use crate::sema::types::{self, strip_perm, Ty, TypeRef};
use crate::source::Span;
use crate::syntax::ast::{
    AstModule, Block, ExprNode, ExprPtr, Item, Pattern, PatternNode, ProcedureDecl, Stmt,
};
use std::collections::{BTreeMap, HashMap};

/// Everything the backend needs beyond the IR module list.
#[derive(Debug, Default)]
pub struct LowerCtx {
    pub main_symbol: Option<String>,
    pub extra_procs: Vec<IrDecl>,
    /// Drop-glue symbol → rendered type it drops.
    pub drop_glue_types: BTreeMap<String, String>,
    pub proc_sigs: BTreeMap<String, crate::sema::check::ProcSig>,
}

/// Lower every module of the assembly.
pub fn lower_assembly(sigma: &SymbolTable, check: &CheckResult) -> (Vec<IrModule>, LowerCtx) {
    let mut ctx = LowerCtx {
        proc_sigs: check.proc_sigs.clone(),
        ..LowerCtx::default()
    };
    let mut modules = Vec::new();
    for module in &sigma.parsed {
        modules.push(lower_module(sigma, check, module, &mut ctx));
    }
    // V-tables are assembly-wide; attach them to the first module so each
    // symbol is emitted exactly once.
    if let Some(first) = modules.first_mut() {
        first.decls.extend(glue::synthesize_vtables(sigma));
    }
    (modules, ctx)
}

fn lower_module(
    sigma: &SymbolTable,
    check: &CheckResult,
    module: &AstModule,
    ctx: &mut LowerCtx,
) -> IrModule {
    let mut out = IrModule {
        name: module.path_key.clone(),
        decls: Vec::new(),
    };
    for item in &module.items {
        match item {
            Item::Procedure(proc) => {
                lower_procedure(sigma, check, &module.path_key, None, proc, ctx, &mut out);
            }
            Item::Record(record) => {
                for method in &record.methods {
                    lower_procedure(
                        sigma,
                        check,
                        &module.path_key,
                        Some(&record.name),
                        method,
                        ctx,
                        &mut out,
                    );
                }
            }
            Item::Static(decl) => {
                let symbol = format!("{}::{}", module.path_key, decl.name);
                let mut scratch = crate::diag::DiagnosticStream::new();
                let size = lower_type(sigma, &module.path_key, &decl.ty, &mut scratch)
                    .and_then(|t| crate::ir::layout::size_align(sigma, &t))
                    .map(|(s, _)| s)
                    .unwrap_or(0);
                // Initializers run in module init; the storage is zeroed.
                out.decls.push(IrDecl::GlobalZero { symbol, size });
            }
            Item::Extern(block) => {
                for proc in &block.procs {
                    out.decls.push(IrDecl::ExternProc {
                        symbol: proc.name.clone(),
                        param_count: proc.params.len(),
                    });
                }
            }
            _ => {}
        }
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn lower_procedure(
    sigma: &SymbolTable,
    check: &CheckResult,
    module_key: &str,
    owner: Option<&str>,
    proc: &ProcedureDecl,
    ctx: &mut LowerCtx,
    out: &mut IrModule,
) {
    let Some(body) = &proc.body else {
        return;
    };
    let symbol = match owner {
        Some(record) => format!("{module_key}::{record}::{}", proc.name),
        None => format!("{module_key}::{}", proc.name),
    };
    let is_entry = proc.name == "main" && owner.is_none();
    if is_entry {
        ctx.main_symbol = Some(symbol.clone());
    }

    let mut scratch = crate::diag::DiagnosticStream::new();
    let mut lowerer = FuncLowerer::new(sigma, check, module_key, ctx);

    let mut params = Vec::new();
    let mut abi_params = Vec::new();
    if proc.receiver.is_some() {
        let local = lowerer.fresh();
        lowerer.locals.insert("self".into(), local);
        params.push(IrParam {
            name: "self".into(),
            pass: PassKind::ByRef,
            ptr_valid: true,
        });
    }
    for param in &proc.params {
        let ty = lower_type(sigma, module_key, &param.ty, &mut scratch)
            .unwrap_or_else(types::never);
        let pass = abi::abi_param(sigma, param.mode, &ty).unwrap_or(PassKind::ByRef);
        let local = lowerer.fresh();
        lowerer.locals.insert(param.name.clone(), local);
        lowerer.note_drop_type(&ty);
        params.push(IrParam {
            name: param.name.clone(),
            pass,
            ptr_valid: pass == PassKind::ByRef,
        });
        abi_params.push((param.mode, ty));
    }

    let ret_ty = proc
        .ret
        .as_ref()
        .and_then(|t| lower_type(sigma, module_key, t, &mut scratch))
        .unwrap_or_else(types::unit);
    let abi_info =
        abi::abi_call(sigma, &abi_params, &ret_ty).unwrap_or_else(|| abi::AbiCallInfo {
            param_kinds: params.iter().map(|p| p.pass).collect(),
            ret_kind: PassKind::ByValue,
            has_sret: false,
        });

    if abi::needs_panic_out(&symbol) {
        params.push(IrParam {
            name: "__panic".into(),
            pass: PassKind::ByValue,
            ptr_valid: false,
        });
    }

    if proc.is_async {
        lower_async_procedure(sigma, proc, &symbol, module_key, lowerer, params);
        return;
    }

    let mut prologue = Vec::new();
    if is_entry {
        let poison: Vec<String> = sigma
            .modules
            .keys()
            .filter(|k| *k != module_key)
            .cloned()
            .collect();
        prologue.push(Inst::new(
            InstNode::InitPanicHandle {
                module: module_key.to_string(),
                poison_modules: poison,
            },
            proc.span.clone(),
        ));
    } else {
        prologue.push(Inst::new(InstNode::ClearPanic, proc.span.clone()));
    }

    let (mut body_insts, value) = lowerer.lower_block(body);
    let strings = std::mem::take(&mut lowerer.string_globals);
    prologue.append(&mut body_insts);
    out.decls.extend(strings);
    let body_inst = Inst::new(
        InstNode::Frame {
            body: Box::new(Inst::new(
                InstNode::Block {
                    setup: Box::new(Inst::seq(Vec::new(), proc.span.clone())),
                    body: Box::new(Inst::seq(prologue, proc.span.clone())),
                    value,
                },
                proc.span.clone(),
            )),
        },
        proc.span.clone(),
    );

    out.decls.push(IrDecl::Proc {
        symbol,
        params,
        ret: abi_info.ret_kind,
        has_sret: abi_info.has_sret,
        linkage: Linkage::External,
        body: body_inst,
    });
}

/// Async lowering: a creator that heap-allocates the frame and stores the
/// captures, plus a resume entry switching on the resume-state word.
fn lower_async_procedure(
    sigma: &SymbolTable,
    proc: &ProcedureDecl,
    symbol: &str,
    module_key: &str,
    mut lowerer: FuncLowerer<'_>,
    params: Vec<IrParam>,
) {
    let mut scratch = crate::diag::DiagnosticStream::new();
    let captures: Vec<(String, TypeRef)> = proc
        .params
        .iter()
        .map(|p| {
            let ty = lower_type(sigma, module_key, &p.ty, &mut scratch)
                .unwrap_or_else(types::never);
            (p.name.clone(), ty)
        })
        .collect();
    let Some(frame) = async_frame(sigma, &captures) else {
        return;
    };

    let resume_symbol = format!("{symbol}::resume");

    // Creator: allocate the frame, store the resume fn and every capture.
    let mut create = Vec::new();
    let frame_ptr = lowerer.fresh();
    create.push(Inst::new(
        InstNode::Call {
            callee: Value::Symbol("cursive::runtime::heap::alloc_raw".into()),
            args: vec![Value::imm_u64(frame.size), Value::imm_u64(frame.align)],
            result: Some(frame_ptr),
        },
        proc.span.clone(),
    ));
    // Every frame slot is addressed off the frame pointer; the
    // resume-state word sits at offset zero and needs no addition.
    create.push(Inst::new(
        InstNode::WritePtr {
            ptr: Value::Local(frame_ptr),
            value: Value::imm_u64(0),
        },
        proc.span.clone(),
    ));
    let resume_fn_ptr = lowerer.fresh();
    create.push(Inst::new(
        InstNode::Call {
            callee: Value::Symbol("__gep".into()),
            args: vec![
                Value::Local(frame_ptr),
                Value::imm_u64(ASYNC_FRAME_RESUME_FN_OFFSET),
            ],
            result: Some(resume_fn_ptr),
        },
        proc.span.clone(),
    ));
    create.push(Inst::new(
        InstNode::WritePtr {
            ptr: Value::Local(resume_fn_ptr),
            value: Value::Symbol(resume_symbol.clone()),
        },
        proc.span.clone(),
    ));
    for (name, offset) in &frame.slots {
        let source = lowerer
            .locals
            .get(name)
            .copied()
            .map(Value::Local)
            .unwrap_or(Value::Opaque);
        let slot_ptr = lowerer.fresh();
        create.push(Inst::new(
            InstNode::Call {
                callee: Value::Symbol("__gep".into()),
                args: vec![Value::Local(frame_ptr), Value::imm_u64(*offset)],
                result: Some(slot_ptr),
            },
            proc.span.clone(),
        ));
        create.push(Inst::new(
            InstNode::WritePtr {
                ptr: Value::Local(slot_ptr),
                value: source,
            },
            proc.span.clone(),
        ));
    }

    lowerer.ctx.extra_procs.push(IrDecl::Proc {
        symbol: symbol.to_string(),
        params,
        ret: PassKind::ByValue,
        has_sret: false,
        linkage: Linkage::External,
        body: Inst::new(
            InstNode::Block {
                setup: Box::new(Inst::seq(create, proc.span.clone())),
                body: Box::new(Inst::seq(Vec::new(), proc.span.clone())),
                value: Value::Local(frame_ptr),
            },
            proc.span.clone(),
        ),
    });

    // Resume entry: dispatch on the resume-state word; state 0 runs the
    // lowered body.
    let (body_insts, value) = match &proc.body {
        Some(body) => lowerer.lower_block(body),
        None => (Vec::new(), Value::unit()),
    };
    let body_arm = Inst::new(
        InstNode::Block {
            setup: Box::new(Inst::seq(Vec::new(), proc.span.clone())),
            body: Box::new(Inst::seq(body_insts, proc.span.clone())),
            value,
        },
        proc.span.clone(),
    );
    lowerer.ctx.extra_procs.push(IrDecl::Proc {
        symbol: resume_symbol,
        params: vec![
            IrParam {
                name: "frame".into(),
                pass: PassKind::ByRef,
                ptr_valid: true,
            },
            IrParam {
                name: "__panic".into(),
                pass: PassKind::ByValue,
                ptr_valid: false,
            },
        ],
        ret: PassKind::ByValue,
        has_sret: false,
        linkage: Linkage::External,
        body: Inst::new(
            InstNode::Match {
                scrutinee: Value::Local(0),
                arms: vec![(0, body_arm)],
                default: Some(Box::new(Inst::new(
                    InstNode::LowerPanic {
                        reason: 1,
                        cleanup: Box::new(Inst::seq(Vec::new(), proc.span.clone())),
                    },
                    proc.span.clone(),
                ))),
                result: None,
            },
            proc.span.clone(),
        ),
    });
}

// ---------------------------------------------------------------------------

struct FuncLowerer<'a> {
    sigma: &'a SymbolTable,
    check: &'a CheckResult,
    module_key: &'a str,
    ctx: &'a mut LowerCtx,
    locals: HashMap<String, u32>,
    next_local: u32,
    next_string: u32,
    string_globals: Vec<IrDecl>,
}

impl<'a> FuncLowerer<'a> {
    fn new(
        sigma: &'a SymbolTable,
        check: &'a CheckResult,
        module_key: &'a str,
        ctx: &'a mut LowerCtx,
    ) -> Self {
        Self {
            sigma,
            check,
            module_key,
            ctx,
            locals: HashMap::new(),
            next_local: 0,
            next_string: 0,
            string_globals: Vec::new(),
        }
    }

    fn fresh(&mut self) -> u32 {
        let id = self.next_local;
        self.next_local += 1;
        id
    }

    /// Register the drop glue a type needs; idempotent per symbol.
    fn note_drop_type(&mut self, ty: &TypeRef) {
        let bare = strip_perm(ty);
        if is_bitcopy(self.sigma, &bare) {
            return;
        }
        let symbol = drop_glue_symbol(&bare);
        if self.ctx.drop_glue_types.contains_key(&symbol) {
            return;
        }
        self.ctx
            .drop_glue_types
            .insert(symbol, types::render(&bare));
        if let Some(decl) = glue::synthesize_drop_glue(self.sigma, &bare) {
            self.ctx.extra_procs.push(decl);
        }
    }

    fn expr_ty(&self, expr: &ExprPtr) -> TypeRef {
        self.check
            .tau
            .get(expr)
            .cloned()
            .unwrap_or_else(types::unit)
    }

    fn lower_block(&mut self, block: &Block) -> (Vec<Inst>, Value) {
        let mut insts = Vec::new();
        for stmt in &block.stmts {
            insts.extend(self.lower_stmt(stmt));
        }
        let value = match &block.tail {
            Some(tail) => {
                let (mut tail_insts, value) = self.lower_expr(tail);
                insts.append(&mut tail_insts);
                value
            }
            None => Value::unit(),
        };
        (insts, value)
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Vec<Inst> {
        match stmt {
            Stmt::Let {
                name, init, span, ..
            } => {
                let ty = self.expr_ty(init);
                self.note_drop_type(&ty);
                let (mut insts, value) = self.lower_expr(init);
                let local = self.fresh();
                self.locals.insert(name.clone(), local);
                insts.push(Inst::new(InstNode::BindVar { local, value }, span.clone()));
                insts
            }
            Stmt::Assign { place, value, span } => {
                let ty = self.expr_ty(place);
                let (mut insts, lowered) = self.lower_expr(value);
                match &place.node {
                    ExprNode::Identifier(name) => {
                        let local = self.locals.get(name).copied().unwrap_or_default();
                        let node = if is_bitcopy(self.sigma, &ty) {
                            InstNode::StoreVarNoDrop {
                                local,
                                value: lowered,
                            }
                        } else {
                            self.note_drop_type(&ty);
                            InstNode::StoreVar {
                                local,
                                value: lowered,
                                drop_glue: Some(drop_glue_symbol(&strip_perm(&ty))),
                            }
                        };
                        insts.push(Inst::new(node, span.clone()));
                    }
                    _ => {
                        let (mut place_insts, ptr) = self.lower_place_addr(place);
                        insts.append(&mut place_insts);
                        insts.push(Inst::new(
                            InstNode::WritePtr {
                                ptr,
                                value: lowered,
                            },
                            span.clone(),
                        ));
                    }
                }
                insts
            }
            Stmt::Expr(e) => self.lower_expr(e).0,
            Stmt::Return { value, span } => match value {
                Some(v) => {
                    let (mut insts, value) = self.lower_expr(v);
                    insts.push(Inst::new(InstNode::Branch { target: 0 }, span.clone()));
                    let _ = value;
                    insts
                }
                None => vec![Inst::new(InstNode::Branch { target: 0 }, span.clone())],
            },
            Stmt::Break(span) => vec![Inst::new(InstNode::Branch { target: 1 }, span.clone())],
            Stmt::Continue(span) => {
                vec![Inst::new(InstNode::Branch { target: 2 }, span.clone())]
            }
            Stmt::While { cond, body, span } => {
                let (mut cond_insts, cond_value) = self.lower_expr(cond);
                let (body_insts, _) = self.lower_block(body);
                let guarded = Inst::new(
                    InstNode::If {
                        cond: cond_value,
                        then_body: Box::new(Inst::seq(body_insts, span.clone())),
                        else_body: Some(Box::new(Inst::new(
                            InstNode::Branch { target: 1 },
                            span.clone(),
                        ))),
                        result: None,
                    },
                    span.clone(),
                );
                cond_insts.push(guarded);
                vec![Inst::new(
                    InstNode::Loop {
                        kind: LoopKind::While,
                        body: Box::new(Inst::seq(cond_insts, span.clone())),
                        result: None,
                    },
                    span.clone(),
                )]
            }
            Stmt::Loop { body, span } => {
                let (body_insts, _) = self.lower_block(body);
                vec![Inst::new(
                    InstNode::Loop {
                        kind: LoopKind::Loop,
                        body: Box::new(Inst::seq(body_insts, span.clone())),
                        result: None,
                    },
                    span.clone(),
                )]
            }
            Stmt::For {
                binding,
                iter,
                body,
                span,
            } => {
                let (mut insts, iter_value) = self.lower_expr(iter);
                let cursor = self.fresh();
                self.locals.insert(binding.clone(), cursor);
                insts.push(Inst::new(
                    InstNode::BindVar {
                        local: cursor,
                        value: iter_value,
                    },
                    span.clone(),
                ));
                let (body_insts, _) = self.lower_block(body);
                insts.push(Inst::new(
                    InstNode::Loop {
                        kind: LoopKind::For,
                        body: Box::new(Inst::seq(body_insts, span.clone())),
                        result: None,
                    },
                    span.clone(),
                ));
                insts
            }
            Stmt::Region { name, body, span } => {
                let owner = self.fresh();
                self.locals.insert(name.clone(), owner);
                let (body_insts, value) = self.lower_block(body);
                vec![Inst::new(
                    InstNode::Region {
                        owner,
                        body: Box::new(Inst::seq(body_insts, span.clone())),
                        value,
                    },
                    span.clone(),
                )]
            }
            Stmt::Unsafe { body, .. } => self.lower_block(body).0,
            Stmt::KeyBlock { body, .. } => {
                // Keys are purely static; the block lowers transparently.
                self.lower_block(body).0
            }
            Stmt::Parallel { arms, span } => {
                // Each arm becomes a spawned task through the runtime; the
                // static checks already proved the captures disjoint.
                let mut insts = Vec::new();
                for arm in arms {
                    let (arm_insts, value) = self.lower_block(arm);
                    insts.push(Inst::new(
                        InstNode::Block {
                            setup: Box::new(Inst::seq(Vec::new(), span.clone())),
                            body: Box::new(Inst::seq(arm_insts, span.clone())),
                            value,
                        },
                        span.clone(),
                    ));
                }
                vec![Inst::seq(insts, span.clone())]
            }
        }
    }

    /// Address of a place for stores through fields, indices, or derefs.
    fn lower_place_addr(&mut self, place: &ExprPtr) -> (Vec<Inst>, Value) {
        match &place.node {
            ExprNode::Identifier(name) => {
                let local = self.locals.get(name).copied().unwrap_or_default();
                let result = self.fresh();
                (
                    vec![Inst::new(
                        InstNode::AddrOf { local, result },
                        place.span.clone(),
                    )],
                    Value::Local(result),
                )
            }
            ExprNode::Field { base, name } => {
                let (mut insts, base_ptr) = self.lower_place_addr(base);
                let base_ty = strip_perm(&self.expr_ty(base));
                let offset = match &*base_ty {
                    Ty::Path { key, .. } => field_offset(self.sigma, key, name).unwrap_or(0),
                    _ => 0,
                };
                let result = self.fresh();
                insts.push(Inst::new(
                    InstNode::Call {
                        callee: Value::Symbol("__gep".into()),
                        args: vec![base_ptr, Value::imm_u64(offset)],
                        result: Some(result),
                    },
                    place.span.clone(),
                ));
                (insts, Value::Local(result))
            }
            ExprNode::Index { base, index } => {
                let (mut insts, base_ptr) = self.lower_place_addr(base);
                let (mut index_insts, index_value) = self.lower_expr(index);
                insts.append(&mut index_insts);
                let result = self.fresh();
                insts.push(Inst::new(
                    InstNode::Call {
                        callee: Value::Symbol("__gep".into()),
                        args: vec![base_ptr, index_value],
                        result: Some(result),
                    },
                    place.span.clone(),
                ));
                (insts, Value::Local(result))
            }
            ExprNode::Deref(ptr) => self.lower_expr(ptr),
            _ => {
                let (insts, value) = self.lower_expr(place);
                (insts, value)
            }
        }
    }

    fn lower_expr(&mut self, expr: &ExprPtr) -> (Vec<Inst>, Value) {
        let span = expr.span.clone();
        match &expr.node {
            ExprNode::IntLit(v) => {
                let ty = strip_perm(&self.expr_ty(expr));
                let bytes = int_bytes(*v, &ty);
                (Vec::new(), Value::Immediate(bytes))
            }
            ExprNode::FloatLit(v) => (Vec::new(), Value::Immediate(v.to_le_bytes().to_vec())),
            ExprNode::BoolLit(v) => (Vec::new(), Value::imm_bool(*v)),
            ExprNode::CharLit(c) => {
                (Vec::new(), Value::Immediate((*c as u32).to_le_bytes().to_vec()))
            }
            ExprNode::StringLit(text) => {
                let symbol = format!("str_{}_{}", self.module_key.replace("::", "_"), {
                    let id = self.next_string;
                    self.next_string += 1;
                    id
                });
                self.string_globals.push(IrDecl::GlobalConst {
                    symbol: symbol.clone(),
                    bytes: text.as_bytes().to_vec(),
                });
                let result = self.fresh();
                (
                    vec![Inst::new(
                        InstNode::ReadPath {
                            symbol,
                            result,
                        },
                        span,
                    )],
                    Value::Local(result),
                )
            }
            ExprNode::NullLit => (Vec::new(), Value::imm_u64(0)),
            ExprNode::Unit => (Vec::new(), Value::unit()),
            ExprNode::Identifier(name) => match self.locals.get(name).copied() {
                Some(local) => {
                    let result = self.fresh();
                    (
                        vec![Inst::new(
                            InstNode::ReadVar {
                                local,
                                result,
                            },
                            span,
                        )],
                        Value::Local(result),
                    )
                }
                None => {
                    let symbol = resolve_path(self.sigma, self.module_key, &[name.clone()])
                        .unwrap_or_else(|| name.clone());
                    let result = self.fresh();
                    (
                        vec![Inst::new(InstNode::ReadPath { symbol, result }, span)],
                        Value::Local(result),
                    )
                }
            },
            ExprNode::Path(path) => {
                let symbol = resolve_path(self.sigma, self.module_key, path)
                    .unwrap_or_else(|| path.join("::"));
                let result = self.fresh();
                (
                    vec![Inst::new(InstNode::ReadPath { symbol, result }, span)],
                    Value::Local(result),
                )
            }
            ExprNode::Field { base, .. } => {
                let (mut insts, ptr) = self.lower_place_addr(expr);
                let _ = base;
                let result = self.fresh();
                insts.push(Inst::new(InstNode::ReadPtr { ptr, result }, span));
                (insts, Value::Local(result))
            }
            ExprNode::Index { .. } => {
                let (mut insts, ptr) = self.lower_place_addr(expr);
                let result = self.fresh();
                insts.push(Inst::new(InstNode::ReadPtr { ptr, result }, span));
                (insts, Value::Local(result))
            }
            ExprNode::AddressOf(place) => self.lower_place_addr(place),
            ExprNode::Deref(ptr) => {
                let (mut insts, ptr_value) = self.lower_expr(ptr);
                let result = self.fresh();
                insts.push(Inst::new(
                    InstNode::ReadPtr {
                        ptr: ptr_value,
                        result,
                    },
                    span,
                ));
                (insts, Value::Local(result))
            }
            ExprNode::Move(inner) => {
                let (mut insts, value) = self.lower_expr(inner);
                if let ExprNode::Identifier(name) = &inner.node {
                    if let Some(local) = self.locals.get(name) {
                        // The source slot is dead after a move; scope exit
                        // must not drop it again.
                        insts.push(Inst::new(InstNode::MoveState { local: *local }, span));
                    }
                }
                (insts, value)
            }
            ExprNode::Unary { operand, .. } | ExprNode::Cast { expr: operand, .. } => {
                let (mut insts, value) = self.lower_expr(operand);
                let result = self.fresh();
                insts.push(Inst::new(
                    InstNode::Call {
                        callee: Value::Symbol("__op".into()),
                        args: vec![value],
                        result: Some(result),
                    },
                    span,
                ));
                (insts, Value::Local(result))
            }
            ExprNode::Transmute { expr: inner, .. } => self.lower_expr(inner),
            ExprNode::Binary { lhs, rhs, op } => {
                let (mut insts, lhs_value) = self.lower_expr(lhs);
                let (mut rhs_insts, rhs_value) = self.lower_expr(rhs);
                insts.append(&mut rhs_insts);
                let result = self.fresh();
                insts.push(Inst::new(
                    InstNode::Call {
                        callee: Value::Symbol(format!("__op_{op:?}").to_lowercase()),
                        args: vec![lhs_value, rhs_value],
                        result: Some(result),
                    },
                    span,
                ));
                (insts, Value::Local(result))
            }
            ExprNode::If {
                cond,
                then_block,
                else_block,
            } => {
                let (mut insts, cond_value) = self.lower_expr(cond);
                let result = self.fresh();
                let (then_insts, then_value) = self.lower_block(then_block);
                let mut then_seq = then_insts;
                then_seq.push(Inst::new(
                    InstNode::StoreVarNoDrop {
                        local: result,
                        value: then_value,
                    },
                    span.clone(),
                ));
                let else_body = else_block.as_ref().map(|els| {
                    let (else_insts, else_value) = self.lower_block(els);
                    let mut else_seq = else_insts;
                    else_seq.push(Inst::new(
                        InstNode::StoreVarNoDrop {
                            local: result,
                            value: else_value,
                        },
                        span.clone(),
                    ));
                    Box::new(Inst::seq(else_seq, span.clone()))
                });
                insts.push(Inst::new(
                    InstNode::If {
                        cond: cond_value,
                        then_body: Box::new(Inst::seq(then_seq, span.clone())),
                        else_body,
                        result: Some(result),
                    },
                    span,
                ));
                (insts, Value::Local(result))
            }
            ExprNode::Match { scrutinee, arms } => {
                let (mut insts, scrutinee_value) = self.lower_expr(scrutinee);
                let result = self.fresh();
                let mut lowered_arms = Vec::new();
                let mut default = None;
                for (index, arm) in arms.iter().enumerate() {
                    self.bind_pattern_locals(&arm.pattern);
                    let (arm_insts, arm_value) = self.lower_expr(&arm.body);
                    let mut seq = arm_insts;
                    seq.push(Inst::new(
                        InstNode::StoreVarNoDrop {
                            local: result,
                            value: arm_value,
                        },
                        arm.span.clone(),
                    ));
                    let arm_inst = Inst::seq(seq, arm.span.clone());
                    match pattern_tag(&arm.pattern) {
                        Some(tag) => lowered_arms.push((tag, arm_inst)),
                        None => {
                            if default.is_none() {
                                default = Some(Box::new(arm_inst));
                            } else {
                                lowered_arms.push((index as u64, arm_inst));
                            }
                        }
                    }
                }
                insts.push(Inst::new(
                    InstNode::Match {
                        scrutinee: scrutinee_value,
                        arms: lowered_arms,
                        default,
                        result: Some(result),
                    },
                    span,
                ));
                (insts, Value::Local(result))
            }
            ExprNode::Block(block) => {
                let (insts, value) = self.lower_block(block);
                let out = Inst::new(
                    InstNode::Block {
                        setup: Box::new(Inst::seq(Vec::new(), span.clone())),
                        body: Box::new(Inst::seq(insts, span.clone())),
                        value: value.clone(),
                    },
                    span,
                );
                (vec![out], value)
            }
            ExprNode::RecordLit { fields, .. } => {
                let ty = self.expr_ty(expr);
                self.note_drop_type(&ty);
                let mut insts = Vec::new();
                let slot = self.fresh();
                insts.push(Inst::new(
                    InstNode::BindVar {
                        local: slot,
                        value: Value::Opaque,
                    },
                    span.clone(),
                ));
                for field in fields {
                    let (mut field_insts, value) = self.lower_expr(&field.value);
                    insts.append(&mut field_insts);
                    insts.push(Inst::new(
                        InstNode::WritePtr {
                            ptr: Value::Local(slot),
                            value,
                        },
                        field.span.clone(),
                    ));
                }
                (insts, Value::Local(slot))
            }
            ExprNode::EnumLit { payload, .. } => {
                let mut insts = Vec::new();
                let slot = self.fresh();
                insts.push(Inst::new(
                    InstNode::BindVar {
                        local: slot,
                        value: Value::Opaque,
                    },
                    span.clone(),
                ));
                for value in payload {
                    let (mut value_insts, lowered) = self.lower_expr(value);
                    insts.append(&mut value_insts);
                    insts.push(Inst::new(
                        InstNode::WritePtr {
                            ptr: Value::Local(slot),
                            value: lowered,
                        },
                        value.span.clone(),
                    ));
                }
                (insts, Value::Local(slot))
            }
            ExprNode::Call { callee, args } => self.lower_call(callee, args, &span),
            ExprNode::MethodCall {
                receiver,
                name,
                args,
            } => self.lower_method_call(expr, receiver, name, args, &span),
            ExprNode::Alloc { region, value } => {
                let (mut insts, lowered) = self.lower_expr(value);
                let region_value = region
                    .as_ref()
                    .and_then(|name| self.locals.get(name))
                    .copied()
                    .map(Value::Local)
                    .unwrap_or(Value::Opaque);
                let result = self.fresh();
                insts.push(Inst::new(
                    InstNode::Alloc {
                        region: region_value,
                        value: lowered,
                        result,
                    },
                    span,
                ));
                (insts, Value::Local(result))
            }
            ExprNode::Propagate(inner) => {
                let (mut insts, value) = self.lower_expr(inner);
                insts.push(Inst::new(
                    InstNode::PanicCheck {
                        cleanup: Box::new(Inst::seq(Vec::new(), span.clone())),
                    },
                    span,
                ));
                (insts, value)
            }
            ExprNode::Range { start, end, .. } => {
                let mut insts = Vec::new();
                let mut parts = Vec::new();
                for endpoint in [start, end].into_iter().flatten() {
                    let (mut e_insts, value) = self.lower_expr(endpoint);
                    insts.append(&mut e_insts);
                    parts.push(value);
                }
                let result = self.fresh();
                insts.push(Inst::new(
                    InstNode::Call {
                        callee: Value::Symbol("__range".into()),
                        args: parts,
                        result: Some(result),
                    },
                    span,
                ));
                (insts, Value::Local(result))
            }
            ExprNode::Spawn(block) => {
                let (body_insts, value) = self.lower_block(block);
                let result = self.fresh();
                let body = Inst::new(
                    InstNode::Block {
                        setup: Box::new(Inst::seq(Vec::new(), span.clone())),
                        body: Box::new(Inst::seq(body_insts, span.clone())),
                        value,
                    },
                    span.clone(),
                );
                (
                    vec![Inst::new(
                        InstNode::Call {
                            callee: Value::Symbol("cursive::runtime::region::new_scoped".into()),
                            args: vec![Value::Opaque],
                            result: Some(result),
                        },
                        span.clone(),
                    ), body],
                    Value::Local(result),
                )
            }
            ExprNode::Wait(operand)
            | ExprNode::Sync(operand)
            | ExprNode::YieldFrom(operand) => {
                let (mut insts, value) = self.lower_expr(operand);
                let result = self.fresh();
                insts.push(Inst::new(
                    InstNode::Call {
                        callee: Value::Symbol("__await".into()),
                        args: vec![value],
                        result: Some(result),
                    },
                    span,
                ));
                (insts, Value::Local(result))
            }
            ExprNode::Race { arms } => {
                let mut insts = Vec::new();
                let mut values = Vec::new();
                for arm in arms {
                    let (mut arm_insts, value) = self.lower_expr(&arm.operand);
                    insts.append(&mut arm_insts);
                    values.push(value);
                }
                let result = self.fresh();
                insts.push(Inst::new(
                    InstNode::Phi {
                        sources: values,
                        result,
                    },
                    span,
                ));
                (insts, Value::Local(result))
            }
            ExprNode::All { operands } => {
                let mut insts = Vec::new();
                let mut values = Vec::new();
                for operand in operands {
                    let (mut o_insts, value) = self.lower_expr(operand);
                    insts.append(&mut o_insts);
                    values.push(value);
                }
                let result = self.fresh();
                insts.push(Inst::new(
                    InstNode::Phi {
                        sources: values,
                        result,
                    },
                    span,
                ));
                (insts, Value::Local(result))
            }
            ExprNode::Yield { value, .. } => {
                let mut insts = Vec::new();
                if let Some(v) = value {
                    let (mut v_insts, lowered) = self.lower_expr(v);
                    insts.append(&mut v_insts);
                    insts.push(Inst::new(
                        InstNode::StoreGlobal {
                            symbol: "__yield_out".into(),
                            value: lowered,
                        },
                        span.clone(),
                    ));
                }
                insts.push(Inst::new(InstNode::Branch { target: 3 }, span));
                (insts, Value::unit())
            }
            ExprNode::ContractResult | ExprNode::ContractEntry(_) => {
                // Contracts never lower; they are checked statically.
                (Vec::new(), Value::Opaque)
            }
        }
    }

    fn lower_call(&mut self, callee: &ExprPtr, args: &[ExprPtr], span: &Span) -> (Vec<Inst>, Value) {
        let mut insts = Vec::new();
        let mut lowered_args = Vec::new();
        for arg in args {
            let (mut arg_insts, value) = self.lower_expr(arg);
            insts.append(&mut arg_insts);
            lowered_args.push(value);
        }
        let symbol = match &callee.node {
            ExprNode::Identifier(name) => {
                resolve_path(self.sigma, self.module_key, &[name.clone()])
            }
            ExprNode::Path(path) => resolve_path(self.sigma, self.module_key, path),
            _ => None,
        };
        let callee_value = match &symbol {
            Some(key) => Value::Symbol(key.clone()),
            None => {
                let (mut callee_insts, value) = self.lower_expr(callee);
                insts.append(&mut callee_insts);
                value
            }
        };
        // Cross-module calls first check the callee module's poison flag;
        // every panic-carrying callee is followed by a panic check.
        if let Some(key) = &symbol {
            if let Some((module, _)) = key.rsplit_once("::") {
                if module != self.module_key && self.sigma.modules.contains_key(module) {
                    insts.push(Inst::new(
                        InstNode::CheckPoison {
                            module: module.to_string(),
                        },
                        span.clone(),
                    ));
                }
            }
        }
        let result = self.fresh();
        insts.push(Inst::new(
            InstNode::Call {
                callee: callee_value,
                args: lowered_args,
                result: Some(result),
            },
            span.clone(),
        ));
        if symbol.as_deref().map(abi::needs_panic_out).unwrap_or(false) {
            insts.push(Inst::new(
                InstNode::PanicCheck {
                    cleanup: Box::new(Inst::seq(Vec::new(), span.clone())),
                },
                span.clone(),
            ));
        }
        (insts, Value::Local(result))
    }

    fn lower_method_call(
        &mut self,
        expr: &ExprPtr,
        receiver: &ExprPtr,
        name: &str,
        args: &[ExprPtr],
        span: &Span,
    ) -> (Vec<Inst>, Value) {
        let (mut insts, recv_ptr) = self.lower_place_addr(receiver);
        let mut lowered_args = vec![recv_ptr.clone()];
        for arg in args {
            let (mut arg_insts, value) = self.lower_expr(arg);
            insts.append(&mut arg_insts);
            lowered_args.push(value);
        }
        let recv_ty = strip_perm(&self.expr_ty(receiver));
        let result = self.fresh();
        let node = match &*recv_ty {
            Ty::Dynamic { class_key } => {
                // Dynamic dispatch reads the slot out of the v-table half
                // of the fat pointer and calls with the data half first.
                let slot = VTableLayout::of(self.sigma, class_key)
                    .and_then(|l| l.slot_of(name))
                    .unwrap_or(crate::ir::layout::VTABLE_HEADER_SLOTS);
                InstNode::CallVTable {
                    base: recv_ptr,
                    slot,
                    args: lowered_args,
                    result: Some(result),
                }
            }
            Ty::Path { key, .. } => {
                let symbol = format!("{key}::{name}");
                InstNode::Call {
                    callee: Value::Symbol(symbol),
                    args: lowered_args,
                    result: Some(result),
                }
            }
            Ty::ModalState { key, .. } if key == "Region" => InstNode::Call {
                callee: Value::Symbol(format!("cursive::runtime::region::{name}")),
                args: lowered_args,
                result: Some(result),
            },
            Ty::ModalState { key, .. } => {
                // Transition methods move the receiver into its next state.
                let symbol = format!("{key}::{name}");
                let call = InstNode::Call {
                    callee: Value::Symbol(symbol),
                    args: lowered_args,
                    result: Some(result),
                };
                if let ExprNode::Identifier(root) = &receiver.node {
                    if let Some(local) = self.locals.get(root).copied() {
                        insts.push(Inst::new(InstNode::MoveState { local }, span.clone()));
                    }
                }
                call
            }
            Ty::StringTy(_) => InstNode::Call {
                callee: Value::Symbol(format!("cursive::runtime::string::{name}")),
                args: lowered_args,
                result: Some(result),
            },
            Ty::BytesTy(_) => InstNode::Call {
                callee: Value::Symbol(format!("cursive::runtime::bytes::{name}")),
                args: lowered_args,
                result: Some(result),
            },
            _ => InstNode::Call {
                callee: Value::Opaque,
                args: lowered_args,
                result: Some(result),
            },
        };
        insts.push(Inst::new(node, span.clone()));
        let _ = expr;
        (insts, Value::Local(result))
    }

    /// Pattern bindings become fresh locals fed by the match scrutinee.
    fn bind_pattern_locals(&mut self, pattern: &Pattern) {
        match &pattern.node {
            PatternNode::Binding(name) => {
                let local = self.fresh();
                self.locals.insert(name.clone(), local);
            }
            PatternNode::EnumVariant { payload, .. } => {
                for sub in payload {
                    self.bind_pattern_locals(sub);
                }
            }
            PatternNode::Tuple(elems) => {
                for sub in elems {
                    self.bind_pattern_locals(sub);
                }
            }
            PatternNode::ModalState { bindings, .. } => {
                for name in bindings {
                    let local = self.fresh();
                    self.locals.insert(name.clone(), local);
                }
            }
            _ => {}
        }
    }
}

/// Discriminant tag for switch lowering; `None` routes to the default arm.
fn pattern_tag(pattern: &Pattern) -> Option<u64> {
    match &pattern.node {
        PatternNode::IntLit(v) => u64::try_from(*v).ok(),
        PatternNode::BoolLit(v) => Some(*v as u64),
        PatternNode::CharLit(c) => Some(*c as u64),
        _ => None,
    }
}

fn int_bytes(value: i128, ty: &TypeRef) -> Vec<u8> {
    let width = match &**ty {
        Ty::Prim("i8") | Ty::Prim("u8") | Ty::Prim("bool") => 1,
        Ty::Prim("i16") | Ty::Prim("u16") => 2,
        Ty::Prim("i64") | Ty::Prim("u64") | Ty::Prim("usize") => 8,
        _ => 4,
    };
    value.to_le_bytes()[..width].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::check::check;
    use crate::sema::symbols::collect;
    use crate::source::load_source;
    use crate::syntax::parser::parse_module;

    fn lower_source(text: &str) -> (Vec<IrModule>, LowerCtx) {
        let loaded = load_source("t.cursive", text.as_bytes());
        let parsed = parse_module(&loaded.source.unwrap(), "app");
        assert!(!parsed.diags.has_error(), "{:?}", parsed.diags.ordered());
        let collected = collect("app", vec![parsed.module]);
        let checked = check(&collected.sigma);
        assert!(!checked.diags.has_error(), "{:?}", checked.diags.ordered());
        lower_assembly(&collected.sigma, &checked)
    }

    #[test]
    fn main_gets_panic_handle_not_panic_param() {
        let (modules, ctx) = lower_source("procedure main() -> i32 { 0 }\n");
        assert_eq!(ctx.main_symbol.as_deref(), Some("app::main"));
        let IrDecl::Proc { params, body, .. } = &modules[0].decls[0] else {
            panic!("expected a proc");
        };
        assert!(params.iter().all(|p| p.name != "__panic"));
        let text = format!("{body:?}");
        assert!(text.contains("InitPanicHandle"));
    }

    #[test]
    fn helper_gets_trailing_panic_param() {
        let (modules, _) = lower_source("procedure helper() -> i32 { 1 }\n");
        let IrDecl::Proc { params, .. } = &modules[0].decls[0] else {
            panic!("expected a proc");
        };
        assert_eq!(params.last().unwrap().name, "__panic");
    }

    #[test]
    fn calls_are_followed_by_panic_checks() {
        let (modules, _) = lower_source(
            "procedure helper() -> i32 { 1 }\nprocedure main() -> i32 { helper() }\n",
        );
        let main_decl = modules[0]
            .decls
            .iter()
            .find_map(|d| match d {
                IrDecl::Proc { symbol, body, .. } if symbol == "app::main" => Some(body),
                _ => None,
            })
            .expect("main lowered");
        let text = format!("{main_decl:?}");
        assert!(text.contains("PanicCheck"));
    }

    #[test]
    fn bitcopy_locals_get_no_drop_glue() {
        let (_, ctx) = lower_source("procedure main() -> i32 { let x: i32 = 4\nx }\n");
        assert!(ctx.drop_glue_types.is_empty());
    }
}
