// SPDX-License-Identifier: PMPL-1.0-or-later

//! Capability propagation.
//!
//! Every capability is a nominal class whose name starts with `$`. A
//! procedure's requirement is the union of its direct-use set (capability
//! parameters its body actually touches) and every callee's requirement,
//! computed as a fixpoint over the call graph. Extern procedures are
//! sinks: they may not accept capability parameters at all.

use crate::diag::{Diagnostic, DiagnosticStream};
use crate::sema::resolve::{lower_type, resolve_path};
use crate::sema::symbols::{Declaration, SymbolTable};
use crate::sema::types::{strip_perm, Ty, TypeRef};
use crate::syntax::ast::{Block, Expr, ExprNode, Item, ProcedureDecl, Stmt};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct CapAnalysis {
    /// Procedure key → required capability class keys.
    pub requirements: BTreeMap<String, BTreeSet<String>>,
    pub diags: DiagnosticStream,
}

/// The capability class behind a parameter type, if any.
pub fn capability_of(ty: &TypeRef) -> Option<String> {
    match &*strip_perm(ty) {
        Ty::Dynamic { class_key } if class_key.starts_with('$') => Some(class_key.clone()),
        _ => None,
    }
}

pub fn analyze(sigma: &SymbolTable) -> CapAnalysis {
    let mut analysis = CapAnalysis::default();
    let mut direct: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut calls: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for module in &sigma.parsed {
        let module_key = module.path_key.clone();
        for item in &module.items {
            match item {
                Item::Procedure(p) => {
                    let key = format!("{module_key}::{}", p.name);
                    let (used, callees) =
                        scan_procedure(sigma, &module_key, p, &mut analysis.diags);
                    direct.insert(key.clone(), used);
                    calls.insert(key, callees);
                }
                Item::Record(r) => {
                    for method in &r.methods {
                        let key = format!("{module_key}::{}::{}", r.name, method.name);
                        let (used, callees) =
                            scan_procedure(sigma, &module_key, method, &mut analysis.diags);
                        direct.insert(key.clone(), used);
                        calls.insert(key, callees);
                    }
                }
                Item::Extern(block) => {
                    for proc in &block.procs {
                        for param in &proc.params {
                            let mut scratch = DiagnosticStream::new();
                            let lowered =
                                lower_type(sigma, &module_key, &param.ty, &mut scratch);
                            if lowered.as_ref().and_then(capability_of).is_some() {
                                analysis.diags.emit(Diagnostic::from_code(
                                    "E-CAP-0011",
                                    Some(param.span.clone()),
                                    Some(&proc.name),
                                ));
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    // Transitive closure: iterate until no requirement set grows. The call
    // graph is small enough that a plain fixpoint beats an SCC pass.
    let mut requirements = direct;
    loop {
        let mut changed = false;
        for (caller, callees) in &calls {
            let mut merged: BTreeSet<String> =
                requirements.get(caller).cloned().unwrap_or_default();
            for callee in callees {
                if let Some(req) = requirements.get(callee) {
                    for cap in req {
                        merged.insert(cap.clone());
                    }
                }
            }
            let entry = requirements.entry(caller.clone()).or_default();
            if merged.len() > entry.len() {
                *entry = merged;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    analysis.requirements = requirements;
    analysis
}

/// One procedure's direct capability uses and resolved callee keys.
fn scan_procedure(
    sigma: &SymbolTable,
    module_key: &str,
    proc: &ProcedureDecl,
    diags: &mut DiagnosticStream,
) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut cap_params: BTreeMap<String, String> = BTreeMap::new();
    for param in &proc.params {
        let mut scratch = DiagnosticStream::new();
        if let Some(ty) = lower_type(sigma, module_key, &param.ty, &mut scratch) {
            if let Some(cap) = capability_of(&ty) {
                cap_params.insert(param.name.clone(), cap);
            }
        }
    }
    let _ = diags;

    let mut used = BTreeSet::new();
    let mut callees = BTreeSet::new();
    if let Some(body) = &proc.body {
        scan_block(sigma, module_key, body, &cap_params, &mut used, &mut callees);
    }
    (used, callees)
}

fn scan_block(
    sigma: &SymbolTable,
    module_key: &str,
    block: &Block,
    cap_params: &BTreeMap<String, String>,
    used: &mut BTreeSet<String>,
    callees: &mut BTreeSet<String>,
) {
    for stmt in &block.stmts {
        scan_stmt(sigma, module_key, stmt, cap_params, used, callees);
    }
    if let Some(tail) = &block.tail {
        scan_expr(sigma, module_key, tail, cap_params, used, callees);
    }
}

fn scan_stmt(
    sigma: &SymbolTable,
    module_key: &str,
    stmt: &Stmt,
    cap_params: &BTreeMap<String, String>,
    used: &mut BTreeSet<String>,
    callees: &mut BTreeSet<String>,
) {
    match stmt {
        Stmt::Let { init, .. } => scan_expr(sigma, module_key, init, cap_params, used, callees),
        Stmt::Assign { place, value, .. } => {
            scan_expr(sigma, module_key, place, cap_params, used, callees);
            scan_expr(sigma, module_key, value, cap_params, used, callees);
        }
        Stmt::Expr(e) => scan_expr(sigma, module_key, e, cap_params, used, callees),
        Stmt::Return { value: Some(v), .. } => {
            scan_expr(sigma, module_key, v, cap_params, used, callees)
        }
        Stmt::Return { value: None, .. } | Stmt::Break(_) | Stmt::Continue(_) => {}
        Stmt::While { cond, body, .. } => {
            scan_expr(sigma, module_key, cond, cap_params, used, callees);
            scan_block(sigma, module_key, body, cap_params, used, callees);
        }
        Stmt::Loop { body, .. }
        | Stmt::Region { body, .. }
        | Stmt::Unsafe { body, .. }
        | Stmt::KeyBlock { body, .. } => {
            scan_block(sigma, module_key, body, cap_params, used, callees)
        }
        Stmt::For { iter, body, .. } => {
            scan_expr(sigma, module_key, iter, cap_params, used, callees);
            scan_block(sigma, module_key, body, cap_params, used, callees);
        }
        Stmt::Parallel { arms, .. } => {
            for arm in arms {
                scan_block(sigma, module_key, arm, cap_params, used, callees);
            }
        }
    }
}

fn scan_expr(
    sigma: &SymbolTable,
    module_key: &str,
    expr: &Expr,
    cap_params: &BTreeMap<String, String>,
    used: &mut BTreeSet<String>,
    callees: &mut BTreeSet<String>,
) {
    let mut walk = |e: &Expr| scan_expr(sigma, module_key, e, cap_params, used, callees);
    match &expr.node {
        ExprNode::Identifier(name) => {
            if let Some(cap) = cap_params.get(name) {
                used.insert(cap.clone());
            }
        }
        ExprNode::Call { callee, args } => {
            if let ExprNode::Identifier(name) = &callee.node {
                if let Some(key) = resolve_path(sigma, module_key, &[name.clone()]) {
                    if matches!(
                        sigma.lookup(&key),
                        Some(Declaration::Procedure(_)) | Some(Declaration::ExternProc { .. })
                    ) {
                        callees.insert(key);
                    }
                }
            } else if let ExprNode::Path(path) = &callee.node {
                if let Some(key) = resolve_path(sigma, module_key, path) {
                    callees.insert(key);
                }
            } else {
                scan_expr(sigma, module_key, callee, cap_params, used, callees);
            }
            for arg in args {
                scan_expr(sigma, module_key, arg, cap_params, used, callees);
            }
        }
        ExprNode::MethodCall {
            receiver,
            name: _,
            args,
        } => {
            scan_expr(sigma, module_key, receiver, cap_params, used, callees);
            for arg in args {
                scan_expr(sigma, module_key, arg, cap_params, used, callees);
            }
        }
        ExprNode::Field { base, .. } => walk(base),
        ExprNode::Index { base, index } => {
            walk(base);
            walk(index);
        }
        ExprNode::Unary { operand, .. } => walk(operand),
        ExprNode::Binary { lhs, rhs, .. } => {
            walk(lhs);
            walk(rhs);
        }
        ExprNode::AddressOf(e)
        | ExprNode::Deref(e)
        | ExprNode::Move(e)
        | ExprNode::Propagate(e)
        | ExprNode::Wait(e)
        | ExprNode::Sync(e)
        | ExprNode::YieldFrom(e)
        | ExprNode::ContractEntry(e) => walk(e),
        ExprNode::Cast { expr: e, .. } | ExprNode::Transmute { expr: e, .. } => walk(e),
        ExprNode::If {
            cond,
            then_block,
            else_block,
        } => {
            walk(cond);
            scan_block(sigma, module_key, then_block, cap_params, used, callees);
            if let Some(els) = else_block {
                scan_block(sigma, module_key, els, cap_params, used, callees);
            }
        }
        ExprNode::Match { scrutinee, arms } => {
            walk(scrutinee);
            for arm in arms {
                scan_expr(sigma, module_key, &arm.body, cap_params, used, callees);
            }
        }
        ExprNode::Block(block) | ExprNode::Spawn(block) => {
            scan_block(sigma, module_key, block, cap_params, used, callees)
        }
        ExprNode::RecordLit { fields, .. } => {
            for field in fields {
                scan_expr(sigma, module_key, &field.value, cap_params, used, callees);
            }
        }
        ExprNode::EnumLit { payload, .. } | ExprNode::All { operands: payload } => {
            for e in payload {
                scan_expr(sigma, module_key, e, cap_params, used, callees);
            }
        }
        ExprNode::Alloc { value, .. } => walk(value),
        ExprNode::Range { start, end, .. } => {
            if let Some(s) = start {
                walk(s);
            }
            if let Some(e) = end {
                walk(e);
            }
        }
        ExprNode::Race { arms } => {
            for arm in arms {
                scan_expr(sigma, module_key, &arm.operand, cap_params, used, callees);
                scan_expr(sigma, module_key, &arm.handler, cap_params, used, callees);
            }
        }
        ExprNode::Yield { value: Some(v), .. } => walk(v),
        _ => {}
    }
}
