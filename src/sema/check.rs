// SPDX-License-Identifier: PMPL-1.0-or-later

//! The type checker (phase P3) — the center of the compiler.
//!
//! Two mutually recursive judgment forms drive everything: the value form
//! (`check_expr`) computes an expression's type and records it in the
//! τ-map; the place form (`check_place`) types an expression as an
//! assignable/addressable location. Permission, pointer-state, modal,
//! key, capability, and contract discipline all hang off these walks.

use crate::diag::{Diagnostic, DiagnosticStream};
use crate::sema::caps::{self, CapAnalysis};
use crate::sema::env::{TypeEnv, UnsafeRanges};
use crate::sema::keys::{
    acquisition_conflict, block_conflict, in_canonical_order, lower_key_path, KeyContext,
    KeyPath, KeyPathSeg,
};
use crate::sema::pattern::check_match_coverage;
use crate::sema::resolve::{as_async, lower_type, resolve_path};
use crate::sema::symbols::{Declaration, SymbolTable};
use crate::sema::types::{
    self, eq_ty, integer_bounds, is_bool, is_float, is_integer, is_never, is_numeric, is_unit,
    join, perm_of, render, strip_perm, Permission, PtrState, RawPtrQual, StrState, Ty, TypeRef,
};
use crate::source::Span;
use crate::syntax::ast::{
    Block, ClassMethodDecl, Contract, EnumDecl, Expr, ExprNode, ExprPtr, FieldDecl, Item,
    KeyMode, MatchArm, ModalDecl, ParamMode, Pattern, PatternNode, ProcedureDecl,
    RaceHandlerKind, ReceiverPerm, RecordDecl, Stmt, UnaryOp,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

/// The τ-map: every checked expression node maps to exactly one type.
#[derive(Debug, Default)]
pub struct TauMap {
    map: HashMap<usize, TypeRef>,
}

impl TauMap {
    fn record(&mut self, expr: &ExprPtr, ty: TypeRef) {
        self.map.insert(Rc::as_ptr(expr) as usize, ty);
    }

    pub fn get(&self, expr: &ExprPtr) -> Option<&TypeRef> {
        self.map.get(&(Rc::as_ptr(expr) as usize))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// A checked procedure signature, keyed for the lowering phase.
#[derive(Debug, Clone)]
pub struct ProcSig {
    pub key: String,
    pub params: Vec<(Option<ParamMode>, TypeRef)>,
    pub ret: TypeRef,
    pub is_extern: bool,
    pub span: Span,
}

#[derive(Debug)]
pub struct CheckResult {
    pub tau: TauMap,
    pub proc_sigs: BTreeMap<String, ProcSig>,
    pub cap_requirements: BTreeMap<String, BTreeSet<String>>,
    pub diags: DiagnosticStream,
}

/// Type-check every procedure body in the assembly.
pub fn check(sigma: &SymbolTable) -> CheckResult {
    let cap_analysis = caps::analyze(sigma);
    let mut result = CheckResult {
        tau: TauMap::default(),
        proc_sigs: collect_proc_sigs(sigma),
        cap_requirements: cap_analysis.requirements.clone(),
        diags: DiagnosticStream::new(),
    };
    result.diags.merge(cap_analysis.diags.clone());

    for module in &sigma.parsed {
        let module_key = module.path_key.clone();
        for item in &module.items {
            match item {
                Item::Procedure(p) => {
                    check_procedure(
                        sigma,
                        &cap_analysis,
                        &module_key,
                        p,
                        None,
                        &mut result.tau,
                        &mut result.diags,
                    );
                }
                Item::Record(r) => {
                    check_record(sigma, &cap_analysis, &module_key, r, &mut result);
                }
                Item::Modal(m) => {
                    check_modal(sigma, &cap_analysis, &module_key, m, &mut result);
                }
                Item::Static(s) => {
                    let mut checker = ProcChecker::new(
                        sigma,
                        &cap_analysis,
                        &module_key,
                        types::unit(),
                        None,
                        &mut result.tau,
                        &mut result.diags,
                    );
                    if let Some(ty) = lower_type(sigma, &module_key, &s.ty, checker.diags) {
                        checker.check_expr(&s.init, Some(&ty));
                    }
                }
                _ => {}
            }
        }
    }
    result
}

/// Executable assemblies need `procedure main() -> i32` in the root module.
pub fn validate_entry(sigma: &SymbolTable, assembly: &str) -> DiagnosticStream {
    let mut diags = DiagnosticStream::new();
    let key = format!("{assembly}::main");
    match sigma.lookup(&key) {
        Some(Declaration::Procedure(p)) => {
            let ret_is_i32 = p
                .ret
                .as_ref()
                .is_some_and(|t| matches!(&t.node, crate::syntax::ast::TypeNode::Prim(n) if n == "i32"));
            if !p.params.is_empty() || !ret_is_i32 {
                diags.emit(Diagnostic::from_code(
                    "E-SEM-3009",
                    Some(p.span.clone()),
                    Some("main must take no parameters and return i32"),
                ));
            }
        }
        _ => {
            diags.emit(Diagnostic::from_code("E-SEM-3009", None, Some(&key)));
        }
    }
    diags
}

fn collect_proc_sigs(sigma: &SymbolTable) -> BTreeMap<String, ProcSig> {
    let mut sigs = BTreeMap::new();
    let mut scratch = DiagnosticStream::new();
    for module in &sigma.parsed {
        let module_key = &module.path_key;
        for item in &module.items {
            match item {
                Item::Procedure(p) => {
                    let key = format!("{module_key}::{}", p.name);
                    sigs.insert(
                        key.clone(),
                        proc_sig(sigma, module_key, key, &p.params, p.ret.as_deref(), false, &p.span, &mut scratch),
                    );
                }
                Item::Record(r) => {
                    for method in &r.methods {
                        let key = format!("{module_key}::{}::{}", r.name, method.name);
                        sigs.insert(
                            key.clone(),
                            proc_sig(
                                sigma,
                                module_key,
                                key,
                                &method.params,
                                method.ret.as_deref(),
                                false,
                                &method.span,
                                &mut scratch,
                            ),
                        );
                    }
                }
                Item::Extern(block) => {
                    for proc in &block.procs {
                        let key = format!("{module_key}::{}", proc.name);
                        sigs.insert(
                            key.clone(),
                            proc_sig(
                                sigma,
                                module_key,
                                key,
                                &proc.params,
                                proc.ret.as_deref(),
                                true,
                                &proc.span,
                                &mut scratch,
                            ),
                        );
                    }
                }
                _ => {}
            }
        }
    }
    sigs
}

#[allow(clippy::too_many_arguments)]
fn proc_sig(
    sigma: &SymbolTable,
    module_key: &str,
    key: String,
    params: &[crate::syntax::ast::Param],
    ret: Option<&crate::syntax::ast::TypeExpr>,
    is_extern: bool,
    span: &Span,
    scratch: &mut DiagnosticStream,
) -> ProcSig {
    let lowered_params = params
        .iter()
        .map(|p| {
            let ty = lower_type(sigma, module_key, &p.ty, scratch).unwrap_or_else(types::never);
            (p.mode, ty)
        })
        .collect();
    let ret = ret
        .and_then(|t| lower_type(sigma, module_key, t, scratch))
        .unwrap_or_else(types::unit);
    ProcSig {
        key,
        params: lowered_params,
        ret,
        is_extern,
        span: span.clone(),
    }
}

fn check_record(
    sigma: &SymbolTable,
    caps: &CapAnalysis,
    module_key: &str,
    record: &RecordDecl,
    result: &mut CheckResult,
) {
    if implements_class(record, "Bitcopy") {
        for field in &record.fields {
            let mut scratch = DiagnosticStream::new();
            if let Some(ty) = lower_type(sigma, module_key, &field.ty, &mut scratch) {
                if !is_bitcopy(sigma, &ty) {
                    result.diags.emit(Diagnostic::error(
                        "E-SEM-0101",
                        format!(
                            "field `{}` of Bitcopy record `{}` is not bitcopy-like",
                            field.name, record.name
                        ),
                        Some(field.span.clone()),
                    ));
                }
            }
        }
    }
    let self_ty = types::path(format!("{module_key}::{}", record.name));
    for method in &record.methods {
        check_procedure(
            sigma,
            caps,
            module_key,
            method,
            Some(self_ty.clone()),
            &mut result.tau,
            &mut result.diags,
        );
    }
}

fn check_modal(
    sigma: &SymbolTable,
    caps: &CapAnalysis,
    module_key: &str,
    modal: &ModalDecl,
    result: &mut CheckResult,
) {
    let modal_key = format!("{module_key}::{}", modal.name);
    for state in &modal.states {
        let self_ty: TypeRef = Rc::new(Ty::ModalState {
            key: modal_key.clone(),
            state: state.name.clone(),
            args: Vec::new(),
        });
        for method in &state.methods {
            if method.is_transition {
                // A transition must step to a different state of the same
                // modal; its body constructs the target state.
                let target = method.ret.as_ref().and_then(|t| {
                    let mut scratch = DiagnosticStream::new();
                    lower_type(sigma, module_key, t, &mut scratch)
                });
                match target.as_deref() {
                    Some(Ty::ModalState { key, state: s, .. })
                        if *key == modal_key && *s != state.name => {}
                    _ => {
                        result.diags.emit(Diagnostic::from_code(
                            "E-MOD-0202",
                            Some(method.span.clone()),
                            Some(&method.name),
                        ));
                    }
                }
            }
            check_procedure(
                sigma,
                caps,
                module_key,
                method,
                Some(self_ty.clone()),
                &mut result.tau,
                &mut result.diags,
            );
        }
    }
}

fn implements_class(record: &RecordDecl, class: &str) -> bool {
    record
        .implements
        .iter()
        .any(|path| path.last().is_some_and(|n| n == class))
}

/// Bitcopy-likeness: primitives, pointers, ranges, views, and aggregates
/// of bitcopy parts; records must opt in through the Bitcopy class.
pub fn is_bitcopy(sigma: &SymbolTable, ty: &TypeRef) -> bool {
    match &*strip_perm(ty) {
        Ty::Prim(_) | Ty::Ptr { .. } | Ty::RawPtr { .. } | Ty::Range | Ty::Func { .. } => true,
        Ty::Slice(_) => true,
        Ty::StringTy(state) | Ty::BytesTy(state) => !matches!(state, Some(StrState::Managed)),
        Ty::Array { elem, .. } => is_bitcopy(sigma, elem),
        Ty::Tuple(elems) => elems.iter().all(|t| is_bitcopy(sigma, t)),
        Ty::Union(members) => members.iter().all(|t| is_bitcopy(sigma, t)),
        Ty::Path { key, .. } => match sigma.lookup(key) {
            Some(Declaration::Record(record)) => implements_class(record, "Bitcopy"),
            Some(Declaration::Enum(decl)) => enum_is_bitcopy(sigma, decl),
            _ => false,
        },
        Ty::Dynamic { .. } | Ty::ModalState { .. } => false,
        Ty::Perm { .. } => unreachable!("perm stripped above"),
    }
}

fn enum_is_bitcopy(sigma: &SymbolTable, decl: &EnumDecl) -> bool {
    let mut scratch = DiagnosticStream::new();
    decl.variants.iter().all(|v| {
        v.payload.iter().all(|ty| {
            lower_type(sigma, "", ty, &mut scratch)
                .map(|t| is_bitcopy(sigma, &t))
                .unwrap_or(false)
        })
    })
}

fn check_procedure(
    sigma: &SymbolTable,
    caps: &CapAnalysis,
    module_key: &str,
    proc: &ProcedureDecl,
    self_ty: Option<TypeRef>,
    tau: &mut TauMap,
    diags: &mut DiagnosticStream,
) {
    let ret = proc
        .ret
        .as_ref()
        .and_then(|t| lower_type(sigma, module_key, t, diags))
        .unwrap_or_else(types::unit);

    // An async procedure's declared return names the async carrier; the
    // body produces its Result and yields its Out.
    let async_info = if proc.is_async {
        match as_async(&ret) {
            Some(parts) => Some(parts),
            None => {
                diags.emit(Diagnostic::error(
                    "E-CON-0206",
                    "async procedure must return an async type",
                    Some(proc.span.clone()),
                ));
                None
            }
        }
    } else {
        None
    };

    let body_ret = async_info
        .as_ref()
        .map(|(_, _, result, _)| result.clone())
        .unwrap_or_else(|| ret.clone());

    let mut checker = ProcChecker::new(sigma, caps, module_key, body_ret, async_info, tau, diags);

    if let (Some(self_ty), Some(receiver)) = (&self_ty, &proc.receiver) {
        let perm = match receiver.perm {
            ReceiverPerm::Const => Permission::Const,
            ReceiverPerm::Shared => Permission::Shared,
            ReceiverPerm::Unique => Permission::Unique,
        };
        checker.env.bind(
            "self",
            perm == Permission::Unique,
            types::perm(perm, self_ty.clone()),
        );
    }
    for param in &proc.params {
        let ty = lower_type(sigma, module_key, &param.ty, checker.diags)
            .unwrap_or_else(types::never);
        if let Some(cap) = caps::capability_of(&ty) {
            checker.cap_scope.insert(cap);
        }
        // A borrowed (mode-less) parameter provides only Const unless its
        // type says otherwise; a move parameter is owned.
        let bound = match (&param.mode, &*ty) {
            (Some(ParamMode::Move), _) | (_, Ty::Perm { .. }) => ty.clone(),
            (None, _) => types::perm(Permission::Const, ty.clone()),
        };
        let writable = param.mode.is_some() || perm_of(&bound) == Permission::Unique;
        checker.env.bind(&param.name, writable, bound);
    }

    if let Some(contract) = &proc.contract {
        checker.check_contract(contract, &ret);
    }

    if let Some(body) = &proc.body {
        // The declared return type flows into the tail expression, so
        // polymorphic literals coerce before the final check.
        let expected = checker.ret.clone();
        let body_ty = checker.check_block_with_expected(body, Some(&expected));
        if !is_never(&body_ty) && !is_unit(&expected) && !checker.compatible(&body_ty, &expected) {
            checker.mismatch(&expected, &body_ty, &body.span);
        }
    }
}

// ---------------------------------------------------------------------------

enum ContractMode {
    None,
    Pre,
    Post,
}

struct ProcChecker<'a> {
    sigma: &'a SymbolTable,
    caps: &'a CapAnalysis,
    module_key: &'a str,
    tau: &'a mut TauMap,
    diags: &'a mut DiagnosticStream,
    env: TypeEnv,
    cap_scope: BTreeSet<String>,
    keys: KeyContext,
    unsafe_ranges: UnsafeRanges,
    regions: Vec<String>,
    ret: TypeRef,
    async_info: Option<(TypeRef, TypeRef, TypeRef, TypeRef)>,
    loop_depth: usize,
    contract_mode: ContractMode,
}

impl<'a> ProcChecker<'a> {
    fn new(
        sigma: &'a SymbolTable,
        caps: &'a CapAnalysis,
        module_key: &'a str,
        ret: TypeRef,
        async_info: Option<(TypeRef, TypeRef, TypeRef, TypeRef)>,
        tau: &'a mut TauMap,
        diags: &'a mut DiagnosticStream,
    ) -> Self {
        Self {
            sigma,
            caps,
            module_key,
            tau,
            diags,
            env: TypeEnv::new(),
            cap_scope: BTreeSet::new(),
            keys: KeyContext::new(),
            unsafe_ranges: UnsafeRanges::default(),
            regions: Vec::new(),
            ret,
            async_info,
            loop_depth: 0,
            contract_mode: ContractMode::None,
        }
    }

    fn error(&mut self, code: &str, span: &Span, detail: Option<&str>) {
        self.diags
            .emit(Diagnostic::from_code(code, Some(span.clone()), detail));
    }

    fn mismatch(&mut self, expected: &TypeRef, found: &TypeRef, span: &Span) {
        self.error(
            "E-SEM-0101",
            span,
            Some(&format!("expected {}, found {}", render(expected), render(found))),
        );
    }

    fn compatible(&self, found: &TypeRef, expected: &TypeRef) -> bool {
        if is_never(found) {
            return true;
        }
        let found = strip_perm(found);
        let expected_stripped = strip_perm(expected);
        if eq_ty(&found, &expected_stripped) {
            return true;
        }
        // A union accepts each of its members.
        if let Ty::Union(members) = &*expected_stripped {
            if members.iter().any(|m| eq_ty(m, &found)) {
                return true;
            }
            if let Ty::Union(found_members) = &*found {
                return found_members
                    .iter()
                    .all(|fm| members.iter().any(|m| eq_ty(m, fm)));
            }
        }
        // Pointer states: a Valid pointer satisfies an unconstrained use,
        // but Null/Expired never satisfy Valid.
        if let (Ty::Ptr { elem: fe, state: fs }, Ty::Ptr { elem: ee, state: es }) =
            (&*found, &*expected_stripped)
        {
            return eq_ty(fe, ee) && fs == es;
        }
        // String/Bytes polymorphism: a stated value satisfies the
        // polymorphic type.
        match (&*found, &*expected_stripped) {
            (Ty::StringTy(_), Ty::StringTy(None)) => true,
            (Ty::BytesTy(_), Ty::BytesTy(None)) => true,
            _ => false,
        }
    }

    // -- contracts ----------------------------------------------------------

    fn check_contract(&mut self, contract: &Contract, ret: &TypeRef) {
        if let Some(pre) = &contract.pre {
            self.contract_mode = ContractMode::Pre;
            let ty = self.check_expr(pre, Some(&types::boolean()));
            if !is_bool(&strip_perm(&ty)) && !is_never(&ty) {
                self.error("E-CON-0101", &pre.span, None);
            }
            self.check_purity(pre);
        }
        if let Some(post) = &contract.post {
            self.contract_mode = ContractMode::Post;
            // @result carries the procedure's declared return type.
            let saved = self.ret.clone();
            self.ret = ret.clone();
            let ty = self.check_expr(post, Some(&types::boolean()));
            self.ret = saved;
            if !is_bool(&strip_perm(&ty)) && !is_never(&ty) {
                self.error("E-CON-0101", &post.span, None);
            }
            self.check_purity(post);
        }
        self.contract_mode = ContractMode::None;
    }

    /// Purity is syntactic: no assignment, no allocation, no suspension,
    /// and no call into anything that requires a capability.
    fn check_purity(&mut self, expr: &ExprPtr) {
        let mut impure_span: Option<Span> = None;
        walk_expr(expr, &mut |e| {
            if impure_span.is_some() {
                return;
            }
            match &e.node {
                ExprNode::Alloc { .. }
                | ExprNode::Spawn(_)
                | ExprNode::Wait(_)
                | ExprNode::Sync(_)
                | ExprNode::Yield { .. }
                | ExprNode::YieldFrom(_)
                | ExprNode::Race { .. }
                | ExprNode::All { .. } => impure_span = Some(e.span.clone()),
                ExprNode::Call { callee, .. } => {
                    let key = match &callee.node {
                        ExprNode::Identifier(name) => {
                            resolve_path(self.sigma, self.module_key, &[name.clone()])
                        }
                        ExprNode::Path(path) => resolve_path(self.sigma, self.module_key, path),
                        _ => None,
                    };
                    if let Some(key) = key {
                        if self
                            .caps
                            .requirements
                            .get(&key)
                            .is_some_and(|req| !req.is_empty())
                        {
                            impure_span = Some(e.span.clone());
                        }
                    }
                }
                ExprNode::Block(block) => {
                    if block_mutates(block) {
                        impure_span = Some(e.span.clone());
                    }
                }
                _ => {}
            }
        });
        if let Some(span) = impure_span {
            self.error("E-CON-0102", &span, None);
        }
    }

    // -- blocks and statements ----------------------------------------------

    fn check_block(&mut self, block: &Block) -> TypeRef {
        self.check_block_with_expected(block, None)
    }

    fn check_block_with_expected(&mut self, block: &Block, expected: Option<&TypeRef>) -> TypeRef {
        self.env.push();
        for stmt in &block.stmts {
            self.check_stmt(stmt);
        }
        let ty = match &block.tail {
            Some(tail) => self.check_expr(tail, expected),
            // A block that ends in `return` diverges.
            None => match block.stmts.last() {
                Some(Stmt::Return { .. }) => types::never(),
                _ => types::unit(),
            },
        };
        self.env.pop();
        ty
    }

    /// Type an operand that may legitimately consume a place (wait, sync,
    /// race, all): no implicit-copy flagging.
    fn check_operand(&mut self, expr: &ExprPtr) -> TypeRef {
        if is_place_shaped(expr) {
            if let Some((ty, _)) = self.check_place_inner(expr) {
                let bare = strip_perm(&ty);
                self.tau.record(expr, bare.clone());
                return bare;
            }
        }
        self.check_expr(expr, None)
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let {
                mutable,
                name,
                ty,
                init,
                ..
            } => {
                let annotated = ty
                    .as_ref()
                    .and_then(|t| lower_type(self.sigma, self.module_key, t, self.diags));
                let init_ty = self.check_expr(init, annotated.as_ref());
                let bound = match annotated {
                    Some(ann) => {
                        if !self.compatible(&init_ty, &ann) {
                            self.mismatch(&ann, &init_ty, &init.span);
                        }
                        ann
                    }
                    None => strip_perm(&init_ty),
                };
                if let Some(cap) = caps::capability_of(&bound) {
                    self.cap_scope.insert(cap);
                }
                self.env.bind(name, *mutable, bound);
            }
            Stmt::Assign { place, value, span } => {
                let Some((place_ty, mutable)) = self.check_place_inner(place) else {
                    self.error("E-SEM-0105", &place.span, None);
                    self.check_expr(value, None);
                    return;
                };
                if !mutable || perm_of(&place_ty) == Permission::Const {
                    self.error("E-SEM-0119", span, None);
                }
                let expected = strip_perm(&place_ty);
                let value_ty = self.check_expr(value, Some(&expected));
                if !self.compatible(&value_ty, &expected) {
                    self.mismatch(&expected, &value_ty, &value.span);
                }
            }
            Stmt::Expr(e) => {
                self.check_expr(e, None);
            }
            Stmt::Return { value, span } => {
                let expected = self.ret.clone();
                match value {
                    Some(v) => {
                        let ty = self.check_expr(v, Some(&expected));
                        if !self.compatible(&ty, &expected) {
                            self.mismatch(&expected, &ty, &v.span);
                        }
                    }
                    None => {
                        if !is_unit(&expected) {
                            self.error(
                                "E-SEM-0101",
                                span,
                                Some(&format!("expected {}", render(&expected))),
                            );
                        }
                    }
                }
            }
            Stmt::Break(span) | Stmt::Continue(span) => {
                if self.loop_depth == 0 {
                    self.error("E-SEM-0127", span, None);
                }
            }
            Stmt::While { cond, body, .. } => {
                let cond_ty = self.check_expr(cond, Some(&types::boolean()));
                if !is_bool(&strip_perm(&cond_ty)) {
                    self.error("E-SEM-0109", &cond.span, None);
                }
                self.loop_depth += 1;
                self.check_block(body);
                self.loop_depth -= 1;
            }
            Stmt::Loop { body, .. } => {
                self.loop_depth += 1;
                self.check_block(body);
                self.loop_depth -= 1;
            }
            Stmt::For {
                binding,
                iter,
                body,
                ..
            } => {
                let iter_ty = self.check_expr(iter, None);
                if !matches!(&*strip_perm(&iter_ty), Ty::Range) {
                    self.mismatch(&Rc::new(Ty::Range), &iter_ty, &iter.span);
                }
                self.env.push();
                self.env.bind(binding, false, types::usize_ty());
                self.loop_depth += 1;
                for stmt in &body.stmts {
                    self.check_stmt(stmt);
                }
                if let Some(tail) = &body.tail {
                    self.check_expr(tail, None);
                }
                self.loop_depth -= 1;
                self.env.pop();
            }
            Stmt::Region { name, body, .. } => {
                self.env.push();
                self.env.bind(
                    name,
                    false,
                    Rc::new(Ty::ModalState {
                        key: "Region".into(),
                        state: "Active".into(),
                        args: Vec::new(),
                    }),
                );
                self.regions.push(name.clone());
                for stmt in &body.stmts {
                    self.check_stmt(stmt);
                }
                if let Some(tail) = &body.tail {
                    self.check_expr(tail, None);
                }
                self.regions.pop();
                self.env.pop();
            }
            Stmt::Unsafe { body, span } => {
                // The whole body range counts as unsafe, including nested
                // expressions checked later in this walk.
                self.unsafe_ranges
                    .record(&span.file, span.start_offset, span.end_offset);
                self.check_block(body);
            }
            Stmt::KeyBlock { keys, body, span } => {
                let lowered: Vec<(KeyPath, KeyMode)> = keys
                    .iter()
                    .map(|(path, mode)| (lower_key_path(path), *mode))
                    .collect();
                if !in_canonical_order(&lowered) {
                    self.error("W-CON-0001", span, None);
                }
                self.keys.push_scope();
                for (path, mode) in &lowered {
                    if let Some(held) = acquisition_conflict(&self.keys, path, *mode) {
                        let held_text = held.path.to_text();
                        self.error(
                            "E-KEY-0002",
                            span,
                            Some(&format!("{} conflicts with held {held_text}", path.to_text())),
                        );
                    }
                    self.keys.acquire(path.clone(), *mode);
                }
                self.check_block(body);
                self.keys.pop_scope();
            }
            Stmt::Parallel { arms, .. } => {
                // Sibling arms must have pairwise conflict-free capture
                // sets; each arm also checks as an ordinary block.
                let captures: Vec<Vec<(KeyPath, KeyMode)>> = arms
                    .iter()
                    .map(|arm| self.collect_captures(arm))
                    .collect();
                for i in 1..captures.len() {
                    for j in 0..i {
                        if let Some((p1, p2)) = block_conflict(&captures[j], &captures[i]) {
                            let detail = format!("{} vs {}", p1.to_text(), p2.to_text());
                            self.error("E-KEY-0001", &arms[i].span, Some(&detail));
                        }
                    }
                }
                for arm in arms {
                    self.check_block(arm);
                }
            }
        }
    }

    // -- suspension and captures ---------------------------------------------

    fn check_suspension(&mut self, span: &Span, releases: bool) {
        if self.keys.any_held() && !releases {
            self.error("E-KEY-0003", span, None);
        }
    }

    /// Approximate captured-key set of a block: place expressions rooted at
    /// bindings that exist outside the block. Assignment roots are writes,
    /// everything else reads.
    fn collect_captures(&self, block: &Block) -> Vec<(KeyPath, KeyMode)> {
        let mut raw: Vec<(KeyPath, KeyMode)> = Vec::new();
        collect_block_captures(block, &mut |path, mode| {
            if self.env.lookup(&path.root).is_none() {
                return;
            }
            raw.push((path, mode));
        });
        let mut out: Vec<(KeyPath, KeyMode)> = Vec::new();
        for (mut path, mode) in raw {
            self.annotate_boundaries(&mut path);
            if let Some(existing) = out.iter_mut().find(|(p, _)| *p == path) {
                if mode == KeyMode::Write {
                    existing.1 = KeyMode::Write;
                }
            } else {
                out.push((path, mode));
            }
        }
        out
    }

    /// Carry declared `#field` boundary markers onto a captured key path
    /// by walking the path's segments through the record declarations.
    fn annotate_boundaries(&self, path: &mut KeyPath) {
        let Some(binding) = self.env.lookup(&path.root) else {
            return;
        };
        let mut ty = strip_perm(&binding.ty);
        for seg in &mut path.segs {
            if seg.is_index {
                ty = match &*ty {
                    Ty::Array { elem, .. } => elem.clone(),
                    Ty::Slice(elem) => elem.clone(),
                    _ => return,
                };
                continue;
            }
            let Ty::Path { key, .. } = &*ty else {
                return;
            };
            let Some(Declaration::Record(record)) = self.sigma.lookup(key) else {
                return;
            };
            let Some(field) = record.fields.iter().find(|f| f.name == seg.name) else {
                return;
            };
            seg.boundary = field.boundary;
            let mut scratch = DiagnosticStream::new();
            match lower_type(self.sigma, self.module_key, &field.ty, &mut scratch) {
                Some(t) => ty = strip_perm(&t),
                None => return,
            }
        }
    }

    // -- the value judgment ---------------------------------------------------

    fn check_expr(&mut self, expr: &ExprPtr, expected: Option<&TypeRef>) -> TypeRef {
        let ty = self.infer_expr(expr, expected);
        self.tau.record(expr, ty.clone());
        ty
    }

    fn infer_expr(&mut self, expr: &ExprPtr, expected: Option<&TypeRef>) -> TypeRef {
        match &expr.node {
            ExprNode::IntLit(value) => self.int_literal(*value, expected, &expr.span),
            ExprNode::FloatLit(_) => match expected.map(strip_perm) {
                Some(t) if is_float(&t) => t,
                _ => types::prim("f64"),
            },
            ExprNode::BoolLit(_) => types::boolean(),
            ExprNode::CharLit(_) => types::prim("char"),
            ExprNode::StringLit(_) => Rc::new(Ty::StringTy(Some(StrState::View))),
            ExprNode::Unit => types::unit(),
            ExprNode::NullLit => match expected.map(strip_perm) {
                Some(t) => match &*t {
                    Ty::Ptr { elem, .. } => types::ptr(elem.clone(), PtrState::Null),
                    _ => {
                        self.mismatch(&t, &types::never(), &expr.span);
                        types::never()
                    }
                },
                None => {
                    self.error(
                        "E-SEM-0101",
                        &expr.span,
                        Some("cannot infer the pointer type of null here"),
                    );
                    types::never()
                }
            },
            ExprNode::Identifier(_) | ExprNode::Field { .. } | ExprNode::Index { .. } => {
                match self.check_place_inner(expr) {
                    Some((ty, _)) => {
                        // Using a non-bitcopy place as a bare value needs an
                        // explicit move.
                        let bare = strip_perm(&ty);
                        if !is_bitcopy(self.sigma, &bare) {
                            self.error("E-SEM-0106", &expr.span, None);
                        }
                        bare
                    }
                    None => self.non_place_fallback(expr),
                }
            }
            ExprNode::Path(path) => self.check_path_expr(path, &expr.span),
            ExprNode::Move(inner) => match self.check_place_inner(inner) {
                Some((ty, _)) => {
                    let bare = strip_perm(&ty);
                    self.tau.record(inner, bare.clone());
                    bare
                }
                None => {
                    self.error("E-SEM-0105", &inner.span, None);
                    self.check_expr(inner, None)
                }
            },
            ExprNode::AddressOf(place) => match self.check_place_inner(place) {
                Some((ty, _)) => {
                    let elem = strip_perm(&ty);
                    self.tau.record(place, elem.clone());
                    types::ptr(elem, PtrState::Valid)
                }
                None => {
                    self.error("E-SEM-0105", &place.span, None);
                    let ty = self.check_expr(place, None);
                    types::ptr(ty, PtrState::Valid)
                }
            },
            ExprNode::Deref(_) => match self.check_place_inner(expr) {
                Some((ty, _)) => strip_perm(&ty),
                None => types::never(),
            },
            ExprNode::Unary { op, operand } => {
                let ty = self.check_expr(operand, expected);
                let bare = strip_perm(&ty);
                match op {
                    UnaryOp::Neg => {
                        let signed = matches!(
                            &*bare,
                            Ty::Prim("i8") | Ty::Prim("i16") | Ty::Prim("i32") | Ty::Prim("i64")
                        ) || is_float(&bare);
                        if !signed && !is_never(&bare) {
                            self.error("E-SEM-0101", &operand.span, Some("negation needs a signed numeric"));
                        }
                        bare
                    }
                    UnaryOp::Not => {
                        if !is_bool(&bare) && !is_never(&bare) {
                            self.error("E-SEM-0109", &operand.span, None);
                        }
                        types::boolean()
                    }
                }
            }
            ExprNode::Binary { op, lhs, rhs } => self.check_binary(*op, lhs, rhs, expected),
            ExprNode::Cast { expr: inner, ty } => {
                let from = strip_perm(&self.check_expr(inner, None));
                let to = lower_type(self.sigma, self.module_key, ty, self.diags)
                    .unwrap_or_else(types::never);
                if !cast_valid(&from, &to) {
                    self.error(
                        "E-SEM-0107",
                        &expr.span,
                        Some(&format!("{} as {}", render(&from), render(&to))),
                    );
                }
                to
            }
            ExprNode::Transmute { expr: inner, ty } => {
                let from = strip_perm(&self.check_expr(inner, None));
                let to = lower_type(self.sigma, self.module_key, ty, self.diags)
                    .unwrap_or_else(types::never);
                if !self
                    .unsafe_ranges
                    .contains(&expr.span.file, expr.span.start_offset, expr.span.end_offset)
                {
                    self.error("E-PTR-0004", &expr.span, None);
                }
                let from_layout = crate::ir::layout::size_align(self.sigma, &from);
                let to_layout = crate::ir::layout::size_align(self.sigma, &to);
                match (from_layout, to_layout) {
                    (Some(a), Some(b)) if a == b => {}
                    _ => self.error("E-SEM-0122", &expr.span, None),
                }
                to
            }
            ExprNode::If {
                cond,
                then_block,
                else_block,
            } => {
                let cond_ty = self.check_expr(cond, Some(&types::boolean()));
                if !is_bool(&strip_perm(&cond_ty)) && !is_never(&cond_ty) {
                    self.error("E-SEM-0109", &cond.span, None);
                }
                let then_ty = self.check_block_with_expected(then_block, expected);
                match else_block {
                    Some(els) => {
                        let else_ty = self.check_block_with_expected(els, expected);
                        join(&then_ty, &else_ty)
                    }
                    None => {
                        if !is_unit(&then_ty) && !is_never(&then_ty) {
                            self.error("E-SEM-0110", &then_block.span, None);
                        }
                        types::unit()
                    }
                }
            }
            ExprNode::Match { scrutinee, arms } => self.check_match(scrutinee, arms, expected, &expr.span),
            ExprNode::Block(block) => self.check_block_with_expected(block, expected),
            ExprNode::RecordLit { path, fields } => self.check_record_lit(path, fields, &expr.span),
            ExprNode::EnumLit {
                path,
                variant,
                payload,
            } => self.check_enum_lit(path, variant, payload, &expr.span),
            ExprNode::Call { callee, args } => self.check_call(callee, args, &expr.span),
            ExprNode::MethodCall {
                receiver,
                name,
                args,
            } => self.check_method_call(receiver, name, args, &expr.span),
            ExprNode::Alloc { region, value } => {
                let region_ok = match region {
                    Some(name) => {
                        if self.regions.iter().any(|r| r == name) {
                            true
                        } else {
                            self.error("E-SEM-0120", &expr.span, Some(name));
                            false
                        }
                    }
                    None => match self.regions.len() {
                        0 => {
                            self.error("E-SEM-0120", &expr.span, None);
                            false
                        }
                        1 => true,
                        _ => {
                            self.error("E-SEM-0121", &expr.span, None);
                            false
                        }
                    },
                };
                let value_ty = strip_perm(&self.check_expr(value, None));
                let _ = region_ok;
                types::ptr(value_ty, PtrState::Valid)
            }
            ExprNode::Propagate(inner) => self.check_propagate(inner, &expr.span),
            ExprNode::Range { start, end, .. } => {
                for endpoint in [start, end].into_iter().flatten() {
                    let ty = self.check_expr(endpoint, Some(&types::usize_ty()));
                    if !matches!(&*strip_perm(&ty), Ty::Prim("usize")) && !is_never(&ty) {
                        self.error("E-SEM-0118", &endpoint.span, None);
                    }
                }
                Rc::new(Ty::Range)
            }
            ExprNode::Spawn(block) => {
                // Captures race against keys already held at the spawn site.
                let captures = self.collect_captures(block);
                for (path, mode) in &captures {
                    if let Some(held) = acquisition_conflict(&self.keys, path, *mode) {
                        let detail =
                            format!("{} vs held {}", path.to_text(), held.path.to_text());
                        self.error("E-KEY-0001", &block.span, Some(&detail));
                    }
                }
                let body_ty = self.check_block(block);
                Rc::new(Ty::ModalState {
                    key: "Spawned".into(),
                    state: "Pending".into(),
                    args: vec![body_ty],
                })
            }
            ExprNode::Wait(operand) => {
                self.check_suspension(&expr.span, false);
                let ty = strip_perm(&self.check_operand(operand));
                match &*ty {
                    Ty::ModalState { key, args, .. } if key == "Spawned" => args
                        .first()
                        .cloned()
                        .unwrap_or_else(types::unit),
                    _ => {
                        self.error("E-CON-0201", &operand.span, Some(&render(&ty)));
                        types::never()
                    }
                }
            }
            ExprNode::Sync(operand) => {
                if self.async_info.is_some() {
                    self.error("E-CON-0202", &expr.span, None);
                }
                let ty = strip_perm(&self.check_operand(operand));
                match as_async(&ty) {
                    Some((out, input, result, err)) => {
                        if !is_unit(&out) || !is_unit(&input) {
                            self.error("E-CON-0202", &operand.span, Some("operand must have Out = () and In = ()"));
                        }
                        types::union(vec![result, err])
                    }
                    None => {
                        self.error("E-CON-0202", &operand.span, Some(&render(&ty)));
                        types::never()
                    }
                }
            }
            ExprNode::Race { arms } => self.check_race(arms, &expr.span),
            ExprNode::All { operands } => self.check_all(operands, &expr.span),
            ExprNode::Yield { value, release } => {
                self.check_suspension(&expr.span, *release);
                let Some((out, input, _, _)) = self.async_info.clone() else {
                    self.error("E-CON-0206", &expr.span, None);
                    if let Some(v) = value {
                        self.check_expr(v, None);
                    }
                    return types::never();
                };
                match value {
                    Some(v) => {
                        let ty = self.check_expr(v, Some(&out));
                        if !self.compatible(&ty, &out) {
                            self.mismatch(&out, &ty, &v.span);
                        }
                    }
                    None => {
                        if !is_unit(&out) {
                            self.error("E-SEM-0101", &expr.span, Some("yield needs a value here"));
                        }
                    }
                }
                input
            }
            ExprNode::YieldFrom(operand) => {
                self.check_suspension(&expr.span, false);
                let Some((out, input, _, _)) = self.async_info.clone() else {
                    self.error("E-CON-0206", &expr.span, None);
                    self.check_expr(operand, None);
                    return types::never();
                };
                let ty = strip_perm(&self.check_operand(operand));
                match as_async(&ty) {
                    Some((d_out, d_in, d_result, _)) => {
                        if !eq_ty(&d_out, &out) || !eq_ty(&d_in, &input) {
                            self.error(
                                "E-SEM-0101",
                                &operand.span,
                                Some("delegated async Out/In must match the enclosing async"),
                            );
                        }
                        d_result
                    }
                    None => {
                        self.error("E-CON-0206", &operand.span, Some(&render(&ty)));
                        types::never()
                    }
                }
            }
            ExprNode::ContractResult => match self.contract_mode {
                ContractMode::Post => self.ret.clone(),
                _ => {
                    self.error("E-CON-0103", &expr.span, None);
                    types::never()
                }
            },
            ExprNode::ContractEntry(inner) => {
                if matches!(self.contract_mode, ContractMode::None) {
                    self.error("E-CON-0104", &expr.span, Some("@entry is only valid in a contract"));
                }
                let ty = self.check_expr(inner, None);
                if !is_bitcopy(self.sigma, &ty) {
                    self.error("E-CON-0104", &inner.span, None);
                }
                ty
            }
        }
    }

    fn non_place_fallback(&mut self, expr: &ExprPtr) -> TypeRef {
        // Identifier that is not a local: a static, procedure, or enum
        // variant path through Σ.
        if let ExprNode::Identifier(name) = &expr.node {
            return self.check_path_expr(&[name.clone()], &expr.span);
        }
        types::never()
    }

    fn int_literal(&mut self, value: i128, expected: Option<&TypeRef>, span: &Span) -> TypeRef {
        let ty = match expected.map(strip_perm) {
            Some(t) if is_integer(&t) => t,
            Some(t) if is_float(&t) => return t,
            _ => types::i32_ty(),
        };
        if let Ty::Prim(name) = &*ty {
            if let Some((min, max)) = integer_bounds(name) {
                if value < min || value > max {
                    self.error("E-SEM-0126", span, Some(&format!("{value} does not fit {name}")));
                }
            }
        }
        ty
    }

    fn check_binary(
        &mut self,
        op: crate::syntax::ast::BinaryOp,
        lhs: &ExprPtr,
        rhs: &ExprPtr,
        expected: Option<&TypeRef>,
    ) -> TypeRef {
        use crate::syntax::ast::BinaryOp::*;
        match op {
            And | Or => {
                for side in [lhs, rhs] {
                    let ty = self.check_expr(side, Some(&types::boolean()));
                    if !is_bool(&strip_perm(&ty)) && !is_never(&ty) {
                        self.error("E-SEM-0109", &side.span, None);
                    }
                }
                types::boolean()
            }
            Eq | Ne | Lt | Le | Gt | Ge => {
                let lhs_ty = strip_perm(&self.check_expr(lhs, None));
                let rhs_ty = strip_perm(&self.check_expr(rhs, Some(&lhs_ty)));
                if !eq_ty(&lhs_ty, &rhs_ty) && !is_never(&lhs_ty) && !is_never(&rhs_ty) {
                    self.mismatch(&lhs_ty, &rhs_ty, &rhs.span);
                }
                types::boolean()
            }
            Add | Sub | Mul | Div | Rem => {
                let hint = expected
                    .map(strip_perm)
                    .filter(is_numeric);
                let lhs_ty = strip_perm(&self.check_expr(lhs, hint.as_ref()));
                let rhs_ty = strip_perm(&self.check_expr(rhs, Some(&lhs_ty)));
                if !is_numeric(&lhs_ty) && !is_never(&lhs_ty) {
                    self.error("E-SEM-0101", &lhs.span, Some("arithmetic needs a numeric operand"));
                }
                if !eq_ty(&lhs_ty, &rhs_ty) && !is_never(&rhs_ty) {
                    self.mismatch(&lhs_ty, &rhs_ty, &rhs.span);
                }
                lhs_ty
            }
        }
    }

    fn check_match(
        &mut self,
        scrutinee: &ExprPtr,
        arms: &[MatchArm],
        expected: Option<&TypeRef>,
        span: &Span,
    ) -> TypeRef {
        let scrutinee_ty = match self.check_place_inner(scrutinee) {
            Some((ty, _)) => strip_perm(&ty),
            None => strip_perm(&self.check_expr(scrutinee, None)),
        };
        self.tau.record(scrutinee, scrutinee_ty.clone());

        check_match_coverage(self.sigma, &scrutinee_ty, arms, span, self.diags);

        let mut result: Option<TypeRef> = None;
        for arm in arms {
            self.env.push();
            self.bind_pattern(&arm.pattern, &scrutinee_ty);
            let arm_ty = self.check_expr(&arm.body, expected.or(result.as_ref()));
            self.env.pop();
            result = Some(match result {
                Some(prev) => join(&prev, &arm_ty),
                None => arm_ty,
            });
        }
        result.unwrap_or_else(types::never)
    }

    fn bind_pattern(&mut self, pattern: &Pattern, scrutinee: &TypeRef) {
        match &pattern.node {
            PatternNode::Binding(name) => {
                self.env.bind(name, false, scrutinee.clone());
            }
            PatternNode::EnumVariant {
                path,
                variant,
                payload,
            } => {
                let Some(key) = self.resolve_type_key(path) else {
                    return;
                };
                let Some(Declaration::Enum(decl)) = self.sigma.lookup(&key).cloned() else {
                    return;
                };
                let Some(var) = decl.variants.iter().find(|v| v.name == *variant) else {
                    self.error("E-SEM-0123", &pattern.span, Some(variant));
                    return;
                };
                for (pat, ty) in payload.iter().zip(var.payload.iter()) {
                    if let Some(lowered) =
                        lower_type(self.sigma, self.module_key, ty, self.diags)
                    {
                        self.bind_pattern(pat, &lowered);
                    }
                }
            }
            PatternNode::Tuple(elems) => {
                if let Ty::Tuple(tys) = &**scrutinee {
                    for (pat, ty) in elems.iter().zip(tys.iter()) {
                        self.bind_pattern(pat, ty);
                    }
                }
            }
            PatternNode::ModalState {
                path,
                state,
                bindings,
            } => {
                // Widening introduction: the scrutinee is the bare modal
                // path type, each arm re-narrows to one state.
                let Some(key) = self.resolve_type_key(path) else {
                    return;
                };
                let Some(Declaration::Modal(decl)) = self.sigma.lookup(&key).cloned() else {
                    return;
                };
                let Some(block) = decl.states.iter().find(|s| s.name == *state) else {
                    self.error("E-MOD-0204", &pattern.span, Some(state));
                    return;
                };
                let all_fields: Vec<&FieldDecl> =
                    decl.common_fields.iter().chain(block.fields.iter()).collect();
                for name in bindings {
                    match all_fields.iter().find(|f| f.name == *name) {
                        Some(field) => {
                            if let Some(ty) =
                                lower_type(self.sigma, self.module_key, &field.ty, self.diags)
                            {
                                self.env.bind(name, false, ty);
                            }
                        }
                        None => self.error("E-SEM-0102", &pattern.span, Some(name)),
                    }
                }
            }
            _ => {}
        }
    }

    fn check_race(&mut self, arms: &[crate::syntax::ast::RaceArm], span: &Span) -> TypeRef {
        self.check_suspension(span, false);
        if arms.len() < 2 {
            self.error("E-CON-0203", span, None);
        }
        let mut kind: Option<RaceHandlerKind> = None;
        let mut result: Option<TypeRef> = None;
        for arm in arms {
            match kind {
                None => kind = Some(arm.kind),
                Some(k) if k != arm.kind => {
                    self.error("E-CON-0204", &arm.span, None);
                }
                _ => {}
            }
            let operand_ty = strip_perm(&self.check_operand(&arm.operand));
            let binder_ty = match &*operand_ty {
                Ty::ModalState { key, args, .. } if key == "Spawned" => {
                    args.first().cloned().unwrap_or_else(types::unit)
                }
                _ => match as_async(&operand_ty) {
                    Some((_, _, r, _)) => r,
                    None => {
                        self.error("E-CON-0201", &arm.operand.span, Some(&render(&operand_ty)));
                        types::never()
                    }
                },
            };
            self.env.push();
            self.env.bind(&arm.binder, false, binder_ty);
            let handler_ty = self.check_expr(&arm.handler, result.as_ref());
            self.env.pop();
            result = Some(match result {
                Some(prev) => {
                    if !self.compatible(&handler_ty, &prev) {
                        self.mismatch(&prev, &handler_ty, &arm.handler.span);
                    }
                    join(&prev, &handler_ty)
                }
                None => handler_ty,
            });
        }
        result.unwrap_or_else(types::never)
    }

    fn check_all(&mut self, operands: &[ExprPtr], span: &Span) -> TypeRef {
        self.check_suspension(span, false);
        let mut results = Vec::new();
        let mut err: Option<TypeRef> = None;
        for operand in operands {
            let ty = strip_perm(&self.check_operand(operand));
            let (result, e) = match &*ty {
                Ty::ModalState { key, args, .. } if key == "Spawned" => (
                    args.first().cloned().unwrap_or_else(types::unit),
                    types::never(),
                ),
                _ => match as_async(&ty) {
                    Some((_, _, r, e)) => (r, e),
                    None => {
                        self.error("E-CON-0201", &operand.span, Some(&render(&ty)));
                        (types::never(), types::never())
                    }
                },
            };
            results.push(result);
            err = Some(match err {
                None => e,
                Some(prev) => {
                    if !is_never(&e) && !is_never(&prev) && !eq_ty(&prev, &e) {
                        self.error("E-CON-0205", &operand.span, None);
                    }
                    if is_never(&prev) {
                        e
                    } else {
                        prev
                    }
                }
            });
        }
        let tuple = types::tuple(results);
        match err {
            Some(e) if !is_never(&e) => types::union(vec![tuple, e]),
            _ => tuple,
        }
    }

    fn check_propagate(&mut self, inner: &ExprPtr, span: &Span) -> TypeRef {
        let ty = strip_perm(&self.check_expr(inner, None));
        let Ty::Union(members) = &*ty else {
            self.error("E-SEM-0116", span, Some(&render(&ty)));
            return types::never();
        };
        let ret_members: Vec<TypeRef> = match &*strip_perm(&self.ret) {
            Ty::Union(rs) => rs.clone(),
            other => vec![Rc::new(other.clone())],
        };
        let (errs, oks): (Vec<TypeRef>, Vec<TypeRef>) = members
            .iter()
            .cloned()
            .partition(|m| ret_members.iter().any(|r| eq_ty(r, m)));
        if errs.is_empty() {
            self.error("E-SEM-0117", span, None);
            return types::never();
        }
        if oks.is_empty() {
            // Propagating away every member leaves the never type.
            return types::never();
        }
        types::union(oks)
    }

    // -- literals, calls, members ---------------------------------------------

    fn resolve_type_key(&mut self, path: &[String]) -> Option<String> {
        resolve_path(self.sigma, self.module_key, path)
    }

    fn check_record_lit(
        &mut self,
        path: &[String],
        fields: &[crate::syntax::ast::FieldInit],
        span: &Span,
    ) -> TypeRef {
        // `Modal::State { … }` constructs one state of a modal; a plain
        // record path constructs the record.
        if path.len() >= 2 {
            let (prefix, last) = path.split_at(path.len() - 1);
            if let Some(key) = self.resolve_type_key(prefix) {
                if let Some(Declaration::Modal(decl)) = self.sigma.lookup(&key).cloned() {
                    return self.check_modal_lit(&key, &decl, &last[0], fields, span);
                }
            }
        }
        let Some(key) = self.resolve_type_key(path) else {
            self.error("E-SEM-3007", span, Some(&path.join("::")));
            return types::never();
        };
        match self.sigma.lookup(&key).cloned() {
            Some(Declaration::Record(decl)) => {
                self.check_field_inits(&decl.fields, fields, span);
                types::path(key)
            }
            Some(Declaration::Modal(decl)) => {
                // Bare modal literal is ill-formed; states carry the fields.
                let states: Vec<String> =
                    decl.states.iter().map(|s| s.name.clone()).collect();
                self.error(
                    "E-MOD-0204",
                    span,
                    Some(&format!("pick a state: {}", states.join(", "))),
                );
                types::never()
            }
            _ => {
                self.error("E-SEM-3007", span, Some(&key));
                types::never()
            }
        }
    }

    fn check_modal_lit(
        &mut self,
        modal_key: &str,
        decl: &ModalDecl,
        state: &str,
        fields: &[crate::syntax::ast::FieldInit],
        span: &Span,
    ) -> TypeRef {
        let Some(block) = decl.states.iter().find(|s| s.name == state) else {
            self.error("E-MOD-0204", span, Some(state));
            return types::never();
        };
        let declared: Vec<FieldDecl> = decl
            .common_fields
            .iter()
            .chain(block.fields.iter())
            .cloned()
            .collect();
        self.check_field_inits(&declared, fields, span);
        Rc::new(Ty::ModalState {
            key: modal_key.to_string(),
            state: state.to_string(),
            args: Vec::new(),
        })
    }

    /// Field initializers must cover the declared set exactly; non-bitcopy
    /// initializers need `move`.
    fn check_field_inits(
        &mut self,
        declared: &[FieldDecl],
        inits: &[crate::syntax::ast::FieldInit],
        span: &Span,
    ) {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for init in inits {
            let Some(field) = declared.iter().find(|f| f.name == init.name) else {
                self.error("E-SEM-0102", &init.span, Some(&init.name));
                continue;
            };
            if !seen.insert(&init.name) {
                self.error("E-SEM-0104", &init.span, Some(&init.name));
                continue;
            }
            let Some(field_ty) = lower_type(self.sigma, self.module_key, &field.ty, self.diags)
            else {
                continue;
            };
            let value_ty = if init.moved {
                match self.check_place_inner(&init.value) {
                    Some((ty, _)) => {
                        let bare = strip_perm(&ty);
                        self.tau.record(&init.value, bare.clone());
                        bare
                    }
                    None => self.check_expr(&init.value, Some(&field_ty)),
                }
            } else {
                let ty = self.check_expr(&init.value, Some(&field_ty));
                if !is_bitcopy(self.sigma, &ty) && is_place_shaped(&init.value) {
                    self.error("E-SEM-0106", &init.value.span, Some(&init.name));
                }
                ty
            };
            if !self.compatible(&value_ty, &field_ty) {
                self.mismatch(&field_ty, &value_ty, &init.value.span);
            }
        }
        for field in declared {
            if !seen.contains(field.name.as_str()) {
                self.error("E-SEM-0103", span, Some(&field.name));
            }
        }
    }

    fn check_enum_lit(
        &mut self,
        path: &[String],
        variant: &str,
        payload: &[ExprPtr],
        span: &Span,
    ) -> TypeRef {
        let Some(key) = self.resolve_type_key(path) else {
            self.error("E-SEM-3007", span, Some(&path.join("::")));
            return types::never();
        };
        let Some(Declaration::Enum(decl)) = self.sigma.lookup(&key).cloned() else {
            self.error("E-SEM-3007", span, Some(&key));
            return types::never();
        };
        let Some(var) = decl.variants.iter().find(|v| v.name == variant) else {
            self.error("E-SEM-0123", span, Some(variant));
            return types::never();
        };
        if var.payload.len() != payload.len() {
            self.error(
                "E-SEM-0124",
                span,
                Some(&format!("{variant} takes {} values", var.payload.len())),
            );
        }
        for (value, ty) in payload.iter().zip(var.payload.iter()) {
            if let Some(expected) = lower_type(self.sigma, self.module_key, ty, self.diags) {
                let value_ty = self.check_expr(value, Some(&expected));
                if !self.compatible(&value_ty, &expected) {
                    self.mismatch(&expected, &value_ty, &value.span);
                }
            }
        }
        types::path(key)
    }

    fn check_path_expr(&mut self, path: &[String], span: &Span) -> TypeRef {
        // Enum variant reference: prefix resolves to an enum, last segment
        // names a payload-free variant.
        if path.len() >= 2 {
            let (prefix, last) = path.split_at(path.len() - 1);
            if let Some(key) = self.resolve_type_key(prefix) {
                if let Some(Declaration::Enum(decl)) = self.sigma.lookup(&key).cloned() {
                    let variant = &last[0];
                    return if decl.variants.iter().any(|v| v.name == *variant) {
                        types::path(key)
                    } else {
                        self.error("E-SEM-0123", span, Some(variant));
                        types::never()
                    };
                }
            }
        }
        let Some(key) = self.resolve_type_key(path) else {
            self.error("E-SEM-3007", span, Some(&path.join("::")));
            return types::never();
        };
        if !self.sigma.is_accessible(&key, self.module_key) {
            self.error("E-SEM-3010", span, Some(&key));
        }
        match self.sigma.lookup(&key).cloned() {
            Some(Declaration::Static(decl)) => {
                lower_type(self.sigma, self.module_key, &decl.ty, self.diags)
                    .unwrap_or_else(types::never)
            }
            Some(Declaration::Procedure(_)) | Some(Declaration::ExternProc { .. }) => {
                match self.proc_sig_of(&key) {
                    Some((params, ret)) => Rc::new(Ty::Func { params, ret }),
                    None => types::never(),
                }
            }
            _ => {
                self.error("E-SEM-3007", span, Some(&key));
                types::never()
            }
        }
    }

    fn proc_sig_of(&mut self, key: &str) -> Option<(Vec<TypeRef>, TypeRef)> {
        let (params, ret) = match self.sigma.lookup(key)? {
            Declaration::Procedure(p) => (p.params.clone(), p.ret.clone()),
            Declaration::ExternProc { decl, .. } => (decl.params.clone(), decl.ret.clone()),
            _ => return None,
        };
        let module_key = key.rsplit_once("::").map(|(m, _)| m).unwrap_or("");
        let lowered: Vec<TypeRef> = params
            .iter()
            .map(|p| {
                lower_type(self.sigma, module_key, &p.ty, self.diags).unwrap_or_else(types::never)
            })
            .collect();
        let ret = ret
            .as_ref()
            .and_then(|t| lower_type(self.sigma, module_key, t, self.diags))
            .unwrap_or_else(types::unit);
        Some((lowered, ret))
    }

    fn check_call(&mut self, callee: &ExprPtr, args: &[ExprPtr], span: &Span) -> TypeRef {
        let key = match &callee.node {
            ExprNode::Identifier(name) => self.resolve_type_key(&[name.clone()]),
            ExprNode::Path(path) => {
                // `Enum::Variant(args)` parses as a call on a path.
                if path.len() >= 2 {
                    let (prefix, last) = path.split_at(path.len() - 1);
                    if let Some(key) = self.resolve_type_key(prefix) {
                        if matches!(self.sigma.lookup(&key), Some(Declaration::Enum(_))) {
                            let ty = self.check_enum_lit(prefix, &last[0], args, span);
                            self.tau.record(callee, ty.clone());
                            return ty;
                        }
                    }
                }
                self.resolve_type_key(path)
            }
            _ => None,
        };

        let Some(key) = key else {
            // First-class callee: anything of Func type.
            let callee_ty = strip_perm(&self.check_expr(callee, None));
            if let Ty::Func { params, ret } = &*callee_ty {
                self.check_args(&params.iter().map(|t| (None, t.clone())).collect::<Vec<_>>(), args, span);
                return ret.clone();
            }
            self.error("E-SEM-0125", &callee.span, None);
            for arg in args {
                self.check_expr(arg, None);
            }
            return types::never();
        };

        let (params, ret, is_user_proc) = match self.sigma.lookup(&key).cloned() {
            Some(Declaration::Procedure(p)) => {
                let module_key = key.rsplit_once("::").map(|(m, _)| m).unwrap_or("").to_string();
                let params: Vec<(Option<ParamMode>, TypeRef)> = p
                    .params
                    .iter()
                    .map(|prm| {
                        let ty = lower_type(self.sigma, &module_key, &prm.ty, self.diags)
                            .unwrap_or_else(types::never);
                        (prm.mode, ty)
                    })
                    .collect();
                let ret = p
                    .ret
                    .as_ref()
                    .and_then(|t| lower_type(self.sigma, &module_key, t, self.diags))
                    .unwrap_or_else(types::unit);
                (params, ret, true)
            }
            Some(Declaration::ExternProc { decl, .. }) => {
                let module_key = key.rsplit_once("::").map(|(m, _)| m).unwrap_or("").to_string();
                let params: Vec<(Option<ParamMode>, TypeRef)> = decl
                    .params
                    .iter()
                    .map(|prm| {
                        let ty = lower_type(self.sigma, &module_key, &prm.ty, self.diags)
                            .unwrap_or_else(types::never);
                        (prm.mode, ty)
                    })
                    .collect();
                let ret = decl
                    .ret
                    .as_ref()
                    .and_then(|t| lower_type(self.sigma, &module_key, t, self.diags))
                    .unwrap_or_else(types::unit);
                (params, ret, false)
            }
            _ => {
                self.error("E-SEM-0125", &callee.span, Some(&key));
                for arg in args {
                    self.check_expr(arg, None);
                }
                return types::never();
            }
        };

        self.tau.record(
            callee,
            Rc::new(Ty::Func {
                params: params.iter().map(|(_, t)| t.clone()).collect(),
                ret: ret.clone(),
            }),
        );

        // The caller's in-scope capabilities must cover the callee's
        // transitive requirement.
        if is_user_proc {
            if let Some(required) = self.caps.requirements.get(&key) {
                let missing: Vec<&String> = required
                    .iter()
                    .filter(|cap| !self.cap_scope.contains(*cap))
                    .collect();
                if !missing.is_empty() {
                    let detail = format!(
                        "{key} requires {}",
                        missing
                            .iter()
                            .map(|s| s.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                    self.error("E-CAP-0010", span, Some(&detail));
                }
            }
        }

        self.check_args(&params, args, span);
        ret
    }

    fn check_args(
        &mut self,
        params: &[(Option<ParamMode>, TypeRef)],
        args: &[ExprPtr],
        span: &Span,
    ) {
        if params.len() != args.len() {
            self.error(
                "E-SEM-0124",
                span,
                Some(&format!("expected {}, found {}", params.len(), args.len())),
            );
        }
        for ((_mode, expected), arg) in params.iter().zip(args.iter()) {
            // A non-bitcopy place passed bare is already flagged by the
            // value judgment; `move e` routes around it.
            let arg_ty = self.check_expr(arg, Some(expected));
            if !self.compatible(&arg_ty, expected) {
                self.mismatch(expected, &arg_ty, &arg.span);
            }
        }
    }

    fn check_method_call(
        &mut self,
        receiver: &ExprPtr,
        name: &str,
        args: &[ExprPtr],
        span: &Span,
    ) -> TypeRef {
        let (recv_ty, _) = match self.check_place_inner(receiver) {
            Some(info) => info,
            None => (self.check_expr(receiver, None), false),
        };
        self.tau.record(receiver, strip_perm(&recv_ty));
        let provided = perm_of(&recv_ty);
        let base = strip_perm(&recv_ty);

        match &*base {
            Ty::Path { key, .. } => {
                let decl = self.sigma.lookup(key).cloned();
                match decl {
                    Some(Declaration::Record(record)) => self.check_record_method(
                        key, &record, name, provided, args, span,
                    ),
                    _ => {
                        self.error("E-SEM-0113", span, Some(name));
                        types::never()
                    }
                }
            }
            Ty::ModalState { key, state, .. } if key == "Region" => {
                self.check_region_method(state, name, span)
            }
            Ty::ModalState { key, state, .. } => {
                let Some(Declaration::Modal(decl)) = self.sigma.lookup(key).cloned() else {
                    self.error("E-SEM-0113", span, Some(name));
                    return types::never();
                };
                let Some(block) = decl.states.iter().find(|s| s.name == *state) else {
                    self.error("E-MOD-0204", span, Some(state));
                    return types::never();
                };
                let Some(method) = block.methods.iter().find(|m| m.name == name) else {
                    // Name exists in another state: the receiver is in the
                    // wrong state for it.
                    let elsewhere = decl
                        .states
                        .iter()
                        .any(|s| s.methods.iter().any(|m| m.name == name));
                    let code = if elsewhere { "E-MOD-0201" } else { "E-SEM-0113" };
                    self.error(code, span, Some(name));
                    return types::never();
                };
                self.invoke_method(
                    method.receiver.as_ref().map(|r| r.perm),
                    provided,
                    &method.params,
                    method.ret.as_deref(),
                    args,
                    span,
                )
            }
            Ty::Dynamic { class_key } => {
                let Some(Declaration::Class(class)) = self.sigma.lookup(class_key).cloned()
                else {
                    self.error("E-SEM-0113", span, Some(name));
                    return types::never();
                };
                let Some(method) = class.methods.iter().find(|m| m.name == name) else {
                    self.error("E-SEM-0113", span, Some(name));
                    return types::never();
                };
                self.invoke_class_method(method, provided, args, span)
            }
            Ty::StringTy(_) | Ty::BytesTy(_) => self.check_text_method(&base, name, span),
            _ => {
                self.error("E-SEM-0113", span, Some(&format!("{name} on {}", render(&base))));
                types::never()
            }
        }
    }

    fn check_record_method(
        &mut self,
        record_key: &str,
        record: &RecordDecl,
        name: &str,
        provided: Permission,
        args: &[ExprPtr],
        span: &Span,
    ) -> TypeRef {
        // Direct methods shadow class methods.
        if let Some(method) = record.methods.iter().find(|m| m.name == name) {
            return self.invoke_method(
                method.receiver.as_ref().map(|r| r.perm),
                provided,
                &method.params,
                method.ret.as_deref(),
                args,
                span,
            );
        }
        // One candidate across the record's implemented classes; two or
        // more unrelated ones are ambiguous.
        let mut candidates: Vec<(String, ClassMethodDecl)> = Vec::new();
        for class_path in &record.implements {
            if let Some(class_key) = self.resolve_type_key(class_path) {
                if let Some(Declaration::Class(class)) = self.sigma.lookup(&class_key).cloned() {
                    if let Some(method) = class.methods.iter().find(|m| m.name == name) {
                        candidates.push((class_key, method.clone()));
                    }
                }
            }
        }
        match candidates.len() {
            0 => {
                self.error(
                    "E-SEM-0113",
                    span,
                    Some(&format!("{name} on {record_key}")),
                );
                types::never()
            }
            1 => {
                let (_, method) = candidates.pop().unwrap();
                self.invoke_class_method(&method, provided, args, span)
            }
            _ => {
                self.error("E-SEM-0114", span, Some(name));
                types::never()
            }
        }
    }

    fn invoke_class_method(
        &mut self,
        method: &ClassMethodDecl,
        provided: Permission,
        args: &[ExprPtr],
        span: &Span,
    ) -> TypeRef {
        self.invoke_method(
            Some(method.receiver.perm),
            provided,
            &method.params,
            method.ret.as_deref(),
            args,
            span,
        )
    }

    fn invoke_method(
        &mut self,
        receiver_perm: Option<ReceiverPerm>,
        provided: Permission,
        params: &[crate::syntax::ast::Param],
        ret: Option<&crate::syntax::ast::TypeExpr>,
        args: &[ExprPtr],
        span: &Span,
    ) -> TypeRef {
        if let Some(required) = receiver_perm {
            let required = match required {
                ReceiverPerm::Const => Permission::Const,
                ReceiverPerm::Shared => Permission::Shared,
                ReceiverPerm::Unique => Permission::Unique,
            };
            if !Permission::satisfies(provided, required) {
                self.error("E-SEM-0115", span, None);
            }
        }
        let lowered: Vec<(Option<ParamMode>, TypeRef)> = params
            .iter()
            .map(|p| {
                let ty = lower_type(self.sigma, self.module_key, &p.ty, self.diags)
                    .unwrap_or_else(types::never);
                (p.mode, ty)
            })
            .collect();
        self.check_args(&lowered, args, span);
        ret.and_then(|t| lower_type(self.sigma, self.module_key, t, self.diags))
            .unwrap_or_else(types::unit)
    }

    /// Builtin `Region` transitions: `freeze`, `thaw`, and the
    /// unsafe-only `free_unchecked` / `reset_unchecked`.
    fn check_region_method(&mut self, state: &str, name: &str, span: &Span) -> TypeRef {
        let region_state = |s: &str| -> TypeRef {
            Rc::new(Ty::ModalState {
                key: "Region".into(),
                state: s.into(),
                args: Vec::new(),
            })
        };
        match (state, name) {
            ("Active", "freeze") => region_state("Frozen"),
            ("Frozen", "thaw") => region_state("Active"),
            (_, "free_unchecked") | (_, "reset_unchecked") => {
                if !self
                    .unsafe_ranges
                    .contains(&span.file, span.start_offset, span.end_offset)
                {
                    self.error("E-UNS-0202", span, Some(name));
                }
                if name == "free_unchecked" {
                    region_state("Freed")
                } else {
                    region_state("Active")
                }
            }
            _ => {
                self.error("E-MOD-0201", span, Some(&format!("{name} on Region@{state}")));
                types::never()
            }
        }
    }

    fn check_text_method(&mut self, base: &TypeRef, name: &str, span: &Span) -> TypeRef {
        match name {
            "length" => types::usize_ty(),
            "is_empty" => types::boolean(),
            "as_view" => match &**base {
                Ty::StringTy(_) => Rc::new(Ty::StringTy(Some(StrState::View))),
                _ => Rc::new(Ty::BytesTy(Some(StrState::View))),
            },
            "to_managed" => match &**base {
                Ty::StringTy(_) => Rc::new(Ty::StringTy(Some(StrState::Managed))),
                _ => Rc::new(Ty::BytesTy(Some(StrState::Managed))),
            },
            _ => {
                self.error("E-SEM-0113", span, Some(name));
                types::never()
            }
        }
    }

    // -- the place judgment ---------------------------------------------------

    /// Type `expr` as a place. Returns `(type-with-permission, mutable)`.
    fn check_place_inner(&mut self, expr: &ExprPtr) -> Option<(TypeRef, bool)> {
        let out = match &expr.node {
            ExprNode::Identifier(name) => {
                let binding = self.env.lookup(name)?.clone();
                Some((binding.ty, binding.mutable))
            }
            ExprNode::Field { base, name } => {
                let (base_ty, mutable) = self.check_place_inner(base)?;
                self.tau.record(base, strip_perm(&base_ty));
                let base_perm = perm_of(&base_ty);
                let field_ty = self.field_type(&strip_perm(&base_ty), name, &expr.span)?;
                // The whole's permission propagates onto the field.
                Some((types::perm(base_perm, field_ty), mutable))
            }
            ExprNode::Index { base, index } => {
                let (base_ty, mutable) = self.check_place_inner(base)?;
                self.tau.record(base, strip_perm(&base_ty));
                let base_perm = perm_of(&base_ty);
                let index_ty = self.check_expr(index, Some(&types::usize_ty()));
                if !matches!(&*strip_perm(&index_ty), Ty::Prim("usize")) && !is_never(&index_ty) {
                    self.error("E-SEM-0108", &index.span, None);
                }
                let elem = match &*strip_perm(&base_ty) {
                    Ty::Slice(elem) => elem.clone(),
                    Ty::Array { elem, .. } => elem.clone(),
                    other => {
                        self.error(
                            "E-SEM-0101",
                            &base.span,
                            Some(&format!("cannot index {}", render(&Rc::new(other.clone())))),
                        );
                        return None;
                    }
                };
                Some((types::perm(base_perm, elem), mutable))
            }
            ExprNode::Deref(ptr) => {
                let ptr_ty = match self.check_place_inner(ptr) {
                    Some((ty, _)) => {
                        self.tau.record(ptr, strip_perm(&ty));
                        strip_perm(&ty)
                    }
                    None => strip_perm(&self.check_expr(ptr, None)),
                };
                match &*ptr_ty {
                    Ty::Ptr { elem, state } => match state {
                        PtrState::Valid => Some((elem.clone(), true)),
                        PtrState::Null => {
                            self.error("E-PTR-0001", &expr.span, None);
                            None
                        }
                        PtrState::Expired => {
                            self.error("E-PTR-0002", &expr.span, None);
                            None
                        }
                    },
                    Ty::RawPtr { qual, elem } => {
                        if !self.unsafe_ranges.contains(
                            &expr.span.file,
                            expr.span.start_offset,
                            expr.span.end_offset,
                        ) {
                            self.error("E-PTR-0003", &expr.span, None);
                        }
                        let place_perm = match qual {
                            RawPtrQual::Imm => Permission::Const,
                            RawPtrQual::Mut => Permission::Unique,
                        };
                        Some((
                            types::perm(place_perm, elem.clone()),
                            *qual == RawPtrQual::Mut,
                        ))
                    }
                    other => {
                        self.error(
                            "E-SEM-0101",
                            &ptr.span,
                            Some(&format!(
                                "cannot dereference {}",
                                render(&Rc::new(other.clone()))
                            )),
                        );
                        None
                    }
                }
            }
            _ => None,
        };
        if let Some((ty, _)) = &out {
            self.tau.record(expr, strip_perm(ty));
        }
        out
    }

    fn field_type(&mut self, base: &TypeRef, name: &str, span: &Span) -> Option<TypeRef> {
        match &**base {
            Ty::Path { key, .. } => match self.sigma.lookup(key).cloned() {
                Some(Declaration::Record(record)) => {
                    let Some(field) = record.fields.iter().find(|f| f.name == name) else {
                        self.error("E-SEM-0102", span, Some(name));
                        return None;
                    };
                    if field.vis == crate::syntax::ast::Visibility::Private {
                        let owner = key.rsplit_once("::").map(|(m, _)| m).unwrap_or("");
                        if owner != self.module_key {
                            self.error("E-SEM-3010", span, Some(name));
                        }
                    }
                    lower_type(self.sigma, self.module_key, &field.ty, self.diags)
                }
                Some(Declaration::Modal(_)) => {
                    // State-specific access through the widened modal type.
                    self.error("E-MOD-0203", span, Some(name));
                    None
                }
                Some(Declaration::Enum(_)) => {
                    self.error("E-SEM-0102", span, Some("enums have no fields"));
                    None
                }
                _ => {
                    self.error("E-SEM-0102", span, Some(name));
                    None
                }
            },
            Ty::ModalState { key, state, .. } => {
                let Some(Declaration::Modal(decl)) = self.sigma.lookup(key).cloned() else {
                    self.error("E-SEM-0102", span, Some(name));
                    return None;
                };
                if let Some(field) = decl.common_fields.iter().find(|f| f.name == name) {
                    return lower_type(self.sigma, self.module_key, &field.ty, self.diags);
                }
                let Some(block) = decl.states.iter().find(|s| s.name == *state) else {
                    self.error("E-MOD-0204", span, Some(state));
                    return None;
                };
                match block.fields.iter().find(|f| f.name == name) {
                    Some(field) => lower_type(self.sigma, self.module_key, &field.ty, self.diags),
                    None => {
                        self.error("E-MOD-0201", span, Some(name));
                        None
                    }
                }
            }
            Ty::Tuple(elems) => {
                let index: usize = name.parse().ok()?;
                elems.get(index).cloned().or_else(|| {
                    self.error("E-SEM-0102", span, Some(name));
                    None
                })
            }
            _ => {
                self.error(
                    "E-SEM-0102",
                    span,
                    Some(&format!("{name} on {}", render(base))),
                );
                None
            }
        }
    }

}

/// Place-shaped: transitively an identifier, field, index, or deref.
fn is_place_shaped(expr: &Expr) -> bool {
    match &expr.node {
        ExprNode::Identifier(_) => true,
        ExprNode::Field { base, .. } | ExprNode::Index { base, .. } => is_place_shaped(base),
        ExprNode::Deref(inner) => is_place_shaped(inner),
        _ => false,
    }
}

fn block_mutates(block: &Block) -> bool {
    block.stmts.iter().any(|s| match s {
        Stmt::Assign { .. } => true,
        Stmt::While { body, .. }
        | Stmt::Loop { body, .. }
        | Stmt::For { body, .. }
        | Stmt::Region { body, .. }
        | Stmt::Unsafe { body, .. }
        | Stmt::KeyBlock { body, .. } => block_mutates(body),
        Stmt::Parallel { arms, .. } => arms.iter().any(block_mutates),
        _ => false,
    })
}

/// Pre-order walk over every nested expression.
fn walk_expr(expr: &ExprPtr, f: &mut impl FnMut(&ExprPtr)) {
    f(expr);
    match &expr.node {
        ExprNode::Field { base, .. } => walk_expr(base, f),
        ExprNode::Index { base, index } => {
            walk_expr(base, f);
            walk_expr(index, f);
        }
        ExprNode::Call { callee, args } => {
            walk_expr(callee, f);
            for arg in args {
                walk_expr(arg, f);
            }
        }
        ExprNode::MethodCall { receiver, args, .. } => {
            walk_expr(receiver, f);
            for arg in args {
                walk_expr(arg, f);
            }
        }
        ExprNode::Unary { operand, .. } => walk_expr(operand, f),
        ExprNode::Binary { lhs, rhs, .. } => {
            walk_expr(lhs, f);
            walk_expr(rhs, f);
        }
        ExprNode::AddressOf(e)
        | ExprNode::Deref(e)
        | ExprNode::Move(e)
        | ExprNode::Propagate(e)
        | ExprNode::Wait(e)
        | ExprNode::Sync(e)
        | ExprNode::YieldFrom(e)
        | ExprNode::ContractEntry(e) => walk_expr(e, f),
        ExprNode::Cast { expr: e, .. } | ExprNode::Transmute { expr: e, .. } => walk_expr(e, f),
        ExprNode::If {
            cond,
            then_block,
            else_block,
        } => {
            walk_expr(cond, f);
            walk_block(then_block, f);
            if let Some(els) = else_block {
                walk_block(els, f);
            }
        }
        ExprNode::Match { scrutinee, arms } => {
            walk_expr(scrutinee, f);
            for arm in arms {
                walk_expr(&arm.body, f);
            }
        }
        ExprNode::Block(block) | ExprNode::Spawn(block) => walk_block(block, f),
        ExprNode::RecordLit { fields, .. } => {
            for field in fields {
                walk_expr(&field.value, f);
            }
        }
        ExprNode::EnumLit { payload, .. } | ExprNode::All { operands: payload } => {
            for e in payload {
                walk_expr(e, f);
            }
        }
        ExprNode::Alloc { value, .. } => walk_expr(value, f),
        ExprNode::Range { start, end, .. } => {
            for e in [start, end].into_iter().flatten() {
                walk_expr(e, f);
            }
        }
        ExprNode::Race { arms } => {
            for arm in arms {
                walk_expr(&arm.operand, f);
                walk_expr(&arm.handler, f);
            }
        }
        ExprNode::Yield { value: Some(v), .. } => walk_expr(v, f),
        _ => {}
    }
}

fn walk_block(block: &Block, f: &mut impl FnMut(&ExprPtr)) {
    for stmt in &block.stmts {
        match stmt {
            Stmt::Let { init, .. } => walk_expr(init, f),
            Stmt::Assign { place, value, .. } => {
                walk_expr(place, f);
                walk_expr(value, f);
            }
            Stmt::Expr(e) => walk_expr(e, f),
            Stmt::Return { value: Some(v), .. } => walk_expr(v, f),
            Stmt::While { cond, body, .. } => {
                walk_expr(cond, f);
                walk_block(body, f);
            }
            Stmt::For { iter, body, .. } => {
                walk_expr(iter, f);
                walk_block(body, f);
            }
            Stmt::Loop { body, .. }
            | Stmt::Region { body, .. }
            | Stmt::Unsafe { body, .. }
            | Stmt::KeyBlock { body, .. } => walk_block(body, f),
            Stmt::Parallel { arms, .. } => {
                for arm in arms {
                    walk_block(arm, f);
                }
            }
            _ => {}
        }
    }
    if let Some(tail) = &block.tail {
        walk_expr(tail, f);
    }
}

/// Capture collection for parallel arms and spawn bodies: every
/// place-shaped expression becomes a key path, writes from assignments,
/// reads otherwise.
fn collect_block_captures(block: &Block, sink: &mut impl FnMut(KeyPath, KeyMode)) {
    for stmt in &block.stmts {
        match stmt {
            Stmt::Assign { place, value, .. } => {
                if let Some(path) = place_to_key_path(place) {
                    sink(path, KeyMode::Write);
                }
                collect_expr_captures(value, sink);
            }
            Stmt::Let { init, .. } => collect_expr_captures(init, sink),
            Stmt::Expr(e) => collect_expr_captures(e, sink),
            Stmt::Return { value: Some(v), .. } => collect_expr_captures(v, sink),
            Stmt::While { cond, body, .. } => {
                collect_expr_captures(cond, sink);
                collect_block_captures(body, sink);
            }
            Stmt::For { iter, body, .. } => {
                collect_expr_captures(iter, sink);
                collect_block_captures(body, sink);
            }
            Stmt::Loop { body, .. }
            | Stmt::Region { body, .. }
            | Stmt::Unsafe { body, .. }
            | Stmt::KeyBlock { body, .. } => collect_block_captures(body, sink),
            Stmt::Parallel { arms, .. } => {
                for arm in arms {
                    collect_block_captures(arm, sink);
                }
            }
            _ => {}
        }
    }
    if let Some(tail) = &block.tail {
        collect_expr_captures(tail, sink);
    }
}

fn collect_expr_captures(expr: &ExprPtr, sink: &mut impl FnMut(KeyPath, KeyMode)) {
    if let Some(path) = place_to_key_path(expr) {
        sink(path, KeyMode::Read);
        return;
    }
    // A unique-receiver method call writes through its receiver; without
    // resolving the method here, a receiver place is conservatively a
    // write when arguments may mutate it. Reads cover the common case.
    walk_expr(expr, &mut |e| {
        if !Rc::ptr_eq(e, expr) {
            if let Some(path) = place_to_key_path(e) {
                sink(path, KeyMode::Read);
            }
        }
    });
}

fn place_to_key_path(expr: &Expr) -> Option<KeyPath> {
    match &expr.node {
        ExprNode::Identifier(name) => Some(KeyPath::root_only(name.clone())),
        ExprNode::Field { base, name } => {
            let mut path = place_to_key_path(base)?;
            path.segs.push(KeyPathSeg {
                boundary: false,
                name: name.clone(),
                is_index: false,
                index_value: None,
            });
            Some(path)
        }
        ExprNode::Index { base, index } => {
            let mut path = place_to_key_path(base)?;
            let value = match &index.node {
                ExprNode::IntLit(v) => Some(*v),
                _ => None,
            };
            path.segs.push(KeyPathSeg {
                boundary: false,
                name: value.map(|v| v.to_string()).unwrap_or_else(|| "index".into()),
                is_index: true,
                index_value: value,
            });
            Some(path)
        }
        _ => None,
    }
}

/// Cast validity: numeric↔numeric, bool↔int, char→u32.
pub fn cast_valid(from: &TypeRef, to: &TypeRef) -> bool {
    if is_numeric(from) && is_numeric(to) {
        return true;
    }
    if is_bool(from) && is_integer(to) {
        return true;
    }
    if is_integer(from) && is_bool(to) {
        return true;
    }
    matches!((&**from, &**to), (Ty::Prim("char"), Ty::Prim("u32")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::symbols::collect;
    use crate::source::load_source;
    use crate::syntax::parser::parse_module;

    fn check_source(text: &str) -> (CheckResult, SymbolTable) {
        let loaded = load_source("t.cursive", text.as_bytes());
        let parsed = parse_module(&loaded.source.unwrap(), "app");
        assert!(
            !parsed.diags.has_error(),
            "parse failed: {:?}",
            parsed.diags.ordered()
        );
        let collected = collect("app", vec![parsed.module]);
        let result = check(&collected.sigma);
        (result, collected.sigma)
    }

    #[test]
    fn deref_null_pointer_is_rejected() {
        let (result, _) =
            check_source("procedure foo(p: Ptr<i32>@Null) -> i32 { *p }\n");
        assert!(result.diags.has_code("E-PTR-0001"));
    }

    #[test]
    fn deref_valid_pointer_is_accepted() {
        let (result, _) =
            check_source("procedure foo(p: Ptr<i32>@Valid) -> i32 { *p }\n");
        assert!(!result.diags.has_error(), "{:?}", result.diags.ordered());
    }

    #[test]
    fn non_exhaustive_u8_match_is_rejected() {
        let (result, _) = check_source(
            "procedure pick(x: u8) -> i32 { match x { 0 => 1, 1 => 2 } }\n",
        );
        assert!(result.diags.has_code("E-SEM-0111"));
    }

    #[test]
    fn wildcard_makes_u8_match_exhaustive() {
        let (result, _) = check_source(
            "procedure pick(x: u8) -> i32 { match x { 0 => 1, _ => 2 } }\n",
        );
        assert!(!result.diags.has_error(), "{:?}", result.diags.ordered());
    }

    #[test]
    fn parallel_write_write_conflicts() {
        let (result, _) = check_source(
            "record Data { pub field: i32 }\n\
             procedure run(d: unique Data) {\n\
             parallel {\n{ d.field = 1 },\n{ d.field = 2 },\n}\n}\n",
        );
        assert!(result.diags.has_code("E-KEY-0001"));
    }

    #[test]
    fn cast_char_to_u32_is_valid() {
        let (result, _) = check_source("procedure c(x: char) -> u32 { x as u32 }\n");
        assert!(!result.diags.has_error(), "{:?}", result.diags.ordered());
    }

    #[test]
    fn cast_bool_to_float_is_invalid() {
        let (result, _) = check_source("procedure c(x: bool) -> bool { x as f32;\nx }\n");
        assert!(result.diags.has_code("E-SEM-0107"));
    }

    #[test]
    fn return_ending_block_satisfies_the_signature() {
        let (result, _) = check_source("procedure f() -> i32 { return 7\n}\n");
        assert!(!result.diags.has_error(), "{:?}", result.diags.ordered());
    }
}
