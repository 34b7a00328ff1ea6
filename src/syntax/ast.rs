// SPDX-License-Identifier: PMPL-1.0-or-later

//! The abstract syntax tree.
//!
//! Pure data: a sum type per syntactic category, a span on every node, and
//! no analysis fields. Expressions and type expressions are shared through
//! `Rc` because patterns and field declarations naturally re-reference
//! them; nothing here ever forms a cycle.

use crate::source::Span;
use std::rc::Rc;

pub type ExprPtr = Rc<Expr>;
pub type TypePtr = Rc<TypeExpr>;

/// A `::`-separated path as written in source.
pub type Path = Vec<String>;

pub fn path_key(path: &[String]) -> String {
    path.join("::")
}

// ---------------------------------------------------------------------------
// Modules and items

#[derive(Debug, Clone)]
pub struct AstModule {
    /// Module path key (`assembly::dir::…`).
    pub path_key: String,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Internal,
    Private,
}

#[derive(Debug, Clone)]
pub enum Item {
    Procedure(ProcedureDecl),
    Record(RecordDecl),
    Enum(EnumDecl),
    Modal(ModalDecl),
    Class(ClassDecl),
    TypeAlias(TypeAliasDecl),
    Static(StaticDecl),
    Import(ImportDecl),
    Using(UsingDecl),
    Extern(ExternBlock),
    /// Parser recovery placeholder; never reaches analysis.
    Error(Span),
}

impl Item {
    pub fn span(&self) -> &Span {
        match self {
            Item::Procedure(p) => &p.span,
            Item::Record(r) => &r.span,
            Item::Enum(e) => &e.span,
            Item::Modal(m) => &m.span,
            Item::Class(c) => &c.span,
            Item::TypeAlias(t) => &t.span,
            Item::Static(s) => &s.span,
            Item::Import(i) => &i.span,
            Item::Using(u) => &u.span,
            Item::Extern(x) => &x.span,
            Item::Error(span) => span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamMode {
    Move,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub mode: Option<ParamMode>,
    pub name: String,
    pub ty: TypePtr,
    pub span: Span,
}

/// Receiver shorthand on methods: `const self`, `self`, `unique self`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverPerm {
    Const,
    Shared,
    Unique,
}

#[derive(Debug, Clone)]
pub struct Receiver {
    pub perm: ReceiverPerm,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Contract {
    pub pre: Option<ExprPtr>,
    pub post: Option<ExprPtr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ProcedureDecl {
    pub vis: Visibility,
    pub name: String,
    pub is_async: bool,
    /// Present on methods; absent on free procedures.
    pub receiver: Option<Receiver>,
    /// Marks a modal `transition` method.
    pub is_transition: bool,
    pub params: Vec<Param>,
    pub ret: Option<TypePtr>,
    pub contract: Option<Contract>,
    /// Absent for extern declarations.
    pub body: Option<Block>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub vis: Visibility,
    /// Key-boundary marker (`#field`).
    pub boundary: bool,
    pub name: String,
    pub ty: TypePtr,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct RecordDecl {
    pub vis: Visibility,
    pub name: String,
    pub implements: Vec<Path>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<ProcedureDecl>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct EnumVariant {
    pub name: String,
    pub payload: Vec<TypePtr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct EnumDecl {
    pub vis: Visibility,
    pub name: String,
    pub variants: Vec<EnumVariant>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct StateBlock {
    pub name: String,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<ProcedureDecl>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ModalDecl {
    pub vis: Visibility,
    pub name: String,
    /// Fields available in every state.
    pub common_fields: Vec<FieldDecl>,
    pub states: Vec<StateBlock>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ClassMethodDecl {
    pub name: String,
    pub receiver: Receiver,
    pub params: Vec<Param>,
    pub ret: Option<TypePtr>,
    pub span: Span,
}

/// A nominal interface. `$`-prefixed classes are capability classes.
#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub vis: Visibility,
    pub name: String,
    pub methods: Vec<ClassMethodDecl>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct TypeAliasDecl {
    pub vis: Visibility,
    pub name: String,
    pub ty: TypePtr,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct StaticDecl {
    pub vis: Visibility,
    pub mutable: bool,
    pub name: String,
    pub ty: TypePtr,
    pub init: ExprPtr,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ImportDecl {
    /// First segment names an assembly; the rest addresses a module/item.
    pub path: Path,
    /// Explicit item list; empty imports the whole module.
    pub items: Vec<String>,
    pub alias: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct UsingDecl {
    pub path: Path,
    pub alias: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ExternProc {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Option<TypePtr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ExternBlock {
    pub abi: String,
    pub procs: Vec<ExternProc>,
    pub span: Span,
}

// ---------------------------------------------------------------------------
// Types as written

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PtrStateName {
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermName {
    Const,
    Shared,
    Unique,
}

#[derive(Debug, Clone)]
pub struct TypeExpr {
    pub node: TypeNode,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum TypeNode {
    /// `bool`, `i32`, …, `()`, `!`.
    Prim(String),
    /// `Ptr<T>` with optional `@State`.
    Ptr {
        elem: TypePtr,
        state: Option<PtrStateName>,
    },
    /// `rawptr[imm, T]` / `rawptr[mut, T]`.
    RawPtr { qual: RawPtrQual, elem: TypePtr },
    /// `[T]`.
    Slice { elem: TypePtr },
    /// `[T; N]`.
    Array { elem: TypePtr, len: u64 },
    /// `(A, B, …)`; `()` lexes as Prim.
    Tuple(Vec<TypePtr>),
    /// `A | B | …`.
    Union(Vec<TypePtr>),
    /// `String`, `String@View`, `String@Managed`.
    StringTy(Option<StrState>),
    /// `Bytes`, `Bytes@View`, `Bytes@Managed`.
    BytesTy(Option<StrState>),
    /// `mod::Name<Args>`; also capability classes (`$FileSystem`).
    PathTy { path: Path, args: Vec<TypePtr> },
    /// `dyn Class`.
    Dynamic { path: Path },
    /// `M@State` for a user modal type.
    ModalState { path: Path, state: String },
    /// `proc(A, B) -> R`.
    Func { params: Vec<TypePtr>, ret: TypePtr },
    /// `Range`.
    Range,
    /// `const T` / `shared T` / `unique T`.
    Perm { perm: PermName, base: TypePtr },
}

// ---------------------------------------------------------------------------
// Statements

#[derive(Debug, Clone)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    /// Trailing expression, the block's value.
    pub tail: Option<ExprPtr>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    Read,
    Write,
}

/// A key path as written: root binding plus field/index segments.
#[derive(Debug, Clone)]
pub struct KeyPathExpr {
    pub root: String,
    pub segs: Vec<KeySeg>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum KeySeg {
    Field { name: String, boundary: bool },
    Index { index: ExprPtr, boundary: bool },
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Let {
        mutable: bool,
        name: String,
        ty: Option<TypePtr>,
        init: ExprPtr,
        span: Span,
    },
    Assign {
        place: ExprPtr,
        value: ExprPtr,
        span: Span,
    },
    Expr(ExprPtr),
    Return {
        value: Option<ExprPtr>,
        span: Span,
    },
    Break(Span),
    Continue(Span),
    While {
        cond: ExprPtr,
        body: Block,
        span: Span,
    },
    Loop {
        body: Block,
        span: Span,
    },
    For {
        binding: String,
        iter: ExprPtr,
        body: Block,
        span: Span,
    },
    /// `region r { … }`.
    Region {
        name: String,
        body: Block,
        span: Span,
    },
    /// `unsafe { … }`; the body's byte range is recorded for raw-pointer
    /// discipline.
    Unsafe {
        body: Block,
        span: Span,
    },
    /// `#(write a.b, read c) { … }`.
    KeyBlock {
        keys: Vec<(KeyPathExpr, KeyMode)>,
        body: Block,
        span: Span,
    },
    /// `parallel { { … }, { … } }`.
    Parallel {
        arms: Vec<Block>,
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> &Span {
        match self {
            Stmt::Let { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::While { span, .. }
            | Stmt::Loop { span, .. }
            | Stmt::For { span, .. }
            | Stmt::Region { span, .. }
            | Stmt::Unsafe { span, .. }
            | Stmt::KeyBlock { span, .. }
            | Stmt::Parallel { span, .. } => span,
            Stmt::Break(span) | Stmt::Continue(span) => span,
            Stmt::Expr(e) => &e.span,
        }
    }
}

// ---------------------------------------------------------------------------
// Patterns

#[derive(Debug, Clone)]
pub struct Pattern {
    pub node: PatternNode,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum PatternNode {
    Wildcard,
    Binding(String),
    IntLit(i128),
    BoolLit(bool),
    CharLit(char),
    /// `a..b` / `a..=b`; open ends are `None`.
    Range {
        start: Option<i128>,
        end: Option<i128>,
        inclusive: bool,
    },
    /// `Path::Variant(subpatterns)`.
    EnumVariant {
        path: Path,
        variant: String,
        payload: Vec<Pattern>,
    },
    Tuple(Vec<Pattern>),
    /// `M@State { bindings }` at modal widening introduction.
    ModalState {
        path: Path,
        state: String,
        bindings: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Expressions

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone)]
pub struct FieldInit {
    pub name: String,
    pub value: ExprPtr,
    pub moved: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub body: ExprPtr,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceHandlerKind {
    Return,
    Yield,
}

#[derive(Debug, Clone)]
pub struct RaceArm {
    pub operand: ExprPtr,
    pub binder: String,
    pub handler: ExprPtr,
    pub kind: RaceHandlerKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub node: ExprNode,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExprNode {
    IntLit(i128),
    FloatLit(f64),
    BoolLit(bool),
    CharLit(char),
    StringLit(String),
    NullLit,
    Unit,
    Identifier(String),
    /// `a::b::c`, at least two segments.
    Path(Path),
    Field {
        base: ExprPtr,
        name: String,
    },
    Index {
        base: ExprPtr,
        index: ExprPtr,
    },
    Call {
        callee: ExprPtr,
        args: Vec<ExprPtr>,
    },
    MethodCall {
        receiver: ExprPtr,
        name: String,
        args: Vec<ExprPtr>,
    },
    Unary {
        op: UnaryOp,
        operand: ExprPtr,
    },
    Binary {
        op: BinaryOp,
        lhs: ExprPtr,
        rhs: ExprPtr,
    },
    /// `&place`.
    AddressOf(ExprPtr),
    /// `*ptr`.
    Deref(ExprPtr),
    Cast {
        expr: ExprPtr,
        ty: TypePtr,
    },
    /// `transmute<T>(e)`; unsafe only.
    Transmute {
        expr: ExprPtr,
        ty: TypePtr,
    },
    If {
        cond: ExprPtr,
        then_block: Block,
        else_block: Option<Block>,
    },
    Match {
        scrutinee: ExprPtr,
        arms: Vec<MatchArm>,
    },
    Block(Block),
    RecordLit {
        path: Path,
        fields: Vec<FieldInit>,
    },
    EnumLit {
        path: Path,
        variant: String,
        payload: Vec<ExprPtr>,
    },
    Move(ExprPtr),
    /// `^e` (implicit region) or `^r<-e` (named region).
    Alloc {
        region: Option<String>,
        value: ExprPtr,
    },
    /// `e?`.
    Propagate(ExprPtr),
    /// `[a..b]`, `[..=b]`, …
    Range {
        start: Option<ExprPtr>,
        end: Option<ExprPtr>,
        inclusive: bool,
    },
    Spawn(Block),
    Wait(ExprPtr),
    Sync(ExprPtr),
    Race {
        arms: Vec<RaceArm>,
    },
    All {
        operands: Vec<ExprPtr>,
    },
    Yield {
        value: Option<ExprPtr>,
        /// `yield release` drops held keys across the suspension.
        release: bool,
    },
    YieldFrom(ExprPtr),
    /// `@result`; contract postconditions only.
    ContractResult,
    /// `@entry(e)`; the value of `e` captured at procedure entry.
    ContractEntry(ExprPtr),
}
