// SPDX-License-Identifier: PMPL-1.0-or-later

//! AST pretty-printer.
//!
//! Prints a module back to parseable source. Round-tripping through the
//! printer must preserve the module's symbol-table contribution; spans are
//! not preserved.

use crate::syntax::ast::*;

pub fn print_module(module: &AstModule) -> String {
    let mut p = Printer::default();
    for item in &module.items {
        p.item(item);
        p.out.push('\n');
    }
    p.out
}

#[derive(Default)]
struct Printer {
    out: String,
    indent: usize,
}

impl Printer {
    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn vis(&self, vis: Visibility) -> &'static str {
        match vis {
            Visibility::Public => "pub ",
            Visibility::Internal => "internal ",
            Visibility::Private => "",
        }
    }

    fn item(&mut self, item: &Item) {
        match item {
            Item::Procedure(p) => self.procedure(p),
            Item::Record(r) => self.record(r),
            Item::Enum(e) => self.enumeration(e),
            Item::Modal(m) => self.modal(m),
            Item::Class(c) => self.class(c),
            Item::TypeAlias(t) => {
                let text = format!("{}type {} = {}", self.vis(t.vis), t.name, type_text(&t.ty));
                self.line(&text);
            }
            Item::Static(s) => {
                let var = if s.mutable { "var " } else { "" };
                let text = format!(
                    "{}static {}{}: {} = {}",
                    self.vis(s.vis),
                    var,
                    s.name,
                    type_text(&s.ty),
                    expr_text(&s.init)
                );
                self.line(&text);
            }
            Item::Import(i) => {
                let mut text = format!("import {}", i.path.join("::"));
                if !i.items.is_empty() {
                    text.push_str(&format!("::{{{}}}", i.items.join(", ")));
                }
                if let Some(alias) = &i.alias {
                    text.push_str(&format!(" as {alias}"));
                }
                self.line(&text);
            }
            Item::Using(u) => {
                let mut text = format!("using {}", u.path.join("::"));
                if let Some(alias) = &u.alias {
                    text.push_str(&format!(" as {alias}"));
                }
                self.line(&text);
            }
            Item::Extern(x) => {
                self.line(&format!("extern \"{}\" {{", x.abi));
                self.indent += 1;
                for proc in &x.procs {
                    let params = proc
                        .params
                        .iter()
                        .map(param_text)
                        .collect::<Vec<_>>()
                        .join(", ");
                    let ret = proc
                        .ret
                        .as_ref()
                        .map(|t| format!(" -> {}", type_text(t)))
                        .unwrap_or_default();
                    self.line(&format!("procedure {}({params}){ret}", proc.name));
                }
                self.indent -= 1;
                self.line("}");
            }
            Item::Error(_) => {}
        }
    }

    fn procedure(&mut self, p: &ProcedureDecl) {
        let mut head = String::new();
        head.push_str(self.vis(p.vis));
        if p.is_async {
            head.push_str("async ");
        }
        head.push_str(if p.is_transition {
            "transition "
        } else {
            "procedure "
        });
        head.push_str(&p.name);
        head.push('(');
        let mut parts = Vec::new();
        if let Some(recv) = &p.receiver {
            parts.push(
                match recv.perm {
                    ReceiverPerm::Const => "const self",
                    ReceiverPerm::Shared => "self",
                    ReceiverPerm::Unique => "unique self",
                }
                .to_string(),
            );
        }
        parts.extend(p.params.iter().map(param_text));
        head.push_str(&parts.join(", "));
        head.push(')');
        if let Some(ret) = &p.ret {
            head.push_str(&format!(" -> {}", type_text(ret)));
        }
        if let Some(contract) = &p.contract {
            head.push_str(" |=");
            if let Some(pre) = &contract.pre {
                head.push_str(&format!(" {}", expr_text(pre)));
            }
            if let Some(post) = &contract.post {
                head.push_str(&format!(" => {}", expr_text(post)));
            }
        }
        match &p.body {
            Some(body) => {
                head.push_str(" {");
                self.line(&head);
                self.indent += 1;
                self.block_body(body);
                self.indent -= 1;
                self.line("}");
            }
            None => self.line(&head),
        }
    }

    fn record(&mut self, r: &RecordDecl) {
        let mut head = format!("{}record {}", self.vis(r.vis), r.name);
        if !r.implements.is_empty() {
            head.push_str(" implements ");
            head.push_str(
                &r.implements
                    .iter()
                    .map(|p| p.join("::"))
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }
        head.push_str(" {");
        self.line(&head);
        self.indent += 1;
        for field in &r.fields {
            self.field(field);
        }
        for method in &r.methods {
            self.procedure(method);
        }
        self.indent -= 1;
        self.line("}");
    }

    fn field(&mut self, field: &FieldDecl) {
        let boundary = if field.boundary { "#" } else { "" };
        let text = format!(
            "{}{}{}: {}",
            self.vis(field.vis),
            boundary,
            field.name,
            type_text(&field.ty)
        );
        self.line(&text);
    }

    fn enumeration(&mut self, e: &EnumDecl) {
        self.line(&format!("{}enum {} {{", self.vis(e.vis), e.name));
        self.indent += 1;
        for variant in &e.variants {
            let mut text = variant.name.clone();
            if !variant.payload.is_empty() {
                text.push('(');
                text.push_str(
                    &variant
                        .payload
                        .iter()
                        .map(|t| type_text(t))
                        .collect::<Vec<_>>()
                        .join(", "),
                );
                text.push(')');
            }
            text.push(',');
            self.line(&text);
        }
        self.indent -= 1;
        self.line("}");
    }

    fn modal(&mut self, m: &ModalDecl) {
        self.line(&format!("{}modal {} {{", self.vis(m.vis), m.name));
        self.indent += 1;
        for field in &m.common_fields {
            self.field(field);
        }
        for state in &m.states {
            self.line(&format!("state {} {{", state.name));
            self.indent += 1;
            for field in &state.fields {
                self.field(field);
            }
            for method in &state.methods {
                self.procedure(method);
            }
            self.indent -= 1;
            self.line("}");
        }
        self.indent -= 1;
        self.line("}");
    }

    fn class(&mut self, c: &ClassDecl) {
        self.line(&format!("{}class {} {{", self.vis(c.vis), c.name));
        self.indent += 1;
        for method in &c.methods {
            let recv = match method.receiver.perm {
                ReceiverPerm::Const => "const self",
                ReceiverPerm::Shared => "self",
                ReceiverPerm::Unique => "unique self",
            };
            let mut parts = vec![recv.to_string()];
            parts.extend(method.params.iter().map(param_text));
            let ret = method
                .ret
                .as_ref()
                .map(|t| format!(" -> {}", type_text(t)))
                .unwrap_or_default();
            self.line(&format!(
                "procedure {}({}){}",
                method.name,
                parts.join(", "),
                ret
            ));
        }
        self.indent -= 1;
        self.line("}");
    }

    fn block_body(&mut self, block: &Block) {
        for stmt in &block.stmts {
            self.stmt(stmt);
        }
        if let Some(tail) = &block.tail {
            let text = expr_text(tail);
            self.line(&text);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let {
                mutable,
                name,
                ty,
                init,
                ..
            } => {
                let kw = if *mutable { "var" } else { "let" };
                let ann = ty
                    .as_ref()
                    .map(|t| format!(": {}", type_text(t)))
                    .unwrap_or_default();
                self.line(&format!("{kw} {name}{ann} = {}", expr_text(init)));
            }
            Stmt::Assign { place, value, .. } => {
                self.line(&format!("{} = {}", expr_text(place), expr_text(value)));
            }
            Stmt::Expr(e) => {
                let text = format!("{};", expr_text(e));
                self.line(&text);
            }
            Stmt::Return { value, .. } => match value {
                Some(v) => self.line(&format!("return {}", expr_text(v))),
                None => self.line("return"),
            },
            Stmt::Break(_) => self.line("break"),
            Stmt::Continue(_) => self.line("continue"),
            Stmt::While { cond, body, .. } => {
                self.line(&format!("while {} {{", expr_text(cond)));
                self.indent += 1;
                self.block_body(body);
                self.indent -= 1;
                self.line("}");
            }
            Stmt::Loop { body, .. } => {
                self.line("loop {");
                self.indent += 1;
                self.block_body(body);
                self.indent -= 1;
                self.line("}");
            }
            Stmt::For {
                binding,
                iter,
                body,
                ..
            } => {
                self.line(&format!("for {binding} in {} {{", expr_text(iter)));
                self.indent += 1;
                self.block_body(body);
                self.indent -= 1;
                self.line("}");
            }
            Stmt::Region { name, body, .. } => {
                self.line(&format!("region {name} {{"));
                self.indent += 1;
                self.block_body(body);
                self.indent -= 1;
                self.line("}");
            }
            Stmt::Unsafe { body, .. } => {
                self.line("unsafe {");
                self.indent += 1;
                self.block_body(body);
                self.indent -= 1;
                self.line("}");
            }
            Stmt::KeyBlock { keys, body, .. } => {
                let list = keys
                    .iter()
                    .map(|(path, mode)| {
                        let mode = match mode {
                            KeyMode::Read => "read",
                            KeyMode::Write => "write",
                        };
                        format!("{mode} {}", key_path_text(path))
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                self.line(&format!("#({list}) {{"));
                self.indent += 1;
                self.block_body(body);
                self.indent -= 1;
                self.line("}");
            }
            Stmt::Parallel { arms, .. } => {
                self.line("parallel {");
                self.indent += 1;
                for arm in arms {
                    self.line("{");
                    self.indent += 1;
                    self.block_body(arm);
                    self.indent -= 1;
                    self.line("},");
                }
                self.indent -= 1;
                self.line("}");
            }
        }
    }
}

fn param_text(param: &Param) -> String {
    let mode = match param.mode {
        Some(ParamMode::Move) => "move ",
        None => "",
    };
    format!("{mode}{}: {}", param.name, type_text(&param.ty))
}

fn key_path_text(path: &KeyPathExpr) -> String {
    let mut out = path.root.clone();
    for seg in &path.segs {
        match seg {
            KeySeg::Field { name, boundary } => {
                out.push('.');
                if *boundary {
                    out.push('#');
                }
                out.push_str(name);
            }
            KeySeg::Index { index, boundary } => {
                out.push('[');
                if *boundary {
                    out.push('#');
                }
                out.push_str(&expr_text(index));
                out.push(']');
            }
        }
    }
    out
}

pub fn type_text(ty: &TypeExpr) -> String {
    match &ty.node {
        TypeNode::Prim(name) => name.clone(),
        TypeNode::Ptr { elem, state } => {
            let state = match state {
                Some(PtrStateName::Valid) => "@Valid",
                Some(PtrStateName::Null) => "@Null",
                Some(PtrStateName::Expired) => "@Expired",
                None => "",
            };
            format!("Ptr<{}>{state}", type_text(elem))
        }
        TypeNode::RawPtr { qual, elem } => {
            let qual = match qual {
                RawPtrQual::Imm => "imm",
                RawPtrQual::Mut => "mut",
            };
            format!("rawptr[{qual}, {}]", type_text(elem))
        }
        TypeNode::Slice { elem } => format!("[{}]", type_text(elem)),
        TypeNode::Array { elem, len } => format!("[{}; {len}]", type_text(elem)),
        TypeNode::Tuple(elems) => format!(
            "({})",
            elems.iter().map(|t| type_text(t)).collect::<Vec<_>>().join(", ")
        ),
        TypeNode::Union(members) => members
            .iter()
            .map(|t| type_text(t))
            .collect::<Vec<_>>()
            .join(" | "),
        TypeNode::StringTy(state) => format!("String{}", str_state_text(state)),
        TypeNode::BytesTy(state) => format!("Bytes{}", str_state_text(state)),
        TypeNode::PathTy { path, args } => {
            let mut out = path.join("::");
            if !args.is_empty() {
                out.push('<');
                out.push_str(
                    &args.iter().map(|t| type_text(t)).collect::<Vec<_>>().join(", "),
                );
                out.push('>');
            }
            out
        }
        TypeNode::Dynamic { path } => format!("dyn {}", path.join("::")),
        TypeNode::ModalState { path, state } => format!("{}@{state}", path.join("::")),
        TypeNode::Func { params, ret } => format!(
            "proc({}) -> {}",
            params.iter().map(|t| type_text(t)).collect::<Vec<_>>().join(", "),
            type_text(ret)
        ),
        TypeNode::Range => "Range".into(),
        TypeNode::Perm { perm, base } => {
            let perm = match perm {
                PermName::Const => "const",
                PermName::Shared => "shared",
                PermName::Unique => "unique",
            };
            format!("{perm} {}", type_text(base))
        }
    }
}

fn str_state_text(state: &Option<StrState>) -> &'static str {
    match state {
        Some(StrState::View) => "@View",
        Some(StrState::Managed) => "@Managed",
        None => "",
    }
}

pub fn expr_text(expr: &Expr) -> String {
    match &expr.node {
        ExprNode::IntLit(v) => v.to_string(),
        ExprNode::FloatLit(v) => {
            if v.fract() == 0.0 {
                format!("{v:.1}")
            } else {
                v.to_string()
            }
        }
        ExprNode::BoolLit(v) => v.to_string(),
        ExprNode::CharLit(c) => format!("'{}'", c.escape_default()),
        ExprNode::StringLit(s) => format!("\"{}\"", s.escape_default()),
        ExprNode::NullLit => "null".into(),
        ExprNode::Unit => "()".into(),
        ExprNode::Identifier(name) => name.clone(),
        ExprNode::Path(path) => path.join("::"),
        ExprNode::Field { base, name } => format!("{}.{name}", expr_text(base)),
        ExprNode::Index { base, index } => {
            format!("{}[{}]", expr_text(base), expr_text(index))
        }
        ExprNode::Call { callee, args } => format!(
            "{}({})",
            expr_text(callee),
            args.iter().map(|a| expr_text(a)).collect::<Vec<_>>().join(", ")
        ),
        ExprNode::MethodCall {
            receiver,
            name,
            args,
        } => format!(
            "{}.{name}({})",
            expr_text(receiver),
            args.iter().map(|a| expr_text(a)).collect::<Vec<_>>().join(", ")
        ),
        ExprNode::Unary { op, operand } => {
            let op = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Not => "!",
            };
            format!("{op}{}", expr_text(operand))
        }
        ExprNode::Binary { op, lhs, rhs } => {
            let op = match op {
                BinaryOp::Add => "+",
                BinaryOp::Sub => "-",
                BinaryOp::Mul => "*",
                BinaryOp::Div => "/",
                BinaryOp::Rem => "%",
                BinaryOp::Eq => "==",
                BinaryOp::Ne => "!=",
                BinaryOp::Lt => "<",
                BinaryOp::Le => "<=",
                BinaryOp::Gt => ">",
                BinaryOp::Ge => ">=",
                BinaryOp::And => "&&",
                BinaryOp::Or => "||",
            };
            format!("({} {op} {})", expr_text(lhs), expr_text(rhs))
        }
        ExprNode::AddressOf(e) => format!("&{}", expr_text(e)),
        ExprNode::Deref(e) => format!("*{}", expr_text(e)),
        ExprNode::Cast { expr, ty } => format!("({} as {})", expr_text(expr), type_text(ty)),
        ExprNode::Transmute { expr, ty } => {
            format!("transmute<{}>({})", type_text(ty), expr_text(expr))
        }
        ExprNode::If {
            cond,
            then_block,
            else_block,
        } => {
            let mut out = format!("if {} {}", expr_text(cond), block_text(then_block));
            if let Some(els) = else_block {
                out.push_str(&format!(" else {}", block_text(els)));
            }
            out
        }
        ExprNode::Match { scrutinee, arms } => {
            let mut out = format!("match {} {{ ", expr_text(scrutinee));
            for arm in arms {
                out.push_str(&format!(
                    "{} => {}, ",
                    pattern_text(&arm.pattern),
                    expr_text(&arm.body)
                ));
            }
            out.push('}');
            out
        }
        ExprNode::Block(block) => block_text(block),
        ExprNode::RecordLit { path, fields } => {
            let mut out = format!("{} {{ ", path.join("::"));
            for field in fields {
                let moved = if field.moved { "move " } else { "" };
                out.push_str(&format!("{}: {moved}{}, ", field.name, expr_text(&field.value)));
            }
            out.push('}');
            out
        }
        ExprNode::EnumLit {
            path,
            variant,
            payload,
        } => {
            let mut out = format!("{}::{variant}", path.join("::"));
            if !payload.is_empty() {
                out.push('(');
                out.push_str(
                    &payload.iter().map(|a| expr_text(a)).collect::<Vec<_>>().join(", "),
                );
                out.push(')');
            }
            out
        }
        ExprNode::Move(e) => format!("move {}", expr_text(e)),
        ExprNode::Alloc { region, value } => match region {
            Some(r) => format!("^{r}<-{}", expr_text(value)),
            None => format!("^{}", expr_text(value)),
        },
        ExprNode::Propagate(e) => format!("{}?", expr_text(e)),
        ExprNode::Range {
            start,
            end,
            inclusive,
        } => {
            let op = if *inclusive { "..=" } else { ".." };
            format!(
                "[{}{op}{}]",
                start.as_ref().map(|e| expr_text(e)).unwrap_or_default(),
                end.as_ref().map(|e| expr_text(e)).unwrap_or_default()
            )
        }
        ExprNode::Spawn(block) => format!("spawn {}", block_text(block)),
        ExprNode::Wait(e) => format!("wait {}", expr_text(e)),
        ExprNode::Sync(e) => format!("sync {}", expr_text(e)),
        ExprNode::Race { arms } => {
            let mut out = String::from("race { ");
            for arm in arms {
                let kind = match arm.kind {
                    RaceHandlerKind::Return => "",
                    RaceHandlerKind::Yield => "yield ",
                };
                out.push_str(&format!(
                    "{} -> |{}| {kind}{}, ",
                    expr_text(&arm.operand),
                    arm.binder,
                    expr_text(&arm.handler)
                ));
            }
            out.push('}');
            out
        }
        ExprNode::All { operands } => format!(
            "all {{ {} }}",
            operands.iter().map(|a| expr_text(a)).collect::<Vec<_>>().join(", ")
        ),
        ExprNode::Yield { value, release } => {
            let mut out = String::from("yield");
            if *release {
                out.push_str(" release");
            }
            if let Some(v) = value {
                out.push_str(&format!(" {}", expr_text(v)));
            }
            out
        }
        ExprNode::YieldFrom(e) => format!("yield from {}", expr_text(e)),
        ExprNode::ContractResult => "@result".into(),
        ExprNode::ContractEntry(e) => format!("@entry({})", expr_text(e)),
    }
}

fn block_text(block: &Block) -> String {
    let mut p = Printer {
        out: String::new(),
        indent: 1,
    };
    p.block_body(block);
    let mut out = String::from("{\n");
    out.push_str(&p.out);
    out.push('}');
    out
}

fn pattern_text(pattern: &Pattern) -> String {
    match &pattern.node {
        PatternNode::Wildcard => "_".into(),
        PatternNode::Binding(name) => name.clone(),
        PatternNode::IntLit(v) => v.to_string(),
        PatternNode::BoolLit(v) => v.to_string(),
        PatternNode::CharLit(c) => format!("'{}'", c.escape_default()),
        PatternNode::Range {
            start,
            end,
            inclusive,
        } => {
            let op = if *inclusive { "..=" } else { ".." };
            format!(
                "{}{op}{}",
                start.map(|v| v.to_string()).unwrap_or_default(),
                end.map(|v| v.to_string()).unwrap_or_default()
            )
        }
        PatternNode::EnumVariant {
            path,
            variant,
            payload,
        } => {
            let mut out = format!("{}::{variant}", path.join("::"));
            if !payload.is_empty() {
                out.push('(');
                out.push_str(
                    &payload
                        .iter()
                        .map(pattern_text)
                        .collect::<Vec<_>>()
                        .join(", "),
                );
                out.push(')');
            }
            out
        }
        PatternNode::Tuple(elems) => format!(
            "({})",
            elems.iter().map(pattern_text).collect::<Vec<_>>().join(", ")
        ),
        PatternNode::ModalState {
            path,
            state,
            bindings,
        } => {
            let mut out = format!("{}@{state}", path.join("::"));
            if !bindings.is_empty() {
                out.push_str(&format!(" {{ {} }}", bindings.join(", ")));
            }
            out
        }
    }
}
