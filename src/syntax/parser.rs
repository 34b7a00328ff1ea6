// SPDX-License-Identifier: PMPL-1.0-or-later

//! The parser.
//!
//! Recursive descent over the spanned token stream. Newlines terminate
//! statements and items; inside brackets and after continuation tokens
//! they are insignificant. Recovery is per-item: a malformed item becomes
//! `Item::Error` and parsing resumes at the next plausible item start.

use crate::diag::{Diagnostic, DiagnosticStream};
use crate::source::{SourceFile, Span};
use crate::syntax::ast::*;
use crate::syntax::lexer::tokenize;
use crate::syntax::token::{make_eof_token, EofToken, Token, TokenKind};
use std::rc::Rc;

pub struct ParseResult {
    pub module: AstModule,
    pub diags: DiagnosticStream,
}

/// Parse one source file into the module named by `path_key`.
pub fn parse_module(source: &SourceFile, path_key: &str) -> ParseResult {
    let lexed = tokenize(source);
    let mut parser = Parser::new(lexed.tokens, make_eof_token(source));
    let mut diags = lexed.diags;
    let items = parser.parse_items();
    diags.merge(parser.diags);
    ParseResult {
        module: AstModule {
            path_key: path_key.to_string(),
            items,
        },
        diags,
    }
}

struct Parser {
    tokens: Vec<Token>,
    eof: EofToken,
    pos: usize,
    diags: DiagnosticStream,
    /// Suppresses record-literal parsing in condition position, where a
    /// `{` must open the block instead.
    no_struct: bool,
}

impl Parser {
    fn new(tokens: Vec<Token>, eof: EofToken) -> Self {
        Self {
            tokens,
            eof,
            pos: 0,
            diags: DiagnosticStream::new(),
            no_struct: false,
        }
    }

    // -- token plumbing ----------------------------------------------------

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_skipping_newlines(&self) -> Option<&Token> {
        self.tokens[self.pos..]
            .iter()
            .find(|t| t.kind != TokenKind::Newline)
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Some(t) if t.kind == TokenKind::Newline) {
            self.pos += 1;
        }
    }

    fn at_end(&self) -> bool {
        self.peek_skipping_newlines().is_none()
    }

    fn here_span(&self) -> Span {
        self.peek()
            .map(|t| t.span.clone())
            .unwrap_or_else(|| self.eof.span.clone())
    }

    fn check_kw(&self, text: &str) -> bool {
        matches!(self.peek(), Some(t) if t.kind == TokenKind::Keyword && t.lexeme == text)
    }

    fn check_op(&self, text: &str) -> bool {
        matches!(self.peek(), Some(t) if t.kind == TokenKind::Operator && t.lexeme == text)
    }

    fn check_punc(&self, text: &str) -> bool {
        matches!(self.peek(), Some(t) if t.kind == TokenKind::Punctuator && t.lexeme == text)
    }

    fn eat_kw(&mut self, text: &str) -> bool {
        if self.check_kw(text) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, text: &str) -> bool {
        if self.check_op(text) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_punc(&mut self, text: &str) -> bool {
        if self.check_punc(text) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error_here(&mut self, detail: &str) {
        let span = self.here_span();
        self.diags
            .emit(Diagnostic::from_code("E-SRC-0401", Some(span), Some(detail)));
    }

    fn expect_op(&mut self, text: &str) -> bool {
        if self.eat_op(text) {
            return true;
        }
        self.error_here(&format!("expected `{text}`"));
        false
    }

    fn expect_punc(&mut self, text: &str) -> bool {
        if self.eat_punc(text) {
            return true;
        }
        self.error_here(&format!("expected `{text}`"));
        false
    }

    fn expect_ident(&mut self) -> Option<(String, Span)> {
        match self.peek() {
            Some(t) if t.kind == TokenKind::Identifier => {
                let out = (t.lexeme.clone(), t.span.clone());
                self.pos += 1;
                Some(out)
            }
            _ => {
                self.error_here("expected an identifier");
                None
            }
        }
    }

    // -- items -------------------------------------------------------------

    fn parse_items(&mut self) -> Vec<Item> {
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            if self.at_end() {
                break;
            }
            let before = self.pos;
            match self.parse_item() {
                Some(item) => items.push(item),
                None => {
                    let span = self.here_span();
                    self.diags
                        .emit(Diagnostic::from_code("E-SRC-0402", Some(span.clone()), None));
                    self.recover_to_item_start(before);
                    items.push(Item::Error(span));
                }
            }
        }
        items
    }

    fn recover_to_item_start(&mut self, before: usize) {
        if self.pos == before {
            self.pos += 1;
        }
        let mut depth = 0usize;
        while let Some(tok) = self.peek() {
            match tok.kind {
                TokenKind::Punctuator if tok.lexeme == "{" => depth += 1,
                TokenKind::Punctuator if tok.lexeme == "}" => {
                    depth = depth.saturating_sub(1);
                    self.pos += 1;
                    if depth == 0 {
                        return;
                    }
                    continue;
                }
                TokenKind::Keyword
                    if depth == 0
                        && matches!(
                            tok.lexeme.as_str(),
                            "procedure"
                                | "record"
                                | "enum"
                                | "modal"
                                | "class"
                                | "type"
                                | "static"
                                | "import"
                                | "using"
                                | "extern"
                                | "pub"
                                | "internal"
                        ) =>
                {
                    return;
                }
                TokenKind::Newline if depth == 0 => {
                    return;
                }
                _ => {}
            }
            self.pos += 1;
        }
    }

    fn parse_visibility(&mut self) -> Visibility {
        if self.eat_kw("pub") {
            Visibility::Public
        } else if self.eat_kw("internal") {
            Visibility::Internal
        } else {
            Visibility::Private
        }
    }

    fn parse_item(&mut self) -> Option<Item> {
        let vis = self.parse_visibility();
        let is_async = self.eat_kw("async");
        if self.check_kw("procedure") {
            return self.parse_procedure(vis, is_async, false).map(Item::Procedure);
        }
        if is_async {
            self.error_here("`async` is only valid before `procedure`");
            return None;
        }
        if self.check_kw("record") {
            return self.parse_record(vis).map(Item::Record);
        }
        if self.check_kw("enum") {
            return self.parse_enum(vis).map(Item::Enum);
        }
        if self.check_kw("modal") {
            return self.parse_modal(vis).map(Item::Modal);
        }
        if self.check_kw("class") {
            return self.parse_class(vis).map(Item::Class);
        }
        if self.check_kw("type") {
            return self.parse_type_alias(vis).map(Item::TypeAlias);
        }
        if self.check_kw("static") {
            return self.parse_static(vis).map(Item::Static);
        }
        if self.check_kw("import") {
            return self.parse_import().map(Item::Import);
        }
        if self.check_kw("using") {
            return self.parse_using().map(Item::Using);
        }
        if self.check_kw("extern") {
            return self.parse_extern().map(Item::Extern);
        }
        None
    }

    fn parse_procedure(
        &mut self,
        vis: Visibility,
        is_async: bool,
        receiver_allowed: bool,
    ) -> Option<ProcedureDecl> {
        let start = self.here_span();
        let is_transition = self.eat_kw("transition");
        if !is_transition && !self.eat_kw("procedure") {
            return None;
        }
        let (name, _) = self.expect_ident()?;
        self.expect_punc("(");
        let (receiver, params) = self.parse_params(receiver_allowed)?;
        let ret = if self.eat_op("->") {
            Some(self.parse_type()?)
        } else {
            None
        };
        let contract = self.parse_contract();
        self.skip_newlines();
        let body = if self.check_punc("{") {
            Some(self.parse_block()?)
        } else {
            None
        };
        let span = start.merge(&self.prev_span());
        Some(ProcedureDecl {
            vis,
            name,
            is_async,
            receiver,
            is_transition,
            params,
            ret,
            contract,
            body,
            span,
        })
    }

    fn prev_span(&self) -> Span {
        if self.pos == 0 {
            return self.eof.span.clone();
        }
        self.tokens
            .get(self.pos - 1)
            .map(|t| t.span.clone())
            .unwrap_or_else(|| self.eof.span.clone())
    }

    fn parse_params(&mut self, receiver_allowed: bool) -> Option<(Option<Receiver>, Vec<Param>)> {
        let mut receiver = None;
        let mut params = Vec::new();
        self.skip_newlines();
        if self.eat_punc(")") {
            return Some((receiver, params));
        }
        let mut first = true;
        loop {
            self.skip_newlines();
            if first && receiver_allowed {
                if let Some(recv) = self.try_parse_receiver() {
                    receiver = Some(recv);
                    first = false;
                    self.skip_newlines();
                    if self.eat_punc(")") {
                        break;
                    }
                    self.expect_punc(",");
                    continue;
                }
            }
            first = false;
            let mode = if self.eat_kw("move") {
                Some(ParamMode::Move)
            } else {
                None
            };
            let (name, name_span) = self.expect_ident()?;
            self.expect_punc(":");
            let ty = self.parse_type()?;
            let span = name_span.merge(&ty.span);
            params.push(Param {
                mode,
                name,
                ty,
                span,
            });
            self.skip_newlines();
            if self.eat_punc(")") {
                break;
            }
            if !self.expect_punc(",") {
                return None;
            }
        }
        Some((receiver, params))
    }

    fn try_parse_receiver(&mut self) -> Option<Receiver> {
        let start = self.here_span();
        if self.check_kw("self") {
            self.pos += 1;
            return Some(Receiver {
                perm: ReceiverPerm::Shared,
                span: start,
            });
        }
        for (kw, perm) in [("const", ReceiverPerm::Const), ("unique", ReceiverPerm::Unique)] {
            if self.check_kw(kw) {
                // Only a receiver when `self` follows; `const x: T` is not.
                if matches!(
                    self.tokens.get(self.pos + 1),
                    Some(t) if t.kind == TokenKind::Keyword && t.lexeme == "self"
                ) {
                    self.pos += 2;
                    return Some(Receiver {
                        perm,
                        span: start.merge(&self.prev_span()),
                    });
                }
            }
        }
        None
    }

    fn parse_contract(&mut self) -> Option<Contract> {
        if !self.eat_op("|=") {
            return None;
        }
        let start = self.prev_span();
        // The body's `{` must not read as a record literal after a
        // predicate ending in a path.
        let saved = self.no_struct;
        self.no_struct = true;
        let pre = if self.check_op("=>") {
            None
        } else {
            self.parse_expr().ok()
        };
        let post = if self.eat_op("=>") {
            self.parse_expr().ok()
        } else {
            None
        };
        self.no_struct = saved;
        Some(Contract {
            pre,
            post,
            span: start.merge(&self.prev_span()),
        })
    }

    fn parse_record(&mut self, vis: Visibility) -> Option<RecordDecl> {
        let start = self.here_span();
        self.eat_kw("record");
        let (name, _) = self.expect_ident()?;
        let mut implements = Vec::new();
        if let Some((first, _)) = self.eat_contextual("implements") {
            let _ = first;
            loop {
                implements.push(self.parse_path()?);
                if !self.eat_punc(",") {
                    break;
                }
            }
        }
        self.skip_newlines();
        self.expect_punc("{");
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat_punc("}") {
                break;
            }
            if self.at_end() {
                self.error_here("unterminated record body");
                return None;
            }
            let member_vis = self.parse_visibility();
            if self.check_kw("procedure") {
                methods.push(self.parse_procedure(member_vis, false, true)?);
                continue;
            }
            fields.push(self.parse_field_decl(member_vis)?);
        }
        Some(RecordDecl {
            vis,
            name,
            implements,
            fields,
            methods,
            span: start.merge(&self.prev_span()),
        })
    }

    fn eat_contextual(&mut self, word: &str) -> Option<(String, Span)> {
        match self.peek() {
            Some(t) if t.kind == TokenKind::Identifier && t.lexeme == word => {
                let out = (t.lexeme.clone(), t.span.clone());
                self.pos += 1;
                Some(out)
            }
            _ => None,
        }
    }

    fn parse_field_decl(&mut self, vis: Visibility) -> Option<FieldDecl> {
        let start = self.here_span();
        let boundary = self.eat_punc("#");
        let (name, _) = self.expect_ident()?;
        self.expect_punc(":");
        let ty = self.parse_type()?;
        let span = start.merge(&ty.span);
        Some(FieldDecl {
            vis,
            boundary,
            name,
            ty,
            span,
        })
    }

    fn parse_enum(&mut self, vis: Visibility) -> Option<EnumDecl> {
        let start = self.here_span();
        self.eat_kw("enum");
        let (name, _) = self.expect_ident()?;
        self.skip_newlines();
        self.expect_punc("{");
        let mut variants = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat_punc("}") {
                break;
            }
            let (vname, vspan) = self.expect_ident()?;
            let mut payload = Vec::new();
            if self.eat_punc("(") {
                loop {
                    self.skip_newlines();
                    payload.push(self.parse_type()?);
                    self.skip_newlines();
                    if self.eat_punc(")") {
                        break;
                    }
                    self.expect_punc(",");
                }
            }
            variants.push(EnumVariant {
                name: vname,
                payload,
                span: vspan.merge(&self.prev_span()),
            });
            self.skip_newlines();
            if !self.eat_punc(",") && !self.check_punc("}") {
                // Newline also separates variants.
            }
        }
        Some(EnumDecl {
            vis,
            name,
            variants,
            span: start.merge(&self.prev_span()),
        })
    }

    fn parse_modal(&mut self, vis: Visibility) -> Option<ModalDecl> {
        let start = self.here_span();
        self.eat_kw("modal");
        let (name, _) = self.expect_ident()?;
        self.skip_newlines();
        self.expect_punc("{");
        let mut common_fields = Vec::new();
        let mut states = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat_punc("}") {
                break;
            }
            if self.at_end() {
                self.error_here("unterminated modal body");
                return None;
            }
            if self.check_kw("state") {
                states.push(self.parse_state_block()?);
                continue;
            }
            let member_vis = self.parse_visibility();
            common_fields.push(self.parse_field_decl(member_vis)?);
        }
        Some(ModalDecl {
            vis,
            name,
            common_fields,
            states,
            span: start.merge(&self.prev_span()),
        })
    }

    fn parse_state_block(&mut self) -> Option<StateBlock> {
        let start = self.here_span();
        self.eat_kw("state");
        let (name, _) = self.expect_ident()?;
        self.skip_newlines();
        self.expect_punc("{");
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat_punc("}") {
                break;
            }
            if self.at_end() {
                self.error_here("unterminated state block");
                return None;
            }
            let member_vis = self.parse_visibility();
            if self.check_kw("procedure") || self.check_kw("transition") {
                methods.push(self.parse_procedure(member_vis, false, true)?);
                continue;
            }
            fields.push(self.parse_field_decl(member_vis)?);
        }
        Some(StateBlock {
            name,
            fields,
            methods,
            span: start.merge(&self.prev_span()),
        })
    }

    fn parse_class(&mut self, vis: Visibility) -> Option<ClassDecl> {
        let start = self.here_span();
        self.eat_kw("class");
        let capability = self.eat_punc("$");
        let (mut name, _) = self.expect_ident()?;
        if capability {
            name = format!("${name}");
        }
        self.skip_newlines();
        self.expect_punc("{");
        let mut methods = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat_punc("}") {
                break;
            }
            if self.at_end() {
                self.error_here("unterminated class body");
                return None;
            }
            let mstart = self.here_span();
            if !self.eat_kw("procedure") {
                self.error_here("expected `procedure` in class body");
                return None;
            }
            let (mname, _) = self.expect_ident()?;
            self.expect_punc("(");
            let (receiver, params) = self.parse_params(true)?;
            let receiver = receiver.unwrap_or(Receiver {
                perm: ReceiverPerm::Shared,
                span: mstart.clone(),
            });
            let ret = if self.eat_op("->") {
                Some(self.parse_type()?)
            } else {
                None
            };
            methods.push(ClassMethodDecl {
                name: mname,
                receiver,
                params,
                ret,
                span: mstart.merge(&self.prev_span()),
            });
        }
        Some(ClassDecl {
            vis,
            name,
            methods,
            span: start.merge(&self.prev_span()),
        })
    }

    fn parse_type_alias(&mut self, vis: Visibility) -> Option<TypeAliasDecl> {
        let start = self.here_span();
        self.eat_kw("type");
        let (name, _) = self.expect_ident()?;
        self.expect_op("=");
        let ty = self.parse_type()?;
        Some(TypeAliasDecl {
            vis,
            name,
            ty,
            span: start.merge(&self.prev_span()),
        })
    }

    fn parse_static(&mut self, vis: Visibility) -> Option<StaticDecl> {
        let start = self.here_span();
        self.eat_kw("static");
        let mutable = self.eat_kw("var");
        let (name, _) = self.expect_ident()?;
        self.expect_punc(":");
        let ty = self.parse_type()?;
        self.expect_op("=");
        let init = self.parse_expr().ok()?;
        Some(StaticDecl {
            vis,
            mutable,
            name,
            ty,
            init,
            span: start.merge(&self.prev_span()),
        })
    }

    fn parse_import(&mut self) -> Option<ImportDecl> {
        let start = self.here_span();
        self.eat_kw("import");
        let mut path = vec![self.expect_ident()?.0];
        let mut items = Vec::new();
        while self.eat_op("::") {
            if self.eat_punc("{") {
                loop {
                    self.skip_newlines();
                    items.push(self.expect_ident()?.0);
                    self.skip_newlines();
                    if self.eat_punc("}") {
                        break;
                    }
                    self.expect_punc(",");
                }
                break;
            }
            path.push(self.expect_ident()?.0);
        }
        let alias = if self.eat_kw("as") {
            Some(self.expect_ident()?.0)
        } else {
            None
        };
        Some(ImportDecl {
            path,
            items,
            alias,
            span: start.merge(&self.prev_span()),
        })
    }

    fn parse_using(&mut self) -> Option<UsingDecl> {
        let start = self.here_span();
        self.eat_kw("using");
        let path = self.parse_path()?;
        let alias = if self.eat_kw("as") {
            Some(self.expect_ident()?.0)
        } else {
            None
        };
        Some(UsingDecl {
            path,
            alias,
            span: start.merge(&self.prev_span()),
        })
    }

    fn parse_extern(&mut self) -> Option<ExternBlock> {
        let start = self.here_span();
        self.eat_kw("extern");
        let abi = match self.peek() {
            Some(t) if t.kind == TokenKind::StringLiteral => {
                let abi = string_lit_value(&t.lexeme);
                self.pos += 1;
                abi
            }
            _ => {
                self.error_here("expected an ABI string after `extern`");
                return None;
            }
        };
        self.skip_newlines();
        self.expect_punc("{");
        let mut procs = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat_punc("}") {
                break;
            }
            if self.at_end() {
                self.error_here("unterminated extern block");
                return None;
            }
            let pstart = self.here_span();
            if !self.eat_kw("procedure") {
                self.error_here("expected `procedure` in extern block");
                return None;
            }
            let (name, _) = self.expect_ident()?;
            self.expect_punc("(");
            let (_, params) = self.parse_params(false)?;
            let ret = if self.eat_op("->") {
                Some(self.parse_type()?)
            } else {
                None
            };
            procs.push(ExternProc {
                name,
                params,
                ret,
                span: pstart.merge(&self.prev_span()),
            });
        }
        Some(ExternBlock {
            abi,
            procs,
            span: start.merge(&self.prev_span()),
        })
    }

    fn parse_path(&mut self) -> Option<Path> {
        let mut path = Vec::new();
        if self.eat_punc("$") {
            let (name, _) = self.expect_ident()?;
            path.push(format!("${name}"));
        } else {
            path.push(self.expect_ident()?.0);
        }
        while self.check_op("::")
            && matches!(
                self.tokens.get(self.pos + 1),
                Some(t) if t.kind == TokenKind::Identifier
            )
        {
            self.pos += 1;
            path.push(self.expect_ident()?.0);
        }
        Some(path)
    }

    // -- types -------------------------------------------------------------

    fn parse_type(&mut self) -> Option<TypePtr> {
        let first = self.parse_type_no_union()?;
        if !self.check_op("|") {
            return Some(first);
        }
        let start = first.span.clone();
        let mut members = vec![first];
        while self.eat_op("|") {
            members.push(self.parse_type_no_union()?);
        }
        let span = start.merge(&self.prev_span());
        Some(Rc::new(TypeExpr {
            node: TypeNode::Union(members),
            span,
        }))
    }

    fn parse_type_no_union(&mut self) -> Option<TypePtr> {
        let start = self.here_span();
        for (kw, perm) in [
            ("const", PermName::Const),
            ("shared", PermName::Shared),
            ("unique", PermName::Unique),
        ] {
            if self.eat_kw(kw) {
                let base = self.parse_type_no_union()?;
                let span = start.merge(&base.span);
                return Some(Rc::new(TypeExpr {
                    node: TypeNode::Perm { perm, base },
                    span,
                }));
            }
        }
        if self.eat_kw("dyn") {
            let path = self.parse_path()?;
            let span = start.merge(&self.prev_span());
            return Some(Rc::new(TypeExpr {
                node: TypeNode::Dynamic { path },
                span,
            }));
        }
        if self.eat_op("!") {
            return Some(Rc::new(TypeExpr {
                node: TypeNode::Prim("!".into()),
                span: start,
            }));
        }
        if self.eat_punc("(") {
            if self.eat_punc(")") {
                return Some(Rc::new(TypeExpr {
                    node: TypeNode::Prim("()".into()),
                    span: start.merge(&self.prev_span()),
                }));
            }
            let mut elems = vec![self.parse_type()?];
            let mut tuple = false;
            while self.eat_punc(",") {
                tuple = true;
                if self.check_punc(")") {
                    break;
                }
                elems.push(self.parse_type()?);
            }
            self.expect_punc(")");
            let span = start.merge(&self.prev_span());
            if tuple {
                return Some(Rc::new(TypeExpr {
                    node: TypeNode::Tuple(elems),
                    span,
                }));
            }
            return Some(elems.into_iter().next().unwrap());
        }
        if self.eat_punc("[") {
            let elem = self.parse_type()?;
            if self.eat_punc(";") {
                let len = match self.peek() {
                    Some(t) if t.kind == TokenKind::IntLiteral => {
                        let len = parse_int_lexeme(&t.lexeme).unwrap_or(0) as u64;
                        self.pos += 1;
                        len
                    }
                    _ => {
                        self.error_here("expected an array length");
                        0
                    }
                };
                self.expect_punc("]");
                let span = start.merge(&self.prev_span());
                return Some(Rc::new(TypeExpr {
                    node: TypeNode::Array { elem, len },
                    span,
                }));
            }
            self.expect_punc("]");
            let span = start.merge(&self.prev_span());
            return Some(Rc::new(TypeExpr {
                node: TypeNode::Slice { elem },
                span,
            }));
        }
        if self.eat_punc("$") {
            let (name, _) = self.expect_ident()?;
            let span = start.merge(&self.prev_span());
            return Some(Rc::new(TypeExpr {
                node: TypeNode::PathTy {
                    path: vec![format!("${name}")],
                    args: Vec::new(),
                },
                span,
            }));
        }

        let (head, _) = self.expect_ident()?;
        match head.as_str() {
            "rawptr" => {
                self.expect_punc("[");
                let qual = if self.eat_contextual("imm").is_some() {
                    RawPtrQual::Imm
                } else if self.eat_contextual("mut").is_some() {
                    RawPtrQual::Mut
                } else {
                    self.error_here("expected `imm` or `mut`");
                    RawPtrQual::Imm
                };
                self.expect_punc(",");
                let elem = self.parse_type()?;
                self.expect_punc("]");
                let span = start.merge(&self.prev_span());
                return Some(Rc::new(TypeExpr {
                    node: TypeNode::RawPtr { qual, elem },
                    span,
                }));
            }
            "Ptr" => {
                self.expect_op("<");
                let elem = self.parse_type()?;
                self.expect_op(">");
                let state = self.parse_ptr_state();
                let span = start.merge(&self.prev_span());
                return Some(Rc::new(TypeExpr {
                    node: TypeNode::Ptr { elem, state },
                    span,
                }));
            }
            "String" | "Bytes" => {
                let state = self.parse_str_state();
                let span = start.merge(&self.prev_span());
                let node = if head == "String" {
                    TypeNode::StringTy(state)
                } else {
                    TypeNode::BytesTy(state)
                };
                return Some(Rc::new(TypeExpr { node, span }));
            }
            "Range" => {
                return Some(Rc::new(TypeExpr {
                    node: TypeNode::Range,
                    span: start,
                }));
            }
            "proc" => {
                self.expect_punc("(");
                let mut params = Vec::new();
                if !self.eat_punc(")") {
                    loop {
                        params.push(self.parse_type()?);
                        if self.eat_punc(")") {
                            break;
                        }
                        self.expect_punc(",");
                    }
                }
                self.expect_op("->");
                let ret = self.parse_type()?;
                let span = start.merge(&self.prev_span());
                return Some(Rc::new(TypeExpr {
                    node: TypeNode::Func { params, ret },
                    span,
                }));
            }
            _ => {}
        }

        if is_prim_name(&head) {
            return Some(Rc::new(TypeExpr {
                node: TypeNode::Prim(head),
                span: start,
            }));
        }

        let mut path = vec![head];
        while self.check_op("::")
            && matches!(
                self.tokens.get(self.pos + 1),
                Some(t) if t.kind == TokenKind::Identifier
            )
        {
            self.pos += 1;
            path.push(self.expect_ident()?.0);
        }
        let mut args = Vec::new();
        if self.check_op("<") {
            self.pos += 1;
            loop {
                args.push(self.parse_type()?);
                if self.eat_op(">") {
                    break;
                }
                self.expect_punc(",");
            }
        }
        if self.eat_punc("@") {
            let (state, _) = self.expect_ident()?;
            let span = start.merge(&self.prev_span());
            return Some(Rc::new(TypeExpr {
                node: TypeNode::ModalState { path, state },
                span,
            }));
        }
        let span = start.merge(&self.prev_span());
        Some(Rc::new(TypeExpr {
            node: TypeNode::PathTy { path, args },
            span,
        }))
    }

    fn parse_ptr_state(&mut self) -> Option<PtrStateName> {
        if !self.eat_punc("@") {
            return None;
        }
        let (name, span) = self.expect_ident()?;
        match name.as_str() {
            "Valid" => Some(PtrStateName::Valid),
            "Null" => Some(PtrStateName::Null),
            "Expired" => Some(PtrStateName::Expired),
            _ => {
                self.diags.emit(Diagnostic::from_code(
                    "E-SRC-0401",
                    Some(span),
                    Some("expected Valid, Null, or Expired"),
                ));
                None
            }
        }
    }

    fn parse_str_state(&mut self) -> Option<StrState> {
        if !self.eat_punc("@") {
            return None;
        }
        let (name, span) = self.expect_ident()?;
        match name.as_str() {
            "View" => Some(StrState::View),
            "Managed" => Some(StrState::Managed),
            _ => {
                self.diags.emit(Diagnostic::from_code(
                    "E-SRC-0401",
                    Some(span),
                    Some("expected View or Managed"),
                ));
                None
            }
        }
    }

    // -- blocks and statements ----------------------------------------------

    fn parse_block(&mut self) -> Option<Block> {
        let start = self.here_span();
        self.expect_punc("{");
        let mut stmts = Vec::new();
        let mut tail = None;
        loop {
            self.skip_newlines();
            while self.eat_punc(";") {
                self.skip_newlines();
            }
            if self.eat_punc("}") {
                break;
            }
            if self.at_end() {
                self.error_here("unterminated block");
                return None;
            }
            match self.parse_stmt() {
                Some(Stmt::Expr(expr)) => {
                    self.skip_newlines();
                    if self.check_punc("}") {
                        tail = Some(expr);
                    } else {
                        stmts.push(Stmt::Expr(expr));
                    }
                }
                Some(stmt) => stmts.push(stmt),
                None => {
                    // Skip to the next statement boundary.
                    while let Some(tok) = self.peek() {
                        if tok.kind == TokenKind::Newline
                            || (tok.kind == TokenKind::Punctuator
                                && (tok.lexeme == ";" || tok.lexeme == "}"))
                        {
                            break;
                        }
                        self.pos += 1;
                    }
                }
            }
        }
        Some(Block {
            stmts,
            tail,
            span: start.merge(&self.prev_span()),
        })
    }

    fn parse_stmt(&mut self) -> Option<Stmt> {
        let start = self.here_span();
        if self.check_kw("let") || self.check_kw("var") {
            let mutable = self.check_kw("var");
            self.pos += 1;
            let (name, _) = self.expect_ident()?;
            let ty = if self.eat_punc(":") {
                Some(self.parse_type()?)
            } else {
                None
            };
            self.expect_op("=");
            let init = self.parse_expr().ok()?;
            return Some(Stmt::Let {
                mutable,
                name,
                ty,
                init,
                span: start.merge(&self.prev_span()),
            });
        }
        if self.eat_kw("return") {
            let value = if self.stmt_boundary() {
                None
            } else {
                self.parse_expr().ok()
            };
            return Some(Stmt::Return {
                value,
                span: start.merge(&self.prev_span()),
            });
        }
        if self.eat_kw("break") {
            return Some(Stmt::Break(start));
        }
        if self.eat_kw("continue") {
            return Some(Stmt::Continue(start));
        }
        if self.eat_kw("while") {
            let cond = self.parse_cond_expr()?;
            let body = self.parse_block()?;
            return Some(Stmt::While {
                cond,
                body,
                span: start.merge(&self.prev_span()),
            });
        }
        if self.eat_kw("loop") {
            let body = self.parse_block()?;
            return Some(Stmt::Loop {
                body,
                span: start.merge(&self.prev_span()),
            });
        }
        if self.eat_kw("for") {
            let (binding, _) = self.expect_ident()?;
            if !self.eat_kw("in") {
                self.error_here("expected `in`");
                return None;
            }
            let iter = self.parse_cond_expr()?;
            let body = self.parse_block()?;
            return Some(Stmt::For {
                binding,
                iter,
                body,
                span: start.merge(&self.prev_span()),
            });
        }
        if self.eat_kw("region") {
            let (name, _) = self.expect_ident()?;
            self.skip_newlines();
            let body = self.parse_block()?;
            return Some(Stmt::Region {
                name,
                body,
                span: start.merge(&self.prev_span()),
            });
        }
        if self.eat_kw("unsafe") {
            self.skip_newlines();
            let body = self.parse_block()?;
            return Some(Stmt::Unsafe {
                body,
                span: start.merge(&self.prev_span()),
            });
        }
        if self.check_punc("#") {
            return self.parse_key_block(start);
        }
        if self.eat_kw("parallel") {
            self.skip_newlines();
            self.expect_punc("{");
            let mut arms = Vec::new();
            loop {
                self.skip_newlines();
                if self.eat_punc("}") {
                    break;
                }
                arms.push(self.parse_block()?);
                self.skip_newlines();
                let _ = self.eat_punc(",");
            }
            return Some(Stmt::Parallel {
                arms,
                span: start.merge(&self.prev_span()),
            });
        }

        let expr = self.parse_expr().ok()?;
        if self.eat_op("=") {
            let value = self.parse_expr().ok()?;
            return Some(Stmt::Assign {
                place: expr,
                value,
                span: start.merge(&self.prev_span()),
            });
        }
        Some(Stmt::Expr(expr))
    }

    fn stmt_boundary(&self) -> bool {
        matches!(
            self.peek(),
            None | Some(Token {
                kind: TokenKind::Newline,
                ..
            })
        ) || self.check_punc(";")
            || self.check_punc("}")
    }

    fn parse_key_block(&mut self, start: Span) -> Option<Stmt> {
        self.expect_punc("#");
        self.expect_punc("(");
        let mut keys = Vec::new();
        loop {
            self.skip_newlines();
            let mode = if self.eat_contextual("read").is_some() {
                KeyMode::Read
            } else if self.eat_contextual("write").is_some() {
                KeyMode::Write
            } else {
                self.error_here("expected `read` or `write`");
                return None;
            };
            let key = self.parse_key_path()?;
            keys.push((key, mode));
            self.skip_newlines();
            if self.eat_punc(")") {
                break;
            }
            self.expect_punc(",");
        }
        self.skip_newlines();
        let body = self.parse_block()?;
        Some(Stmt::KeyBlock {
            keys,
            body,
            span: start.merge(&self.prev_span()),
        })
    }

    fn parse_key_path(&mut self) -> Option<KeyPathExpr> {
        let start = self.here_span();
        let (root, _) = self.expect_ident()?;
        let mut segs = Vec::new();
        loop {
            if self.eat_op(".") {
                let boundary = self.eat_punc("#");
                let (name, _) = self.expect_ident()?;
                segs.push(KeySeg::Field { name, boundary });
            } else if self.check_punc("[") {
                self.pos += 1;
                let boundary = self.eat_punc("#");
                let index = self.parse_expr().ok()?;
                self.expect_punc("]");
                segs.push(KeySeg::Index { index, boundary });
            } else {
                break;
            }
        }
        Some(KeyPathExpr {
            root,
            segs,
            span: start.merge(&self.prev_span()),
        })
    }

    // -- expressions ---------------------------------------------------------

    fn parse_cond_expr(&mut self) -> Option<ExprPtr> {
        let saved = self.no_struct;
        self.no_struct = true;
        let out = self.parse_expr().ok();
        self.no_struct = saved;
        out
    }

    fn parse_expr(&mut self) -> Result<ExprPtr, ()> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<ExprPtr, ()> {
        let mut lhs = self.parse_and()?;
        while self.check_op("||") {
            self.pos += 1;
            self.skip_newlines();
            let rhs = self.parse_and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<ExprPtr, ()> {
        let mut lhs = self.parse_equality()?;
        while self.check_op("&&") {
            self.pos += 1;
            self.skip_newlines();
            let rhs = self.parse_equality()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<ExprPtr, ()> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = if self.check_op("==") {
                BinaryOp::Eq
            } else if self.check_op("!=") {
                BinaryOp::Ne
            } else {
                break;
            };
            self.pos += 1;
            self.skip_newlines();
            let rhs = self.parse_relational()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<ExprPtr, ()> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = if self.check_op("<=") {
                BinaryOp::Le
            } else if self.check_op(">=") {
                BinaryOp::Ge
            } else if self.check_op("<") {
                BinaryOp::Lt
            } else if self.check_op(">") {
                BinaryOp::Gt
            } else {
                break;
            };
            self.pos += 1;
            self.skip_newlines();
            let rhs = self.parse_additive()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<ExprPtr, ()> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = if self.check_op("+") {
                BinaryOp::Add
            } else if self.check_op("-") {
                BinaryOp::Sub
            } else {
                break;
            };
            self.pos += 1;
            self.skip_newlines();
            let rhs = self.parse_multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<ExprPtr, ()> {
        let mut lhs = self.parse_cast()?;
        loop {
            let op = if self.check_op("*") {
                BinaryOp::Mul
            } else if self.check_op("/") {
                BinaryOp::Div
            } else if self.check_op("%") {
                BinaryOp::Rem
            } else {
                break;
            };
            self.pos += 1;
            self.skip_newlines();
            let rhs = self.parse_cast()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_cast(&mut self) -> Result<ExprPtr, ()> {
        let mut expr = self.parse_unary()?;
        while self.eat_kw("as") {
            let ty = self.parse_type().ok_or(())?;
            let span = expr.span.merge(&self.prev_span());
            expr = Rc::new(Expr {
                node: ExprNode::Cast { expr, ty },
                span,
            });
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<ExprPtr, ()> {
        let start = self.here_span();
        if self.eat_op("-") {
            let operand = self.parse_unary()?;
            let span = start.merge(&operand.span);
            return Ok(Rc::new(Expr {
                node: ExprNode::Unary {
                    op: UnaryOp::Neg,
                    operand,
                },
                span,
            }));
        }
        if self.eat_op("!") {
            let operand = self.parse_unary()?;
            let span = start.merge(&operand.span);
            return Ok(Rc::new(Expr {
                node: ExprNode::Unary {
                    op: UnaryOp::Not,
                    operand,
                },
                span,
            }));
        }
        if self.eat_op("*") {
            let operand = self.parse_unary()?;
            let span = start.merge(&operand.span);
            return Ok(Rc::new(Expr {
                node: ExprNode::Deref(operand),
                span,
            }));
        }
        if self.eat_op("&") {
            let operand = self.parse_unary()?;
            let span = start.merge(&operand.span);
            return Ok(Rc::new(Expr {
                node: ExprNode::AddressOf(operand),
                span,
            }));
        }
        if self.eat_kw("move") {
            let operand = self.parse_unary()?;
            let span = start.merge(&operand.span);
            return Ok(Rc::new(Expr {
                node: ExprNode::Move(operand),
                span,
            }));
        }
        if self.eat_op("^") {
            // `^r<-e` selects a named region; plain `^e` uses the single
            // active one.
            if let Some(Token {
                kind: TokenKind::Identifier,
                ..
            }) = self.peek()
            {
                if matches!(
                    self.tokens.get(self.pos + 1),
                    Some(t) if t.kind == TokenKind::Operator && t.lexeme == "<-"
                ) {
                    let (region, _) = self.expect_ident().ok_or(())?;
                    self.pos += 1; // `<-`
                    let value = self.parse_unary()?;
                    let span = start.merge(&value.span);
                    return Ok(Rc::new(Expr {
                        node: ExprNode::Alloc {
                            region: Some(region),
                            value,
                        },
                        span,
                    }));
                }
            }
            let value = self.parse_unary()?;
            let span = start.merge(&value.span);
            return Ok(Rc::new(Expr {
                node: ExprNode::Alloc {
                    region: None,
                    value,
                },
                span,
            }));
        }
        if self.eat_kw("wait") {
            let operand = self.parse_unary()?;
            let span = start.merge(&operand.span);
            return Ok(Rc::new(Expr {
                node: ExprNode::Wait(operand),
                span,
            }));
        }
        if self.eat_kw("sync") {
            let operand = self.parse_unary()?;
            let span = start.merge(&operand.span);
            return Ok(Rc::new(Expr {
                node: ExprNode::Sync(operand),
                span,
            }));
        }
        if self.eat_kw("yield") {
            if self.eat_kw("from") {
                let operand = self.parse_expr()?;
                let span = start.merge(&operand.span);
                return Ok(Rc::new(Expr {
                    node: ExprNode::YieldFrom(operand),
                    span,
                }));
            }
            let release = self.eat_kw("release");
            let value = if self.stmt_boundary() {
                None
            } else {
                Some(self.parse_expr()?)
            };
            let span = start.merge(&self.prev_span());
            return Ok(Rc::new(Expr {
                node: ExprNode::Yield { value, release },
                span,
            }));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<ExprPtr, ()> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_op(".") {
                let (name, _) = self.expect_ident().ok_or(())?;
                if self.eat_punc("(") {
                    let args = self.parse_args()?;
                    let span = expr.span.merge(&self.prev_span());
                    expr = Rc::new(Expr {
                        node: ExprNode::MethodCall {
                            receiver: expr,
                            name,
                            args,
                        },
                        span,
                    });
                } else {
                    let span = expr.span.merge(&self.prev_span());
                    expr = Rc::new(Expr {
                        node: ExprNode::Field { base: expr, name },
                        span,
                    });
                }
                continue;
            }
            if self.check_punc("[") {
                self.pos += 1;
                let index = self.parse_expr()?;
                self.expect_punc("]");
                let span = expr.span.merge(&self.prev_span());
                expr = Rc::new(Expr {
                    node: ExprNode::Index { base: expr, index },
                    span,
                });
                continue;
            }
            if self.check_punc("(") {
                self.pos += 1;
                let args = self.parse_args()?;
                let span = expr.span.merge(&self.prev_span());
                expr = Rc::new(Expr {
                    node: ExprNode::Call { callee: expr, args },
                    span,
                });
                continue;
            }
            if self.eat_op("?") {
                let span = expr.span.merge(&self.prev_span());
                expr = Rc::new(Expr {
                    node: ExprNode::Propagate(expr),
                    span,
                });
                continue;
            }
            break;
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> Result<Vec<ExprPtr>, ()> {
        let mut args = Vec::new();
        self.skip_newlines();
        if self.eat_punc(")") {
            return Ok(args);
        }
        loop {
            self.skip_newlines();
            args.push(self.parse_expr()?);
            self.skip_newlines();
            if self.eat_punc(")") {
                break;
            }
            if !self.expect_punc(",") {
                return Err(());
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<ExprPtr, ()> {
        let start = self.here_span();
        let tok = match self.peek() {
            Some(tok) => tok.clone(),
            None => {
                self.error_here("expected an expression");
                return Err(());
            }
        };
        match tok.kind {
            TokenKind::IntLiteral => {
                self.pos += 1;
                let value = parse_int_lexeme(&tok.lexeme).ok_or_else(|| {
                    self.diags.emit(Diagnostic::from_code(
                        "E-SRC-0304",
                        Some(tok.span.clone()),
                        Some(&tok.lexeme),
                    ));
                })?;
                Ok(Rc::new(Expr {
                    node: ExprNode::IntLit(value),
                    span: start,
                }))
            }
            TokenKind::FloatLiteral => {
                self.pos += 1;
                let value = tok.lexeme.replace('_', "").parse::<f64>().unwrap_or(0.0);
                Ok(Rc::new(Expr {
                    node: ExprNode::FloatLit(value),
                    span: start,
                }))
            }
            TokenKind::BoolLiteral => {
                self.pos += 1;
                Ok(Rc::new(Expr {
                    node: ExprNode::BoolLit(tok.lexeme == "true"),
                    span: start,
                }))
            }
            TokenKind::NullLiteral => {
                self.pos += 1;
                Ok(Rc::new(Expr {
                    node: ExprNode::NullLit,
                    span: start,
                }))
            }
            TokenKind::CharLiteral => {
                self.pos += 1;
                let value = char_lit_value(&tok.lexeme);
                Ok(Rc::new(Expr {
                    node: ExprNode::CharLit(value),
                    span: start,
                }))
            }
            TokenKind::StringLiteral => {
                self.pos += 1;
                Ok(Rc::new(Expr {
                    node: ExprNode::StringLit(string_lit_value(&tok.lexeme)),
                    span: start,
                }))
            }
            TokenKind::Identifier => self.parse_path_like(start),
            TokenKind::Keyword => self.parse_keyword_expr(start, &tok.lexeme),
            TokenKind::Punctuator => match tok.lexeme.as_str() {
                "(" => {
                    self.pos += 1;
                    if self.eat_punc(")") {
                        return Ok(Rc::new(Expr {
                            node: ExprNode::Unit,
                            span: start.merge(&self.prev_span()),
                        }));
                    }
                    let inner = self.parse_expr()?;
                    self.expect_punc(")");
                    Ok(inner)
                }
                "[" => self.parse_range_literal(start),
                "{" => {
                    let block = self.parse_block().ok_or(())?;
                    let span = block.span.clone();
                    Ok(Rc::new(Expr {
                        node: ExprNode::Block(block),
                        span,
                    }))
                }
                "@" => {
                    self.pos += 1;
                    let (name, _) = self.expect_ident().ok_or(())?;
                    match name.as_str() {
                        "result" => Ok(Rc::new(Expr {
                            node: ExprNode::ContractResult,
                            span: start.merge(&self.prev_span()),
                        })),
                        "entry" => {
                            self.expect_punc("(");
                            let inner = self.parse_expr()?;
                            self.expect_punc(")");
                            Ok(Rc::new(Expr {
                                node: ExprNode::ContractEntry(inner),
                                span: start.merge(&self.prev_span()),
                            }))
                        }
                        _ => {
                            self.error_here("expected `@result` or `@entry`");
                            Err(())
                        }
                    }
                }
                _ => {
                    self.error_here("expected an expression");
                    Err(())
                }
            },
            _ => {
                self.error_here("expected an expression");
                Err(())
            }
        }
    }

    fn parse_keyword_expr(&mut self, start: Span, kw: &str) -> Result<ExprPtr, ()> {
        match kw {
            "if" => {
                self.pos += 1;
                let cond = self.parse_cond_expr().ok_or(())?;
                self.skip_newlines();
                let then_block = self.parse_block().ok_or(())?;
                let else_block = if self.peek_is_else() {
                    self.skip_newlines();
                    self.eat_kw("else");
                    self.skip_newlines();
                    if self.check_kw("if") {
                        let nested_start = self.here_span();
                        let nested = self.parse_keyword_expr(nested_start.clone(), "if")?;
                        Some(Block {
                            stmts: Vec::new(),
                            tail: Some(nested),
                            span: nested_start.merge(&self.prev_span()),
                        })
                    } else {
                        Some(self.parse_block().ok_or(())?)
                    }
                } else {
                    None
                };
                Ok(Rc::new(Expr {
                    node: ExprNode::If {
                        cond,
                        then_block,
                        else_block,
                    },
                    span: start.merge(&self.prev_span()),
                }))
            }
            "match" => {
                self.pos += 1;
                let scrutinee = self.parse_cond_expr().ok_or(())?;
                self.skip_newlines();
                self.expect_punc("{");
                let mut arms = Vec::new();
                loop {
                    self.skip_newlines();
                    if self.eat_punc("}") {
                        break;
                    }
                    let arm_start = self.here_span();
                    let pattern = self.parse_pattern()?;
                    self.expect_op("=>");
                    self.skip_newlines();
                    let body = self.parse_expr()?;
                    arms.push(MatchArm {
                        pattern,
                        body,
                        span: arm_start.merge(&self.prev_span()),
                    });
                    self.skip_newlines();
                    let _ = self.eat_punc(",");
                }
                Ok(Rc::new(Expr {
                    node: ExprNode::Match { scrutinee, arms },
                    span: start.merge(&self.prev_span()),
                }))
            }
            "spawn" => {
                self.pos += 1;
                self.skip_newlines();
                let body = self.parse_block().ok_or(())?;
                Ok(Rc::new(Expr {
                    node: ExprNode::Spawn(body),
                    span: start.merge(&self.prev_span()),
                }))
            }
            "race" => {
                self.pos += 1;
                self.skip_newlines();
                self.expect_punc("{");
                let mut arms = Vec::new();
                loop {
                    self.skip_newlines();
                    if self.eat_punc("}") {
                        break;
                    }
                    let arm_start = self.here_span();
                    let operand = self.parse_expr()?;
                    self.expect_op("->");
                    self.expect_op("|");
                    let (binder, _) = self.expect_ident().ok_or(())?;
                    self.expect_op("|");
                    let kind = if self.eat_kw("yield") {
                        RaceHandlerKind::Yield
                    } else {
                        RaceHandlerKind::Return
                    };
                    let handler = self.parse_expr()?;
                    arms.push(RaceArm {
                        operand,
                        binder,
                        handler,
                        kind,
                        span: arm_start.merge(&self.prev_span()),
                    });
                    self.skip_newlines();
                    let _ = self.eat_punc(",");
                }
                Ok(Rc::new(Expr {
                    node: ExprNode::Race { arms },
                    span: start.merge(&self.prev_span()),
                }))
            }
            "all" => {
                self.pos += 1;
                self.skip_newlines();
                self.expect_punc("{");
                let mut operands = Vec::new();
                loop {
                    self.skip_newlines();
                    if self.eat_punc("}") {
                        break;
                    }
                    operands.push(self.parse_expr()?);
                    self.skip_newlines();
                    let _ = self.eat_punc(",");
                }
                Ok(Rc::new(Expr {
                    node: ExprNode::All { operands },
                    span: start.merge(&self.prev_span()),
                }))
            }
            "transmute" => {
                self.pos += 1;
                self.expect_op("<");
                let ty = self.parse_type().ok_or(())?;
                self.expect_op(">");
                self.expect_punc("(");
                let expr = self.parse_expr()?;
                self.expect_punc(")");
                Ok(Rc::new(Expr {
                    node: ExprNode::Transmute { expr, ty },
                    span: start.merge(&self.prev_span()),
                }))
            }
            "self" => {
                self.pos += 1;
                Ok(Rc::new(Expr {
                    node: ExprNode::Identifier("self".into()),
                    span: start,
                }))
            }
            _ => {
                self.error_here("expected an expression");
                Err(())
            }
        }
    }

    fn peek_is_else(&self) -> bool {
        matches!(
            self.peek_skipping_newlines(),
            Some(t) if t.kind == TokenKind::Keyword && t.lexeme == "else"
        )
    }

    fn parse_path_like(&mut self, start: Span) -> Result<ExprPtr, ()> {
        let mut path = vec![self.expect_ident().ok_or(())?.0];
        while self.check_op("::")
            && matches!(
                self.tokens.get(self.pos + 1),
                Some(t) if t.kind == TokenKind::Identifier
            )
        {
            self.pos += 1;
            path.push(self.expect_ident().ok_or(())?.0);
        }

        if !self.no_struct && self.check_punc("{") {
            self.pos += 1;
            let mut fields = Vec::new();
            loop {
                self.skip_newlines();
                if self.eat_punc("}") {
                    break;
                }
                let fstart = self.here_span();
                let (name, _) = self.expect_ident().ok_or(())?;
                self.expect_punc(":");
                let moved = self.eat_kw("move");
                let value = self.parse_expr()?;
                fields.push(FieldInit {
                    name,
                    value,
                    moved,
                    span: fstart.merge(&self.prev_span()),
                });
                self.skip_newlines();
                let _ = self.eat_punc(",");
            }
            return Ok(Rc::new(Expr {
                node: ExprNode::RecordLit { path, fields },
                span: start.merge(&self.prev_span()),
            }));
        }

        let node = if path.len() == 1 {
            ExprNode::Identifier(path.pop().unwrap())
        } else {
            ExprNode::Path(path)
        };
        Ok(Rc::new(Expr {
            node,
            span: start.merge(&self.prev_span()),
        }))
    }

    fn parse_range_literal(&mut self, start: Span) -> Result<ExprPtr, ()> {
        self.expect_punc("[");
        let range_start = if self.check_op("..") || self.check_op("..=") {
            None
        } else {
            Some(self.parse_expr()?)
        };
        let inclusive = if self.eat_op("..=") {
            true
        } else if self.eat_op("..") {
            false
        } else {
            self.error_here("expected `..` or `..=`");
            return Err(());
        };
        let range_end = if self.check_punc("]") {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect_punc("]");
        Ok(Rc::new(Expr {
            node: ExprNode::Range {
                start: range_start,
                end: range_end,
                inclusive,
            },
            span: start.merge(&self.prev_span()),
        }))
    }

    // -- patterns -------------------------------------------------------------

    fn parse_pattern(&mut self) -> Result<Pattern, ()> {
        let start = self.here_span();
        let tok = match self.peek() {
            Some(tok) => tok.clone(),
            None => {
                self.error_here("expected a pattern");
                return Err(());
            }
        };
        match tok.kind {
            TokenKind::Identifier if tok.lexeme == "_" => {
                self.pos += 1;
                Ok(Pattern {
                    node: PatternNode::Wildcard,
                    span: start,
                })
            }
            TokenKind::IntLiteral => {
                self.pos += 1;
                let value = parse_int_lexeme(&tok.lexeme).unwrap_or(0);
                if self.check_op("..") || self.check_op("..=") {
                    let inclusive = self.eat_op("..=") || !self.eat_op("..");
                    let end = match self.peek() {
                        Some(t) if t.kind == TokenKind::IntLiteral => {
                            let end = parse_int_lexeme(&t.lexeme);
                            self.pos += 1;
                            end
                        }
                        _ => None,
                    };
                    return Ok(Pattern {
                        node: PatternNode::Range {
                            start: Some(value),
                            end,
                            inclusive,
                        },
                        span: start.merge(&self.prev_span()),
                    });
                }
                Ok(Pattern {
                    node: PatternNode::IntLit(value),
                    span: start,
                })
            }
            TokenKind::BoolLiteral => {
                self.pos += 1;
                Ok(Pattern {
                    node: PatternNode::BoolLit(tok.lexeme == "true"),
                    span: start,
                })
            }
            TokenKind::CharLiteral => {
                self.pos += 1;
                Ok(Pattern {
                    node: PatternNode::CharLit(char_lit_value(&tok.lexeme)),
                    span: start,
                })
            }
            TokenKind::Punctuator if tok.lexeme == "(" => {
                self.pos += 1;
                let mut elems = Vec::new();
                loop {
                    self.skip_newlines();
                    if self.eat_punc(")") {
                        break;
                    }
                    elems.push(self.parse_pattern()?);
                    self.skip_newlines();
                    let _ = self.eat_punc(",");
                }
                Ok(Pattern {
                    node: PatternNode::Tuple(elems),
                    span: start.merge(&self.prev_span()),
                })
            }
            TokenKind::Identifier => {
                let mut path = vec![self.expect_ident().ok_or(())?.0];
                while self.check_op("::")
                    && matches!(
                        self.tokens.get(self.pos + 1),
                        Some(t) if t.kind == TokenKind::Identifier
                    )
                {
                    self.pos += 1;
                    path.push(self.expect_ident().ok_or(())?.0);
                }
                if self.eat_punc("@") {
                    let (state, _) = self.expect_ident().ok_or(())?;
                    let mut bindings = Vec::new();
                    if self.eat_punc("{") {
                        loop {
                            self.skip_newlines();
                            if self.eat_punc("}") {
                                break;
                            }
                            bindings.push(self.expect_ident().ok_or(())?.0);
                            self.skip_newlines();
                            let _ = self.eat_punc(",");
                        }
                    }
                    return Ok(Pattern {
                        node: PatternNode::ModalState {
                            path,
                            state,
                            bindings,
                        },
                        span: start.merge(&self.prev_span()),
                    });
                }
                if path.len() >= 2 {
                    let variant = path.pop().unwrap();
                    let mut payload = Vec::new();
                    if self.eat_punc("(") {
                        loop {
                            self.skip_newlines();
                            if self.eat_punc(")") {
                                break;
                            }
                            payload.push(self.parse_pattern()?);
                            self.skip_newlines();
                            let _ = self.eat_punc(",");
                        }
                    }
                    return Ok(Pattern {
                        node: PatternNode::EnumVariant {
                            path,
                            variant,
                            payload,
                        },
                        span: start.merge(&self.prev_span()),
                    });
                }
                Ok(Pattern {
                    node: PatternNode::Binding(path.pop().unwrap()),
                    span: start.merge(&self.prev_span()),
                })
            }
            _ => {
                self.error_here("expected a pattern");
                Err(())
            }
        }
    }
}

fn binary(op: BinaryOp, lhs: ExprPtr, rhs: ExprPtr) -> ExprPtr {
    let span = lhs.span.merge(&rhs.span);
    Rc::new(Expr {
        node: ExprNode::Binary { op, lhs, rhs },
        span,
    })
}

/// Decode an integer lexeme (decimal, hex, binary, `_` separators).
pub fn parse_int_lexeme(lexeme: &str) -> Option<i128> {
    let clean = lexeme.replace('_', "");
    if let Some(hex) = clean.strip_prefix("0x").or_else(|| clean.strip_prefix("0X")) {
        return i128::from_str_radix(hex, 16).ok();
    }
    if let Some(bin) = clean.strip_prefix("0b").or_else(|| clean.strip_prefix("0B")) {
        return i128::from_str_radix(bin, 2).ok();
    }
    clean.parse::<i128>().ok()
}

fn string_lit_value(lexeme: &str) -> String {
    let inner = lexeme
        .strip_prefix('"')
        .map(|s| s.strip_suffix('"').unwrap_or(s))
        .unwrap_or(lexeme);
    unescape(inner)
}

fn char_lit_value(lexeme: &str) -> char {
    let inner = lexeme
        .strip_prefix('\'')
        .map(|s| s.strip_suffix('\'').unwrap_or(s))
        .unwrap_or(lexeme);
    unescape(inner).chars().next().unwrap_or('\0')
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('x') => {
                let hi = chars.next().and_then(|c| c.to_digit(16));
                let lo = chars.next().and_then(|c| c.to_digit(16));
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    out.push((hi * 16 + lo) as u8 as char);
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

pub fn is_prim_name(name: &str) -> bool {
    matches!(
        name,
        "bool"
            | "char"
            | "i8"
            | "i16"
            | "i32"
            | "i64"
            | "u8"
            | "u16"
            | "u32"
            | "u64"
            | "usize"
            | "f32"
            | "f64"
    )
}
