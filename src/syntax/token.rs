// SPDX-License-Identifier: PMPL-1.0-or-later

//! Tokens and the keyword policy.
//!
//! EOF is not a [`TokenKind`]; the parser uses a separate sentinel so no
//! grammar rule can accidentally match it.

use crate::source::{span_of, SourceFile, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Identifier,
    Keyword,
    IntLiteral,
    FloatLiteral,
    StringLiteral,
    CharLiteral,
    BoolLiteral,
    NullLiteral,
    Operator,
    Punctuator,
    Newline,
    Unknown,
}

/// A token before span attachment: kind, UTF-8 lexeme, byte range.
#[derive(Debug, Clone)]
pub struct RawToken {
    pub kind: TokenKind,
    pub lexeme: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct EofToken {
    pub span: Span,
}

const KEYWORDS: &[&str] = &[
    "all", "as", "async", "break", "class", "comptime", "const", "continue", "dyn", "else",
    "enum", "extern", "for", "from", "if", "import", "in", "internal", "let", "loop", "match",
    "modal", "move", "parallel", "procedure", "pub", "race", "record", "region", "release",
    "return", "self", "shared", "spawn", "state", "static", "sync", "transition", "transmute",
    "type", "unique", "unsafe", "using", "var", "wait", "while", "yield",
];

/// Identifiers with special meaning only in context (not reserved).
const CTX_KEYWORDS: &[&str] = &["read", "write", "executable", "library"];

pub fn is_keyword(text: &str) -> bool {
    KEYWORDS.binary_search(&text).is_ok()
}

pub fn is_ctx_keyword(text: &str) -> bool {
    CTX_KEYWORDS.contains(&text)
}

pub fn is_ident_tok(tok: &Token) -> bool {
    tok.kind == TokenKind::Identifier
}

pub fn is_kw_tok(tok: &Token, text: &str) -> bool {
    tok.kind == TokenKind::Keyword && tok.lexeme == text
}

pub fn is_op_tok(tok: &Token, text: &str) -> bool {
    tok.kind == TokenKind::Operator && tok.lexeme == text
}

pub fn is_punc_tok(tok: &Token, text: &str) -> bool {
    tok.kind == TokenKind::Punctuator && tok.lexeme == text
}

/// True when the token stream contains no `Unknown` token.
pub fn no_unknown_ok(tokens: &[Token]) -> bool {
    tokens.iter().all(|t| t.kind != TokenKind::Unknown)
}

pub fn attach_span(source: &SourceFile, raw: &RawToken) -> Token {
    Token {
        kind: raw.kind,
        lexeme: raw.lexeme.clone(),
        span: span_of(source, raw.start_offset, raw.end_offset),
    }
}

pub fn attach_spans(source: &SourceFile, raws: &[RawToken]) -> Vec<Token> {
    raws.iter().map(|raw| attach_span(source, raw)).collect()
}

pub fn make_eof_token(source: &SourceFile) -> EofToken {
    EofToken {
        span: span_of(source, source.byte_len, source.byte_len),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_table_is_sorted() {
        let mut sorted = KEYWORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, KEYWORDS);
    }

    #[test]
    fn context_keywords_are_not_reserved() {
        for kw in CTX_KEYWORDS {
            assert!(!is_keyword(kw), "{kw} must stay contextual");
        }
    }
}
