// SPDX-License-Identifier: PMPL-1.0-or-later

//! The lexer.
//!
//! A small-step scanner: each call to [`Lexer::step`] consumes exactly one
//! raw token, so error recovery never recurses. Max munch applies to
//! operators; literals carry their own recovery rules (an unterminated
//! string resumes at the next line).

use crate::diag::{Diagnostic, DiagnosticStream};
use crate::source::{span_of, SourceFile};
use crate::syntax::token::{attach_spans, is_keyword, RawToken, Token, TokenKind};

/// Multi-character operators, longest first.
const OPERATORS: &[&str] = &[
    "..=", "..", "::", "->", "=>", "<-", "|=", "==", "!=", "<=", ">=", "&&", "||", "+", "-",
    "*", "/", "%", "<", ">", "=", "!", "&", "|", "?", "^", ".",
];

const PUNCTUATORS: &[char] = &['(', ')', '{', '}', '[', ']', ',', ':', ';', '#', '@', '$'];

pub struct Lexer<'a> {
    source: &'a SourceFile,
    bytes: &'a [u8],
    pos: usize,
    pub diags: DiagnosticStream,
}

#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<Token>,
    pub diags: DiagnosticStream,
}

pub fn tokenize(source: &SourceFile) -> LexResult {
    let mut lexer = Lexer::new(source);
    let mut raws = Vec::new();
    while let Some(raw) = lexer.step() {
        raws.push(raw);
    }
    LexResult {
        tokens: attach_spans(source, &raws),
        diags: lexer.diags,
    }
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a SourceFile) -> Self {
        Self {
            source,
            bytes: source.text.as_bytes(),
            pos: 0,
            diags: DiagnosticStream::new(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn rest(&self) -> &'a str {
        &self.source.text[self.pos..]
    }

    fn emit(&mut self, code: &str, start: usize, end: usize) {
        let span = span_of(self.source, start, end);
        self.diags.emit(Diagnostic::from_code(code, Some(span), None));
    }

    fn make(&self, kind: TokenKind, start: usize) -> RawToken {
        RawToken {
            kind,
            lexeme: self.source.text[start..self.pos].to_string(),
            start_offset: start,
            end_offset: self.pos,
        }
    }

    /// Consume one token. `None` at end of input.
    pub fn step(&mut self) -> Option<RawToken> {
        loop {
            let c = self.peek()?;
            match c {
                b' ' | b'\t' => {
                    self.pos += 1;
                }
                b'\n' => {
                    let start = self.pos;
                    self.pos += 1;
                    return Some(self.make(TokenKind::Newline, start));
                }
                b'/' if self.peek_at(1) == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                b'/' if self.peek_at(1) == Some(b'*') => {
                    self.skip_block_comment();
                }
                _ => break,
            }
        }

        let c = self.peek()?;
        let start = self.pos;
        if c.is_ascii_alphabetic() || c == b'_' {
            return Some(self.lex_word(start));
        }
        if c.is_ascii_digit() {
            return Some(self.lex_number(start));
        }
        match c {
            b'"' => Some(self.lex_string(start)),
            b'\'' => Some(self.lex_char(start)),
            _ => {
                for op in OPERATORS {
                    if self.rest().starts_with(op) {
                        self.pos += op.len();
                        return Some(self.make(TokenKind::Operator, start));
                    }
                }
                if PUNCTUATORS.contains(&(c as char)) {
                    self.pos += 1;
                    return Some(self.make(TokenKind::Punctuator, start));
                }
                // Advance past the whole scalar, not just one byte.
                let width = self.rest().chars().next().map(char::len_utf8).unwrap_or(1);
                self.pos += width;
                self.emit("E-SRC-0305", start, self.pos);
                Some(self.make(TokenKind::Unknown, start))
            }
        }
    }

    fn skip_block_comment(&mut self) {
        let opener = self.pos;
        self.pos += 2;
        let mut depth = 1usize;
        while depth > 0 {
            match (self.peek(), self.peek_at(1)) {
                (Some(b'/'), Some(b'*')) => {
                    depth += 1;
                    self.pos += 2;
                }
                (Some(b'*'), Some(b'/')) => {
                    depth -= 1;
                    self.pos += 2;
                }
                (Some(_), _) => {
                    self.pos += 1;
                }
                (None, _) => {
                    // Report at the opener so the user sees where nesting
                    // began, not the end of the file.
                    self.emit("E-SRC-0306", opener, opener + 2);
                    return;
                }
            }
        }
    }

    fn lex_word(&mut self, start: usize) -> RawToken {
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = &self.source.text[start..self.pos];
        let kind = match text {
            "true" | "false" => TokenKind::BoolLiteral,
            "null" => TokenKind::NullLiteral,
            _ if is_keyword(text) => TokenKind::Keyword,
            _ => TokenKind::Identifier,
        };
        self.make(kind, start)
    }

    fn lex_number(&mut self, start: usize) -> RawToken {
        if self.peek() == Some(b'0')
            && matches!(self.peek_at(1), Some(b'x') | Some(b'X') | Some(b'b') | Some(b'B'))
        {
            self.pos += 2;
            while let Some(c) = self.peek() {
                if c.is_ascii_alphanumeric() || c == b'_' {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            return self.make(TokenKind::IntLiteral, start);
        }

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }

        let mut is_float = false;
        // A '.' only continues the number when a digit follows; `1..2` must
        // lex as int, range operator, int.
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() || c == b'_' {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let mut ahead = 1;
            if matches!(self.peek_at(1), Some(b'+') | Some(b'-')) {
                ahead = 2;
            }
            if self.peek_at(ahead).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.pos += ahead;
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
            }
        }

        let text = &self.source.text[start..self.pos];
        if !is_float && text.len() > 1 && text.starts_with('0') {
            self.emit("W-SRC-0301", start, self.pos);
        }
        self.make(
            if is_float {
                TokenKind::FloatLiteral
            } else {
                TokenKind::IntLiteral
            },
            start,
        )
    }

    fn lex_string(&mut self, start: usize) -> RawToken {
        self.pos += 1;
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.lex_escape();
                }
                Some(b'\n') | None => {
                    // Unterminated: report and resume at the next line.
                    self.emit("E-SRC-0301", start, self.pos);
                    break;
                }
                Some(_) => {
                    let width = self.rest().chars().next().map(char::len_utf8).unwrap_or(1);
                    self.pos += width;
                }
            }
        }
        self.make(TokenKind::StringLiteral, start)
    }

    fn lex_char(&mut self, start: usize) -> RawToken {
        self.pos += 1;
        match self.peek() {
            Some(b'\\') => self.lex_escape(),
            Some(b'\n') | None => {
                self.emit("E-SRC-0302", start, self.pos);
                return self.make(TokenKind::CharLiteral, start);
            }
            Some(_) => {
                let width = self.rest().chars().next().map(char::len_utf8).unwrap_or(1);
                self.pos += width;
            }
        }
        if self.peek() == Some(b'\'') {
            self.pos += 1;
        } else {
            self.emit("E-SRC-0302", start, self.pos);
        }
        self.make(TokenKind::CharLiteral, start)
    }

    fn lex_escape(&mut self) {
        let start = self.pos;
        self.pos += 1;
        match self.peek() {
            Some(b'n') | Some(b't') | Some(b'r') | Some(b'0') | Some(b'\\') | Some(b'\'')
            | Some(b'"') => {
                self.pos += 1;
            }
            Some(b'x') => {
                self.pos += 1;
                for _ in 0..2 {
                    if self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                        self.pos += 1;
                    } else {
                        self.emit("E-SRC-0303", start, self.pos);
                        return;
                    }
                }
            }
            _ => {
                self.emit("E-SRC-0303", start, self.pos + 1);
                if self.peek().is_some() {
                    self.pos += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::load_source;

    fn lex(text: &str) -> LexResult {
        let loaded = load_source("t.cursive", text.as_bytes());
        tokenize(&loaded.source.unwrap())
    }

    #[test]
    fn max_munch_prefers_long_operators() {
        let result = lex("a..=b");
        let ops: Vec<_> = result
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Operator)
            .map(|t| t.lexeme.as_str())
            .collect();
        assert_eq!(ops, vec!["..="]);
    }

    #[test]
    fn leading_zero_decimal_warns() {
        let result = lex("0123");
        assert!(result.diags.has_code("W-SRC-0301"));
    }

    #[test]
    fn unterminated_string_resumes_next_line() {
        let result = lex("\"hi\nlet");
        assert!(result.diags.has_code("E-SRC-0301"));
        assert!(result
            .tokens
            .iter()
            .any(|t| t.kind == TokenKind::Keyword && t.lexeme == "let"));
    }

    #[test]
    fn unterminated_block_comment_reports_opener() {
        let result = lex("/* a");
        let diag = result
            .diags
            .iter()
            .find(|d| d.code == "E-SRC-0306")
            .expect("missing E-SRC-0306");
        assert_eq!(diag.span.as_ref().unwrap().start_col, 1);
    }
}
