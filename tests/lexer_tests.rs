// SPDX-License-Identifier: PMPL-1.0-or-later

//! Lexer literal handling and recovery.

use cursive0::source::load_source;
use cursive0::syntax::lexer::tokenize;
use cursive0::syntax::token::{no_unknown_ok, TokenKind};

fn lex(text: &str) -> cursive0::syntax::lexer::LexResult {
    let loaded = load_source("t.cursive", text.as_bytes());
    tokenize(&loaded.source.unwrap())
}

fn kinds(result: &cursive0::syntax::lexer::LexResult) -> Vec<TokenKind> {
    result
        .tokens
        .iter()
        .filter(|t| t.kind != TokenKind::Newline)
        .map(|t| t.kind)
        .collect()
}

#[test]
fn leading_zero_decimal_warns() {
    let result = lex("0123");
    assert!(result.diags.has_code("W-SRC-0301"));
    assert_eq!(kinds(&result), vec![TokenKind::IntLiteral]);
}

#[test]
fn hex_and_binary_literals_do_not_warn() {
    let result = lex("0xFF 0b1010");
    assert!(result.diags.is_empty());
    assert_eq!(
        kinds(&result),
        vec![TokenKind::IntLiteral, TokenKind::IntLiteral]
    );
}

#[test]
fn unterminated_string_reports_and_resumes_next_line() {
    let result = lex("\"hi\nlet x");
    assert!(result.diags.has_code("E-SRC-0301"));
    assert!(result
        .tokens
        .iter()
        .any(|t| t.kind == TokenKind::Keyword && t.lexeme == "let"));
}

#[test]
fn unterminated_block_comment_reports_at_the_opener() {
    let result = lex("let x\n/* a");
    let diag = result
        .diags
        .iter()
        .find(|d| d.code == "E-SRC-0306")
        .expect("expected E-SRC-0306");
    let span = diag.span.as_ref().expect("span expected");
    assert_eq!((span.start_line, span.start_col), (2, 1));
}

#[test]
fn nested_block_comments_close() {
    let result = lex("/* outer /* inner */ still */ let");
    assert!(result.diags.is_empty());
    assert_eq!(kinds(&result), vec![TokenKind::Keyword]);
}

#[test]
fn max_munch_on_operators() {
    let result = lex("a ..= b .. c :: d -> e => f <- g |= h");
    let ops: Vec<&str> = result
        .tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Operator)
        .map(|t| t.lexeme.as_str())
        .collect();
    assert_eq!(ops, vec!["..=", "..", "::", "->", "=>", "<-", "|="]);
}

#[test]
fn range_after_int_is_not_a_float() {
    let result = lex("1..2");
    assert_eq!(
        kinds(&result),
        vec![
            TokenKind::IntLiteral,
            TokenKind::Operator,
            TokenKind::IntLiteral
        ]
    );
}

#[test]
fn keywords_and_literals_classify() {
    let result = lex("procedure x true false null 'a' \"s\" 1.5");
    assert_eq!(
        kinds(&result),
        vec![
            TokenKind::Keyword,
            TokenKind::Identifier,
            TokenKind::BoolLiteral,
            TokenKind::BoolLiteral,
            TokenKind::NullLiteral,
            TokenKind::CharLiteral,
            TokenKind::StringLiteral,
            TokenKind::FloatLiteral
        ]
    );
    assert!(no_unknown_ok(&result.tokens));
}

#[test]
fn unknown_scalar_is_reported_once() {
    let result = lex("let § x");
    assert!(result.diags.has_code("E-SRC-0305"));
    assert!(!no_unknown_ok(&result.tokens));
}

#[test]
fn token_spans_are_attached() {
    let result = lex("let x");
    let x = result
        .tokens
        .iter()
        .find(|t| t.lexeme == "x")
        .expect("x token");
    assert_eq!((x.span.start_line, x.span.start_col), (1, 5));
}
