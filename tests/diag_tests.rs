// SPDX-License-Identifier: PMPL-1.0-or-later

//! Diagnostic stream laws and rendering.

use cursive0::diag::{
    compile_status, render, CompileStatus, Diagnostic, DiagnosticOrigin, DiagnosticStream,
    Severity,
};
use cursive0::source::{load_source, span_of};

#[test]
fn emit_is_append_only_in_order() {
    let mut stream = DiagnosticStream::new();
    let a = Diagnostic::error("E-SEM-0101", "a", None);
    let b = Diagnostic::warning("W-SRC-0301", "b", None);
    stream.emit(a);
    stream.emit(b);
    let codes: Vec<&str> = stream.ordered().iter().map(|d| d.code.as_str()).collect();
    assert_eq!(&codes[codes.len() - 2..], &["E-SEM-0101", "W-SRC-0301"]);
}

#[test]
fn stream_has_error_iff_error_or_panic() {
    let mut warnings = DiagnosticStream::new();
    warnings.emit(Diagnostic::warning("W-SRC-0301", "w", None));
    warnings.emit(Diagnostic::new("I-X", Severity::Info, "i", None));
    assert!(!warnings.has_error());
    assert_eq!(compile_status(&warnings), CompileStatus::Ok);

    let mut panics = DiagnosticStream::new();
    panics.emit(Diagnostic::new("X", Severity::Panic, "boom", None));
    assert!(panics.has_error());
    assert_eq!(compile_status(&panics), CompileStatus::Fail);
}

#[test]
fn external_diagnostics_lose_their_span() {
    let src = load_source("m.cursive", b"abc").source.unwrap();
    let span = span_of(&src, 0, 3);
    let internal = Diagnostic::error("E-PRJ-0201", "x", Some(span.clone()))
        .with_origin(DiagnosticOrigin::Internal);
    assert!(internal.span.is_some());
    let external =
        Diagnostic::error("E-PRJ-0201", "x", Some(span)).with_origin(DiagnosticOrigin::External);
    assert!(external.span.is_none());
}

#[test]
fn render_full_form() {
    let src = load_source("m.cursive", b"abc\ndef").source.unwrap();
    let span = span_of(&src, 4, 5);
    let diag = Diagnostic::error("E-SEM-0101", "type mismatch", Some(span));
    assert_eq!(
        render(&diag),
        "E-SEM-0101 (error): type mismatch @m.cursive:2:1"
    );
}

#[test]
fn render_elides_message_and_span() {
    let diag = Diagnostic::new("E-SEM-0101", Severity::Error, "", None);
    assert_eq!(render(&diag), "E-SEM-0101 (error)");
    let with_msg = Diagnostic::new("W-SRC-0301", Severity::Warning, "m", None);
    assert_eq!(render(&with_msg), "W-SRC-0301 (warning): m");
}

#[test]
fn from_code_uses_the_registry_template() {
    let diag = Diagnostic::from_code("E-PTR-0001", None, None);
    assert_eq!(diag.severity, Severity::Error);
    assert!(diag.message.contains("null"));
}
