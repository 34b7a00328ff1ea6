// SPDX-License-Identifier: PMPL-1.0-or-later

//! Diagnostics: codes, severities, the append-only stream, and rendering.
//!
//! Analyses never throw. Every fallible analysis returns its payload plus
//! additional diagnostics; callers merge them into the running stream. The
//! stream preserves insertion order and is never re-sorted.

use crate::source::Span;
use colored::Colorize;
use serde::Serialize;
use std::fmt;

/// Diagnostic severity. A stream "has an error" iff any element is
/// `Error` or `Panic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    /// A compiler invariant was violated. The user is directed to file a
    /// bug; the exit code is still 2.
    Panic,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Panic => "panic",
        };
        f.write_str(text)
    }
}

/// Where a diagnostic was produced. Externally-originated diagnostics have
/// their span stripped before surfacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticOrigin {
    Internal,
    External,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub code: String,
    pub severity: Severity,
    pub message: String,
    #[serde(skip)]
    pub span: Option<Span>,
}

impl Diagnostic {
    pub fn new(
        code: &str,
        severity: Severity,
        message: impl Into<String>,
        span: Option<Span>,
    ) -> Self {
        Self {
            code: code.to_string(),
            severity,
            message: message.into(),
            span,
        }
    }

    /// Build a diagnostic from the fixed code registry, substituting
    /// `{...}` detail into the message template where given.
    pub fn from_code(code: &str, span: Option<Span>, detail: Option<&str>) -> Self {
        let (severity, template) = lookup_code(code);
        let message = match detail {
            Some(d) if template.contains("{}") => template.replacen("{}", d, 1),
            Some(d) => format!("{template}: {d}"),
            None => template.to_string(),
        };
        Self::new(code, severity, message, span)
    }

    pub fn error(code: &str, message: impl Into<String>, span: Option<Span>) -> Self {
        Self::new(code, Severity::Error, message, span)
    }

    pub fn warning(code: &str, message: impl Into<String>, span: Option<Span>) -> Self {
        Self::new(code, Severity::Warning, message, span)
    }

    /// Externally-originated diagnostics surface without a span.
    pub fn with_origin(mut self, origin: DiagnosticOrigin) -> Self {
        if origin == DiagnosticOrigin::External {
            self.span = None;
        }
        self
    }
}

/// Append-only ordered diagnostic stream.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticStream {
    items: Vec<Diagnostic>,
}

impl DiagnosticStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, diag: Diagnostic) {
        self.items.push(diag);
    }

    pub fn merge(&mut self, other: DiagnosticStream) {
        self.items.extend(other.items);
    }

    pub fn has_error(&self) -> bool {
        self.items
            .iter()
            .any(|d| matches!(d.severity, Severity::Error | Severity::Panic))
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.items.iter().any(|d| d.code == code)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    /// Surfacing order is insertion order; this is the identity on purpose.
    pub fn ordered(&self) -> &[Diagnostic] {
        &self.items
    }
}

impl IntoIterator for DiagnosticStream {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Overall driver outcome derived from the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStatus {
    Ok,
    Fail,
}

pub fn compile_status(stream: &DiagnosticStream) -> CompileStatus {
    if stream.has_error() {
        CompileStatus::Fail
    } else {
        CompileStatus::Ok
    }
}

/// Render one diagnostic: `{code} ({severity}): {msg} @{file}:{line}:{col}`
/// with the message and span parts elided when absent.
pub fn render(diag: &Diagnostic) -> String {
    let mut out = format!("{} ({})", diag.code, diag.severity);
    if !diag.message.is_empty() {
        out.push_str(": ");
        out.push_str(&diag.message);
    }
    if let Some(span) = &diag.span {
        out.push_str(&format!(
            " @{}:{}:{}",
            span.file, span.start_line, span.start_col
        ));
    }
    out
}

/// Severity-tinted rendering for terminal output.
pub fn render_colored(diag: &Diagnostic) -> String {
    let plain = render(diag);
    match diag.severity {
        Severity::Error | Severity::Panic => plain.red().to_string(),
        Severity::Warning => plain.yellow().to_string(),
        Severity::Info => plain.normal().to_string(),
    }
}

/// Fixed message templates keyed by stable diagnostic code.
///
/// Codes are `{E|W}-<DOMAIN>-<4 digits>`; the table is the single source of
/// truth for default severity and English message text.
const CODE_TABLE: &[(&str, Severity, &str)] = &[
    // SRC: source-level decode/lex
    ("W-SRC-0101", Severity::Warning, "leading byte-order mark ignored"),
    ("E-SRC-0102", Severity::Error, "cannot read source file"),
    ("E-SRC-0103", Severity::Error, "byte-order mark not permitted after the first scalar"),
    ("E-SRC-0104", Severity::Error, "source is not valid UTF-8"),
    ("E-SRC-0301", Severity::Error, "unterminated string literal"),
    ("W-SRC-0301", Severity::Warning, "decimal literal with leading zero"),
    ("E-SRC-0302", Severity::Error, "unterminated character literal"),
    ("E-SRC-0303", Severity::Error, "invalid escape sequence"),
    ("E-SRC-0304", Severity::Error, "integer literal out of range"),
    ("E-SRC-0305", Severity::Error, "unrecognized character"),
    ("E-SRC-0306", Severity::Error, "unterminated block comment"),
    ("E-SRC-0401", Severity::Error, "unexpected token"),
    ("E-SRC-0402", Severity::Error, "expected an item"),
    // PRJ: project manifest
    ("E-PRJ-0201", Severity::Error, "manifest is missing or unreadable"),
    ("E-PRJ-0202", Severity::Error, "manifest declares no assemblies"),
    ("E-PRJ-0203", Severity::Error, "invalid assembly name"),
    ("E-PRJ-0204", Severity::Error, "invalid assembly kind"),
    ("E-PRJ-0205", Severity::Error, "cannot select assembly"),
    ("W-PRJ-0206", Severity::Warning, "unknown manifest key ignored"),
    ("E-PRJ-0302", Severity::Error, "assembly root is not a directory"),
    ("E-PRJ-0304", Severity::Error, "assembly root escapes the project root"),
    // MOD: module discovery
    ("E-MOD-0101", Severity::Error, "module path component is not a valid identifier"),
    ("E-MOD-0102", Severity::Error, "module path component is a reserved keyword"),
    ("W-MOD-0103", Severity::Warning, "module directories differ only by case"),
    ("E-MOD-0104", Severity::Error, "case-colliding module directories"),
    // SEM: name resolution
    ("E-SEM-3001", Severity::Error, "duplicate top-level name in module"),
    ("E-SEM-3002", Severity::Error, "unknown assembly in import"),
    ("E-SEM-3003", Severity::Error, "imported item not found"),
    ("E-SEM-3004", Severity::Error, "import path not found"),
    ("E-SEM-3005", Severity::Error, "import cycle detected"),
    ("W-SEM-3006", Severity::Warning, "using binding shadows an earlier import"),
    ("E-SEM-3007", Severity::Error, "unresolved name"),
    ("E-SEM-3008", Severity::Error, "ambiguous name"),
    ("E-SEM-3009", Severity::Error, "missing or invalid entry point"),
    ("E-SEM-3010", Severity::Error, "item is not visible from here"),
    // CNF: conformance / subset
    ("E-CNF-0101", Severity::Error, "form outside the supported subset"),
    ("E-CNF-0102", Severity::Error, "permission qualifier not permitted at this position"),
    ("E-CNF-0103", Severity::Error, "unwind attribute is not supported"),
    ("E-CNF-0104", Severity::Error, "comptime is not supported"),
    // UNS: unsupported forms
    ("E-UNS-0201", Severity::Error, "unsupported construct"),
    ("E-UNS-0202", Severity::Error, "unsafe-only operation outside unsafe"),
    // SEM typing
    ("E-SEM-0101", Severity::Error, "type mismatch"),
    ("E-SEM-0102", Severity::Error, "unknown field"),
    ("E-SEM-0103", Severity::Error, "missing field in literal"),
    ("E-SEM-0104", Severity::Error, "duplicate field in literal"),
    ("E-SEM-0105", Severity::Error, "expression is not a place"),
    ("E-SEM-0106", Severity::Error, "non-bitcopy value used without move"),
    ("E-SEM-0107", Severity::Error, "invalid cast"),
    ("E-SEM-0108", Severity::Error, "index must be usize"),
    ("E-SEM-0109", Severity::Error, "condition must be bool"),
    ("E-SEM-0110", Severity::Error, "branches have incompatible types"),
    ("E-SEM-0111", Severity::Error, "match is not exhaustive"),
    ("E-SEM-0112", Severity::Error, "unreachable match arm"),
    ("E-SEM-0113", Severity::Error, "method not found"),
    ("E-SEM-0114", Severity::Error, "ambiguous method call"),
    ("E-SEM-0115", Severity::Error, "receiver permission is insufficient"),
    ("E-SEM-0116", Severity::Error, "propagate operand is not a union"),
    ("E-SEM-0117", Severity::Error, "error type does not fit the return union"),
    ("E-SEM-0118", Severity::Error, "range endpoint must be usize"),
    ("E-SEM-0119", Severity::Error, "assignment to immutable binding"),
    ("E-SEM-0120", Severity::Error, "no active region for allocation"),
    ("E-SEM-0121", Severity::Error, "ambiguous region for allocation"),
    ("E-SEM-0122", Severity::Error, "transmute size or alignment mismatch"),
    ("E-SEM-0123", Severity::Error, "enum variant not found"),
    ("E-SEM-0124", Severity::Error, "wrong number of call arguments"),
    ("E-SEM-0125", Severity::Error, "call target is not a procedure"),
    ("E-SEM-0126", Severity::Error, "integer literal out of range for its type"),
    ("E-SEM-0127", Severity::Error, "break or continue outside a loop"),
    // PTR: pointer states
    ("E-PTR-0001", Severity::Error, "dereference of a null pointer"),
    ("E-PTR-0002", Severity::Error, "dereference of an expired pointer"),
    ("E-PTR-0003", Severity::Error, "raw pointer dereference outside unsafe"),
    ("E-PTR-0004", Severity::Error, "transmute outside unsafe"),
    // MOD: modal states
    ("E-MOD-0201", Severity::Error, "member not available in this state"),
    ("E-MOD-0202", Severity::Error, "transition must produce a different state"),
    ("E-MOD-0203", Severity::Error, "state-specific access through widened modal"),
    ("E-MOD-0204", Severity::Error, "unknown modal state"),
    // KEY: key conflicts
    ("E-KEY-0001", Severity::Error, "conflicting key captures in parallel arms"),
    ("E-KEY-0002", Severity::Error, "key acquisition conflicts with a held key"),
    ("E-KEY-0003", Severity::Error, "key held across a suspension point"),
    ("W-CON-0001", Severity::Warning, "keys acquired out of canonical order"),
    // CON: contracts / concurrency
    ("E-CON-0101", Severity::Error, "contract predicate must be bool"),
    ("E-CON-0102", Severity::Error, "contract predicate is not pure"),
    ("E-CON-0103", Severity::Error, "@result is only valid in a postcondition"),
    ("E-CON-0104", Severity::Error, "@entry argument must be a bitcopy value"),
    ("E-CON-0201", Severity::Error, "wait operand is not a spawned task"),
    ("E-CON-0202", Severity::Error, "sync is only valid in non-async context"),
    ("E-CON-0203", Severity::Error, "race requires at least two arms"),
    ("E-CON-0204", Severity::Error, "race handlers must uniformly return or yield"),
    ("E-CON-0205", Severity::Error, "all arms have incompatible error types"),
    ("E-CON-0206", Severity::Error, "yield outside an async context"),
    // CAP: capabilities
    ("E-CAP-0010", Severity::Error, "callee requires capabilities absent here"),
    ("E-CAP-0011", Severity::Error, "extern procedure cannot take a capability parameter"),
    // PROV: provenance
    ("E-PROV-0001", Severity::Error, "pointer escapes its region"),
    // OUT: output pipeline
    ("E-OUT-0401", Severity::Error, "colliding output paths"),
    ("E-OUT-0402", Severity::Error, "object emission failed"),
    ("E-OUT-0403", Severity::Error, "IR emission failed"),
    ("E-OUT-0405", Severity::Error, "linker tool not found"),
    ("E-OUT-0407", Severity::Error, "runtime library not found"),
    ("E-OUT-0408", Severity::Error, "runtime library is incompatible"),
];

/// Look up default severity and message template for a code. Unknown codes
/// get a Panic-severity template so a typo'd code surfaces loudly.
pub fn lookup_code(code: &str) -> (Severity, &'static str) {
    for (c, sev, msg) in CODE_TABLE {
        if *c == code {
            return (*sev, msg);
        }
    }
    (Severity::Panic, "unregistered diagnostic code (compiler bug)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_appends_in_order() {
        let mut stream = DiagnosticStream::new();
        stream.emit(Diagnostic::error("E-SEM-0101", "first", None));
        stream.emit(Diagnostic::warning("W-SRC-0301", "second", None));
        let tail: Vec<&str> = stream
            .ordered()
            .iter()
            .rev()
            .take(2)
            .map(|d| d.code.as_str())
            .collect();
        assert_eq!(tail, vec!["W-SRC-0301", "E-SEM-0101"]);
    }

    #[test]
    fn external_origin_strips_span() {
        let span = crate::source::Span {
            file: "x.cursive".into(),
            ..Default::default()
        };
        let diag = Diagnostic::error("E-PRJ-0201", "m", Some(span))
            .with_origin(DiagnosticOrigin::External);
        assert!(diag.span.is_none());
    }

    #[test]
    fn render_elides_missing_parts() {
        let diag = Diagnostic::new("E-SEM-0101", Severity::Error, "", None);
        assert_eq!(render(&diag), "E-SEM-0101 (error)");
    }

    #[test]
    fn registry_covers_known_codes() {
        let (sev, msg) = lookup_code("E-PTR-0001");
        assert_eq!(sev, Severity::Error);
        assert!(msg.contains("null"));
    }
}
