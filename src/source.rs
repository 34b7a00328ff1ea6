// SPDX-License-Identifier: PMPL-1.0-or-later

//! Source text loading, newline normalization, and span bookkeeping.
//!
//! Every downstream artifact (tokens, AST nodes, diagnostics, IR
//! instructions) carries a [`Span`] produced here. Offsets are byte offsets
//! into the normalized text; `locate` is total after clamping.

use crate::diag::{Diagnostic, DiagnosticStream, Severity};
use std::path::Path;

const BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// An immutable, normalized source file.
///
/// Line endings are normalized to LF before any offset is handed out, so a
/// span's `(line, col)` pair never depends on the host platform's newline
/// convention.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub text: String,
    pub byte_len: usize,
    /// Byte offset of the start of each line. `line_starts[0]` is always 0.
    pub line_starts: Vec<usize>,
}

/// A resolved source location (1-indexed line and column).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

/// A byte range in one file with precomputed endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Span {
    pub file: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub start_line: usize,
    pub start_col: usize,
    pub end_line: usize,
    pub end_col: usize,
}

impl Span {
    pub fn range(&self) -> (usize, usize) {
        (self.start_offset, self.end_offset)
    }

    /// Widen this span to also cover `other`. Spans in different files keep
    /// the receiver unchanged.
    pub fn merge(&self, other: &Span) -> Span {
        if self.file != other.file {
            return self.clone();
        }
        let mut out = self.clone();
        if other.start_offset < out.start_offset {
            out.start_offset = other.start_offset;
            out.start_line = other.start_line;
            out.start_col = other.start_col;
        }
        if other.end_offset > out.end_offset {
            out.end_offset = other.end_offset;
            out.end_line = other.end_line;
            out.end_col = other.end_col;
        }
        out
    }
}

/// Result of loading one file: the normalized source (absent on fatal
/// decode failure) plus whatever diagnostics the load produced.
#[derive(Debug, Default)]
pub struct SourceLoadResult {
    pub source: Option<SourceFile>,
    pub diags: DiagnosticStream,
}

/// Normalize raw bytes into a [`SourceFile`].
///
/// CRLF and lone CR both become LF. A leading BOM is stripped with a
/// warning; a BOM anywhere after the first scalar is an error. Invalid
/// UTF-8 is a fatal decode error for the file.
pub fn load_source(path: &str, bytes: &[u8]) -> SourceLoadResult {
    let mut result = SourceLoadResult::default();

    let mut body = bytes;
    if body.starts_with(BOM) {
        result.diags.emit(Diagnostic::new(
            "W-SRC-0101",
            Severity::Warning,
            "leading byte-order mark ignored",
            None,
        ));
        body = &body[BOM.len()..];
    }

    let decoded = match std::str::from_utf8(body) {
        Ok(text) => text,
        Err(err) => {
            result.diags.emit(Diagnostic::new(
                "E-SRC-0104",
                Severity::Error,
                format!("{path}: source is not valid UTF-8 (at byte {})", err.valid_up_to()),
                None,
            ));
            return result;
        }
    };

    // Normalize newlines in one pass. Offsets reported by later phases are
    // into this normalized buffer, not the on-disk bytes.
    let mut text = String::with_capacity(decoded.len());
    let mut chars = decoded.chars().peekable();
    let mut interior_bom_at = None;
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                text.push('\n');
            }
            '\u{FEFF}' => {
                if interior_bom_at.is_none() {
                    interior_bom_at = Some(text.len());
                }
            }
            _ => text.push(c),
        }
    }

    let byte_len = text.len();
    let line_starts = compute_line_starts(&text);
    let source = SourceFile {
        path: path.to_string(),
        text,
        byte_len,
        line_starts,
    };

    if let Some(offset) = interior_bom_at {
        let span = span_of(&source, offset, offset);
        result.diags.emit(Diagnostic::new(
            "E-SRC-0103",
            Severity::Error,
            "byte-order mark not permitted after the first scalar",
            Some(span),
        ));
    }

    result.source = Some(source);
    result
}

/// Read and normalize a file from disk. I/O failure is a spanless error
/// diagnostic, not a panic.
pub fn load_source_file(path: &Path) -> SourceLoadResult {
    match std::fs::read(path) {
        Ok(bytes) => load_source(&path.display().to_string(), &bytes),
        Err(err) => {
            let mut result = SourceLoadResult::default();
            result.diags.emit(Diagnostic::new(
                "E-SRC-0102",
                Severity::Error,
                format!("cannot read {}: {err}", path.display()),
                None,
            ));
            result
        }
    }
}

fn compute_line_starts(text: &str) -> Vec<usize> {
    let mut starts = vec![0usize];
    for (i, b) in text.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

/// Map a byte offset to a 1-indexed `(line, col)` location. Total: offsets
/// past the end clamp to `byte_len`.
pub fn locate(source: &SourceFile, offset: usize) -> SourceLocation {
    let clamped = offset.min(source.byte_len);
    let line_idx = match source.line_starts.binary_search(&clamped) {
        Ok(i) => i,
        Err(i) => i.saturating_sub(1),
    };
    let line_start = source.line_starts[line_idx];
    SourceLocation {
        file: source.path.clone(),
        offset: clamped,
        line: line_idx + 1,
        column: clamped - line_start + 1,
    }
}

/// Clamp `[start, end]` into `[0, byte_len]` keeping `start <= end`.
pub fn clamp_span(source: &SourceFile, start: usize, end: usize) -> (usize, usize) {
    let s = start.min(source.byte_len);
    let e = end.max(s).min(source.byte_len);
    (s, e)
}

/// Build a fully-populated [`Span`] for a clamped byte range.
pub fn span_of(source: &SourceFile, start: usize, end: usize) -> Span {
    let (s, e) = clamp_span(source, start, end);
    let start_loc = locate(source, s);
    let end_loc = locate(source, e);
    Span {
        file: source.path.clone(),
        start_offset: s,
        end_offset: e,
        start_line: start_loc.line,
        start_col: start_loc.column,
        end_line: end_loc.line,
        end_col: end_loc.column,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_normalizes_to_lf() {
        let result = load_source("t.cursive", &[0x61, 0x0D, 0x0A, 0x62]);
        let src = result.source.expect("source should load");
        assert_eq!(src.text, "a\nb");
        assert_eq!(src.line_starts, vec![0, 2]);
    }

    #[test]
    fn lone_cr_becomes_trailing_line() {
        let result = load_source("t.cursive", &[0x61, 0x0D]);
        let src = result.source.expect("source should load");
        assert_eq!(src.text, "a\n");
        assert_eq!(src.line_starts, vec![0, 2]);
    }

    #[test]
    fn clamp_is_idempotent() {
        let result = load_source("t.cursive", b"hello\nworld\n");
        let src = result.source.unwrap();
        let once = clamp_span(&src, 3, 400);
        let twice = clamp_span(&src, once.0, once.1);
        assert_eq!(once, twice);
    }
}
