// SPDX-License-Identifier: PMPL-1.0-or-later

//! Subset conformance scans.
//!
//! The bootstrap compiler implements only the C0 subset of the language;
//! a later self-hosting stage supports the rest. Forms outside the subset
//! are rejected with Error diagnostics but do not stop parsing, so one run
//! surfaces every offending site.

use crate::diag::{Diagnostic, DiagnosticStream};
use crate::source::{span_of, SourceFile};
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Default)]
pub struct SubsetResult {
    pub subset_ok: bool,
    pub diags: DiagnosticStream,
}

struct SubsetScan {
    code: &'static str,
    pattern: &'static Regex,
}

fn scans() -> &'static [SubsetScan] {
    static SCANS: OnceLock<Vec<SubsetScan>> = OnceLock::new();
    static COMPTIME: OnceLock<Regex> = OnceLock::new();
    static UNWIND: OnceLock<Regex> = OnceLock::new();
    static ATTR: OnceLock<Regex> = OnceLock::new();
    static PERM_NON_BINDING: OnceLock<Regex> = OnceLock::new();

    SCANS.get_or_init(|| {
        vec![
            SubsetScan {
                code: "E-CNF-0104",
                pattern: COMPTIME.get_or_init(|| Regex::new(r"\bcomptime\b").unwrap()),
            },
            SubsetScan {
                code: "E-CNF-0103",
                pattern: UNWIND
                    .get_or_init(|| Regex::new(r"#\[\s*unwind(\([a-z]+\))?\s*\]").unwrap()),
            },
            SubsetScan {
                code: "E-CNF-0101",
                pattern: ATTR.get_or_init(|| Regex::new(r"#\[[A-Za-z_][^\]\n]*\]").unwrap()),
            },
            SubsetScan {
                code: "E-CNF-0102",
                // A permission keyword used as a cast target is outside the
                // subset; permissions attach at bindings and receivers.
                pattern: PERM_NON_BINDING
                    .get_or_init(|| Regex::new(r"\bas\s+(const|shared|unique)\b").unwrap()),
            },
        ]
    })
}

/// Run every text-level subset scan over one source file.
pub fn check_subset(source: &SourceFile) -> SubsetResult {
    let mut result = SubsetResult {
        subset_ok: true,
        diags: DiagnosticStream::new(),
    };
    for scan in scans() {
        for found in scan.pattern.find_iter(&source.text) {
            // Matches inside comments or strings are tolerated as false
            // positives the parser never sees; the lexer-level check below
            // filters the common cases.
            if in_comment_or_string(source, found.start()) {
                continue;
            }
            let span = span_of(source, found.start(), found.end());
            result.subset_ok = false;
            result
                .diags
                .emit(Diagnostic::from_code(scan.code, Some(span), None));
        }
    }
    result
}

/// Cheap line-local filter: a match is skipped when the line prefix opens a
/// string or line comment before it.
fn in_comment_or_string(source: &SourceFile, offset: usize) -> bool {
    let line_start = source.text[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let prefix = &source.text[line_start..offset];
    let mut in_string = false;
    let mut chars = prefix.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => in_string = !in_string,
            '\\' if in_string => {
                chars.next();
            }
            '/' if !in_string && chars.peek() == Some(&'/') => return true,
            _ => {}
        }
    }
    in_string
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::load_source;

    fn scan(text: &str) -> SubsetResult {
        let loaded = load_source("t.cursive", text.as_bytes());
        check_subset(&loaded.source.unwrap())
    }

    #[test]
    fn comptime_is_rejected() {
        let result = scan("procedure f() { comptime { 1 } }");
        assert!(!result.subset_ok);
        assert!(result.diags.has_code("E-CNF-0104"));
    }

    #[test]
    fn comptime_in_comment_is_ignored() {
        let result = scan("procedure f() { 0 } // comptime later\n");
        assert!(result.subset_ok);
    }

    #[test]
    fn unwind_attribute_is_rejected() {
        let result = scan("#[unwind(allowed)]\nprocedure f() { 0 }");
        assert!(result.diags.has_code("E-CNF-0103"));
    }

    #[test]
    fn permission_cast_is_rejected() {
        let result = scan("let y = x as unique i32");
        assert!(result.diags.has_code("E-CNF-0102"));
    }
}
