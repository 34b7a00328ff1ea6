// SPDX-License-Identifier: PMPL-1.0-or-later

//! Source loading, normalization, and span boundary behavior.

use cursive0::source::{clamp_span, load_source, locate, span_of};

#[test]
fn crlf_normalizes_to_three_scalars_two_lines() {
    let result = load_source("t.cursive", &[0x61, 0x0D, 0x0A, 0x62]);
    let src = result.source.expect("load should succeed");
    assert_eq!(src.text.chars().collect::<Vec<_>>(), vec!['a', '\n', 'b']);
    assert_eq!(src.line_starts, vec![0, 2]);
}

#[test]
fn lone_cr_becomes_lf_with_trailing_line() {
    let result = load_source("t.cursive", &[0x61, 0x0D]);
    let src = result.source.expect("load should succeed");
    assert_eq!(src.text, "a\n");
    assert_eq!(src.line_starts.len(), 2);
}

#[test]
fn leading_bom_warns_and_is_stripped() {
    let result = load_source("t.cursive", &[0xEF, 0xBB, 0xBF, 0x61]);
    let src = result.source.expect("load should succeed");
    assert_eq!(src.text, "a");
    assert!(result.diags.has_code("W-SRC-0101"));
    assert!(!result.diags.has_error());
}

#[test]
fn embedded_bom_after_first_scalar_errors() {
    let mut bytes = vec![0x61];
    bytes.extend_from_slice(&[0xEF, 0xBB, 0xBF]);
    bytes.push(0x62);
    let result = load_source("t.cursive", &bytes);
    assert!(result.diags.has_code("E-SRC-0103"));
}

#[test]
fn locate_is_total_over_any_offset() {
    let result = load_source("t.cursive", b"one\ntwo\nthree");
    let src = result.source.unwrap();
    for offset in 0..=src.byte_len + 10 {
        let loc = locate(&src, offset);
        assert!(loc.line >= 1, "line must be 1-indexed at offset {offset}");
        assert!(loc.column >= 1, "col must be 1-indexed at offset {offset}");
    }
    let last = locate(&src, src.byte_len + 10);
    assert_eq!(last.offset, src.byte_len);
}

#[test]
fn locate_finds_line_and_column() {
    let result = load_source("t.cursive", b"ab\ncd\n");
    let src = result.source.unwrap();
    let loc = locate(&src, 4);
    assert_eq!((loc.line, loc.column), (2, 2));
}

#[test]
fn clamp_span_is_idempotent() {
    let result = load_source("t.cursive", b"hello world");
    let src = result.source.unwrap();
    for (start, end) in [(0, 5), (3, 999), (999, 1000), (7, 2)] {
        let once = clamp_span(&src, start, end);
        assert_eq!(clamp_span(&src, once.0, once.1), once);
    }
}

#[test]
fn span_of_carries_both_endpoints() {
    let result = load_source("t.cursive", b"ab\ncd\n");
    let src = result.source.unwrap();
    let span = span_of(&src, 0, 4);
    assert_eq!((span.start_line, span.start_col), (1, 1));
    assert_eq!((span.end_line, span.end_col), (2, 2));
}
