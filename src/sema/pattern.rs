// SPDX-License-Identifier: PMPL-1.0-or-later

//! Match pattern checking: reachability and exhaustiveness.
//!
//! Coverage is computed per scrutinee type: enum variants, bool literals,
//! integer intervals, and modal states. An irrefutable pattern (wildcard,
//! binding, all-irrefutable tuple) covers everything; arms after full
//! coverage are unreachable.

use crate::diag::{Diagnostic, DiagnosticStream};
use crate::sema::symbols::{Declaration, SymbolTable};
use crate::sema::types::{integer_bounds, Ty, TypeRef};
use crate::syntax::ast::{MatchArm, Pattern, PatternNode};

pub fn is_irrefutable(pattern: &Pattern) -> bool {
    match &pattern.node {
        PatternNode::Wildcard | PatternNode::Binding(_) => true,
        PatternNode::Tuple(elems) => elems.iter().all(is_irrefutable),
        _ => false,
    }
}

/// Check arm reachability and exhaustiveness for one `match`.
pub fn check_match_coverage(
    sigma: &SymbolTable,
    scrutinee: &TypeRef,
    arms: &[MatchArm],
    match_span: &crate::source::Span,
    diags: &mut DiagnosticStream,
) {
    let mut cover = Coverage::for_type(sigma, scrutinee);
    for arm in arms {
        if cover.complete() {
            diags.emit(Diagnostic::from_code(
                "E-SEM-0112",
                Some(arm.span.clone()),
                None,
            ));
            continue;
        }
        if !cover.add(&arm.pattern) {
            diags.emit(Diagnostic::from_code(
                "E-SEM-0112",
                Some(arm.span.clone()),
                None,
            ));
        }
    }
    if !cover.complete() {
        diags.emit(Diagnostic::from_code(
            "E-SEM-0111",
            Some(match_span.clone()),
            Some(&cover.missing()),
        ));
    }
}

enum Coverage {
    /// Only an irrefutable arm can complete coverage.
    Opaque { covered: bool },
    Bool { seen_true: bool, seen_false: bool },
    Int {
        min: i128,
        max: i128,
        /// Disjoint covered intervals, kept sorted.
        intervals: Vec<(i128, i128)>,
        saturated: bool,
    },
    Enum {
        all: Vec<String>,
        covered: Vec<String>,
        saturated: bool,
    },
    Modal {
        all: Vec<String>,
        covered: Vec<String>,
        saturated: bool,
    },
}

impl Coverage {
    fn for_type(sigma: &SymbolTable, scrutinee: &TypeRef) -> Coverage {
        let base = crate::sema::types::strip_perm(scrutinee);
        match &*base {
            Ty::Prim("bool") => Coverage::Bool {
                seen_true: false,
                seen_false: false,
            },
            Ty::Prim(name) => match integer_bounds(name) {
                Some((min, max)) => Coverage::Int {
                    min,
                    max,
                    intervals: Vec::new(),
                    saturated: false,
                },
                None => Coverage::Opaque { covered: false },
            },
            Ty::Path { key, .. } => match sigma.lookup(key) {
                Some(Declaration::Enum(decl)) => Coverage::Enum {
                    all: decl.variants.iter().map(|v| v.name.clone()).collect(),
                    covered: Vec::new(),
                    saturated: false,
                },
                Some(Declaration::Modal(decl)) => Coverage::Modal {
                    all: decl.states.iter().map(|s| s.name.clone()).collect(),
                    covered: Vec::new(),
                    saturated: false,
                },
                _ => Coverage::Opaque { covered: false },
            },
            _ => Coverage::Opaque { covered: false },
        }
    }

    fn complete(&self) -> bool {
        match self {
            Coverage::Opaque { covered } => *covered,
            Coverage::Bool {
                seen_true,
                seen_false,
            } => *seen_true && *seen_false,
            Coverage::Int {
                min,
                max,
                intervals,
                saturated,
            } => {
                *saturated
                    || intervals
                        .first()
                        .is_some_and(|(s, e)| s <= min && e >= max && intervals.len() == 1)
            }
            Coverage::Enum {
                all,
                covered,
                saturated,
            }
            | Coverage::Modal {
                all,
                covered,
                saturated,
            } => *saturated || all.iter().all(|v| covered.contains(v)),
        }
    }

    /// Fold one pattern in; false means the pattern adds nothing (it is
    /// unreachable).
    fn add(&mut self, pattern: &Pattern) -> bool {
        if is_irrefutable(pattern) {
            let fresh = !self.complete();
            match self {
                Coverage::Opaque { covered } => *covered = true,
                Coverage::Bool {
                    seen_true,
                    seen_false,
                } => {
                    *seen_true = true;
                    *seen_false = true;
                }
                Coverage::Int { saturated, .. }
                | Coverage::Enum { saturated, .. }
                | Coverage::Modal { saturated, .. } => *saturated = true,
            }
            return fresh;
        }
        match (&mut *self, &pattern.node) {
            (
                Coverage::Bool {
                    seen_true,
                    seen_false,
                },
                PatternNode::BoolLit(value),
            ) => {
                let slot = if *value { seen_true } else { seen_false };
                let fresh = !*slot;
                *slot = true;
                fresh
            }
            (Coverage::Int { intervals, .. }, PatternNode::IntLit(value)) => {
                insert_interval(intervals, *value, *value)
            }
            (
                Coverage::Int {
                    min,
                    max,
                    intervals,
                    ..
                },
                PatternNode::Range {
                    start,
                    end,
                    inclusive,
                },
            ) => {
                let lo = start.unwrap_or(*min);
                let hi = match end {
                    Some(e) if *inclusive => *e,
                    Some(e) => e - 1,
                    None => *max,
                };
                if hi < lo {
                    return false;
                }
                insert_interval(intervals, lo, hi)
            }
            (
                Coverage::Enum { covered, .. },
                PatternNode::EnumVariant {
                    variant, payload, ..
                },
            ) => {
                // A refutable payload does not fully cover its variant.
                if !payload.iter().all(is_irrefutable) {
                    return true;
                }
                if covered.contains(variant) {
                    false
                } else {
                    covered.push(variant.clone());
                    true
                }
            }
            (Coverage::Modal { covered, .. }, PatternNode::ModalState { state, .. }) => {
                if covered.contains(state) {
                    false
                } else {
                    covered.push(state.clone());
                    true
                }
            }
            // A pattern shape that does not match the scrutinee's coverage
            // domain is reported as a type error elsewhere; it neither
            // covers nor counts as unreachable here.
            _ => true,
        }
    }

    fn missing(&self) -> String {
        match self {
            Coverage::Opaque { .. } => "a wildcard arm".into(),
            Coverage::Bool {
                seen_true,
                seen_false,
            } => match (seen_true, seen_false) {
                (false, false) => "true, false".into(),
                (false, true) => "true".into(),
                (true, false) => "false".into(),
                (true, true) => String::new(),
            },
            Coverage::Int {
                min,
                max,
                intervals,
                ..
            } => {
                let mut cursor = *min;
                for (s, e) in intervals {
                    if *s > cursor {
                        return format!("{cursor}..{}", s - 1);
                    }
                    cursor = cursor.max(e.saturating_add(1));
                }
                if cursor <= *max {
                    format!("{cursor}..={max}")
                } else {
                    String::new()
                }
            }
            Coverage::Enum { all, covered, .. } | Coverage::Modal { all, covered, .. } => all
                .iter()
                .filter(|v| !covered.contains(v))
                .cloned()
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// Insert `[lo, hi]` into the sorted disjoint interval set; false when the
/// whole range was already covered.
fn insert_interval(intervals: &mut Vec<(i128, i128)>, lo: i128, hi: i128) -> bool {
    let already = intervals.iter().any(|(s, e)| *s <= lo && hi <= *e);
    let mut merged = vec![(lo, hi)];
    for (s, e) in intervals.drain(..) {
        let (ml, mh) = merged.pop().unwrap();
        if e + 1 >= ml && s <= mh + 1 {
            merged.push((s.min(ml), e.max(mh)));
        } else if s > mh {
            merged.push((ml, mh));
            merged.push((s, e));
        } else {
            merged.push((s, e));
            merged.push((ml, mh));
        }
    }
    merged.sort();
    // Re-merge after sorting; adjacent intervals may now touch.
    let mut out: Vec<(i128, i128)> = Vec::new();
    for (s, e) in merged {
        match out.last_mut() {
            Some((_, oe)) if s <= oe.saturating_add(1) => *oe = (*oe).max(e),
            _ => out.push((s, e)),
        }
    }
    *intervals = out;
    !already
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_merge_covers() {
        let mut iv = Vec::new();
        assert!(insert_interval(&mut iv, 0, 0));
        assert!(insert_interval(&mut iv, 1, 1));
        assert_eq!(iv, vec![(0, 1)]);
        assert!(!insert_interval(&mut iv, 0, 1));
    }
}
