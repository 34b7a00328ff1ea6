// SPDX-License-Identifier: PMPL-1.0-or-later

//! The key system: path-based conflict detection for concurrent access.
//!
//! A key path is a root binding plus field/index segments; a
//! boundary-marked segment (`#field`) truncates traversal for conflict
//! purposes. Two requests conflict when their paths overlap and at least
//! one is a write.

use crate::syntax::ast::{ExprNode, KeyMode, KeyPathExpr, KeySeg};

pub type KeyScopeId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPathSeg {
    pub boundary: bool,
    pub name: String,
    pub is_index: bool,
    /// Set when the index is an integer literal; used for the static
    /// disjointness proof.
    pub index_value: Option<i128>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath {
    pub root: String,
    pub segs: Vec<KeyPathSeg>,
}

impl KeyPath {
    pub fn root_only(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            segs: Vec::new(),
        }
    }

    /// Lexicographic rendering, the canonical acquisition order key.
    pub fn to_text(&self) -> String {
        let mut out = self.root.clone();
        for seg in &self.segs {
            out.push('.');
            if seg.boundary {
                out.push('#');
            }
            if seg.is_index {
                out.push('[');
                out.push_str(&seg.name);
                out.push(']');
            } else {
                out.push_str(&seg.name);
            }
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct HeldKey {
    pub path: KeyPath,
    pub mode: KeyMode,
    pub scope: KeyScopeId,
}

/// Γ_keys: the stack of held keys.
#[derive(Debug, Default)]
pub struct KeyContext {
    held: Vec<HeldKey>,
    current_scope: KeyScopeId,
    scope_stack: Vec<KeyScopeId>,
}

impl KeyContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_scope(&mut self) {
        self.scope_stack.push(self.current_scope);
        self.current_scope = self.scope_stack.len();
    }

    pub fn pop_scope(&mut self) {
        if let Some(prev) = self.scope_stack.pop() {
            let scope = self.current_scope;
            self.held.retain(|k| k.scope != scope);
            self.current_scope = prev;
        }
    }

    /// Idempotent acquisition: returns false when an already-held key
    /// covers the request.
    pub fn acquire(&mut self, path: KeyPath, mode: KeyMode) -> bool {
        if self.covers(&path, mode) {
            return false;
        }
        self.held.push(HeldKey {
            path,
            mode,
            scope: self.current_scope,
        });
        true
    }

    /// A held key covers `(path, mode)` when its path is a prefix of
    /// `path` and its mode is at least `mode` (Write ≥ Read).
    pub fn covers(&self, path: &KeyPath, mode: KeyMode) -> bool {
        self.held.iter().any(|held| {
            is_prefix(&held.path, path)
                && (held.mode == KeyMode::Write || mode == KeyMode::Read)
        })
    }

    pub fn held_keys(&self) -> &[HeldKey] {
        &self.held
    }

    pub fn any_held(&self) -> bool {
        !self.held.is_empty()
    }

    /// `yield release` drops every held key before the suspension.
    pub fn release_all(&mut self) -> Vec<HeldKey> {
        std::mem::take(&mut self.held)
    }

    pub fn reacquire(&mut self, keys: Vec<HeldKey>) {
        self.held = keys;
    }
}

/// `prefix` is a path-prefix of `path`; traversal stops at the first
/// boundary segment on the prefix.
pub fn is_prefix(prefix: &KeyPath, path: &KeyPath) -> bool {
    if prefix.root != path.root {
        return false;
    }
    if prefix.segs.len() > path.segs.len() {
        return false;
    }
    for (p, q) in prefix.segs.iter().zip(path.segs.iter()) {
        if p.boundary {
            return true;
        }
        if p.is_index != q.is_index {
            return false;
        }
        if p.is_index {
            // Statically disjoint indices cannot alias; anything unproven
            // is treated as overlapping.
            if statically_disjoint(p, q) {
                return false;
            }
        } else if p.name != q.name {
            return false;
        }
    }
    true
}

/// Distinct integer literals are provably disjoint. Everything else is
/// conservatively overlapping.
pub fn statically_disjoint(a: &KeyPathSeg, b: &KeyPathSeg) -> bool {
    match (a.index_value, b.index_value) {
        (Some(x), Some(y)) => x != y,
        _ => false,
    }
}

pub fn paths_overlap(p1: &KeyPath, p2: &KeyPath) -> bool {
    is_prefix(p1, p2) || is_prefix(p2, p1)
}

/// `Conflict((P1,M1),(P2,M2)) = Overlap(P1,P2) ∧ (M1 = Write ∨ M2 = Write)`.
pub fn keys_conflict(p1: &KeyPath, m1: KeyMode, p2: &KeyPath, m2: KeyMode) -> bool {
    if !paths_overlap(p1, p2) {
        return false;
    }
    m1 == KeyMode::Write || m2 == KeyMode::Write
}

/// First conflicting pair between a request and the held set.
pub fn acquisition_conflict<'a>(
    ctx: &'a KeyContext,
    path: &KeyPath,
    mode: KeyMode,
) -> Option<&'a HeldKey> {
    ctx.held_keys()
        .iter()
        .find(|held| keys_conflict(&held.path, held.mode, path, mode))
}

/// First conflicting pair between two capture sets (parallel arms).
pub fn block_conflict<'a>(
    keys1: &'a [(KeyPath, KeyMode)],
    keys2: &'a [(KeyPath, KeyMode)],
) -> Option<(&'a KeyPath, &'a KeyPath)> {
    for (p1, m1) in keys1 {
        for (p2, m2) in keys2 {
            if keys_conflict(p1, *m1, p2, *m2) {
                return Some((p1, p2));
            }
        }
    }
    None
}

pub fn key_path_less(lhs: &KeyPath, rhs: &KeyPath) -> bool {
    lhs.to_text() < rhs.to_text()
}

/// True when the listed acquisitions follow canonical (lexicographic)
/// order. Conflict detection never relies on this; violations only warn.
pub fn in_canonical_order(keys: &[(KeyPath, KeyMode)]) -> bool {
    keys.windows(2)
        .all(|w| !key_path_less(&w[1].0, &w[0].0))
}

pub fn canonical_order(keys: &[(KeyPath, KeyMode)]) -> Vec<(KeyPath, KeyMode)> {
    let mut sorted = keys.to_vec();
    sorted.sort_by(|a, b| a.0.to_text().cmp(&b.0.to_text()));
    sorted
}

/// Lower a written key path to the analysis form.
pub fn lower_key_path(ast_path: &KeyPathExpr) -> KeyPath {
    let mut path = KeyPath {
        root: ast_path.root.clone(),
        segs: Vec::new(),
    };
    for seg in &ast_path.segs {
        match seg {
            KeySeg::Field { name, boundary } => path.segs.push(KeyPathSeg {
                boundary: *boundary,
                name: name.clone(),
                is_index: false,
                index_value: None,
            }),
            KeySeg::Index { index, boundary } => {
                let value = match &index.node {
                    ExprNode::IntLit(v) => Some(*v),
                    _ => None,
                };
                path.segs.push(KeyPathSeg {
                    boundary: *boundary,
                    name: value
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "index".to_string()),
                    is_index: true,
                    index_value: value,
                });
            }
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> KeyPathSeg {
        KeyPathSeg {
            boundary: false,
            name: name.into(),
            is_index: false,
            index_value: None,
        }
    }

    fn index(value: i128) -> KeyPathSeg {
        KeyPathSeg {
            boundary: false,
            name: value.to_string(),
            is_index: true,
            index_value: Some(value),
        }
    }

    fn path(root: &str, segs: Vec<KeyPathSeg>) -> KeyPath {
        KeyPath {
            root: root.into(),
            segs,
        }
    }

    #[test]
    fn prefix_overlap_with_write_conflicts() {
        let whole = path("data", vec![]);
        let part = path("data", vec![field("field")]);
        assert!(keys_conflict(&whole, KeyMode::Write, &part, KeyMode::Read));
        assert!(!keys_conflict(&whole, KeyMode::Read, &part, KeyMode::Read));
    }

    #[test]
    fn different_roots_never_conflict() {
        let a = path("a", vec![]);
        let b = path("b", vec![]);
        assert!(!keys_conflict(&a, KeyMode::Write, &b, KeyMode::Write));
    }

    #[test]
    fn distinct_literal_indices_are_disjoint() {
        let one = path("xs", vec![index(0)]);
        let two = path("xs", vec![index(1)]);
        assert!(!keys_conflict(&one, KeyMode::Write, &two, KeyMode::Write));
    }

    #[test]
    fn unknown_indices_conservatively_overlap() {
        let lit = path("xs", vec![index(0)]);
        let sym = path(
            "xs",
            vec![KeyPathSeg {
                boundary: false,
                name: "i".into(),
                is_index: true,
                index_value: None,
            }],
        );
        assert!(keys_conflict(&lit, KeyMode::Write, &sym, KeyMode::Read));
    }

    #[test]
    fn boundary_truncates_traversal() {
        let marked = path(
            "data",
            vec![KeyPathSeg {
                boundary: true,
                name: "left".into(),
                is_index: false,
                index_value: None,
            }],
        );
        let deeper = path("data", vec![field("right"), field("x")]);
        // The boundary on `marked` makes it cover everything past it.
        assert!(paths_overlap(&marked, &deeper));
    }

    #[test]
    fn acquire_is_idempotent_under_cover() {
        let mut ctx = KeyContext::new();
        ctx.push_scope();
        assert!(ctx.acquire(path("data", vec![]), KeyMode::Write));
        assert!(!ctx.acquire(path("data", vec![field("x")]), KeyMode::Read));
        ctx.pop_scope();
        assert!(!ctx.any_held());
    }

    #[test]
    fn canonical_order_is_lexicographic() {
        let keys = vec![
            (path("b", vec![]), KeyMode::Read),
            (path("a", vec![]), KeyMode::Write),
        ];
        assert!(!in_canonical_order(&keys));
        let sorted = canonical_order(&keys);
        assert_eq!(sorted[0].0.root, "a");
    }
}
