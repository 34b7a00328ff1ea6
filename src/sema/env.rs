// SPDX-License-Identifier: PMPL-1.0-or-later

//! Scope chains and the per-procedure checking environment.

use crate::sema::types::TypeRef;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct TypeBinding {
    pub mutable: bool,
    pub ty: TypeRef,
}

/// A stack of lexical scopes; pushes and pops mirror statement scopes.
#[derive(Debug, Default)]
pub struct TypeEnv {
    scopes: Vec<HashMap<String, TypeBinding>>,
}

impl TypeEnv {
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }

    pub fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop(&mut self) {
        self.scopes.pop();
    }

    pub fn bind(&mut self, name: &str, mutable: bool, ty: TypeRef) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), TypeBinding { mutable, ty });
        }
    }

    /// Parent lookup walks the chain innermost-first.
    pub fn lookup(&self, name: &str) -> Option<&TypeBinding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}

/// Byte ranges covered by `unsafe { … }` blocks, per file.
#[derive(Debug, Default)]
pub struct UnsafeRanges {
    ranges: HashMap<String, Vec<(usize, usize)>>,
}

impl UnsafeRanges {
    pub fn record(&mut self, file: &str, start: usize, end: usize) {
        self.ranges
            .entry(file.to_string())
            .or_default()
            .push((start, end));
    }

    pub fn contains(&self, file: &str, start: usize, end: usize) -> bool {
        self.ranges
            .get(file)
            .is_some_and(|rs| rs.iter().any(|(s, e)| *s <= start && end <= *e))
    }
}
