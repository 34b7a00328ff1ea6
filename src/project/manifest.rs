// SPDX-License-Identifier: PMPL-1.0-or-later

//! Manifest parsing and validation (`cursive.toml`).

use crate::diag::{Diagnostic, DiagnosticStream};
use serde::Deserialize;
use std::path::Path;

pub const MANIFEST_NAME: &str = "cursive.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyKind {
    Executable,
    Library,
}

impl AssemblyKind {
    fn parse(text: &str) -> Option<Self> {
        match text {
            "executable" => Some(AssemblyKind::Executable),
            "library" => Some(AssemblyKind::Library),
            _ => None,
        }
    }
}

/// A manifest entry that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedAssembly {
    pub name: String,
    pub kind: AssemblyKind,
    pub root: String,
    pub out_dir: Option<String>,
    pub emit_ir: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    assembly: Vec<RawAssembly>,
    #[serde(flatten)]
    unknown: toml::Table,
}

#[derive(Debug, Deserialize)]
struct RawAssembly {
    name: Option<String>,
    kind: Option<String>,
    root: Option<String>,
    out_dir: Option<String>,
    emit_ir: Option<String>,
    #[serde(flatten)]
    unknown: toml::Table,
}

#[derive(Debug, Default)]
pub struct ManifestResult {
    pub assemblies: Option<Vec<ValidatedAssembly>>,
    pub diags: DiagnosticStream,
}

/// Read and validate the manifest in `project_root`.
pub fn parse_manifest(project_root: &Path) -> ManifestResult {
    let mut result = ManifestResult::default();
    let path = project_root.join(MANIFEST_NAME);

    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) => {
            result.diags.emit(Diagnostic::from_code(
                "E-PRJ-0201",
                None,
                Some(&format!("{}: {err}", path.display())),
            ));
            return result;
        }
    };

    let raw: RawManifest = match toml::from_str(&text) {
        Ok(raw) => raw,
        Err(err) => {
            result.diags.emit(Diagnostic::from_code(
                "E-PRJ-0201",
                None,
                Some(&err.to_string()),
            ));
            return result;
        }
    };

    for key in raw.unknown.keys() {
        result
            .diags
            .emit(Diagnostic::from_code("W-PRJ-0206", None, Some(key)));
    }

    if raw.assembly.is_empty() {
        result
            .diags
            .emit(Diagnostic::from_code("E-PRJ-0202", None, None));
        return result;
    }

    let mut validated = Vec::new();
    for entry in raw.assembly {
        if let Some(assembly) = validate_assembly(entry, &mut result.diags) {
            validated.push(assembly);
        }
    }
    if !result.diags.has_error() {
        result.assemblies = Some(validated);
    }
    result
}

fn validate_assembly(raw: RawAssembly, diags: &mut DiagnosticStream) -> Option<ValidatedAssembly> {
    for key in raw.unknown.keys() {
        diags.emit(Diagnostic::from_code("W-PRJ-0206", None, Some(key)));
    }

    let name = raw.name.unwrap_or_default();
    if !is_valid_identifier(&name) || crate::syntax::token::is_keyword(&name) {
        diags.emit(Diagnostic::from_code("E-PRJ-0203", None, Some(&name)));
        return None;
    }

    let kind_text = raw.kind.unwrap_or_default();
    let kind = match AssemblyKind::parse(&kind_text) {
        Some(kind) => kind,
        None => {
            diags.emit(Diagnostic::from_code("E-PRJ-0204", None, Some(&kind_text)));
            return None;
        }
    };

    let root = match raw.root {
        Some(root) if !root.is_empty() => root,
        _ => {
            diags.emit(Diagnostic::from_code(
                "E-PRJ-0302",
                None,
                Some("assembly.root is required"),
            ));
            return None;
        }
    };

    Some(ValidatedAssembly {
        name,
        kind,
        root,
        out_dir: raw.out_dir,
        emit_ir: raw.emit_ir,
    })
}

pub fn is_valid_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_rules() {
        assert!(is_valid_identifier("app"));
        assert!(is_valid_identifier("_x9"));
        assert!(!is_valid_identifier("9x"));
        assert!(!is_valid_identifier("a-b"));
        assert!(!is_valid_identifier(""));
    }
}
