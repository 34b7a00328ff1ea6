// SPDX-License-Identifier: PMPL-1.0-or-later

//! Module discovery.
//!
//! Every directory under the assembly root containing at least one
//! `.cursive` file is a module. The module's path key is the relative
//! directory with `/` replaced by `::`; the root itself is the
//! assembly-named module. Ordering is case-folded lexicographic with
//! UTF-8 bytewise tie-breaks so builds are deterministic across hosts.

use crate::diag::{Diagnostic, DiagnosticStream};
use crate::project::manifest::is_valid_identifier;
use crate::syntax::token::is_keyword;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const SOURCE_EXT: &str = "cursive";

/// One discovered module: its `::`-joined path key, its directory, and the
/// sorted list of source files that make up its compilation unit.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub path_key: String,
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ModulesResult {
    pub modules: Vec<ModuleInfo>,
    pub diags: DiagnosticStream,
}

pub fn discover_modules(source_root: &Path, assembly_name: &str) -> ModulesResult {
    let mut result = ModulesResult::default();
    let mut by_dir: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();

    for entry in WalkDir::new(source_root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                result.diags.emit(Diagnostic::error(
                    "E-SRC-0102",
                    format!("walking {}: {err}", source_root.display()),
                    None,
                ));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SOURCE_EXT) {
            continue;
        }
        let dir = path.parent().unwrap_or(source_root).to_path_buf();
        by_dir.entry(dir).or_default().push(path.to_path_buf());
    }

    for (dir, mut files) in by_dir {
        files.sort();
        let path_key = match module_path_key(source_root, &dir, assembly_name, &mut result.diags) {
            Some(key) => key,
            None => continue,
        };
        result.modules.push(ModuleInfo {
            path_key,
            dir,
            files,
        });
    }

    detect_case_collisions(&result.modules, &mut result.diags);

    result
        .modules
        .sort_by(|a, b| deterministic_order(&a.path_key, &b.path_key));
    result
}

/// Case-folded lexicographic order, ties broken by UTF-8 bytewise order.
pub fn deterministic_order(a: &str, b: &str) -> std::cmp::Ordering {
    let fold_a = a.to_lowercase();
    let fold_b = b.to_lowercase();
    fold_a
        .as_bytes()
        .cmp(fold_b.as_bytes())
        .then_with(|| a.as_bytes().cmp(b.as_bytes()))
}

fn module_path_key(
    source_root: &Path,
    dir: &Path,
    assembly_name: &str,
    diags: &mut DiagnosticStream,
) -> Option<String> {
    let rel = dir.strip_prefix(source_root).ok()?;
    let mut parts = vec![assembly_name.to_string()];
    for comp in rel.components() {
        let text = comp.as_os_str().to_string_lossy().to_string();
        if !is_valid_identifier(&text) {
            diags.emit(Diagnostic::from_code("E-MOD-0101", None, Some(&text)));
            return None;
        }
        if is_keyword(&text) {
            diags.emit(Diagnostic::from_code("E-MOD-0102", None, Some(&text)));
            return None;
        }
        parts.push(text);
    }
    Some(parts.join("::"))
}

/// Two module directories that differ only by case collide on
/// case-insensitive filesystems. Both modules are preserved; the build is
/// still rejected so the project is portable.
fn detect_case_collisions(modules: &[ModuleInfo], diags: &mut DiagnosticStream) {
    let mut folded: BTreeMap<String, &str> = BTreeMap::new();
    for module in modules {
        let key = module.path_key.to_lowercase();
        match folded.get(&key) {
            Some(first) if *first != module.path_key => {
                diags.emit(Diagnostic::from_code(
                    "W-MOD-0103",
                    None,
                    Some(&format!("{} / {}", first, module.path_key)),
                ));
                diags.emit(Diagnostic::from_code(
                    "E-MOD-0104",
                    None,
                    Some(&module.path_key),
                ));
            }
            Some(_) => {}
            None => {
                folded.insert(key, &module.path_key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_is_case_folded_then_bytewise() {
        assert_eq!(deterministic_order("App", "app"), std::cmp::Ordering::Less);
        assert_eq!(deterministic_order("app", "Base"), std::cmp::Ordering::Less);
        assert_eq!(
            deterministic_order("base", "App"),
            std::cmp::Ordering::Greater
        );
    }
}
