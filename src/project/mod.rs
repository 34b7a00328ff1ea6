// SPDX-License-Identifier: PMPL-1.0-or-later

//! Project loading (phase P0).
//!
//! Resolves the manifest, discovers modules, computes output paths, and
//! selects the assembly to build. Everything here reports through the
//! diagnostic stream; only host-level surprises (a manifest that vanishes
//! mid-read) surface as `anyhow` errors in the driver.

pub mod discovery;
pub mod link;
pub mod manifest;
pub mod outputs;

use crate::diag::{Diagnostic, DiagnosticStream};
use discovery::ModuleInfo;
use manifest::{AssemblyKind, ValidatedAssembly};
use outputs::OutputPaths;
use std::path::{Path, PathBuf};

/// One buildable assembly with its discovered modules and output layout.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub name: String,
    pub kind: AssemblyKind,
    pub source_root: PathBuf,
    pub emit_ir: Option<String>,
    pub outputs: OutputPaths,
    pub modules: Vec<ModuleInfo>,
}

/// A loaded project: the root plus the selected assembly.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub assembly: Assembly,
}

#[derive(Debug, Default)]
pub struct LoadProjectResult {
    pub project: Option<Project>,
    pub diags: DiagnosticStream,
}

/// Load the project rooted at `project_root` and select the assembly named
/// by `target` (or the only one, when the manifest declares exactly one).
pub fn load_project(project_root: &Path, target: Option<&str>) -> LoadProjectResult {
    let mut result = LoadProjectResult::default();

    let parsed = manifest::parse_manifest(project_root);
    result.diags.merge(parsed.diags);
    let assemblies = match parsed.assemblies {
        Some(list) => list,
        None => return result,
    };

    let mut built = Vec::new();
    for spec in &assemblies {
        if let Some(assembly) = build_assembly(project_root, spec, &mut result.diags) {
            built.push(assembly);
        }
    }
    if result.diags.has_error() {
        return result;
    }

    let selected = select_assembly(built, target, &mut result.diags);
    result.project = selected.map(|assembly| Project {
        root: project_root.to_path_buf(),
        assembly,
    });
    result
}

fn build_assembly(
    project_root: &Path,
    spec: &ValidatedAssembly,
    diags: &mut DiagnosticStream,
) -> Option<Assembly> {
    let source_root = match resolve_source_root(project_root, &spec.root) {
        Some(path) => path,
        None => {
            diags.emit(Diagnostic::from_code("E-PRJ-0304", None, Some(&spec.root)));
            return None;
        }
    };
    if !source_root.is_dir() {
        diags.emit(Diagnostic::from_code(
            "E-PRJ-0302",
            None,
            Some(&source_root.display().to_string()),
        ));
        return None;
    }

    let discovered = discovery::discover_modules(&source_root, &spec.name);
    diags.merge(discovered.diags);
    if diags.has_error() {
        return None;
    }

    Some(Assembly {
        name: spec.name.clone(),
        kind: spec.kind,
        source_root,
        emit_ir: spec.emit_ir.clone(),
        outputs: outputs::compute_output_paths(project_root, spec),
        modules: discovered.modules,
    })
}

/// The assembly root must stay inside the project root. `..` components
/// are rejected rather than resolved.
fn resolve_source_root(project_root: &Path, root: &str) -> Option<PathBuf> {
    let rel = Path::new(root);
    if rel.is_absolute() {
        return None;
    }
    for comp in rel.components() {
        match comp {
            std::path::Component::Normal(_) | std::path::Component::CurDir => {}
            _ => return None,
        }
    }
    Some(project_root.join(rel))
}

fn select_assembly(
    assemblies: Vec<Assembly>,
    target: Option<&str>,
    diags: &mut DiagnosticStream,
) -> Option<Assembly> {
    match target {
        None => {
            if assemblies.len() == 1 {
                return assemblies.into_iter().next();
            }
            diags.emit(Diagnostic::from_code(
                "E-PRJ-0205",
                None,
                Some("pass --assembly to pick one of several"),
            ));
            None
        }
        Some(name) => {
            for assembly in assemblies {
                if assembly.name == name {
                    return Some(assembly);
                }
            }
            diags.emit(Diagnostic::from_code("E-PRJ-0205", None, Some(name)));
            None
        }
    }
}
