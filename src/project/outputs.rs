// SPDX-License-Identifier: PMPL-1.0-or-later

//! Output path layout and hygiene.
//!
//! `build/obj/<module>.o`, `build/ir/<module>.{ll,bc}`,
//! `build/bin/<assembly>.exe`. Module path keys use `::`, which cannot
//! appear in file names; the file stem substitutes `.`.

use crate::diag::{Diagnostic, DiagnosticStream};
use crate::project::discovery::ModuleInfo;
use crate::project::manifest::ValidatedAssembly;
use crate::project::Project;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub root: PathBuf,
    pub obj_dir: PathBuf,
    pub ir_dir: PathBuf,
    pub bin_dir: PathBuf,
}

pub fn compute_output_paths(project_root: &Path, assembly: &ValidatedAssembly) -> OutputPaths {
    let root = match &assembly.out_dir {
        Some(dir) => project_root.join(dir),
        None => project_root.join("build"),
    };
    OutputPaths {
        obj_dir: root.join("obj"),
        ir_dir: root.join("ir"),
        bin_dir: root.join("bin"),
        root,
    }
}

fn module_stem(module: &ModuleInfo) -> String {
    module.path_key.replace("::", ".")
}

pub fn obj_path(project: &Project, module: &ModuleInfo) -> PathBuf {
    project
        .assembly
        .outputs
        .obj_dir
        .join(format!("{}.o", module_stem(module)))
}

pub fn ir_path(project: &Project, module: &ModuleInfo, emit_ir: &str) -> PathBuf {
    project
        .assembly
        .outputs
        .ir_dir
        .join(format!("{}.{}", module_stem(module), emit_ir))
}

pub fn exe_path(project: &Project) -> PathBuf {
    project
        .assembly
        .outputs
        .bin_dir
        .join(format!("{}.exe", project.assembly.name))
}

/// All object paths within one build must be unique; a collision means two
/// modules would overwrite each other's artifacts.
pub fn check_output_hygiene(project: &Project, diags: &mut DiagnosticStream) -> bool {
    let mut seen = BTreeSet::new();
    let mut clean = true;
    for module in &project.assembly.modules {
        let path = obj_path(project, module);
        if !seen.insert(path.clone()) {
            diags.emit(Diagnostic::from_code(
                "E-OUT-0401",
                None,
                Some(&path.display().to_string()),
            ));
            clean = false;
        }
    }
    clean
}
