// SPDX-License-Identifier: PMPL-1.0-or-later

//! Link step (phase P5, external collaborator).
//!
//! The runtime is a pre-built static archive with a fixed symbol set; the
//! core only records references to it. Linking shells out to `lld-link`
//! and verifies that every required runtime symbol resolved.

use crate::diag::{Diagnostic, DiagnosticStream};
use crate::project::Project;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Symbols the runtime archive must provide. Missing symbols at link time
/// are `E-OUT-0408 RuntimeIncompatible`.
pub const RUNTIME_REQUIRED_SYMS: &[&str] = &[
    "cursive::runtime::panic",
    "cursive::runtime::context_init",
    "cursive::runtime::region::new_scoped",
    "cursive::runtime::region::alloc",
    "cursive::runtime::region::freeze",
    "cursive::runtime::region::thaw",
    "cursive::runtime::region::free_unchecked",
    "cursive::runtime::region::reset_unchecked",
    "cursive::runtime::fs::open_read",
    "cursive::runtime::fs::read_file",
    "cursive::runtime::fs::write_file",
    "cursive::runtime::fs::write_stdout",
    "cursive::runtime::fs::write_stderr",
    "cursive::runtime::heap::alloc_raw",
    "cursive::runtime::heap::dealloc_raw",
    "cursive::runtime::string::from",
    "cursive::runtime::string::drop_managed",
    "cursive::runtime::string::append",
    "cursive::runtime::string::length",
    "cursive::runtime::bytes::from_slice",
    "cursive::runtime::bytes::drop_managed",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Ok,
    ToolNotFound,
    RuntimeMissing,
    RuntimeIncompatible,
    Fail,
}

#[derive(Debug)]
pub struct LinkResult {
    pub status: LinkStatus,
    pub diags: DiagnosticStream,
}

pub fn runtime_lib_path(project: &Project) -> PathBuf {
    project.root.join("runtime").join("cursive_rt.lib")
}

fn resolve_tool(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        for candidate in [dir.join(name), dir.join(format!("{name}.exe"))] {
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Link the given objects into the assembly executable.
pub fn link(objs: &[PathBuf], project: &Project, exe: &Path) -> LinkResult {
    let mut diags = DiagnosticStream::new();

    let tool = match resolve_tool("lld-link") {
        Some(tool) => tool,
        None => {
            diags.emit(Diagnostic::from_code("E-OUT-0405", None, Some("lld-link")));
            return LinkResult {
                status: LinkStatus::ToolNotFound,
                diags,
            };
        }
    };

    let runtime = runtime_lib_path(project);
    if !runtime.is_file() {
        diags.emit(Diagnostic::from_code(
            "E-OUT-0407",
            None,
            Some(&runtime.display().to_string()),
        ));
        return LinkResult {
            status: LinkStatus::RuntimeMissing,
            diags,
        };
    }

    let mut cmd = Command::new(&tool);
    cmd.arg(format!("/OUT:{}", exe.display()))
        .arg("/SUBSYSTEM:CONSOLE")
        .arg("/ENTRY:main");
    for obj in objs {
        cmd.arg(obj);
    }
    cmd.arg(&runtime);

    match cmd.output() {
        Ok(output) if output.status.success() => LinkResult {
            status: LinkStatus::Ok,
            diags,
        },
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let status = if stderr.contains("unresolved external symbol") {
                diags.emit(Diagnostic::from_code(
                    "E-OUT-0408",
                    None,
                    Some(stderr.lines().next().unwrap_or("")),
                ));
                LinkStatus::RuntimeIncompatible
            } else {
                diags.emit(Diagnostic::error(
                    "E-OUT-0402",
                    format!("linker failed: {}", stderr.lines().next().unwrap_or("")),
                    None,
                ));
                LinkStatus::Fail
            };
            LinkResult { status, diags }
        }
        Err(err) => {
            diags.emit(Diagnostic::error(
                "E-OUT-0402",
                format!("cannot run linker: {err}"),
                None,
            ));
            LinkResult {
                status: LinkStatus::Fail,
                diags,
            }
        }
    }
}
