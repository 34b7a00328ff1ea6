// SPDX-License-Identifier: PMPL-1.0-or-later

//! The phase-ordered compiler driver.
//!
//! P0 project load → P1 parse & subset check → P2 collect & resolve →
//! P3 type check → P4 IR lower → P5 emit & link. No phase mutates an
//! earlier phase's output; each appends diagnostics, and a phase with an
//! Error-severity diagnostic skips the phases that structurally depend
//! on it.

use crate::diag::{compile_status, render_colored, CompileStatus, DiagnosticStream};
use crate::ir::lower::lower_assembly;
use crate::project::manifest::AssemblyKind;
use crate::project::{link, load_project, outputs, Project};
use crate::sema::check::{check, validate_entry};
use crate::sema::resolve::resolve_signatures;
use crate::sema::symbols::collect;
use crate::source::load_source_file;
use crate::syntax::ast::AstModule;
use crate::syntax::parser::parse_module;
use crate::syntax::subset::check_subset;
use crate::trace;
use anyhow::{Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub assembly: Option<String>,
    /// `ll` or `bc`; overrides the manifest's `emit_ir`.
    pub emit_ir: Option<String>,
    /// Write objects/IR and link. Disabled for check-only runs and tests.
    pub write_outputs: bool,
}

#[derive(Debug)]
pub struct BuildOutcome {
    pub status: CompileStatus,
    pub diags: DiagnosticStream,
    pub written: Vec<PathBuf>,
}

impl BuildOutcome {
    pub fn exit_code(&self) -> i32 {
        match self.status {
            CompileStatus::Ok => 0,
            CompileStatus::Fail => 2,
        }
    }
}

fn phase_log(enabled: bool, phase: &str, detail: &str) {
    if enabled {
        eprintln!("{} {detail}", format!("[{phase}]").cyan());
    }
    trace::set_phase(phase);
}

/// Run the full pipeline over the project at `root`.
pub fn compile(root: &Path, options: &BuildOptions) -> Result<BuildOutcome> {
    let debug_phases = std::env::var_os("CURSIVE0_DEBUG_PHASES").is_some();
    if let Ok(path) = std::env::var("CURSIVE0_TRACE") {
        trace::init(&path);
    }
    let mut diags = DiagnosticStream::new();

    // P0: project load.
    phase_log(debug_phases, "P0", "loading project");
    let loaded = load_project(root, options.assembly.as_deref());
    diags.merge(loaded.diags);
    let Some(project) = loaded.project else {
        report(&diags);
        return Ok(fail(diags));
    };
    trace::record("Project-Load", None, &project.assembly.name);

    if !outputs::check_output_hygiene(&project, &mut diags) {
        report(&diags);
        return Ok(fail(diags));
    }

    // P1: parse every module; modules are independent, so the parse
    // fans out across threads and merges back in deterministic order.
    phase_log(
        debug_phases,
        "P1",
        &format!("parsing {} modules", project.assembly.modules.len()),
    );
    let parsed: Vec<(AstModule, DiagnosticStream)> = project
        .assembly
        .modules
        .iter()
        .map(parse_one_module)
        .collect();
    let mut modules = Vec::with_capacity(parsed.len());
    for (module, module_diags) in parsed {
        diags.merge(module_diags);
        modules.push(module);
    }
    if diags.has_error() {
        report(&diags);
        return Ok(fail(diags));
    }

    // P2: collect Σ and resolve names.
    phase_log(debug_phases, "P2", "collecting symbols");
    let collected = collect(&project.assembly.name, modules);
    diags.merge(collected.diags);
    let sigma = collected.sigma;
    diags.merge(resolve_signatures(&sigma));
    if diags.has_error() {
        report(&diags);
        return Ok(fail(diags));
    }

    // P3: type check.
    phase_log(debug_phases, "P3", "type checking");
    let checked = check(&sigma);
    diags.merge(checked.diags.clone());
    if project.assembly.kind == AssemblyKind::Executable {
        diags.merge(validate_entry(&sigma, &project.assembly.name));
    }
    if diags.has_error() {
        report(&diags);
        return Ok(fail(diags));
    }

    // P4: lower to IR.
    phase_log(debug_phases, "P4", "lowering");
    let (ir_modules, ctx) = lower_assembly(&sigma, &checked);

    // P5: emit and link (external collaborators).
    let mut written = Vec::new();
    if options.write_outputs {
        phase_log(debug_phases, "P5", "emitting");
        let emit_ir = options
            .emit_ir
            .clone()
            .or_else(|| project.assembly.emit_ir.clone());
        written = emit_outputs(&project, &ir_modules, &ctx, emit_ir.as_deref(), &mut diags)?;
        if project.assembly.kind == AssemblyKind::Executable && !diags.has_error() {
            let objs: Vec<PathBuf> = project
                .assembly
                .modules
                .iter()
                .map(|m| outputs::obj_path(&project, m))
                .collect();
            let exe = outputs::exe_path(&project);
            let result = link::link(&objs, &project, &exe);
            diags.merge(result.diags);
            if result.status == link::LinkStatus::Ok {
                written.push(exe);
            }
        }
    }

    report(&diags);
    Ok(BuildOutcome {
        status: compile_status(&diags),
        diags,
        written,
    })
}

fn fail(diags: DiagnosticStream) -> BuildOutcome {
    BuildOutcome {
        status: CompileStatus::Fail,
        diags,
        written: Vec::new(),
    }
}

/// Surface the stream in insertion order; never re-sorted.
fn report(diags: &DiagnosticStream) {
    for diag in diags.ordered() {
        eprintln!("{}", render_colored(diag));
    }
}

/// Parse one module: every `.cursive` file in its directory, items
/// concatenated in file order, subset scans included.
fn parse_one_module(
    module: &crate::project::discovery::ModuleInfo,
) -> (AstModule, DiagnosticStream) {
    let mut diags = DiagnosticStream::new();
    let mut items = Vec::new();
    for file in &module.files {
        let loaded = load_source_file(file);
        diags.merge(loaded.diags);
        let Some(source) = loaded.source else {
            continue;
        };
        let subset = check_subset(&source);
        diags.merge(subset.diags);
        let parsed = parse_module(&source, &module.path_key);
        diags.merge(parsed.diags);
        items.extend(parsed.module.items);
    }
    (
        AstModule {
            path_key: module.path_key.clone(),
            items,
        },
        diags,
    )
}

fn emit_outputs(
    project: &Project,
    ir_modules: &[crate::ir::IrModule],
    ctx: &crate::ir::lower::LowerCtx,
    emit_ir: Option<&str>,
    diags: &mut DiagnosticStream,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    std::fs::create_dir_all(&project.assembly.outputs.obj_dir)
        .with_context(|| "creating obj dir")?;
    if emit_ir.is_some() {
        std::fs::create_dir_all(&project.assembly.outputs.ir_dir)
            .with_context(|| "creating ir dir")?;
    }
    std::fs::create_dir_all(&project.assembly.outputs.bin_dir)
        .with_context(|| "creating bin dir")?;

    for (info, ir) in project.assembly.modules.iter().zip(ir_modules.iter()) {
        let text = crate::backend::llvm::emit_ll(ir, ctx);

        if let Some(kind) = emit_ir {
            let path = outputs::ir_path(project, info, kind);
            match kind {
                "ll" => {
                    std::fs::write(&path, &text)
                        .with_context(|| format!("writing {}", path.display()))?;
                    written.push(path);
                }
                "bc" => {
                    // Bitcode needs the external assembler.
                    match assemble_bitcode(&text) {
                        Some(bytes) => {
                            std::fs::write(&path, bytes)
                                .with_context(|| format!("writing {}", path.display()))?;
                            written.push(path);
                        }
                        None => {
                            diags.emit(crate::diag::Diagnostic::from_code(
                                "E-OUT-0403",
                                None,
                                Some("llvm-as not found"),
                            ));
                        }
                    }
                }
                other => {
                    diags.emit(crate::diag::Diagnostic::from_code(
                        "E-OUT-0403",
                        None,
                        Some(other),
                    ));
                }
            }
        }

        let obj = outputs::obj_path(project, info);
        match compile_object(&text) {
            Some(bytes) => {
                std::fs::write(&obj, bytes)
                    .with_context(|| format!("writing {}", obj.display()))?;
                written.push(obj);
            }
            None => {
                diags.emit(crate::diag::Diagnostic::from_code(
                    "E-OUT-0402",
                    None,
                    Some("llc not found"),
                ));
            }
        }
    }
    Ok(written)
}

fn run_tool(tool: &str, args: &[&str], stdin: &str) -> Option<Vec<u8>> {
    use std::io::Write;
    use std::process::{Command, Stdio};
    let mut child = Command::new(tool)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;
    child
        .stdin
        .as_mut()
        .and_then(|s| s.write_all(stdin.as_bytes()).ok())?;
    let output = child.wait_with_output().ok()?;
    output.status.success().then_some(output.stdout)
}

fn assemble_bitcode(ll_text: &str) -> Option<Vec<u8>> {
    run_tool("llvm-as", &["-", "-o", "-"], ll_text)
}

fn compile_object(ll_text: &str) -> Option<Vec<u8>> {
    run_tool(
        "llc",
        &["-", "--filetype=obj", "-mtriple=x86_64-pc-windows-msvc", "-o", "-"],
        ll_text,
    )
}
