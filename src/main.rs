// SPDX-License-Identifier: PMPL-1.0-or-later

//! c0: the Cursive0 bootstrap compiler driver.
//!
//! `c0 [--assembly <name>] <input>` compiles the project rooted at
//! `<input>`. Exit code 0 on success, 2 on diagnostic failure or subset
//! rejection. `CURSIVE0_DEBUG_PHASES` turns on the phase log on stderr.

use anyhow::Result;
use clap::Parser;
use cursive0::driver;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "c0")]
#[command(version)]
#[command(about = "Cursive0 bootstrap compiler (x86_64-pc-windows-msvc)")]
struct Cli {
    /// Project root (directory containing cursive.toml)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Assembly to build when the manifest declares several
    #[arg(long, value_name = "NAME")]
    assembly: Option<String>,

    /// Write per-module textual or bitcode IR alongside the objects
    #[arg(long, value_name = "FORMAT", value_parser = ["ll", "bc"])]
    emit_ir: Option<String>,

    /// Stop after analysis; write no outputs
    #[arg(long, default_value_t = false)]
    check: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let options = driver::BuildOptions {
        assembly: cli.assembly,
        emit_ir: cli.emit_ir,
        write_outputs: !cli.check,
    };
    let outcome = driver::compile(&cli.input, &options)?;
    std::process::exit(outcome.exit_code());
}
