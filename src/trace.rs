// SPDX-License-Identifier: PMPL-1.0-or-later

//! Conformance trace sink.
//!
//! A process-wide, mutex-guarded append-only log used by the conformance
//! test harness to observe which rules fired. Not on the hot path: every
//! record is one formatted line. If the sink file cannot be opened, tracing
//! stays disabled and records are dropped silently.

use crate::source::Span;
use chrono::Utc;
use serde_json::json;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::{Mutex, OnceLock};

struct TraceSink {
    file: File,
    phase: String,
}

static SINK: OnceLock<Mutex<Option<TraceSink>>> = OnceLock::new();

fn sink() -> &'static Mutex<Option<TraceSink>> {
    SINK.get_or_init(|| Mutex::new(None))
}

/// Open the trace file. Called once by the driver when the
/// `CURSIVE0_TRACE` environment variable names a path.
pub fn init(path: &str) {
    let opened = OpenOptions::new().create(true).append(true).open(path);
    if let Ok(file) = opened {
        if let Ok(mut guard) = sink().lock() {
            *guard = Some(TraceSink {
                file,
                phase: String::from("P0"),
            });
        }
    }
}

pub fn enabled() -> bool {
    sink().lock().map(|g| g.is_some()).unwrap_or(false)
}

/// Record the currently-running phase; prefixed onto subsequent records.
pub fn set_phase(phase: &str) {
    if let Ok(mut guard) = sink().lock() {
        if let Some(s) = guard.as_mut() {
            s.phase = phase.to_string();
        }
    }
}

/// Append one `(timestamp, phase, rule, span, payload)` line.
pub fn record(rule_id: &str, span: Option<&Span>, payload: &str) {
    if let Ok(mut guard) = sink().lock() {
        if let Some(s) = guard.as_mut() {
            let line = json!({
                "at": Utc::now().to_rfc3339(),
                "phase": s.phase,
                "rule": rule_id,
                "span": span.map(|sp| {
                    format!("{}:{}:{}", sp.file, sp.start_line, sp.start_col)
                }),
                "payload": payload,
            });
            // A failed write disables nothing; the next record simply tries
            // again. The sink is best-effort by contract.
            let _ = writeln!(s.file, "{line}");
        }
    }
}

pub fn rule(rule_id: &str) {
    record(rule_id, None, "");
}
