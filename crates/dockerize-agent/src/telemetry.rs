//! Run reports.
//!
//! Two outputs per finished (or suspended) run:
//! - `run-report.json` in the project's cache directory: the latest run
//! - `telemetry.jsonl` in the cache root: append-only log of every run
//!
//! Write failures are logged and never fail the run.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use healing::{ErrorKind, Phase, RunState, RunStatus};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::prompts::PROMPT_VERSION;

pub const TELEMETRY_FILE: &str = "telemetry.jsonl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub project_dir: String,
    pub status: RunStatus,
    pub final_phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub generation_attempts: u32,
    pub runtime_attempts: u32,
    pub repairs: u32,
    pub escalations: u32,
    pub hints: usize,
    pub transitions: usize,
    /// Learnings per error kind
    pub failures: BTreeMap<ErrorKind, usize>,
    pub containers: usize,
    pub prompt_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: i64,
}

impl RunReport {
    pub fn from_state(state: &RunState) -> Self {
        Self {
            run_id: state.run_id.clone(),
            project_dir: state.project_dir.display().to_string(),
            status: state.status(),
            final_phase: state.phase(),
            error_code: state.terminal_code.clone(),
            error: state.terminal_error.clone(),
            generation_attempts: state.counters.generation,
            runtime_attempts: state.counters.runtime,
            repairs: state.counters.repairs,
            escalations: state.counters.escalations,
            hints: state.ledger.hints().len(),
            transitions: state.machine.transitions().len(),
            failures: state.ledger.summary(),
            containers: state.containers.len(),
            prompt_version: PROMPT_VERSION.to_string(),
            started_at: state.started_at,
            finished_at: state.updated_at,
            duration_secs: (state.updated_at - state.started_at).num_seconds().max(0),
        }
    }
}

/// Write `report` as pretty JSON to `path`.
pub fn write_run_report(report: &RunReport, path: &Path) {
    match serde_json::to_string_pretty(report) {
        Ok(json) => match std::fs::write(path, json) {
            Ok(()) => info!(path = %path.display(), "Wrote run report"),
            Err(e) => warn!("Failed to write run report: {e}"),
        },
        Err(e) => warn!("Failed to serialize run report: {e}"),
    }
}

/// Append `report` as one JSON line to `telemetry.jsonl` in `cache_root`.
pub fn append_telemetry(report: &RunReport, cache_root: &Path) {
    let path = cache_root.join(TELEMETRY_FILE);
    match serde_json::to_string(report) {
        Ok(json) => {
            use std::io::Write;
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
            {
                Ok(mut file) => {
                    if let Err(e) = writeln!(file, "{json}") {
                        warn!("Failed to append telemetry: {e}");
                    }
                }
                Err(e) => warn!("Failed to open telemetry file: {e}"),
            }
        }
        Err(e) => warn!("Failed to serialize telemetry: {e}"),
    }
}
