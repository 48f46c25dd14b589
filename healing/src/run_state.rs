//! Persisted state of one run.
//!
//! Everything needed to resume a suspended run lives here: the phase machine,
//! the attempt counters, the ledger, the current artifacts and the pending
//! escalation. Secret values never do.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collaborators::ProjectAnalysis;
use crate::error::HealingResult;
use crate::escalation::AttemptCounters;
use crate::gateway::EscalationRequest;
use crate::ledger::LearningLedger;
use crate::phase::{Phase, PhaseMachine};
use crate::readiness::{ContainerId, ReadinessResult};

/// Coarse status derived from the phase and the pending escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Waiting for an operator hint
    Suspended,
    Succeeded,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Suspended => write!(f, "suspended"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub project_dir: PathBuf,
    pub machine: PhaseMachine,
    pub counters: AttemptCounters,
    pub ledger: LearningLedger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<ProjectAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compose: Option<String>,
    /// Set when a repair produced both artifacts, so `GenerateCompose` keeps
    /// the repaired compose text instead of asking the oracle again.
    #[serde(default)]
    pub reuse_compose: bool,
    /// Containers started by the most recent `Start`
    #[serde(default)]
    pub containers: Vec<ContainerId>,
    #[serde(default)]
    pub readiness: Vec<ReadinessResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_escalation: Option<EscalationRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_code: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            project_dir: project_dir.into(),
            machine: PhaseMachine::new(),
            counters: AttemptCounters::new(),
            ledger: LearningLedger::new(),
            analysis: None,
            dockerfile: None,
            compose: None,
            reuse_compose: false,
            containers: Vec::new(),
            readiness: Vec::new(),
            pending_escalation: None,
            terminal_error: None,
            terminal_code: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn phase(&self) -> Phase {
        self.machine.current()
    }

    pub fn status(&self) -> RunStatus {
        match self.phase() {
            Phase::Success => RunStatus::Succeeded,
            Phase::Failed => RunStatus::Failed,
            _ if self.pending_escalation.is_some() => RunStatus::Suspended,
            _ => RunStatus::Running,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            project_dir: self.project_dir.clone(),
            status: self.status(),
            phase: self.phase(),
            attempts: self.counters.summary(),
            learnings: self.ledger.len(),
            hints: self.ledger.hints().len(),
            pending_escalation: self.pending_escalation.as_ref().map(|r| r.summary.clone()),
            terminal_error: self.terminal_error.clone(),
            elapsed: format_elapsed(self.updated_at - self.started_at),
        }
    }
}

fn format_elapsed(elapsed: chrono::Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

/// Run summary for reporting
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub project_dir: PathBuf,
    pub status: RunStatus,
    pub phase: Phase,
    pub attempts: String,
    pub learnings: usize,
    pub hints: usize,
    pub pending_escalation: Option<String>,
    pub terminal_error: Option<String>,
    pub elapsed: String,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Run: {} ({}, phase {})",
            &self.run_id[..8.min(self.run_id.len())],
            self.status,
            self.phase
        )?;
        writeln!(f, "Project: {}", self.project_dir.display())?;
        writeln!(f, "Attempts: {}", self.attempts)?;
        writeln!(f, "Learnings: {} | Hints: {}", self.learnings, self.hints)?;
        writeln!(f, "Elapsed: {}", self.elapsed)?;
        if let Some(ref escalation) = self.pending_escalation {
            writeln!(f, "Waiting for operator:\n{escalation}")?;
        }
        if let Some(ref error) = self.terminal_error {
            writeln!(f, "Error: {error}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Run State Persistence
// ============================================================================

/// Save run state to a JSON file.
///
/// Writes to a sibling temp file first so a crash never leaves a truncated
/// state file behind.
pub fn save_run_state(state: &RunState, path: &Path) -> HealingResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load run state from a JSON file
pub fn load_run_state(path: &Path) -> HealingResult<Option<RunState>> {
    if !path.exists() {
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)?;
    let state: RunState = serde_json::from_str(&json)?;
    Ok(Some(state))
}

/// Delete persisted run state file
pub fn clear_run_state(path: &Path) -> HealingResult<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{ErrorKind, HintRecord, Learning};

    #[test]
    fn test_new_state_is_running_at_analyze() {
        let state = RunState::new("/tmp/project");
        assert_eq!(state.phase(), Phase::Analyze);
        assert_eq!(state.status(), RunStatus::Running);
        assert!(state.ledger.is_empty());
    }

    #[test]
    fn test_pending_escalation_means_suspended() {
        let mut state = RunState::new("/tmp/project");
        state.pending_escalation = Some(EscalationRequest::new(
            Phase::Analyze,
            "test",
            &state.ledger,
            1,
        ));
        assert_eq!(state.status(), RunStatus::Suspended);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("run_state.json");

        let mut state = RunState::new(dir.path());
        state.machine.advance(Phase::GenerateDockerfile, None).unwrap();
        state.counters.enter_generation();
        state.ledger.record(Learning::new(
            Phase::GenerateDockerfile,
            ErrorKind::Generation,
            "empty reply",
            1,
        ));
        state.ledger.add_hint(HintRecord::new("use node:20-alpine"));
        state.dockerfile = Some("FROM node:20-alpine\n".into());
        state.containers = vec![ContainerId::new("abc")];

        save_run_state(&state, &path).unwrap();
        let loaded = load_run_state(&path).unwrap().unwrap();

        assert_eq!(loaded.run_id, state.run_id);
        assert_eq!(loaded.phase(), Phase::GenerateDockerfile);
        assert_eq!(loaded.counters, state.counters);
        assert_eq!(loaded.ledger.learnings(), state.ledger.learnings());
        assert_eq!(loaded.ledger.hints(), state.ledger.hints());
        assert_eq!(loaded.dockerfile, state.dockerfile);
        assert_eq!(loaded.containers, state.containers);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_load_missing_is_none_and_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_state.json");
        assert!(load_run_state(&path).unwrap().is_none());
        clear_run_state(&path).unwrap();

        save_run_state(&RunState::new(dir.path()), &path).unwrap();
        clear_run_state(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_summary_display() {
        let state = RunState::new("/srv/shop");
        let text = state.summary().to_string();
        assert!(text.contains("running"));
        assert!(text.contains("/srv/shop"));
    }
}
