//! Phase state machine with explicit phases and legal transition guards.
//!
//! Provides a typed phase model for the self-healing loop so that:
//! 1. Every phase transition is auditable and logged.
//! 2. Illegal transitions are rejected by `advance()` instead of silently
//!    corrupting the run.
//! 3. A persisted run can be replayed from its transition log.
//!
//! The orchestrator calls `advance()` to move between phases. Each call
//! validates the transition is legal and records it in the transition log.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The phases of one run.
///
/// Every run starts at `Analyze` and terminates at either `Success` or
/// `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Extracting project metadata (language, ports, secrets).
    Analyze,
    /// Collecting values for the secrets detected during analysis.
    CollectSecrets,
    /// Asking the oracle for a Dockerfile.
    GenerateDockerfile,
    /// Linting the generated Dockerfile.
    Validate,
    /// Asking the oracle for a compose file.
    GenerateCompose,
    /// `docker compose build`.
    Build,
    /// `docker compose up`.
    Start,
    /// Waiting for the started containers to become ready.
    Healthcheck,
    /// All containers healthy. Terminal.
    Success,
    /// Recovery exhausted or unrecoverable failure. Terminal.
    Failed,
}

impl Phase {
    /// Whether this is a terminal phase (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Runtime phases fail with runtime errors and take the repair path.
    pub fn is_runtime(self) -> bool {
        matches!(self, Self::Build | Self::Start | Self::Healthcheck)
    }

    /// Generation-cycle phases restart from `GenerateDockerfile` on failure.
    pub fn is_generation(self) -> bool {
        matches!(
            self,
            Self::GenerateDockerfile | Self::Validate | Self::GenerateCompose
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analyze => write!(f, "Analyze"),
            Self::CollectSecrets => write!(f, "CollectSecrets"),
            Self::GenerateDockerfile => write!(f, "GenerateDockerfile"),
            Self::Validate => write!(f, "Validate"),
            Self::GenerateCompose => write!(f, "GenerateCompose"),
            Self::Build => write!(f, "Build"),
            Self::Start => write!(f, "Start"),
            Self::Healthcheck => write!(f, "Healthcheck"),
            Self::Success => write!(f, "Success"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Legal transitions between phases.
///
/// ```text
/// Analyze            → CollectSecrets | GenerateDockerfile
/// CollectSecrets     → GenerateDockerfile
/// GenerateDockerfile → Validate | GenerateDockerfile
/// Validate           → GenerateCompose | GenerateDockerfile
/// GenerateCompose    → Build | GenerateDockerfile
/// Build              → Start | Validate | Build | GenerateDockerfile
/// Start              → Healthcheck | Validate | Build | GenerateDockerfile
/// Healthcheck        → Success | Validate | Build | GenerateDockerfile
/// any non-terminal   → Failed
/// ```
///
/// `→ GenerateDockerfile` covers both regeneration and resuming after a
/// human hint. `→ Validate` / `→ Build` from a runtime phase is the repair path.
pub fn is_legal_transition(from: Phase, to: Phase) -> bool {
    use Phase::*;

    if to == Failed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Analyze, CollectSecrets)
            | (Analyze, GenerateDockerfile)
            | (CollectSecrets, GenerateDockerfile)
            | (GenerateDockerfile, Validate)
            | (GenerateDockerfile, GenerateDockerfile)
            | (Validate, GenerateCompose)
            | (Validate, GenerateDockerfile)
            | (GenerateCompose, Build)
            | (GenerateCompose, GenerateDockerfile)
            // Runtime phases: forward on success, repair or regenerate on failure
            | (Build, Start)
            | (Start, Healthcheck)
            | (Healthcheck, Success)
            | (Build | Start | Healthcheck, Validate)
            | (Build | Start | Healthcheck, Build)
            | (Build | Start | Healthcheck, GenerateDockerfile)
    )
}

/// A single recorded phase transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Phase,
    pub to: Phase,
    pub at: DateTime<Utc>,
    /// Optional context about why this transition happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: Phase,
    pub to: Phase,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal phase transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// The phase machine for one run.
///
/// Serializable so it can live inside a persisted `RunState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseMachine {
    current: Phase,
    transitions: Vec<TransitionRecord>,
}

impl PhaseMachine {
    /// Create a new machine starting at `Analyze`.
    pub fn new() -> Self {
        Self {
            current: Phase::Analyze,
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> Phase {
        self.current
    }

    /// Attempt to advance to the next phase.
    pub fn advance(&mut self, to: Phase, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(
            from = %self.current,
            to = %to,
            reason = reason.unwrap_or(""),
            "Phase transition"
        );

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            at: Utc::now(),
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    /// Transition to `Failed` from any non-terminal phase.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(Phase::Failed, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Full transition log.
    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// One-line summary of the path taken so far.
    pub fn summary(&self) -> String {
        let path: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        let mut out = format!(
            "{} → {} ({} transitions)",
            Phase::Analyze,
            self.current,
            self.transitions.len()
        );
        if !path.is_empty() {
            out.push_str(&format!(" [{}]", path.join(" → ")));
        }
        out
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_at(phase: Phase) -> PhaseMachine {
        PhaseMachine {
            current: phase,
            transitions: Vec::new(),
        }
    }

    #[test]
    fn test_initial_phase() {
        let pm = PhaseMachine::new();
        assert_eq!(pm.current(), Phase::Analyze);
        assert!(!pm.is_terminal());
        assert!(pm.transitions().is_empty());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut pm = PhaseMachine::new();
        for phase in [
            Phase::CollectSecrets,
            Phase::GenerateDockerfile,
            Phase::Validate,
            Phase::GenerateCompose,
            Phase::Build,
            Phase::Start,
            Phase::Healthcheck,
            Phase::Success,
        ] {
            pm.advance(phase, None).unwrap();
        }
        assert!(pm.is_terminal());
        assert_eq!(pm.transitions().len(), 8);
    }

    #[test]
    fn test_analyze_can_skip_secrets() {
        let mut pm = PhaseMachine::new();
        pm.advance(Phase::GenerateDockerfile, Some("no secrets detected"))
            .unwrap();
        assert_eq!(pm.current(), Phase::GenerateDockerfile);
    }

    #[test]
    fn test_repair_path_edges() {
        for from in [Phase::Build, Phase::Start, Phase::Healthcheck] {
            assert!(is_legal_transition(from, Phase::Validate));
            assert!(is_legal_transition(from, Phase::Build));
            assert!(is_legal_transition(from, Phase::GenerateDockerfile));
        }
        // Generation phases never jump to Build directly except via compose
        assert!(!is_legal_transition(Phase::Validate, Phase::Build));
        assert!(!is_legal_transition(Phase::GenerateDockerfile, Phase::Build));
    }

    #[test]
    fn test_analyze_cannot_regenerate_in_place() {
        assert!(!is_legal_transition(Phase::Analyze, Phase::Analyze));
        assert!(!is_legal_transition(Phase::Analyze, Phase::Build));
    }

    #[test]
    fn test_failure_from_any_non_terminal() {
        for phase in [
            Phase::Analyze,
            Phase::CollectSecrets,
            Phase::GenerateDockerfile,
            Phase::Validate,
            Phase::GenerateCompose,
            Phase::Build,
            Phase::Start,
            Phase::Healthcheck,
        ] {
            let mut pm = machine_at(phase);
            assert!(pm.fail("test failure").is_ok());
            assert_eq!(pm.current(), Phase::Failed);
        }
    }

    #[test]
    fn test_cannot_leave_terminal() {
        for terminal in [Phase::Success, Phase::Failed] {
            let mut pm = machine_at(terminal);
            let err = pm.advance(Phase::GenerateDockerfile, None).unwrap_err();
            assert_eq!(err.from, terminal);
            assert!(pm.fail("nope").is_err());
        }
    }

    #[test]
    fn test_transition_record_has_reason() {
        let mut pm = PhaseMachine::new();
        pm.advance(Phase::CollectSecrets, Some("2 secrets detected"))
            .unwrap();
        let record = &pm.transitions()[0];
        assert_eq!(record.from, Phase::Analyze);
        assert_eq!(record.to, Phase::CollectSecrets);
        assert_eq!(record.reason.as_deref(), Some("2 secrets detected"));
    }

    #[test]
    fn test_summary() {
        let mut pm = PhaseMachine::new();
        pm.advance(Phase::GenerateDockerfile, None).unwrap();
        pm.fail("test").unwrap();
        let summary = pm.summary();
        assert!(summary.contains("Failed"));
        assert!(summary.contains("2 transitions"));
    }

    #[test]
    fn test_phase_serde_snake_case() {
        let json = serde_json::to_string(&Phase::GenerateDockerfile).unwrap();
        assert_eq!(json, "\"generate_dockerfile\"");
    }
}
