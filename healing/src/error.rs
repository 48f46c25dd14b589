//! Error taxonomy for the self-healing loop.
//!
//! Every failure a phase can produce is represented here so the orchestrator
//! can turn it into a `Learning` and classify it for the retry policy without
//! string matching.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::ErrorKind;
use crate::phase::{IllegalTransition, Phase};
use crate::readiness::ContainerId;

/// Result type alias for core operations
pub type HealingResult<T> = Result<T, HealingError>;

/// Sub-kinds of a failed readiness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthcheckKind {
    /// `check` was called with no containers: a caller contract violation.
    NoContainers,
    /// A container reached `exited` before becoming ready.
    ContainerExited,
    /// The shared deadline elapsed.
    Timeout,
    /// The application answered with a 5xx status.
    HttpServerError,
}

impl fmt::Display for HealthcheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoContainers => write!(f, "no_containers"),
            Self::ContainerExited => write!(f, "container_exited"),
            Self::Timeout => write!(f, "timeout"),
            Self::HttpServerError => write!(f, "http_server_error"),
        }
    }
}

/// Terminal failure of a readiness check.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct HealthcheckError {
    pub kind: HealthcheckKind,
    /// Container that caused the failure (absent for `NoContainers`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<ContainerId>,
    pub message: String,
}

impl HealthcheckError {
    pub fn no_containers() -> Self {
        Self {
            kind: HealthcheckKind::NoContainers,
            container_id: None,
            message: "No containers to check".to_string(),
        }
    }

    pub fn container_exited(id: &ContainerId, logs: &str) -> Self {
        let logs = logs.trim();
        let message = if logs.is_empty() {
            format!("Container {id} exited before becoming ready (no log output)")
        } else {
            format!("Container {id} exited before becoming ready. Recent logs:\n{logs}")
        };
        Self {
            kind: HealthcheckKind::ContainerExited,
            container_id: Some(id.clone()),
            message,
        }
    }

    pub fn timeout_waiting_for_container(id: &ContainerId, timeout_secs: f64) -> Self {
        Self {
            kind: HealthcheckKind::Timeout,
            container_id: Some(id.clone()),
            message: format!(
                "Healthcheck timed out waiting for containers after {timeout_secs:.1}s \
                 ({id} never reached running)"
            ),
        }
    }

    pub fn timeout_waiting_for_http(id: &ContainerId, port: u16, timeout_secs: f64) -> Self {
        Self {
            kind: HealthcheckKind::Timeout,
            container_id: Some(id.clone()),
            message: format!(
                "Healthcheck timed out waiting for HTTP after {timeout_secs:.1}s \
                 ({id} on port {port} never answered)"
            ),
        }
    }

    pub fn http_server_error(id: &ContainerId, port: u16, status: u16) -> Self {
        Self {
            kind: HealthcheckKind::HttpServerError,
            container_id: Some(id.clone()),
            message: format!("HTTP {status} from container {id} on port {port}"),
        }
    }

    /// Timeouts and exits may clear up after a repair; `NoContainers` never does.
    pub fn is_contract_violation(&self) -> bool {
        self.kind == HealthcheckKind::NoContainers
    }
}

/// Errors produced by the loop and its collaborators.
#[derive(Error, Debug)]
pub enum HealingError {
    /// Project analysis failed
    #[error("Analysis failed: {message}")]
    Analysis { message: String },

    /// Secret collection failed
    #[error("Secret collection failed: {message}")]
    Secrets { message: String },

    /// Oracle produced nothing usable (provider error or malformed reply)
    #[error("Generation failed: {message}")]
    Generation { message: String },

    /// Generic wrapper for a failed oracle call (transport, auth, quota)
    #[error("Services error: {message}")]
    Services { message: String },

    /// Dockerfile rejected by the validator
    #[error("Validation failed: {detail}")]
    Validation { detail: String },

    /// `docker compose build` failed
    #[error("Build failed: {message}")]
    Build { message: String },

    /// `docker compose up` failed or started nothing
    #[error("Start failed: {message}")]
    Start { message: String },

    /// Teardown failed
    #[error("Stop failed: {message}")]
    Stop { message: String },

    /// Containers did not become ready
    #[error("Healthcheck failed: {0}")]
    Healthcheck(#[from] HealthcheckError),

    /// Operator refused to provide a hint
    #[error("Escalation declined: {reason}")]
    EscalationDeclined { reason: String },

    /// Human escalations exhausted without a healthy deployment
    #[error("Escalation exhausted after {escalations} human escalation(s): {last_error}")]
    EscalationExhausted { escalations: u32, last_error: String },

    /// Unrecoverable failure the policy chose not to retry
    #[error("Aborted in {phase}: {message}")]
    Aborted { phase: Phase, message: String },

    /// Another run holds the project lock
    #[error("Project is locked by another run (lock file {path})")]
    ProjectLocked { path: PathBuf },

    /// Orchestrator attempted an illegal phase transition
    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition { from: Phase, to: Phase },

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<IllegalTransition> for HealingError {
    fn from(err: IllegalTransition) -> Self {
        Self::InvalidTransition {
            from: err.from,
            to: err.to,
        }
    }
}

impl HealingError {
    pub fn analysis(message: impl Into<String>) -> Self {
        Self::Analysis {
            message: message.into(),
        }
    }

    pub fn secrets(message: impl Into<String>) -> Self {
        Self::Secrets {
            message: message.into(),
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }

    pub fn services(message: impl Into<String>) -> Self {
        Self::Services {
            message: message.into(),
        }
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::Validation {
            detail: detail.into(),
        }
    }

    pub fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
        }
    }

    pub fn start(message: impl Into<String>) -> Self {
        Self::Start {
            message: message.into(),
        }
    }

    pub fn stop(message: impl Into<String>) -> Self {
        Self::Stop {
            message: message.into(),
        }
    }

    /// Classification used by the ledger and the retry policy.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::Analysis { .. } => ErrorKind::Analysis,
            Self::Secrets { .. } => ErrorKind::Secrets,
            Self::Generation { .. } | Self::Services { .. } => ErrorKind::Generation,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Healthcheck(hc) if hc.is_contract_violation() => ErrorKind::ContractViolation,
            Self::Build { .. } | Self::Start { .. } | Self::Stop { .. } | Self::Healthcheck(_) => {
                ErrorKind::Runtime
            }
            Self::InvalidTransition { .. } => ErrorKind::ContractViolation,
            _ => ErrorKind::Runtime,
        }
    }

    /// Short machine-readable code, used as a Learning context entry.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Analysis { .. } => "ANALYSIS",
            Self::Secrets { .. } => "SECRETS",
            Self::Generation { .. } => "GENERATION",
            Self::Services { .. } => "SERVICES",
            Self::Validation { .. } => "VALIDATION",
            Self::Build { .. } => "BUILD",
            Self::Start { .. } => "START",
            Self::Stop { .. } => "STOP",
            Self::Healthcheck(hc) => match hc.kind {
                HealthcheckKind::NoContainers => "HEALTHCHECK_NO_CONTAINERS",
                HealthcheckKind::ContainerExited => "HEALTHCHECK_CONTAINER_EXITED",
                HealthcheckKind::Timeout => "HEALTHCHECK_TIMEOUT",
                HealthcheckKind::HttpServerError => "HEALTHCHECK_HTTP_SERVER_ERROR",
            },
            Self::EscalationDeclined { .. } => "ESCALATION_DECLINED",
            Self::EscalationExhausted { .. } => "ESCALATION_EXHAUSTED",
            Self::Aborted { .. } => "ABORTED",
            Self::ProjectLocked { .. } => "PROJECT_LOCKED",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Io(_) => "IO",
            Self::Json(_) => "JSON",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthcheck_kinds_classify() {
        let id = ContainerId::new("abc123");
        let exited: HealingError = HealthcheckError::container_exited(&id, "boom").into();
        assert_eq!(exited.error_kind(), ErrorKind::Runtime);

        let empty: HealingError = HealthcheckError::no_containers().into();
        assert_eq!(empty.error_kind(), ErrorKind::ContractViolation);
        assert_eq!(empty.code(), "HEALTHCHECK_NO_CONTAINERS");
    }

    #[test]
    fn test_services_errors_count_as_generation() {
        assert_eq!(
            HealingError::services("503 from provider").error_kind(),
            ErrorKind::Generation
        );
    }

    #[test]
    fn test_container_exited_message_includes_logs() {
        let id = ContainerId::new("web-1");
        let err = HealthcheckError::container_exited(&id, "panic: missing DATABASE_URL\n");
        assert!(err.message.contains("missing DATABASE_URL"));
        assert!(err.message.contains("web-1"));
    }

    #[test]
    fn test_http_server_error_message() {
        let id = ContainerId::new("web-1");
        let err = HealthcheckError::http_server_error(&id, 8000, 500);
        assert!(err.to_string().contains("HTTP 500"));
        assert_eq!(err.kind, HealthcheckKind::HttpServerError);
    }

    #[test]
    fn test_timeout_messages_distinguish_stage() {
        let id = ContainerId::new("web-1");
        let containers = HealthcheckError::timeout_waiting_for_container(&id, 5.0);
        let http = HealthcheckError::timeout_waiting_for_http(&id, 8000, 5.0);
        assert!(containers.message.contains("waiting for containers"));
        assert!(http.message.contains("waiting for HTTP"));
    }
}
