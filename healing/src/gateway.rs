//! Human Escalation Gateway
//!
//! The narrow channel through which the loop asks an operator for help once
//! automated recovery is exhausted. The operator answers with a single
//! free-text hint, declines, or is not around right now (`Deferred`), in
//! which case the run is persisted and can be resumed later.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::ledger::{HintRecord, Learning, LearningLedger};
use crate::phase::Phase;

/// A request for human guidance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRequest {
    pub id: String,
    /// Phase whose failure triggered the escalation
    pub phase: Phase,
    /// Why automation gave up, plus the latest failure
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_learning: Option<Learning>,
    /// 1-based count of escalations in this run
    pub escalation_number: u32,
    pub created_at: DateTime<Utc>,
}

impl EscalationRequest {
    pub fn new(
        phase: Phase,
        policy_reason: &str,
        ledger: &LearningLedger,
        escalation_number: u32,
    ) -> Self {
        let latest_learning = ledger.latest().cloned();
        let mut summary = format!(
            "Automated recovery stopped in {phase} after {} recorded failure(s): {policy_reason}",
            ledger.len()
        );
        if let Some(latest) = &latest_learning {
            summary.push_str(&format!(
                "\nLatest failure [{} / {}]: {}",
                latest.phase,
                latest.error_kind,
                latest.message.trim()
            ));
        }

        Self {
            id: Uuid::new_v4().to_string(),
            phase,
            summary,
            latest_learning,
            escalation_number,
            created_at: Utc::now(),
        }
    }
}

/// Ways an escalation can end without a hint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The operator refused to provide guidance.
    #[error("Operator declined to provide a hint: {reason}")]
    Declined { reason: String },

    /// No operator is available now; the run should be suspended.
    #[error("No operator available; run suspended awaiting a hint")]
    Deferred,
}

/// Channel to a human operator.
#[async_trait]
pub trait HumanGateway: Send + Sync {
    async fn escalate(&self, request: &EscalationRequest) -> Result<HintRecord, GatewayError>;
}

/// Gateway for unattended runs: always suspends.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeferredGateway;

#[async_trait]
impl HumanGateway for DeferredGateway {
    async fn escalate(&self, request: &EscalationRequest) -> Result<HintRecord, GatewayError> {
        tracing::info!(
            escalation = request.escalation_number,
            phase = %request.phase,
            "Escalation deferred until an operator provides a hint"
        );
        Err(GatewayError::Deferred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ErrorKind;

    #[test]
    fn test_request_summary_includes_latest_failure() {
        let mut ledger = LearningLedger::new();
        ledger.record(Learning::new(
            Phase::Healthcheck,
            ErrorKind::Runtime,
            "HTTP 500 from container web on port 8000",
            3,
        ));
        let request = EscalationRequest::new(
            Phase::Healthcheck,
            "Runtime budget exhausted (4/4)",
            &ledger,
            1,
        );
        assert!(request.summary.contains("Runtime budget exhausted"));
        assert!(request.summary.contains("HTTP 500"));
        assert_eq!(request.escalation_number, 1);
        assert!(request.latest_learning.is_some());
    }

    #[tokio::test]
    async fn test_deferred_gateway_always_defers() {
        let request = EscalationRequest::new(
            Phase::Validate,
            "Generation budget exhausted",
            &LearningLedger::new(),
            1,
        );
        assert_eq!(
            DeferredGateway.escalate(&request).await,
            Err(GatewayError::Deferred)
        );
    }
}
