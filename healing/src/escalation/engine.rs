//! Escalation policy: deterministic retry/repair/escalate decisions
//!
//! Consumes the failing phase, its error classification and the attempt
//! counters, and produces a [`RetryDecision`]. No collaborator calls happen
//! here; the orchestrator executes whatever this module decides.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::escalation::state::{AttemptCounters, RetryBudget};
use crate::ledger::ErrorKind;
use crate::phase::Phase;

/// What the orchestrator should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryAction {
    /// Restart the generation cycle at `GenerateDockerfile`
    RetryGeneration,
    /// Ask the oracle to repair the existing artifacts in place
    RetryRuntimeRepair,
    /// Suspend and ask a human for a hint
    Escalate,
    /// Stop the run in `Failed`
    Abort,
}

impl fmt::Display for RetryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryGeneration => write!(f, "retry_generation"),
            Self::RetryRuntimeRepair => write!(f, "retry_runtime_repair"),
            Self::Escalate => write!(f, "escalate"),
            Self::Abort => write!(f, "abort"),
        }
    }
}

/// Decision produced by the policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryDecision {
    pub action: RetryAction,
    /// Why the policy chose this action
    pub reason: String,
    /// Abort because the human escalation budget ran out
    pub escalations_exhausted: bool,
}

impl RetryDecision {
    fn new(action: RetryAction, reason: impl Into<String>) -> Self {
        Self {
            action,
            reason: reason.into(),
            escalations_exhausted: false,
        }
    }
}

/// The retry policy, a pure function of its inputs.
#[derive(Debug, Clone, Default)]
pub struct EscalationPolicy {
    budget: RetryBudget,
}

impl EscalationPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_budget(budget: RetryBudget) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> &RetryBudget {
        &self.budget
    }

    /// Decide the next action after a failure in `phase` classified as `kind`.
    ///
    /// The counters must already include the attempt that just failed.
    pub fn decide(&self, phase: Phase, kind: ErrorKind, counters: &AttemptCounters) -> RetryDecision {
        // Nothing was produced yet, so there is nothing to retry or repair
        if phase == Phase::Analyze || kind == ErrorKind::Analysis {
            return RetryDecision::new(
                RetryAction::Abort,
                "Analysis failed: no artifact to retry",
            );
        }

        if kind == ErrorKind::ContractViolation {
            return RetryDecision::new(
                RetryAction::Abort,
                "Caller contract violation is not retryable",
            );
        }

        if phase == Phase::CollectSecrets || kind == ErrorKind::Secrets {
            return self.escalate_or_abort(counters, "Secret collection failed");
        }

        match kind {
            ErrorKind::Generation | ErrorKind::Validation => self.decide_generation(counters),
            ErrorKind::Runtime => self.decide_runtime(counters),
            // Handled above
            ErrorKind::Analysis | ErrorKind::Secrets | ErrorKind::ContractViolation => {
                RetryDecision::new(RetryAction::Abort, "Unclassified failure")
            }
        }
    }

    fn decide_generation(&self, counters: &AttemptCounters) -> RetryDecision {
        let used = counters.generation_since_hint();
        let max = self.budget.max_generation_attempts;
        if used < max {
            RetryDecision::new(
                RetryAction::RetryGeneration,
                format!("Regenerating ({used}/{max} generation attempts used)"),
            )
        } else {
            self.escalate_or_abort(
                counters,
                format!("Generation budget exhausted ({used}/{max})"),
            )
        }
    }

    fn decide_runtime(&self, counters: &AttemptCounters) -> RetryDecision {
        let runtime_used = counters.runtime_since_hint();
        let runtime_max = self.budget.max_runtime_attempts;
        if runtime_used >= runtime_max {
            return self.escalate_or_abort(
                counters,
                format!("Runtime budget exhausted ({runtime_used}/{runtime_max})"),
            );
        }

        let repairs = counters.repairs_since_regeneration();
        let repair_max = self.budget.max_repairs_before_regeneration;
        if repairs < repair_max {
            return RetryDecision::new(
                RetryAction::RetryRuntimeRepair,
                format!("Repairing artifacts in place ({repairs}/{repair_max} repairs used)"),
            );
        }

        let generation_used = counters.generation_since_hint();
        let generation_max = self.budget.max_generation_attempts;
        if generation_used < generation_max {
            return RetryDecision::new(
                RetryAction::RetryGeneration,
                format!(
                    "Repair failed {repairs} time(s); regenerating from scratch \
                     ({generation_used}/{generation_max} generation attempts used)"
                ),
            );
        }

        self.escalate_or_abort(
            counters,
            format!(
                "Repair and generation budgets exhausted \
                 ({repairs} repairs, {generation_used}/{generation_max} generations)"
            ),
        )
    }

    fn escalate_or_abort(&self, counters: &AttemptCounters, why: impl Into<String>) -> RetryDecision {
        let why = why.into();
        if counters.escalations >= self.budget.max_escalations {
            RetryDecision {
                action: RetryAction::Abort,
                reason: format!(
                    "{why}; {} human escalation(s) already used",
                    counters.escalations
                ),
                escalations_exhausted: true,
            }
        } else {
            RetryDecision::new(RetryAction::Escalate, format!("{why}; asking a human"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(generation: u32, runtime: u32, repairs: u32) -> AttemptCounters {
        let mut c = AttemptCounters::new();
        for _ in 0..generation {
            c.enter_generation();
        }
        for _ in 0..runtime {
            c.enter_runtime();
        }
        for _ in 0..repairs {
            c.record_repair();
        }
        c
    }

    #[test]
    fn test_analyze_failure_aborts() {
        let policy = EscalationPolicy::new();
        let decision = policy.decide(Phase::Analyze, ErrorKind::Analysis, &counters(0, 0, 0));
        assert_eq!(decision.action, RetryAction::Abort);
        assert!(!decision.escalations_exhausted);
    }

    #[test]
    fn test_secrets_failure_escalates() {
        let policy = EscalationPolicy::new();
        let decision = policy.decide(
            Phase::CollectSecrets,
            ErrorKind::Secrets,
            &counters(0, 0, 0),
        );
        assert_eq!(decision.action, RetryAction::Escalate);
    }

    #[test]
    fn test_contract_violation_never_retried() {
        let policy = EscalationPolicy::new();
        let decision = policy.decide(
            Phase::Healthcheck,
            ErrorKind::ContractViolation,
            &counters(1, 1, 0),
        );
        assert_eq!(decision.action, RetryAction::Abort);
    }

    #[test]
    fn test_generation_retries_until_ceiling_then_escalates() {
        let policy = EscalationPolicy::new();
        for attempt in 1..3 {
            let decision = policy.decide(
                Phase::Validate,
                ErrorKind::Validation,
                &counters(attempt, 0, 0),
            );
            assert_eq!(decision.action, RetryAction::RetryGeneration, "attempt {attempt}");
        }
        let decision = policy.decide(Phase::Validate, ErrorKind::Validation, &counters(3, 0, 0));
        assert_eq!(decision.action, RetryAction::Escalate);
    }

    #[test]
    fn test_runtime_prefers_repair() {
        let policy = EscalationPolicy::new();
        let decision = policy.decide(Phase::Build, ErrorKind::Runtime, &counters(1, 1, 0));
        assert_eq!(decision.action, RetryAction::RetryRuntimeRepair);
    }

    #[test]
    fn test_runtime_falls_back_to_regeneration_after_repairs() {
        let policy = EscalationPolicy::new();
        let decision = policy.decide(Phase::Healthcheck, ErrorKind::Runtime, &counters(1, 3, 2));
        assert_eq!(decision.action, RetryAction::RetryGeneration);
    }

    #[test]
    fn test_runtime_escalates_when_everything_exhausted() {
        let policy = EscalationPolicy::new();
        let decision = policy.decide(Phase::Start, ErrorKind::Runtime, &counters(3, 3, 2));
        assert_eq!(decision.action, RetryAction::Escalate);

        let decision = policy.decide(Phase::Start, ErrorKind::Runtime, &counters(1, 4, 0));
        assert_eq!(decision.action, RetryAction::Escalate, "runtime ceiling");
    }

    #[test]
    fn test_escalations_exhausted_aborts() {
        let policy = EscalationPolicy::new();
        let mut c = counters(3, 0, 0);
        c.record_escalation();
        c.record_escalation();
        for _ in 0..3 {
            c.enter_generation();
        }
        let decision = policy.decide(Phase::GenerateDockerfile, ErrorKind::Generation, &c);
        assert_eq!(decision.action, RetryAction::Abort);
        assert!(decision.escalations_exhausted);
    }

    #[test]
    fn test_hint_grants_fresh_generation_allowance() {
        let policy = EscalationPolicy::new();
        let mut c = counters(3, 0, 0);
        c.record_escalation();
        c.enter_generation();
        let decision = policy.decide(Phase::GenerateDockerfile, ErrorKind::Generation, &c);
        assert_eq!(decision.action, RetryAction::RetryGeneration);
    }

    #[test]
    fn test_custom_budget() {
        let policy = EscalationPolicy::with_budget(RetryBudget {
            max_generation_attempts: 1,
            max_runtime_attempts: 1,
            max_repairs_before_regeneration: 0,
            max_escalations: 0,
        });
        let decision = policy.decide(Phase::Validate, ErrorKind::Validation, &counters(1, 0, 0));
        assert_eq!(decision.action, RetryAction::Abort);
        assert!(decision.escalations_exhausted);
    }
}
