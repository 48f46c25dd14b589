//! Learning ledger: append-only record of everything that went wrong.
//!
//! Every phase failure becomes a [`Learning`]; every human hint becomes a
//! [`HintRecord`]. The ledger never deduplicates: repeated identical failures
//! are kept verbatim so the oracle can see that it is not converging.
//!
//! Collaborators only ever see a [`GenerationContext`], a borrowed read-only
//! view. Writes go through `&mut LearningLedger`, which only the orchestrator
//! holds.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::Phase;

/// Failure classification used by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Analysis,
    Secrets,
    /// Oracle failure or unusable artifact text.
    Generation,
    /// Dockerfile rejected by the validator.
    Validation,
    /// Build, start or healthcheck failure.
    Runtime,
    /// Caller broke a contract (e.g. readiness check with no containers).
    ContractViolation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analysis => write!(f, "analysis"),
            Self::Secrets => write!(f, "secrets"),
            Self::Generation => write!(f, "generation"),
            Self::Validation => write!(f, "validation"),
            Self::Runtime => write!(f, "runtime"),
            Self::ContractViolation => write!(f, "contract_violation"),
        }
    }
}

/// One failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Learning {
    pub phase: Phase,
    pub error_kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
    /// Value of the relevant attempt counter when the failure happened.
    pub attempt_number: u32,
    pub created_at: DateTime<Utc>,
}

impl Learning {
    pub fn new(
        phase: Phase,
        error_kind: ErrorKind,
        message: impl Into<String>,
        attempt_number: u32,
    ) -> Self {
        Self {
            phase,
            error_kind,
            message: message.into(),
            context: BTreeMap::new(),
            attempt_number,
            created_at: Utc::now(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Free-text guidance from an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintRecord {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl HintRecord {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// Append-only store of learnings and hints for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningLedger {
    learnings: Vec<Learning>,
    hints: Vec<HintRecord>,
}

impl LearningLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, learning: Learning) {
        tracing::debug!(
            phase = %learning.phase,
            kind = %learning.error_kind,
            attempt = learning.attempt_number,
            total = self.learnings.len() + 1,
            "Recorded learning"
        );
        self.learnings.push(learning);
    }

    pub fn add_hint(&mut self, hint: HintRecord) {
        self.hints.push(hint);
    }

    pub fn learnings(&self) -> &[Learning] {
        &self.learnings
    }

    pub fn hints(&self) -> &[HintRecord] {
        &self.hints
    }

    pub fn latest(&self) -> Option<&Learning> {
        self.learnings.last()
    }

    pub fn len(&self) -> usize {
        self.learnings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.learnings.is_empty()
    }

    /// Read-only view handed to the oracle.
    pub fn context(&self) -> GenerationContext<'_> {
        GenerationContext {
            learnings: &self.learnings,
            hints: &self.hints,
        }
    }

    /// Failure counts per kind.
    pub fn summary(&self) -> BTreeMap<ErrorKind, usize> {
        let mut counts = BTreeMap::new();
        for learning in &self.learnings {
            *counts.entry(learning.error_kind).or_insert(0) += 1;
        }
        counts
    }
}

/// Borrowed generation context: learnings oldest-first, then hints.
#[derive(Debug, Clone, Copy)]
pub struct GenerationContext<'a> {
    pub learnings: &'a [Learning],
    pub hints: &'a [HintRecord],
}

impl<'a> GenerationContext<'a> {
    pub fn empty() -> Self {
        Self {
            learnings: &[],
            hints: &[],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.learnings.is_empty() && self.hints.is_empty()
    }

    /// Render the context as a prompt section.
    ///
    /// Hints come last so the most recent human guidance sits closest to the
    /// instruction.
    pub fn render(&self) -> String {
        if self.is_empty() {
            return String::new();
        }

        let mut out = String::new();
        if !self.learnings.is_empty() {
            out.push_str("## Previous failures (oldest first)\n");
            for (i, learning) in self.learnings.iter().enumerate() {
                out.push_str(&format!(
                    "{}. [{} / {} / attempt {}] {}\n",
                    i + 1,
                    learning.phase,
                    learning.error_kind,
                    learning.attempt_number,
                    learning.message.trim()
                ));
                for (key, value) in &learning.context {
                    out.push_str(&format!("   {key}: {value}\n"));
                }
            }
        }
        if !self.hints.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("## Operator guidance (highest priority)\n");
            for hint in self.hints {
                out.push_str(&format!("- {}\n", hint.text.trim()));
            }
        }
        out
    }
}
