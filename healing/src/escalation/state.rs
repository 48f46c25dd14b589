//! Retry budget and attempt counters

use serde::{Deserialize, Serialize};

/// Attempt ceilings per phase group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBudget {
    /// Entries to `GenerateDockerfile` allowed between human hints
    pub max_generation_attempts: u32,
    /// Entries to `Build` allowed between human hints
    pub max_runtime_attempts: u32,
    /// Repair requests allowed before falling back to full regeneration
    pub max_repairs_before_regeneration: u32,
    /// Human escalations allowed before the run is aborted
    pub max_escalations: u32,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            max_generation_attempts: 3,
            max_runtime_attempts: 4,
            max_repairs_before_regeneration: 2,
            max_escalations: 2,
        }
    }
}

/// Monotonic attempt counters for one run.
///
/// Raw counters only ever grow. Ceilings are measured from marks taken when a
/// hint arrives (or, for repairs, when generation restarts), so a hint grants
/// a fresh allowance without rewinding history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptCounters {
    /// Entries to `GenerateDockerfile`
    pub generation: u32,
    /// Entries to `Build`
    pub runtime: u32,
    /// Repair requests sent to the oracle
    pub repairs: u32,
    /// Hints received from the human gateway
    pub escalations: u32,
    generation_mark: u32,
    runtime_mark: u32,
    repairs_mark: u32,
}

impl AttemptCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry to `GenerateDockerfile`. Returns the new count.
    pub fn enter_generation(&mut self) -> u32 {
        self.generation += 1;
        self.repairs_mark = self.repairs;
        self.generation
    }

    /// Record an entry to `Build`. Returns the new count.
    pub fn enter_runtime(&mut self) -> u32 {
        self.runtime += 1;
        self.runtime
    }

    /// Record a repair request. Returns the new count.
    pub fn record_repair(&mut self) -> u32 {
        self.repairs += 1;
        self.repairs
    }

    /// Record a hint from the human gateway and refresh the allowances.
    pub fn record_escalation(&mut self) -> u32 {
        self.escalations += 1;
        self.generation_mark = self.generation;
        self.runtime_mark = self.runtime;
        self.repairs_mark = self.repairs;
        self.escalations
    }

    pub fn generation_since_hint(&self) -> u32 {
        self.generation.saturating_sub(self.generation_mark)
    }

    pub fn runtime_since_hint(&self) -> u32 {
        self.runtime.saturating_sub(self.runtime_mark)
    }

    pub fn repairs_since_regeneration(&self) -> u32 {
        self.repairs.saturating_sub(self.repairs_mark)
    }

    /// Summary for logging
    pub fn summary(&self) -> String {
        format!(
            "generation={} runtime={} repairs={} escalations={}",
            self.generation, self.runtime, self.repairs, self.escalations
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budget() {
        let budget = RetryBudget::default();
        assert_eq!(budget.max_generation_attempts, 3);
        assert_eq!(budget.max_runtime_attempts, 4);
        assert_eq!(budget.max_repairs_before_regeneration, 2);
        assert_eq!(budget.max_escalations, 2);
    }

    #[test]
    fn test_regeneration_resets_repair_window() {
        let mut counters = AttemptCounters::new();
        counters.enter_generation();
        counters.record_repair();
        counters.record_repair();
        assert_eq!(counters.repairs_since_regeneration(), 2);

        counters.enter_generation();
        assert_eq!(counters.repairs_since_regeneration(), 0);
        assert_eq!(counters.repairs, 2, "raw counter never rewinds");
    }

    #[test]
    fn test_hint_refreshes_allowances_but_keeps_counts() {
        let mut counters = AttemptCounters::new();
        for _ in 0..3 {
            counters.enter_generation();
        }
        counters.enter_runtime();
        assert_eq!(counters.generation_since_hint(), 3);

        counters.record_escalation();
        assert_eq!(counters.generation_since_hint(), 0);
        assert_eq!(counters.runtime_since_hint(), 0);
        assert_eq!(counters.generation, 3);
        assert_eq!(counters.escalations, 1);
    }

    #[test]
    fn test_budget_partial_toml_like_json_uses_defaults() {
        let budget: RetryBudget = serde_json::from_str(r#"{"max_escalations": 5}"#).unwrap();
        assert_eq!(budget.max_escalations, 5);
        assert_eq!(budget.max_generation_attempts, 3);
    }
}
