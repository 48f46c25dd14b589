//! Retry Budget & Escalation Policy
//!
//! Maps every failure to exactly one next action. The ladder:
//!
//! ```text
//! Generation / validation failure
//!     ├─ generation budget left → RetryGeneration (back to GenerateDockerfile)
//!     └─ exhausted             → Escalate
//!
//! Runtime failure (build / start / healthcheck)
//!     ├─ runtime budget exhausted      → Escalate
//!     ├─ repairs left since last regen → RetryRuntimeRepair
//!     ├─ generation budget left        → RetryGeneration
//!     └─ otherwise                     → Escalate
//!
//! Escalate with no human escalations left → Abort (EscalationExhausted)
//! ```

pub mod engine;
pub mod state;

pub use engine::{EscalationPolicy, RetryAction, RetryDecision};
pub use state::{AttemptCounters, RetryBudget};
