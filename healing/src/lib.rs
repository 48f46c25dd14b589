//! Self-healing containerization loop
//!
//! Deterministic core of `dockerize`: everything that decides *what happens
//! next* lives here, and everything that touches the outside world is a
//! trait implemented elsewhere.
//!
//! # Modules
//!
//! - [`phase`]: the phase enum, the legal transition table and the
//!   [`PhaseMachine`] that records every transition
//! - [`escalation`]: retry budget, monotonic attempt counters and the pure
//!   [`EscalationPolicy`]
//! - [`ledger`]: append-only [`LearningLedger`] and the read-only
//!   [`GenerationContext`] handed to the oracle
//! - [`readiness`]: the [`ReadinessPoller`] deciding whether started
//!   containers are healthy
//! - [`gateway`]: the [`HumanGateway`] trait for operator escalation
//! - [`orchestrator`]: the loop itself
//! - [`run_state`], [`cache`], [`lock`]: persistence, per-project cache and
//!   the exclusive run lock
//! - [`testing`]: deterministic fakes for every collaborator
//!
//! # Flow
//!
//! ```text
//! Analyze → [CollectSecrets] → GenerateDockerfile → Validate → GenerateCompose
//!         → Build → Start → Healthcheck → Success
//! ```
//!
//! Failures loop back to `GenerateDockerfile` (regenerate), `Validate` /
//! `Build` (repair), suspend on the gateway, or end in `Failed`.

#![allow(clippy::uninlined_format_args)]

pub mod cache;
pub mod collaborators;
pub mod error;
pub mod escalation;
pub mod gateway;
pub mod ledger;
pub mod lock;
pub mod orchestrator;
pub mod phase;
pub mod readiness;
pub mod run_state;
pub mod testing;

pub use cache::RunCache;
pub use collaborators::{
    Analyzer, ArtifactKind, ContainerRuntime, GenerationOracle, GenerationRequest,
    ProjectAnalysis, RepairRequest, RepairedArtifacts, SecretCollector, Validator,
};
pub use error::{HealingError, HealingResult, HealthcheckError, HealthcheckKind};
pub use escalation::{AttemptCounters, EscalationPolicy, RetryAction, RetryBudget, RetryDecision};
pub use gateway::{DeferredGateway, EscalationRequest, GatewayError, HumanGateway};
pub use ledger::{ErrorKind, GenerationContext, HintRecord, Learning, LearningLedger};
pub use lock::ProjectLock;
pub use orchestrator::{Collaborators, Orchestrator, OrchestratorConfig, RunOutcome};
pub use phase::{Phase, PhaseMachine};
pub use readiness::{
    Clock, ContainerId, ContainerInspector, ContainerStatus, HttpProbe, InspectError,
    ManualClock, ProbeError, ReadinessConfig, ReadinessPoller, ReadinessResult, TokioClock,
};
pub use run_state::{clear_run_state, load_run_state, save_run_state, RunState, RunStatus};
