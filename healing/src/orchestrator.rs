//! Orchestrator: drives one run through the phase machine.
//!
//! Each iteration executes the current phase against its collaborator. On
//! success the machine advances; on failure the error becomes a `Learning`,
//! the policy picks the next action, and the orchestrator carries it out:
//!
//! - `RetryGeneration` → back to `GenerateDockerfile`
//! - `RetryRuntimeRepair` → oracle repair, then `Validate` (Dockerfile
//!   changed) or `Build` (compose only)
//! - `Escalate` → persist, ask the gateway, resume at `GenerateDockerfile`
//!   with the hint, or suspend
//! - `Abort` → `Failed`
//!
//! Once the machine is terminal no collaborator is called again.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::collaborators::{
    Analyzer, ArtifactKind, ContainerRuntime, GenerationOracle, GenerationRequest,
    ProjectAnalysis, RepairRequest, RepairedArtifacts, SecretCollector, Validator,
};
use crate::error::{HealingError, HealingResult};
use crate::escalation::{EscalationPolicy, RetryAction, RetryBudget, RetryDecision};
use crate::gateway::{EscalationRequest, GatewayError, HumanGateway};
use crate::ledger::{ErrorKind, HintRecord, Learning};
use crate::phase::Phase;
use crate::readiness::{ContainerId, ReadinessPoller, ReadinessResult};
use crate::run_state::{save_run_state, RunState};

/// Everything the loop talks to, injected at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub analyzer: Arc<dyn Analyzer>,
    pub secrets: Arc<dyn SecretCollector>,
    pub oracle: Arc<dyn GenerationOracle>,
    pub validator: Arc<dyn Validator>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub poller: ReadinessPoller,
    pub gateway: Arc<dyn HumanGateway>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub budget: RetryBudget,
    /// Shared deadline for the readiness check
    pub healthcheck_timeout: Duration,
    /// Where to persist `RunState` after every step; `None` keeps it in memory
    pub state_path: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            budget: RetryBudget::default(),
            healthcheck_timeout: Duration::from_secs(60),
            state_path: None,
        }
    }
}

/// How a call to [`Orchestrator::run`] ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Success {
        dockerfile: String,
        compose: String,
        containers: Vec<ContainerId>,
        readiness: Vec<ReadinessResult>,
    },
    /// Carries the full ledger and whatever artifacts the run last produced.
    Failed {
        code: String,
        error: String,
        learnings: Vec<Learning>,
        dockerfile: Option<String>,
        compose: Option<String>,
    },
    /// Waiting for an operator hint; resume with the persisted state.
    Suspended { request: EscalationRequest },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Process exit code: 0 success, 1 failed, 2 suspended.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success { .. } => 0,
            Self::Failed { .. } => 1,
            Self::Suspended { .. } => 2,
        }
    }
}

pub struct Orchestrator {
    collaborators: Collaborators,
    policy: EscalationPolicy,
    config: OrchestratorConfig,
    state: RunState,
}

impl Orchestrator {
    /// Start a fresh run for `project_dir`.
    pub fn new(
        project_dir: impl Into<PathBuf>,
        collaborators: Collaborators,
        config: OrchestratorConfig,
    ) -> Self {
        Self::resume(RunState::new(project_dir), collaborators, config)
    }

    /// Continue a persisted run.
    pub fn resume(state: RunState, collaborators: Collaborators, config: OrchestratorConfig) -> Self {
        Self {
            collaborators,
            policy: EscalationPolicy::with_budget(config.budget),
            config,
            state,
        }
    }

    /// Skip the analyzer call and use a cached analysis.
    pub fn with_cached_analysis(mut self, analysis: ProjectAnalysis) -> Self {
        self.state.analysis = Some(analysis);
        self
    }

    /// Seed the oracle with artifacts from a previous run.
    pub fn with_prior_artifacts(mut self, dockerfile: Option<String>, compose: Option<String>) -> Self {
        self.state.dockerfile = dockerfile;
        self.state.compose = compose;
        self
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn into_state(self) -> RunState {
        self.state
    }

    /// Hand an operator hint to a suspended run.
    ///
    /// With a pending escalation this consumes it, refreshes the retry
    /// allowances and moves the run to `GenerateDockerfile`. Otherwise the
    /// hint is only recorded and guides the next generation.
    pub fn provide_hint(&mut self, hint: HintRecord) -> HealingResult<()> {
        info!(hint = %hint.text, "Operator hint received");
        self.state.ledger.add_hint(hint);

        if self.state.pending_escalation.take().is_none() {
            return Ok(());
        }

        self.state.counters.record_escalation();
        self.advance(Phase::GenerateDockerfile, Some("Operator hint received"))?;
        self.persist()
    }

    /// Drive the run until it is terminal or suspended.
    pub async fn run(&mut self) -> HealingResult<RunOutcome> {
        info!(
            run_id = %self.state.run_id,
            project = %self.state.project_dir.display(),
            phase = %self.state.phase(),
            "Starting run"
        );

        if let Some(request) = self.state.pending_escalation.clone() {
            if let Some(outcome) = self.ask_operator(request).await? {
                return Ok(outcome);
            }
        }

        while !self.state.machine.is_terminal() {
            let phase = self.state.phase();
            let step = match phase {
                Phase::Analyze => self.analyze().await,
                Phase::CollectSecrets => self.collect_secrets().await,
                Phase::GenerateDockerfile => self.generate_dockerfile().await,
                Phase::Validate => self.validate().await,
                Phase::GenerateCompose => self.generate_compose().await,
                Phase::Build => self.build().await,
                Phase::Start => self.start().await,
                Phase::Healthcheck => self.healthcheck().await,
                Phase::Success | Phase::Failed => break,
            };

            match step {
                Ok(next) => self.advance(next, None)?,
                Err(err) => {
                    if let Some(outcome) = self.handle_failure(phase, err).await? {
                        return Ok(outcome);
                    }
                }
            }
            self.persist()?;
        }

        self.persist()?;
        info!(
            run_id = %self.state.run_id,
            path = %self.state.machine.summary(),
            attempts = %self.state.counters.summary(),
            "Run finished"
        );
        Ok(self.outcome())
    }

    /// Stop containers and persist after the run future was dropped.
    pub async fn interrupt(&mut self) -> HealingResult<()> {
        warn!(phase = %self.state.phase(), "Run interrupted");
        self.teardown().await;
        self.persist()
    }

    // ── phases ──────────────────────────────────────────────────────────

    async fn analyze(&mut self) -> HealingResult<Phase> {
        let analysis = match self.state.analysis.take() {
            Some(cached) => {
                info!(project = %cached.project_name, "Using cached analysis");
                cached
            }
            None => {
                self.collaborators
                    .analyzer
                    .analyze(&self.state.project_dir)
                    .await?
            }
        };

        info!(
            project = %analysis.project_name,
            language = ?analysis.language,
            ports = ?analysis.ports,
            secrets = analysis.secrets.len(),
            "Project analyzed"
        );
        let next = if analysis.has_secrets() {
            Phase::CollectSecrets
        } else {
            Phase::GenerateDockerfile
        };
        self.state.analysis = Some(analysis);
        Ok(next)
    }

    async fn collect_secrets(&mut self) -> HealingResult<Phase> {
        let names = self.analysis()?.secrets.clone();
        let collected = self
            .collaborators
            .secrets
            .collect(&self.state.project_dir, &names)
            .await?;

        let missing: Vec<&str> = names
            .iter()
            .filter(|name| !collected.contains(name))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(HealingError::secrets(format!(
                "No value provided for {}",
                missing.join(", ")
            )));
        }

        info!(secrets = collected.len(), "Secrets collected");
        Ok(Phase::GenerateDockerfile)
    }

    async fn generate_dockerfile(&mut self) -> HealingResult<Phase> {
        let attempt = self.state.counters.enter_generation();
        info!(
            attempt,
            learnings = self.state.ledger.len(),
            hints = self.state.ledger.hints().len(),
            "Generating Dockerfile"
        );

        let request = GenerationRequest {
            kind: ArtifactKind::Dockerfile,
            analysis: self.analysis()?,
            prior_artifact: self.state.dockerfile.as_deref(),
            dockerfile: None,
            context: self.state.ledger.context(),
        };
        let text = self.collaborators.oracle.generate(request).await?;

        self.state.dockerfile = Some(non_empty(text, ArtifactKind::Dockerfile)?);
        self.state.reuse_compose = false;
        Ok(Phase::Validate)
    }

    async fn validate(&mut self) -> HealingResult<Phase> {
        let dockerfile = self
            .state
            .dockerfile
            .as_deref()
            .ok_or_else(|| HealingError::validation("No Dockerfile to validate"))?;
        self.collaborators.validator.validate(dockerfile).await?;
        info!("Dockerfile passed validation");
        Ok(Phase::GenerateCompose)
    }

    async fn generate_compose(&mut self) -> HealingResult<Phase> {
        if self.state.reuse_compose && self.state.compose.is_some() {
            self.state.reuse_compose = false;
            info!("Keeping repaired compose file");
            return Ok(Phase::Build);
        }

        info!("Generating compose file");
        let request = GenerationRequest {
            kind: ArtifactKind::Compose,
            analysis: self.analysis()?,
            prior_artifact: self.state.compose.as_deref(),
            dockerfile: self.state.dockerfile.as_deref(),
            context: self.state.ledger.context(),
        };
        let text = self.collaborators.oracle.generate(request).await?;

        self.state.compose = Some(non_empty(text, ArtifactKind::Compose)?);
        Ok(Phase::Build)
    }

    async fn build(&mut self) -> HealingResult<Phase> {
        let attempt = self.state.counters.enter_runtime();
        self.teardown().await;
        self.write_artifacts()
            .await
            .map_err(|e| HealingError::build(format!("Could not write artifacts: {e}")))?;

        info!(attempt, "Building images");
        self.collaborators
            .runtime
            .build(&self.state.project_dir)
            .await?;
        Ok(Phase::Start)
    }

    async fn start(&mut self) -> HealingResult<Phase> {
        let containers = self
            .collaborators
            .runtime
            .start(&self.state.project_dir)
            .await?;
        info!(containers = containers.len(), "Containers started");
        self.state.containers = containers;
        Ok(Phase::Healthcheck)
    }

    async fn healthcheck(&mut self) -> HealingResult<Phase> {
        let results = self
            .collaborators
            .poller
            .check(&self.state.containers, self.config.healthcheck_timeout)
            .await?;
        self.state.readiness = results;
        Ok(Phase::Success)
    }

    // ── failure handling ────────────────────────────────────────────────

    async fn handle_failure(
        &mut self,
        phase: Phase,
        err: HealingError,
    ) -> HealingResult<Option<RunOutcome>> {
        let kind = err.error_kind();
        self.record_learning(phase, kind, &err);

        let decision = self.policy.decide(phase, kind, &self.state.counters);
        info!(
            phase = %phase,
            kind = %kind,
            action = %decision.action,
            reason = %decision.reason,
            attempts = %self.state.counters.summary(),
            "Retry decision"
        );

        if decision.action == RetryAction::RetryRuntimeRepair {
            return self.repair(phase).await;
        }
        self.apply(phase, decision, err.to_string()).await
    }

    async fn apply(
        &mut self,
        phase: Phase,
        decision: RetryDecision,
        last_error: String,
    ) -> HealingResult<Option<RunOutcome>> {
        match decision.action {
            // A repair that failed is retried as a regeneration
            RetryAction::RetryGeneration | RetryAction::RetryRuntimeRepair => {
                self.advance(Phase::GenerateDockerfile, Some(&decision.reason))?;
                Ok(None)
            }
            RetryAction::Escalate => self.escalate(phase, &decision.reason).await,
            RetryAction::Abort => {
                let error = if decision.escalations_exhausted {
                    HealingError::EscalationExhausted {
                        escalations: self.state.counters.escalations,
                        last_error,
                    }
                } else {
                    HealingError::Aborted {
                        phase,
                        message: last_error,
                    }
                };
                self.fail(error).await?;
                Ok(None)
            }
        }
    }

    async fn repair(&mut self, phase: Phase) -> HealingResult<Option<RunOutcome>> {
        let attempt = self.state.counters.record_repair();

        let result = match (
            &self.state.analysis,
            &self.state.dockerfile,
            &self.state.compose,
        ) {
            (Some(analysis), Some(dockerfile), Some(compose)) => {
                info!(attempt, failed_phase = %phase, "Requesting artifact repair");
                let request = RepairRequest {
                    analysis,
                    dockerfile,
                    compose,
                    failed_phase: phase,
                    context: self.state.ledger.context(),
                };
                self.collaborators.oracle.repair(request).await
            }
            _ => Err(HealingError::generation("No artifacts available to repair")),
        };

        let repaired = match result {
            Ok(repaired) if !repaired.is_unchanged() => repaired,
            Ok(_) => {
                return self
                    .repair_failed(phase, HealingError::generation("Repair returned no changes"))
                    .await;
            }
            Err(err) => return self.repair_failed(phase, err).await,
        };

        let RepairedArtifacts {
            dockerfile,
            compose,
        } = repaired;
        let compose_changed = compose.is_some();
        if let Some(compose) = compose {
            self.state.compose = Some(compose);
        }

        match dockerfile {
            Some(dockerfile) => {
                self.state.dockerfile = Some(dockerfile);
                self.state.reuse_compose = compose_changed;
                self.advance(Phase::Validate, Some("Repair changed the Dockerfile"))?;
            }
            None => {
                self.advance(Phase::Build, Some("Repair changed the compose file only"))?;
            }
        }
        Ok(None)
    }

    async fn repair_failed(
        &mut self,
        phase: Phase,
        err: HealingError,
    ) -> HealingResult<Option<RunOutcome>> {
        warn!(phase = %phase, error = %err, "Repair produced nothing usable");
        self.record_learning(phase, ErrorKind::Generation, &err);
        let decision = self
            .policy
            .decide(phase, ErrorKind::Generation, &self.state.counters);
        info!(action = %decision.action, reason = %decision.reason, "Retry decision after repair");
        self.apply(phase, decision, err.to_string()).await
    }

    async fn escalate(&mut self, phase: Phase, reason: &str) -> HealingResult<Option<RunOutcome>> {
        let number = self.state.counters.escalations + 1;
        let request = EscalationRequest::new(phase, reason, &self.state.ledger, number);
        warn!(
            escalation = number,
            phase = %phase,
            reason,
            "Escalating to operator"
        );

        self.teardown().await;
        self.state.pending_escalation = Some(request.clone());
        self.persist()?;
        self.ask_operator(request).await
    }

    async fn ask_operator(
        &mut self,
        request: EscalationRequest,
    ) -> HealingResult<Option<RunOutcome>> {
        match self.collaborators.gateway.escalate(&request).await {
            Ok(hint) => {
                self.provide_hint(hint)?;
                Ok(None)
            }
            Err(GatewayError::Deferred) => {
                info!(escalation = request.escalation_number, "Run suspended awaiting operator hint");
                self.persist()?;
                Ok(Some(RunOutcome::Suspended { request }))
            }
            Err(GatewayError::Declined { reason }) => {
                self.state.pending_escalation = None;
                self.fail(HealingError::EscalationDeclined { reason }).await?;
                Ok(None)
            }
        }
    }

    async fn fail(&mut self, error: HealingError) -> HealingResult<()> {
        self.teardown().await;
        let message = error.to_string();
        error!(code = error.code(), error = %message, "Run failed");
        self.state.terminal_code = Some(error.code().to_string());
        self.state.terminal_error = Some(message.clone());
        self.state.machine.fail(&message)?;
        Ok(())
    }

    // ── helpers ─────────────────────────────────────────────────────────

    fn record_learning(&mut self, phase: Phase, kind: ErrorKind, err: &HealingError) {
        let attempt = match phase {
            p if p.is_generation() => self.state.counters.generation,
            p if p.is_runtime() => self.state.counters.runtime,
            Phase::CollectSecrets => self.state.counters.escalations + 1,
            _ => 1,
        };

        let mut learning =
            Learning::new(phase, kind, err.to_string(), attempt).with_context("code", err.code());
        if let HealingError::Healthcheck(hc) = err {
            learning = learning.with_context("healthcheck", hc.kind.to_string());
            if let Some(id) = &hc.container_id {
                learning = learning.with_context("container", id.as_str());
            }
        }

        warn!(phase = %phase, kind = %kind, attempt, error = %err, "Phase failed");
        self.state.ledger.record(learning);
    }

    fn advance(&mut self, to: Phase, reason: Option<&str>) -> HealingResult<()> {
        let from = self.state.phase();
        self.state.machine.advance(to, reason)?;
        info!(from = %from, to = %to, "Phase transition");
        Ok(())
    }

    fn analysis(&self) -> HealingResult<&ProjectAnalysis> {
        self.state
            .analysis
            .as_ref()
            .ok_or_else(|| HealingError::analysis("Run has no project analysis"))
    }

    async fn write_artifacts(&self) -> HealingResult<()> {
        let pairs = [
            (ArtifactKind::Dockerfile, &self.state.dockerfile),
            (ArtifactKind::Compose, &self.state.compose),
        ];
        for (kind, text) in pairs {
            let text = text
                .as_deref()
                .ok_or_else(|| HealingError::build(format!("No {kind} to write")))?;
            let path = self.state.project_dir.join(kind.file_name());
            tokio::fs::write(&path, text).await?;
        }
        Ok(())
    }

    /// Stop running containers. Failures are logged and ignored.
    async fn teardown(&mut self) {
        if self.state.containers.is_empty() {
            return;
        }
        info!(containers = self.state.containers.len(), "Stopping containers");
        if let Err(e) = self
            .collaborators
            .runtime
            .stop(&self.state.project_dir)
            .await
        {
            warn!(error = %e, "Teardown failed; continuing");
        }
        self.state.containers.clear();
    }

    fn persist(&mut self) -> HealingResult<()> {
        self.state.touch();
        if let Some(path) = &self.config.state_path {
            save_run_state(&self.state, path)?;
        }
        Ok(())
    }

    fn outcome(&self) -> RunOutcome {
        match self.state.phase() {
            Phase::Success => RunOutcome::Success {
                dockerfile: self.state.dockerfile.clone().unwrap_or_default(),
                compose: self.state.compose.clone().unwrap_or_default(),
                containers: self.state.containers.clone(),
                readiness: self.state.readiness.clone(),
            },
            _ => match &self.state.pending_escalation {
                Some(request) => RunOutcome::Suspended {
                    request: request.clone(),
                },
                None => RunOutcome::Failed {
                    code: self
                        .state
                        .terminal_code
                        .clone()
                        .unwrap_or_else(|| "INCOMPLETE".to_string()),
                    error: self
                        .state
                        .terminal_error
                        .clone()
                        .unwrap_or_else(|| format!("Run stopped in {}", self.state.phase())),
                    learnings: self.state.ledger.learnings().to_vec(),
                    dockerfile: self.state.dockerfile.clone(),
                    compose: self.state.compose.clone(),
                },
            },
        }
    }
}

fn non_empty(text: String, kind: ArtifactKind) -> HealingResult<String> {
    if text.trim().is_empty() {
        Err(HealingError::generation(format!("Oracle returned an empty {kind}")))
    } else {
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeWorld, ScriptedOracle, ScriptedValidator};

    fn orchestrator(world: &FakeWorld, dir: &std::path::Path) -> Orchestrator {
        Orchestrator::new(dir, world.collaborators(), OrchestratorConfig::default())
    }

    #[tokio::test]
    async fn test_happy_path_reaches_success() {
        let dir = tempfile::tempdir().unwrap();
        let world = FakeWorld::new();
        let mut orch = orchestrator(&world, dir.path());

        let outcome = orch.run().await.unwrap();
        assert!(outcome.is_success(), "{outcome:?}");
        assert_eq!(outcome.exit_code(), 0);
        assert!(orch.state().ledger.is_empty());
        assert!(dir.path().join("Dockerfile").exists());
        assert!(dir.path().join("docker-compose.yaml").exists());
        assert_eq!(world.runtime.events(), vec!["build", "start"]);
    }

    #[tokio::test]
    async fn test_validation_failure_feeds_learning_into_next_generation() {
        let dir = tempfile::tempdir().unwrap();
        let world = FakeWorld {
            validator: Arc::new(ScriptedValidator::new(vec![
                Err("DL3007: pin the base image tag".into()),
                Ok(()),
            ])),
            ..FakeWorld::new()
        };
        let mut orch = orchestrator(&world, dir.path());

        assert!(orch.run().await.unwrap().is_success());
        assert_eq!(orch.state().ledger.len(), 1);
        assert_eq!(orch.state().counters.generation, 2);

        let calls = world.oracle.calls();
        let second_dockerfile = calls
            .iter()
            .filter(|c| c.kind == Some(ArtifactKind::Dockerfile))
            .nth(1)
            .unwrap();
        assert_eq!(second_dockerfile.learnings, 1);
        assert!(second_dockerfile.prior.is_some());
    }

    #[tokio::test]
    async fn test_empty_generation_is_a_generation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let world = FakeWorld {
            oracle: Arc::new(
                ScriptedOracle::new().with_dockerfiles(vec![Ok("  \n".into()), Ok(
                    "FROM alpine:3.20\n".into(),
                )]),
            ),
            ..FakeWorld::new()
        };
        let mut orch = orchestrator(&world, dir.path());

        assert!(orch.run().await.unwrap().is_success());
        let learning = &orch.state().ledger.learnings()[0];
        assert_eq!(learning.error_kind, ErrorKind::Generation);
        assert!(learning.message.contains("empty dockerfile"));
    }

    #[tokio::test]
    async fn test_terminal_run_makes_no_further_calls() {
        let dir = tempfile::tempdir().unwrap();
        let world = FakeWorld::new();
        let mut orch = orchestrator(&world, dir.path());
        orch.run().await.unwrap();
        let oracle_calls = world.oracle.calls().len();
        let runtime_events = world.runtime.events().len();

        let again = orch.run().await.unwrap();
        assert!(again.is_success());
        assert_eq!(world.oracle.calls().len(), oracle_calls);
        assert_eq!(world.runtime.events().len(), runtime_events);
        assert_eq!(world.analyzer.calls(), 1);
    }

    #[tokio::test]
    async fn test_hint_without_pending_escalation_only_records() {
        let dir = tempfile::tempdir().unwrap();
        let world = FakeWorld::new();
        let mut orch = orchestrator(&world, dir.path());
        orch.provide_hint(HintRecord::new("expose port 3000")).unwrap();
        assert_eq!(orch.state().phase(), Phase::Analyze);
        assert_eq!(orch.state().counters.escalations, 0);
        assert_eq!(orch.state().ledger.hints().len(), 1);
    }
}
