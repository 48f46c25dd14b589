//! One CLI invocation against one project: wires the real collaborators,
//! holds the project lock, and keeps the cache up to date.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use healing::{
    clear_run_state, load_run_state, ArtifactKind, Collaborators, ContainerRuntime,
    DeferredGateway, HealingError, HealingResult, HintRecord, HumanGateway, Orchestrator,
    OrchestratorConfig, ProjectLock, ReadinessPoller, RunCache, RunOutcome, RunState, RunStatus,
    SecretCollector, TokioClock,
};
use tracing::{info, warn};

use crate::analyzer::ManifestAnalyzer;
use crate::command::ProcessRunner;
use crate::compose::ComposeRuntime;
use crate::config::AgentConfig;
use crate::gateway::CliGateway;
use crate::inspector::DockerInspector;
use crate::oracle::HttpOracle;
use crate::probe::ReqwestProbe;
use crate::prompt::Prompter;
use crate::secrets::PromptSecretCollector;
use crate::telemetry::{append_telemetry, write_run_report, RunReport};
use crate::validator::DockerfileValidator;

const INSPECT_TIMEOUT: Duration = Duration::from_secs(30);
const HADOLINT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Ignore cached analysis and artifacts
    pub rebuild: bool,
    /// Never prompt; escalations suspend the run
    pub non_interactive: bool,
    /// Remove a lock left behind by a crashed run
    pub force_unlock: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ResumeOptions {
    pub hint: Option<String>,
    pub non_interactive: bool,
    pub force_unlock: bool,
}

pub struct Session {
    project_dir: PathBuf,
    config: AgentConfig,
    cache: RunCache,
}

impl Session {
    pub fn open(project_dir: &Path, config: AgentConfig) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .with_context(|| format!("Project directory {} not found", project_dir.display()))?;
        if !project_dir.is_dir() {
            bail!("{} is not a directory", project_dir.display());
        }
        let cache = RunCache::new(&config.cache.dir, &project_dir);
        Ok(Self {
            project_dir,
            config,
            cache,
        })
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn cache(&self) -> &RunCache {
        &self.cache
    }

    /// Start a fresh run. Any previous run state for the project is discarded.
    pub async fn run(&self, options: &RunOptions) -> Result<Option<RunOutcome>> {
        self.cache.ensure().context("Failed to create cache directory")?;
        let state = RunState::new(&self.project_dir);
        let _lock = self.lock(&state.run_id, options.force_unlock)?;

        let state_path = self.cache.state_path();
        if let Some(previous) = load_run_state(&state_path).ok().flatten() {
            if previous.status() == RunStatus::Suspended {
                warn!(
                    run_id = %previous.run_id,
                    "Discarding suspended run; use `dockerize resume` to continue one"
                );
            }
        }
        clear_run_state(&state_path)?;

        if options.rebuild {
            self.cache.invalidate()?;
        }

        let mut orchestrator = Orchestrator::resume(
            state,
            self.collaborators(options.non_interactive)?,
            self.orchestrator_config(),
        );
        if !options.rebuild {
            if let Some(analysis) = self.cache.load_analysis()? {
                orchestrator = orchestrator.with_cached_analysis(analysis);
            }
            let dockerfile = self.cache.load_artifact(ArtifactKind::Dockerfile)?;
            let compose = self.cache.load_artifact(ArtifactKind::Compose)?;
            if dockerfile.is_some() || compose.is_some() {
                info!("Seeding generation with cached artifacts");
                orchestrator = orchestrator.with_prior_artifacts(dockerfile, compose);
            }
        }

        self.drive(orchestrator).await
    }

    /// Continue a suspended or interrupted run.
    pub async fn resume(&self, options: &ResumeOptions) -> Result<Option<RunOutcome>> {
        let Some(state) = load_run_state(&self.cache.state_path())? else {
            bail!(
                "No saved run for {}; start one with `dockerize run`",
                self.project_dir.display()
            );
        };
        if state.machine.is_terminal() {
            bail!(
                "Run {} already {}; start a new one with `dockerize run`",
                state.run_id,
                state.status()
            );
        }

        let _lock = self.lock(&state.run_id, options.force_unlock)?;
        info!(run_id = %state.run_id, phase = %state.phase(), "Resuming run");
        let mut orchestrator = Orchestrator::resume(
            state,
            self.collaborators(options.non_interactive)?,
            self.orchestrator_config(),
        );
        if let Some(hint) = options.hint.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
            orchestrator.provide_hint(HintRecord::new(hint))?;
        }

        self.drive(orchestrator).await
    }

    /// Persisted state of the last run, if any.
    pub fn status(&self) -> Result<Option<RunState>> {
        Ok(load_run_state(&self.cache.state_path())?)
    }

    /// Tear down the project's containers.
    pub async fn stop(&self) -> Result<()> {
        let runtime = self.runtime();
        runtime.stop(&self.project_dir).await?;
        info!(project = %self.project_dir.display(), "Containers stopped");
        Ok(())
    }

    /// Run the orchestrator until it returns or the user hits Ctrl-C.
    ///
    /// `None` means the run was interrupted; its state is saved for resume.
    async fn drive(&self, mut orchestrator: Orchestrator) -> Result<Option<RunOutcome>> {
        let result = tokio::select! {
            result = orchestrator.run() => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        };

        let outcome = match result {
            Some(result) => Some(result?),
            None => {
                orchestrator.interrupt().await?;
                None
            }
        };
        self.finish(orchestrator.state());
        Ok(outcome)
    }

    /// Refresh the cache from the final state and write the run report.
    fn finish(&self, state: &RunState) {
        if let Err(e) = self.save_to_cache(state) {
            warn!(error = %e, "Failed to update cache");
        }

        let report = RunReport::from_state(state);
        write_run_report(&report, &self.cache.report_path());
        append_telemetry(&report, &self.config.cache.dir);
    }

    fn save_to_cache(&self, state: &RunState) -> HealingResult<()> {
        if let Some(analysis) = &state.analysis {
            self.cache.save_analysis(analysis)?;
        }
        if let Some(dockerfile) = &state.dockerfile {
            self.cache.save_artifact(ArtifactKind::Dockerfile, dockerfile)?;
        }
        if let Some(compose) = &state.compose {
            self.cache.save_artifact(ArtifactKind::Compose, compose)?;
        }
        self.cache.save_learnings(&state.ledger)
    }

    fn lock(&self, run_id: &str, force_unlock: bool) -> Result<ProjectLock> {
        let path = self.cache.lock_path();
        if force_unlock {
            ProjectLock::break_stale(&path)?;
        }
        match ProjectLock::acquire(&path, run_id) {
            Ok(lock) => Ok(lock),
            Err(HealingError::ProjectLocked { path }) => {
                let holder = ProjectLock::owner_of(&path)
                    .ok()
                    .flatten()
                    .map(|owner| format!(" by pid {} (run {})", owner.pid, owner.run_id))
                    .unwrap_or_default();
                bail!(
                    "{} is locked{holder}; pass --force-unlock if that run crashed",
                    self.project_dir.display()
                )
            }
            Err(e) => Err(e).context("Failed to acquire project lock"),
        }
    }

    fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            budget: self.config.budget,
            healthcheck_timeout: self.config.readiness.timeout,
            state_path: Some(self.cache.state_path()),
        }
    }

    fn runtime(&self) -> ComposeRuntime {
        let runner = Arc::new(ProcessRunner::with_timeout(Duration::from_secs(
            self.config.runtime.command_timeout_secs,
        )));
        ComposeRuntime::new(runner).with_docker_bin(&self.config.runtime.docker_bin)
    }

    fn collaborators(&self, non_interactive: bool) -> Result<Collaborators> {
        let interactive = !non_interactive && std::io::stdin().is_terminal();
        let (secrets, gateway): (Arc<dyn SecretCollector>, Arc<dyn HumanGateway>) = if interactive
        {
            let prompter = Arc::new(Prompter::stdio());
            (
                Arc::new(PromptSecretCollector::interactive(prompter.clone())),
                Arc::new(CliGateway::new(prompter)),
            )
        } else {
            (
                Arc::new(PromptSecretCollector::non_interactive()),
                Arc::new(DeferredGateway),
            )
        };

        let inspector = DockerInspector::new(Arc::new(ProcessRunner::with_timeout(INSPECT_TIMEOUT)))
            .with_docker_bin(&self.config.runtime.docker_bin);
        let probe = ReqwestProbe::new(
            &self.config.probe.host,
            Duration::from_millis(self.config.probe.timeout_ms),
        )
        .context("Failed to create HTTP probe")?;
        let poller = ReadinessPoller::new(
            Arc::new(inspector),
            Arc::new(probe),
            Arc::new(TokioClock),
            self.config.readiness.clone(),
        );

        Ok(Collaborators {
            analyzer: Arc::new(ManifestAnalyzer),
            secrets,
            oracle: Arc::new(HttpOracle::new(self.config.oracle.clone())?),
            validator: Arc::new(DockerfileValidator::new(
                Arc::new(ProcessRunner::with_timeout(HADOLINT_TIMEOUT)),
                self.config.validator.hadolint,
            )),
            runtime: Arc::new(self.runtime()),
            poller,
            gateway,
        })
    }
}

/// Human-readable status of a persisted run.
pub fn render_status(state: &RunState) -> String {
    let mut out = state.summary().to_string();
    if !state.machine.transitions().is_empty() {
        out.push_str(&format!("Path: {}\n", state.machine.summary()));
    }
    let learnings = state.ledger.learnings();
    if !learnings.is_empty() {
        out.push_str("\nLearnings:\n");
        for (i, learning) in learnings.iter().enumerate() {
            let first_line = learning.message.lines().next().unwrap_or_default();
            out.push_str(&format!(
                "  {:>2}. [{} / {}] {}\n",
                i + 1,
                learning.phase,
                learning.error_kind,
                first_line
            ));
        }
    }
    let hints = state.ledger.hints();
    if !hints.is_empty() {
        out.push_str("\nHints:\n");
        for hint in hints {
            out.push_str(&format!("  - {}\n", hint.text));
        }
    }
    out
}
