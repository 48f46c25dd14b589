//! Deterministic fakes for every collaborator.
//!
//! Scripted fakes pop one response per call and repeat the last one once the
//! script runs out. [`FakeWorld`] wires a full set together for a healthy run
//! (one container `c1`, running, port 8000 answering 200); override single
//! fields to script a failure.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::collaborators::{
    Analyzer, ArtifactKind, ContainerRuntime, GenerationOracle, GenerationRequest,
    ProjectAnalysis, RepairRequest, RepairedArtifacts, SecretCollector, Validator,
};
use crate::error::{HealingError, HealingResult};
use crate::gateway::{EscalationRequest, GatewayError, HumanGateway};
use crate::ledger::HintRecord;
use crate::orchestrator::Collaborators;
use crate::phase::Phase;
use crate::readiness::{
    ContainerId, ContainerInspector, ContainerStatus, HttpProbe, InspectError, ManualClock,
    ProbeError, ReadinessConfig, ReadinessPoller,
};

pub const DEFAULT_DOCKERFILE: &str = "FROM python:3.12-slim\nWORKDIR /app\nCOPY . .\nRUN pip install -r requirements.txt\nCMD [\"python\", \"app.py\"]\n";
pub const DEFAULT_COMPOSE: &str =
    "services:\n  web:\n    build: .\n    ports:\n      - \"8000:8000\"\n";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Pop the next scripted item, repeating the last one.
fn next_scripted<T: Clone>(script: &Mutex<VecDeque<T>>) -> Option<T> {
    let mut script = lock(script);
    if script.len() > 1 {
        script.pop_front()
    } else {
        script.front().cloned()
    }
}

// ── readiness ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ContainerScript {
    status_errors: usize,
    statuses: VecDeque<ContainerStatus>,
    ports: Vec<u16>,
    logs: String,
}

/// Container inspector driven by per-container scripts.
#[derive(Debug, Default)]
pub struct ScriptedInspector {
    scripts: Mutex<HashMap<ContainerId, ContainerScript>>,
    status_polls: AtomicUsize,
    log_requests: AtomicUsize,
}

impl ScriptedInspector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statuses returned in order; the last one repeats.
    pub fn with_statuses(mut self, id: &ContainerId, statuses: Vec<ContainerStatus>) -> Self {
        self.script(id).statuses = statuses.into();
        self
    }

    /// Fail the first `count` status polls with an inspection error.
    pub fn with_status_errors(mut self, id: &ContainerId, count: usize) -> Self {
        self.script(id).status_errors = count;
        self
    }

    pub fn with_ports(mut self, id: &ContainerId, ports: Vec<u16>) -> Self {
        self.script(id).ports = ports;
        self
    }

    pub fn with_logs(mut self, id: &ContainerId, logs: &str) -> Self {
        self.script(id).logs = logs.to_string();
        self
    }

    /// Number of status calls made, across all containers.
    pub fn status_polls(&self) -> usize {
        self.status_polls.load(Ordering::SeqCst)
    }

    pub fn log_requests(&self) -> usize {
        self.log_requests.load(Ordering::SeqCst)
    }

    fn script(&mut self, id: &ContainerId) -> &mut ContainerScript {
        self.scripts
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(id.clone())
            .or_default()
    }
}

#[async_trait]
impl ContainerInspector for ScriptedInspector {
    async fn status(&self, id: &ContainerId) -> Result<ContainerStatus, InspectError> {
        self.status_polls.fetch_add(1, Ordering::SeqCst);
        let mut scripts = lock(&self.scripts);
        let script = scripts
            .get_mut(id)
            .ok_or_else(|| InspectError(format!("No such container: {id}")))?;

        if script.status_errors > 0 {
            script.status_errors -= 1;
            return Err(InspectError("daemon not responding".into()));
        }
        let status = if script.statuses.len() > 1 {
            script.statuses.pop_front()
        } else {
            script.statuses.front().cloned()
        };
        status.ok_or_else(|| InspectError(format!("No status scripted for {id}")))
    }

    async fn published_ports(&self, id: &ContainerId) -> Result<Vec<u16>, InspectError> {
        let scripts = lock(&self.scripts);
        scripts
            .get(id)
            .map(|s| s.ports.clone())
            .ok_or_else(|| InspectError(format!("No such container: {id}")))
    }

    async fn logs_tail(&self, id: &ContainerId, _lines: usize) -> Result<String, InspectError> {
        self.log_requests.fetch_add(1, Ordering::SeqCst);
        let scripts = lock(&self.scripts);
        Ok(scripts.get(id).map(|s| s.logs.clone()).unwrap_or_default())
    }
}

/// HTTP probe returning scripted results. An empty script refuses every
/// connection.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    responses: Mutex<VecDeque<Result<u16, ProbeError>>>,
    ports: Mutex<Vec<u16>>,
}

impl ScriptedProbe {
    pub fn new(responses: Vec<Result<u16, ProbeError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ports: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `status`.
    pub fn answering(status: u16) -> Self {
        Self::new(vec![Ok(status)])
    }

    pub fn probe_count(&self) -> usize {
        lock(&self.ports).len()
    }

    /// Ports probed, in call order.
    pub fn probed_ports(&self) -> Vec<u16> {
        lock(&self.ports).clone()
    }
}

#[async_trait]
impl HttpProbe for ScriptedProbe {
    async fn get(&self, port: u16) -> Result<u16, ProbeError> {
        lock(&self.ports).push(port);
        next_scripted(&self.responses)
            .unwrap_or_else(|| Err(ProbeError::Connection("connection refused".into())))
    }
}

// ── collaborators ───────────────────────────────────────────────────────

/// Analyzer returning a fixed analysis (or a fixed failure).
#[derive(Debug)]
pub struct StaticAnalyzer {
    result: Result<ProjectAnalysis, String>,
    calls: AtomicUsize,
}

impl StaticAnalyzer {
    pub fn new(analysis: ProjectAnalysis) -> Self {
        Self {
            result: Ok(analysis),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyzer for StaticAnalyzer {
    async fn analyze(&self, _project_dir: &Path) -> HealingResult<ProjectAnalysis> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone().map_err(HealingError::analysis)
    }
}

/// Secret collector that "collects" every requested name unless told to fail.
#[derive(Debug, Default)]
pub struct RecordingSecretCollector {
    failure: Option<String>,
    requests: Mutex<Vec<Vec<String>>>,
}

impl RecordingSecretCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Vec<String>> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl SecretCollector for RecordingSecretCollector {
    async fn collect(&self, _project_dir: &Path, names: &[String]) -> HealingResult<Vec<String>> {
        lock(&self.requests).push(names.to_vec());
        match &self.failure {
            Some(message) => Err(HealingError::secrets(message.clone())),
            None => Ok(names.to_vec()),
        }
    }
}

/// One recorded oracle call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleCall {
    /// `None` for a repair
    pub kind: Option<ArtifactKind>,
    /// Set for a repair
    pub failed_phase: Option<Phase>,
    pub learnings: usize,
    pub hints: Vec<String>,
    pub prior: Option<String>,
}

/// Oracle with separate scripts for Dockerfiles, compose files and repairs.
#[derive(Debug)]
pub struct ScriptedOracle {
    dockerfiles: Mutex<VecDeque<Result<String, String>>>,
    composes: Mutex<VecDeque<Result<String, String>>>,
    repairs: Mutex<VecDeque<Result<RepairedArtifacts, String>>>,
    calls: Mutex<Vec<OracleCall>>,
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedOracle {
    /// Healthy defaults; repairs change the Dockerfile.
    pub fn new() -> Self {
        Self {
            dockerfiles: Mutex::new(VecDeque::from([Ok(DEFAULT_DOCKERFILE.to_string())])),
            composes: Mutex::new(VecDeque::from([Ok(DEFAULT_COMPOSE.to_string())])),
            repairs: Mutex::new(VecDeque::from([Ok(RepairedArtifacts {
                dockerfile: Some(format!("{DEFAULT_DOCKERFILE}# repaired\n")),
                compose: None,
            })])),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_dockerfiles(self, script: Vec<Result<String, String>>) -> Self {
        *lock(&self.dockerfiles) = script.into();
        self
    }

    pub fn with_composes(self, script: Vec<Result<String, String>>) -> Self {
        *lock(&self.composes) = script.into();
        self
    }

    pub fn with_repairs(self, script: Vec<Result<RepairedArtifacts, String>>) -> Self {
        *lock(&self.repairs) = script.into();
        self
    }

    pub fn calls(&self) -> Vec<OracleCall> {
        lock(&self.calls).clone()
    }

    pub fn generate_count(&self, kind: ArtifactKind) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.kind == Some(kind))
            .count()
    }

    pub fn repair_count(&self) -> usize {
        lock(&self.calls).iter().filter(|c| c.kind.is_none()).count()
    }
}

#[async_trait]
impl GenerationOracle for ScriptedOracle {
    async fn generate(&self, request: GenerationRequest<'_>) -> HealingResult<String> {
        lock(&self.calls).push(OracleCall {
            kind: Some(request.kind),
            failed_phase: None,
            learnings: request.context.learnings.len(),
            hints: request.context.hints.iter().map(|h| h.text.clone()).collect(),
            prior: request.prior_artifact.map(String::from),
        });

        let script = match request.kind {
            ArtifactKind::Dockerfile => &self.dockerfiles,
            ArtifactKind::Compose => &self.composes,
        };
        next_scripted(script)
            .unwrap_or_else(|| Err("nothing scripted".into()))
            .map_err(HealingError::generation)
    }

    async fn repair(&self, request: RepairRequest<'_>) -> HealingResult<RepairedArtifacts> {
        lock(&self.calls).push(OracleCall {
            kind: None,
            failed_phase: Some(request.failed_phase),
            learnings: request.context.learnings.len(),
            hints: request.context.hints.iter().map(|h| h.text.clone()).collect(),
            prior: Some(request.dockerfile.to_string()),
        });
        next_scripted(&self.repairs)
            .unwrap_or_else(|| Err("nothing scripted".into()))
            .map_err(HealingError::services)
    }
}

/// Validator returning scripted verdicts; accepts everything by default.
#[derive(Debug, Default)]
pub struct ScriptedValidator {
    verdicts: Mutex<VecDeque<Result<(), String>>>,
    calls: AtomicUsize,
}

impl ScriptedValidator {
    pub fn new(verdicts: Vec<Result<(), String>>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Validator for ScriptedValidator {
    async fn validate(&self, _dockerfile: &str) -> HealingResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        next_scripted(&self.verdicts)
            .unwrap_or(Ok(()))
            .map_err(HealingError::validation)
    }
}

/// Container runtime that records `build` / `start` / `stop` calls.
#[derive(Debug)]
pub struct RecordingRuntime {
    builds: Mutex<VecDeque<Result<(), String>>>,
    starts: Mutex<VecDeque<Result<Vec<ContainerId>, String>>>,
    events: Mutex<Vec<&'static str>>,
}

impl Default for RecordingRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingRuntime {
    /// Builds succeed and `start` reports container `c1`.
    pub fn new() -> Self {
        Self {
            builds: Mutex::new(VecDeque::new()),
            starts: Mutex::new(VecDeque::from([Ok(vec![ContainerId::new("c1")])])),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn with_builds(self, script: Vec<Result<(), String>>) -> Self {
        *lock(&self.builds) = script.into();
        self
    }

    pub fn with_starts(self, script: Vec<Result<Vec<ContainerId>, String>>) -> Self {
        *lock(&self.starts) = script.into();
        self
    }

    pub fn events(&self) -> Vec<&'static str> {
        lock(&self.events).clone()
    }

    pub fn count(&self, event: &str) -> usize {
        lock(&self.events).iter().filter(|e| **e == event).count()
    }
}

#[async_trait]
impl ContainerRuntime for RecordingRuntime {
    async fn build(&self, _project_dir: &Path) -> HealingResult<()> {
        lock(&self.events).push("build");
        next_scripted(&self.builds)
            .unwrap_or(Ok(()))
            .map_err(HealingError::build)
    }

    async fn start(&self, _project_dir: &Path) -> HealingResult<Vec<ContainerId>> {
        lock(&self.events).push("start");
        next_scripted(&self.starts)
            .unwrap_or_else(|| Ok(Vec::new()))
            .map_err(HealingError::start)
    }

    async fn stop(&self, _project_dir: &Path) -> HealingResult<()> {
        lock(&self.events).push("stop");
        Ok(())
    }
}

/// Gateway answering from a script. An exhausted script defers.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    answers: Mutex<VecDeque<Result<String, GatewayError>>>,
    requests: Mutex<Vec<EscalationRequest>>,
}

impl ScriptedGateway {
    pub fn new(answers: Vec<Result<String, GatewayError>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<EscalationRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl HumanGateway for ScriptedGateway {
    async fn escalate(&self, request: &EscalationRequest) -> Result<HintRecord, GatewayError> {
        lock(&self.requests).push(request.clone());
        // Unlike the other fakes, answers are consumed, never repeated
        let answer = lock(&self.answers).pop_front();
        answer.unwrap_or(Err(GatewayError::Deferred)).map(HintRecord::new)
    }
}

// ── wiring ──────────────────────────────────────────────────────────────

/// A full set of fakes for a healthy single-container project.
pub struct FakeWorld {
    pub analyzer: Arc<StaticAnalyzer>,
    pub secrets: Arc<RecordingSecretCollector>,
    pub oracle: Arc<ScriptedOracle>,
    pub validator: Arc<ScriptedValidator>,
    pub runtime: Arc<RecordingRuntime>,
    pub inspector: Arc<ScriptedInspector>,
    pub probe: Arc<ScriptedProbe>,
    pub clock: Arc<ManualClock>,
    pub gateway: Arc<ScriptedGateway>,
}

impl Default for FakeWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeWorld {
    pub fn new() -> Self {
        let mut analysis = ProjectAnalysis::new("demo");
        analysis.language = Some("python".into());
        analysis.ports = vec![8000];

        let c1 = ContainerId::new("c1");
        Self {
            analyzer: Arc::new(StaticAnalyzer::new(analysis)),
            secrets: Arc::new(RecordingSecretCollector::new()),
            oracle: Arc::new(ScriptedOracle::new()),
            validator: Arc::new(ScriptedValidator::default()),
            runtime: Arc::new(RecordingRuntime::new()),
            inspector: Arc::new(
                ScriptedInspector::new()
                    .with_statuses(&c1, vec![ContainerStatus::Running])
                    .with_ports(&c1, vec![8000]),
            ),
            probe: Arc::new(ScriptedProbe::answering(200)),
            clock: Arc::new(ManualClock::new()),
            gateway: Arc::new(ScriptedGateway::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            analyzer: self.analyzer.clone(),
            secrets: self.secrets.clone(),
            oracle: self.oracle.clone(),
            validator: self.validator.clone(),
            runtime: self.runtime.clone(),
            poller: ReadinessPoller::new(
                self.inspector.clone(),
                self.probe.clone(),
                self.clock.clone(),
                ReadinessConfig::default(),
            ),
            gateway: self.gateway.clone(),
        }
    }
}
