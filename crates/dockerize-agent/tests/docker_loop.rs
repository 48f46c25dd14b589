//! The healing loop driving the real compose runtime and Dockerfile
//! validator, with docker itself replaced by a scripted command runner.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dockerize_agent::command::{CommandError, CommandOutput, CommandRequest, CommandRunner};
use dockerize_agent::compose::ComposeRuntime;
use dockerize_agent::validator::{DockerfileValidator, HadolintMode};
use healing::testing::{
    FakeWorld, ScriptedInspector, ScriptedOracle, ScriptedProbe, DEFAULT_DOCKERFILE,
};
use healing::{
    ArtifactKind, ContainerId, ContainerStatus, ErrorKind, Orchestrator, OrchestratorConfig, Phase,
    ReadinessConfig, ReadinessPoller, RunOutcome,
};

/// Answers `docker compose ps -q` with one container id and everything
/// else with success, recording each command line.
#[derive(Default)]
struct FakeDocker {
    commands: Mutex<Vec<String>>,
}

impl FakeDocker {
    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeDocker {
    async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, CommandError> {
        self.commands.lock().unwrap().push(request.to_string());
        let stdout = if request.args.iter().any(|a| a == "ps") {
            "abc123\n"
        } else {
            ""
        };
        Ok(CommandOutput {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }
}

struct Rig {
    docker: Arc<FakeDocker>,
    orchestrator: Orchestrator,
}

fn rig(project: &Path, world: &FakeWorld, probe: ScriptedProbe) -> Rig {
    let docker = Arc::new(FakeDocker::default());
    let id = ContainerId::new("abc123");
    let inspector = ScriptedInspector::new()
        .with_statuses(&id, vec![ContainerStatus::Running])
        .with_ports(&id, vec![8000]);

    let mut collaborators = world.collaborators();
    collaborators.runtime = Arc::new(ComposeRuntime::new(docker.clone()));
    collaborators.validator =
        Arc::new(DockerfileValidator::new(docker.clone(), HadolintMode::Off));
    collaborators.poller = ReadinessPoller::new(
        Arc::new(inspector),
        Arc::new(probe),
        world.clock.clone(),
        ReadinessConfig::default(),
    );

    Rig {
        docker,
        orchestrator: Orchestrator::new(project, collaborators, OrchestratorConfig::default()),
    }
}

#[tokio::test]
async fn healthy_project_is_built_started_and_left_running() {
    let project = tempfile::tempdir().unwrap();
    let world = FakeWorld::new();
    let mut rig = rig(project.path(), &world, ScriptedProbe::answering(200));

    let outcome = rig.orchestrator.run().await.unwrap();

    let RunOutcome::Success { containers, .. } = outcome else {
        panic!("expected success, got {outcome:?}");
    };
    assert_eq!(containers, vec![ContainerId::new("abc123")]);
    assert_eq!(
        std::fs::read_to_string(project.path().join("Dockerfile")).unwrap(),
        DEFAULT_DOCKERFILE
    );
    assert!(project.path().join("docker-compose.yaml").is_file());
    assert_eq!(
        rig.docker.commands(),
        vec![
            "docker compose -f docker-compose.yaml build",
            "docker compose -f docker-compose.yaml up -d",
            "docker compose -f docker-compose.yaml ps -q",
        ]
    );
}

#[tokio::test]
async fn lint_rejection_triggers_regeneration() {
    let project = tempfile::tempdir().unwrap();
    let mut world = FakeWorld::new();
    world.oracle = Arc::new(ScriptedOracle::new().with_dockerfiles(vec![
        Ok("FROM python:3.12-slim\nRUN pip install flask\n".to_string()),
        Ok(DEFAULT_DOCKERFILE.to_string()),
    ]));
    let mut rig = rig(project.path(), &world, ScriptedProbe::answering(200));

    let outcome = rig.orchestrator.run().await.unwrap();

    assert!(outcome.is_success(), "{outcome:?}");
    let learnings = rig.orchestrator.state().ledger.learnings();
    assert_eq!(learnings.len(), 1);
    assert_eq!(learnings[0].phase, Phase::Validate);
    assert_eq!(learnings[0].error_kind, ErrorKind::Validation);
    assert!(learnings[0].message.contains("CMD or ENTRYPOINT"));
    assert_eq!(world.oracle.generate_count(ArtifactKind::Dockerfile), 2);
    assert_eq!(world.oracle.generate_count(ArtifactKind::Compose), 1);
}

#[tokio::test]
async fn failed_healthcheck_tears_down_before_rebuilding() {
    let project = tempfile::tempdir().unwrap();
    let world = FakeWorld::new();
    let mut rig = rig(project.path(), &world, ScriptedProbe::new(vec![Ok(500), Ok(200)]));

    let outcome = rig.orchestrator.run().await.unwrap();

    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(world.oracle.repair_count(), 1);
    assert!(std::fs::read_to_string(project.path().join("Dockerfile"))
        .unwrap()
        .contains("# repaired"));
    assert_eq!(
        rig.docker.commands(),
        vec![
            "docker compose -f docker-compose.yaml build",
            "docker compose -f docker-compose.yaml up -d",
            "docker compose -f docker-compose.yaml ps -q",
            "docker compose -f docker-compose.yaml down --remove-orphans",
            "docker compose -f docker-compose.yaml build",
            "docker compose -f docker-compose.yaml up -d",
            "docker compose -f docker-compose.yaml ps -q",
        ]
    );
}
