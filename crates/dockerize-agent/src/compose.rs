//! `docker compose` container runtime.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use healing::{ContainerId, ContainerRuntime, HealingError, HealingResult};
use tracing::{debug, info};

use crate::command::{CommandOutput, CommandRequest, CommandRunner};

/// Compose file names, in lookup order.
pub const COMPOSE_FILE_NAMES: [&str; 2] = ["docker-compose.yaml", "docker-compose.yml"];

/// Lines of command output kept in an error message.
const ERROR_TAIL_LINES: usize = 40;

/// The compose file in `project_dir`, if there is one.
pub fn find_compose_file(project_dir: &Path) -> Option<PathBuf> {
    COMPOSE_FILE_NAMES
        .iter()
        .map(|name| project_dir.join(name))
        .find(|path| path.is_file())
}

pub struct ComposeRuntime {
    runner: Arc<dyn CommandRunner>,
    docker_bin: String,
}

impl ComposeRuntime {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            docker_bin: "docker".to_string(),
        }
    }

    pub fn with_docker_bin(mut self, bin: impl Into<String>) -> Self {
        self.docker_bin = bin.into();
        self
    }

    fn compose(&self, project_dir: &Path, compose_file: &Path, args: &[&str]) -> CommandRequest {
        let file_name = compose_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| COMPOSE_FILE_NAMES[0].to_string());
        CommandRequest::new(&self.docker_bin)
            .args(["compose", "-f"])
            .args([file_name])
            .args(args.iter().copied())
            .current_dir(project_dir)
    }

    async fn run_checked(
        &self,
        request: CommandRequest,
        to_error: fn(String) -> HealingError,
    ) -> HealingResult<CommandOutput> {
        let output = self
            .runner
            .run(&request)
            .await
            .map_err(|e| to_error(e.to_string()))?;
        if !output.success() {
            return Err(to_error(format!(
                "`{request}` exited with {}:\n{}",
                output
                    .exit_code
                    .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                output.diagnostic_tail(ERROR_TAIL_LINES)
            )));
        }
        Ok(output)
    }
}

fn missing_compose(project_dir: &Path) -> String {
    format!(
        "{} not found in {}",
        COMPOSE_FILE_NAMES[0],
        project_dir.display()
    )
}

#[async_trait]
impl ContainerRuntime for ComposeRuntime {
    async fn build(&self, project_dir: &Path) -> HealingResult<()> {
        let compose_file = find_compose_file(project_dir)
            .ok_or_else(|| HealingError::build(missing_compose(project_dir)))?;

        info!(project = %project_dir.display(), "docker compose build");
        let build: fn(String) -> HealingError = HealingError::build;
        self.run_checked(self.compose(project_dir, &compose_file, &["build"]), build)
            .await?;
        Ok(())
    }

    async fn start(&self, project_dir: &Path) -> HealingResult<Vec<ContainerId>> {
        let compose_file = find_compose_file(project_dir)
            .ok_or_else(|| HealingError::start(missing_compose(project_dir)))?;

        let start: fn(String) -> HealingError = HealingError::start;
        info!(project = %project_dir.display(), "docker compose up");
        self.run_checked(self.compose(project_dir, &compose_file, &["up", "-d"]), start)
            .await?;

        let ps = self
            .run_checked(self.compose(project_dir, &compose_file, &["ps", "-q"]), start)
            .await?;
        let ids: Vec<ContainerId> = ps
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ContainerId::new)
            .collect();

        if ids.is_empty() {
            return Err(HealingError::start("No containers started"));
        }
        debug!(containers = ids.len(), "Compose project running");
        Ok(ids)
    }

    async fn stop(&self, project_dir: &Path) -> HealingResult<()> {
        let Some(compose_file) = find_compose_file(project_dir) else {
            debug!(project = %project_dir.display(), "No compose file; nothing to stop");
            return Ok(());
        };

        info!(project = %project_dir.display(), "docker compose down");
        let stop: fn(String) -> HealingError = HealingError::stop;
        self.run_checked(
            self.compose(project_dir, &compose_file, &["down", "--remove-orphans"]),
            stop,
        )
        .await?;
        Ok(())
    }
}
