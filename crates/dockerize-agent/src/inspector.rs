//! `docker inspect` / `docker logs` backed [`ContainerInspector`].

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use healing::{ContainerId, ContainerInspector, ContainerStatus, InspectError};
use serde::Deserialize;

use crate::command::{CommandRequest, CommandRunner};

pub struct DockerInspector {
    runner: Arc<dyn CommandRunner>,
    docker_bin: String,
}

impl DockerInspector {
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

    async fn docker(&self, args: &[&str]) -> Result<String, InspectError> {
        let request = CommandRequest::new(&self.docker_bin).args(args.iter().copied());
        let output = self
            .runner
            .run(&request)
            .await
            .map_err(|e| InspectError(e.to_string()))?;
        if !output.success() {
            return Err(InspectError(format!(
                "`{request}` failed: {}",
                output.diagnostic_tail(5)
            )));
        }
        Ok(output.stdout)
    }

    async fn inspect(&self, id: &ContainerId, template: &str) -> Result<String, InspectError> {
        self.docker(&["inspect", "--format", template, id.as_str()])
            .await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StateJson {
    status: String,
    #[serde(default)]
    exit_code: Option<i64>,
}

/// Parse the output of `docker inspect --format '{{json .State}}'`.
pub fn parse_state(json: &str) -> Result<ContainerStatus, InspectError> {
    let state: StateJson = serde_json::from_str(json.trim())
        .map_err(|e| InspectError(format!("unparseable container state: {e}")))?;
    Ok(ContainerStatus::parse(&state.status, state.exit_code))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PortBinding {
    #[serde(default)]
    host_port: String,
}

/// Parse the output of `docker inspect --format '{{json .NetworkSettings.Ports}}'`
/// into the sorted, de-duplicated set of published host ports.
///
/// Exposed but unpublished ports map to `null` and are skipped. The same
/// host port appears twice when docker binds both IPv4 and IPv6.
pub fn parse_published_ports(json: &str) -> Result<Vec<u16>, InspectError> {
    let trimmed = json.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    let map: std::collections::HashMap<String, Option<Vec<PortBinding>>> =
        serde_json::from_str(trimmed)
            .map_err(|e| InspectError(format!("unparseable port map: {e}")))?;

    let ports: BTreeSet<u16> = map
        .into_values()
        .flatten()
        .flatten()
        .filter_map(|binding| binding.host_port.parse::<u16>().ok())
        .filter(|&port| port != 0)
        .collect();
    Ok(ports.into_iter().collect())
}

#[async_trait]
impl ContainerInspector for DockerInspector {
    async fn status(&self, id: &ContainerId) -> Result<ContainerStatus, InspectError> {
        let out = self.inspect(id, "{{json .State}}").await?;
        parse_state(&out)
    }

    async fn published_ports(&self, id: &ContainerId) -> Result<Vec<u16>, InspectError> {
        let out = self.inspect(id, "{{json .NetworkSettings.Ports}}").await?;
        parse_published_ports(&out)
    }

    async fn logs_tail(&self, id: &ContainerId, lines: usize) -> Result<String, InspectError> {
        let tail = lines.to_string();
        let request = CommandRequest::new(&self.docker_bin).args([
            "logs",
            "--tail",
            tail.as_str(),
            id.as_str(),
        ]);
        let output = self
            .runner
            .run(&request)
            .await
            .map_err(|e| InspectError(e.to_string()))?;
        // Containers log to both streams; stderr usually holds the traceback.
        let mut combined = output.stdout;
        if !output.stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&output.stderr);
        }
        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandError, CommandOutput};
    use std::sync::Mutex;

    #[test]
    fn test_parse_running_state() {
        let json = r#"{"Status":"running","Running":true,"ExitCode":0,"Pid":4242}"#;
        assert_eq!(parse_state(json).unwrap(), ContainerStatus::Running);
    }

    #[test]
    fn test_parse_exited_state_keeps_exit_code() {
        let json = r#"{"Status":"exited","Running":false,"ExitCode":137}"#;
        assert_eq!(
            parse_state(json).unwrap(),
            ContainerStatus::Exited {
                exit_code: Some(137)
            }
        );
    }

    #[test]
    fn test_parse_state_rejects_garbage() {
        assert!(parse_state("Error: No such object: abc").is_err());
    }

    #[test]
    fn test_published_ports_sorted_and_deduplicated() {
        let json = r#"{
            "5432/tcp": null,
            "8000/tcp": [{"HostIp":"0.0.0.0","HostPort":"8000"},{"HostIp":"::","HostPort":"8000"}],
            "3000/tcp": [{"HostIp":"0.0.0.0","HostPort":"3000"}]
        }"#;
        assert_eq!(parse_published_ports(json).unwrap(), vec![3000, 8000]);
    }

    #[test]
    fn test_no_ports_is_empty() {
        assert!(parse_published_ports("{}").unwrap().is_empty());
        assert!(parse_published_ports("null\n").unwrap().is_empty());
    }

    struct FixedRunner {
        output: CommandOutput,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for FixedRunner {
        async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, CommandError> {
            self.seen.lock().unwrap().push(request.to_string());
            Ok(self.output.clone())
        }
    }

    #[tokio::test]
    async fn test_logs_tail_combines_streams() {
        let runner = Arc::new(FixedRunner {
            output: CommandOutput {
                exit_code: Some(0),
                stdout: "Booting worker".into(),
                stderr: "Traceback (most recent call last):\n".into(),
            },
            seen: Mutex::new(Vec::new()),
        });
        let inspector = DockerInspector::new(runner.clone());
        let logs = inspector
            .logs_tail(&ContainerId::new("abc123"), 20)
            .await
            .unwrap();
        assert_eq!(logs, "Booting worker\nTraceback (most recent call last):\n");
        assert_eq!(
            runner.seen.lock().unwrap().as_slice(),
            ["docker logs --tail 20 abc123"]
        );
    }

    #[tokio::test]
    async fn test_failed_inspect_is_an_inspect_error() {
        let runner = Arc::new(FixedRunner {
            output: CommandOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "Error: No such object: abc123".into(),
            },
            seen: Mutex::new(Vec::new()),
        });
        let err = DockerInspector::new(runner)
            .status(&ContainerId::new("abc123"))
            .await
            .unwrap_err();
        assert!(err.0.contains("No such object"));
    }
}
