//! Readiness poller: decides whether started containers are actually healthy.
//!
//! Each container goes through two waits against one shared deadline:
//!
//! ```text
//! status poll ──running──▶ published ports? ──none──▶ healthy
//!     │                         │
//!     └─exited─▶ ContainerExited└─some─▶ HTTP GET poll ──<500──▶ healthy
//!                                            │
//!                                            ├─refused/unreachable─▶ retry
//!                                            └─≥500─▶ HttpServerError
//! deadline elapsed in either wait ─▶ Timeout
//! ```
//!
//! Containers are polled concurrently; the first terminal failure drops the
//! remaining polls. Every inspector and probe call is raced against the
//! deadline, so a hung call cannot stretch the check past it.

pub mod clock;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::HealthcheckError;

pub use clock::{Clock, ManualClock, TokioClock};

/// Runtime-assigned container identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, the way `docker ps` prints ids.
    pub fn short(&self) -> &str {
        self.0
            .char_indices()
            .nth(12)
            .map_or(self.0.as_str(), |(end, _)| &self.0[..end])
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

/// Container state as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Created,
    Running,
    Restarting,
    Paused,
    Exited { exit_code: Option<i64> },
    Dead,
    Unknown(String),
}

impl ContainerStatus {
    /// Parse the `State.Status` string docker reports.
    pub fn parse(status: &str, exit_code: Option<i64>) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "restarting" => Self::Restarting,
            "paused" => Self::Paused,
            "exited" => Self::Exited { exit_code },
            "dead" => Self::Dead,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// The container will not become ready without intervention.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited { .. } | Self::Dead)
    }
}

/// Error from a container inspection call. Always treated as "not ready yet".
#[derive(Debug, Clone, Error)]
#[error("container inspection failed: {0}")]
pub struct InspectError(pub String);

/// Error from a single HTTP probe attempt.
#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    /// Connection refused or reset; the app is not listening yet.
    #[error("connection failed: {0}")]
    Connection(String),
    /// The request did not complete within the per-probe timeout.
    #[error("probe timed out: {0}")]
    Timeout(String),
}

/// Read-only view of the container runtime used while polling.
#[async_trait]
pub trait ContainerInspector: Send + Sync {
    async fn status(&self, id: &ContainerId) -> Result<ContainerStatus, InspectError>;

    /// Host ports mapped to the container, lowest first.
    async fn published_ports(&self, id: &ContainerId) -> Result<Vec<u16>, InspectError>;

    async fn logs_tail(&self, id: &ContainerId, lines: usize) -> Result<String, InspectError>;
}

/// One HTTP GET against a mapped host port. Returns the status code.
#[async_trait]
pub trait HttpProbe: Send + Sync {
    async fn get(&self, port: u16) -> Result<u16, ProbeError>;
}

/// Per-container outcome of a successful check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessResult {
    pub container_id: ContainerId,
    pub reached_running: bool,
    pub http_checked: bool,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_detail: Option<String>,
}

/// Poller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Fixed interval between status polls and between HTTP probes
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
    /// Shared deadline for the whole check
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    /// Log lines attached to a `ContainerExited` failure
    pub log_tail_lines: usize,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
            log_tail_lines: 50,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// The readiness poller.
#[derive(Clone)]
pub struct ReadinessPoller {
    inspector: Arc<dyn ContainerInspector>,
    probe: Arc<dyn HttpProbe>,
    clock: Arc<dyn Clock>,
    config: ReadinessConfig,
}

impl ReadinessPoller {
    pub fn new(
        inspector: Arc<dyn ContainerInspector>,
        probe: Arc<dyn HttpProbe>,
        clock: Arc<dyn Clock>,
        config: ReadinessConfig,
    ) -> Self {
        Self {
            inspector,
            probe,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ReadinessConfig {
        &self.config
    }

    /// Check all containers against one shared deadline of `now + timeout`.
    pub async fn check(
        &self,
        container_ids: &[ContainerId],
        timeout: Duration,
    ) -> Result<Vec<ReadinessResult>, HealthcheckError> {
        if container_ids.is_empty() {
            return Err(HealthcheckError::no_containers());
        }

        let deadline = self.clock.now() + timeout;
        info!(
            containers = container_ids.len(),
            timeout_secs = timeout.as_secs_f64(),
            "Waiting for containers to become ready"
        );

        let polls = container_ids
            .iter()
            .map(|id| self.check_container(id, deadline, timeout));
        let results = futures::future::try_join_all(polls).await?;

        info!(containers = results.len(), "All containers healthy");
        Ok(results)
    }

    async fn check_container(
        &self,
        id: &ContainerId,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<ReadinessResult, HealthcheckError> {
        self.wait_until_running(id, deadline, timeout).await?;
        let ports = self.wait_for_ports(id, deadline, timeout).await?;

        let Some(&port) = ports.first() else {
            debug!(container = %id, "No published ports; healthy without HTTP check");
            return Ok(ReadinessResult {
                container_id: id.clone(),
                reached_running: true,
                http_checked: false,
                healthy: true,
                failure_detail: None,
            });
        };

        self.wait_for_http(id, port, deadline, timeout).await?;
        Ok(ReadinessResult {
            container_id: id.clone(),
            reached_running: true,
            http_checked: true,
            healthy: true,
            failure_detail: None,
        })
    }

    async fn wait_until_running(
        &self,
        id: &ContainerId,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<(), HealthcheckError> {
        let timed_out =
            || HealthcheckError::timeout_waiting_for_container(id, timeout.as_secs_f64());
        loop {
            let polled = self
                .before_deadline(deadline, self.inspector.status(id))
                .await
                .ok_or_else(timed_out)?;
            match polled {
                Ok(ContainerStatus::Running) => {
                    debug!(container = %id, "Container running");
                    return Ok(());
                }
                Ok(status) if status.is_terminal() => {
                    return Err(self.exited(id, &status, deadline).await);
                }
                Ok(status) => debug!(container = %id, ?status, "Container not running yet"),
                Err(e) => debug!(container = %id, error = %e, "Status poll failed; retrying"),
            }

            self.pause_until_next_poll(deadline)
                .await
                .map_err(|()| timed_out())?;
        }
    }

    async fn wait_for_ports(
        &self,
        id: &ContainerId,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<Vec<u16>, HealthcheckError> {
        let timed_out =
            || HealthcheckError::timeout_waiting_for_container(id, timeout.as_secs_f64());
        loop {
            let polled = self
                .before_deadline(deadline, self.inspector.published_ports(id))
                .await
                .ok_or_else(timed_out)?;
            match polled {
                Ok(mut ports) => {
                    ports.sort_unstable();
                    return Ok(ports);
                }
                Err(e) => debug!(container = %id, error = %e, "Port inspection failed; retrying"),
            }
            self.pause_until_next_poll(deadline)
                .await
                .map_err(|()| timed_out())?;
        }
    }

    async fn wait_for_http(
        &self,
        id: &ContainerId,
        port: u16,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<(), HealthcheckError> {
        let timed_out =
            || HealthcheckError::timeout_waiting_for_http(id, port, timeout.as_secs_f64());
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let probed = self
                .before_deadline(deadline, self.probe.get(port))
                .await
                .ok_or_else(timed_out)?;
            match probed {
                Ok(status) if status >= 500 => {
                    warn!(container = %id, port, status, "Application answered with a server error");
                    return Err(HealthcheckError::http_server_error(id, port, status));
                }
                Ok(status) => {
                    debug!(container = %id, port, status, attempts, "HTTP probe succeeded");
                    return Ok(());
                }
                Err(e) => {
                    debug!(container = %id, port, attempts, error = %e, "HTTP not ready yet");
                    // A container that died after reaching `running` never answers
                    if let Some(Ok(status)) = self
                        .before_deadline(deadline, self.inspector.status(id))
                        .await
                    {
                        if status.is_terminal() {
                            return Err(self.exited(id, &status, deadline).await);
                        }
                    }
                }
            }

            self.pause_until_next_poll(deadline)
                .await
                .map_err(|()| timed_out())?;
        }
    }

    /// `ContainerExited` failure carrying the container's log tail.
    async fn exited(
        &self,
        id: &ContainerId,
        status: &ContainerStatus,
        deadline: Instant,
    ) -> HealthcheckError {
        let logs = match self
            .before_deadline(
                deadline,
                self.inspector.logs_tail(id, self.config.log_tail_lines),
            )
            .await
        {
            Some(Ok(logs)) => logs,
            Some(Err(e)) => format!("<logs unavailable: {e}>"),
            None => "<logs unavailable: deadline passed>".to_string(),
        };
        warn!(container = %id, ?status, "Container exited before becoming ready");
        HealthcheckError::container_exited(id, &logs)
    }

    /// Run `call` unless the shared deadline passes first. `None` on expiry;
    /// the abandoned call is dropped.
    async fn before_deadline<T>(
        &self,
        deadline: Instant,
        call: impl Future<Output = T>,
    ) -> Option<T> {
        let remaining = deadline.saturating_duration_since(self.clock.now());
        tokio::select! {
            biased;
            value = call => Some(value),
            () = self.clock.sleep(remaining) => None,
        }
    }

    /// Sleep one poll interval, clipped to the deadline. `Err` once the
    /// deadline has passed.
    async fn pause_until_next_poll(&self, deadline: Instant) -> Result<(), ()> {
        let now = self.clock.now();
        if now >= deadline {
            return Err(());
        }
        let remaining = deadline - now;
        self.clock
            .sleep(self.config.poll_interval.min(remaining))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HealthcheckKind;
    use crate::testing::{ScriptedInspector, ScriptedProbe};

    fn poller(
        inspector: Arc<ScriptedInspector>,
        probe: Arc<ScriptedProbe>,
        clock: Arc<ManualClock>,
    ) -> ReadinessPoller {
        ReadinessPoller::new(inspector, probe, clock, ReadinessConfig::default())
    }

    #[tokio::test]
    async fn test_empty_input_fails_without_polling() {
        let inspector = Arc::new(ScriptedInspector::new());
        let probe = Arc::new(ScriptedProbe::new(vec![]));
        let clock = Arc::new(ManualClock::new());
        let err = poller(inspector.clone(), probe, clock.clone())
            .check(&[], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind, HealthcheckKind::NoContainers);
        assert_eq!(inspector.status_polls(), 0);
        assert_eq!(clock.sleep_count(), 0);
    }

    #[tokio::test]
    async fn test_status_poll_errors_are_retried() {
        let id = ContainerId::new("c1");
        let inspector = Arc::new(
            ScriptedInspector::new()
                .with_status_errors(&id, 2)
                .with_statuses(&id, vec![ContainerStatus::Running])
                .with_ports(&id, vec![]),
        );
        let probe = Arc::new(ScriptedProbe::new(vec![]));
        let clock = Arc::new(ManualClock::new());
        let results = poller(inspector.clone(), probe, clock)
            .check(&[id], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(results[0].healthy);
        assert_eq!(inspector.status_polls(), 3);
    }

    #[tokio::test]
    async fn test_stuck_in_created_times_out_waiting_for_containers() {
        let id = ContainerId::new("c1");
        let inspector =
            Arc::new(ScriptedInspector::new().with_statuses(&id, vec![ContainerStatus::Created]));
        let probe = Arc::new(ScriptedProbe::new(vec![]));
        let clock = Arc::new(ManualClock::new());
        let err = poller(inspector, probe, clock.clone())
            .check(&[id], Duration::from_secs(3))
            .await
            .unwrap_err();
        assert_eq!(err.kind, HealthcheckKind::Timeout);
        assert!(err.message.contains("waiting for containers"));
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn test_container_status_parse() {
        assert_eq!(
            ContainerStatus::parse("running", None),
            ContainerStatus::Running
        );
        assert!(ContainerStatus::parse("exited", Some(1)).is_terminal());
        assert!(ContainerStatus::parse("dead", None).is_terminal());
        assert!(!ContainerStatus::parse("restarting", None).is_terminal());
    }

    #[test]
    fn test_container_id_short_display() {
        let id = ContainerId::new("0123456789abcdef0123");
        assert_eq!(id.to_string(), "0123456789ab");
        assert_eq!(id.as_str(), "0123456789abcdef0123");
        assert_eq!(ContainerId::new("web").to_string(), "web");
    }

    #[test]
    fn test_container_id_short_respects_char_boundaries() {
        let id = ContainerId::new("aéééééééééééééé");
        assert_eq!(id.short(), "aééééééééééé");
        assert_eq!(id.short().chars().count(), 12);
        let err = HealthcheckError::http_server_error(&id, 8000, 502);
        assert!(err.message.contains("aééééééééééé"), "{}", err.message);
    }

    #[test]
    fn test_config_serde_millis() {
        let config: ReadinessConfig =
            serde_json::from_str(r#"{"poll_interval": 250, "timeout": 5000}"#).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.log_tail_lines, 50);
    }
}
