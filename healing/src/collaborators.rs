//! Capability traits for everything the loop talks to.
//!
//! The orchestrator never reaches for a global client: each collaborator is
//! passed in at construction as an `Arc<dyn Trait>`, and each has a
//! deterministic fake in [`crate::testing`].

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HealingResult;
use crate::ledger::GenerationContext;
use crate::phase::Phase;
use crate::readiness::ContainerId;

/// Which artifact an oracle call produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Dockerfile,
    Compose,
}

impl ArtifactKind {
    /// File name the artifact is written to in the project directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Dockerfile => "Dockerfile",
            Self::Compose => "docker-compose.yaml",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dockerfile => write!(f, "dockerfile"),
            Self::Compose => write!(f, "compose"),
        }
    }
}

/// What the analyzer learned about the project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectAnalysis {
    pub project_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    /// Manifest files found, relative to the project root
    #[serde(default)]
    pub manifests: Vec<String>,
    /// Ports the application is expected to listen on
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Names of environment variables that look like secrets
    #[serde(default)]
    pub secrets: Vec<String>,
    /// Non-secret environment variable names
    #[serde(default)]
    pub env_vars: Vec<String>,
}

impl ProjectAnalysis {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            ..Self::default()
        }
    }

    pub fn has_secrets(&self) -> bool {
        !self.secrets.is_empty()
    }

    /// Prompt-ready description.
    pub fn render(&self) -> String {
        let mut out = format!("Project: {}\n", self.project_name);
        if let Some(language) = &self.language {
            out.push_str(&format!("Language: {language}\n"));
        }
        if let Some(framework) = &self.framework {
            out.push_str(&format!("Framework: {framework}\n"));
        }
        if !self.manifests.is_empty() {
            out.push_str(&format!("Manifests: {}\n", self.manifests.join(", ")));
        }
        if !self.ports.is_empty() {
            let ports: Vec<String> = self.ports.iter().map(u16::to_string).collect();
            out.push_str(&format!("Ports: {}\n", ports.join(", ")));
        }
        if !self.env_vars.is_empty() {
            out.push_str(&format!("Environment: {}\n", self.env_vars.join(", ")));
        }
        if !self.secrets.is_empty() {
            out.push_str(&format!(
                "Secrets (provided via .env, never bake into the image): {}\n",
                self.secrets.join(", ")
            ));
        }
        out
    }
}

/// Input to a fresh generation call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub kind: ArtifactKind,
    pub analysis: &'a ProjectAnalysis,
    /// Previous version of the same artifact, if any
    pub prior_artifact: Option<&'a str>,
    /// The current Dockerfile when generating a compose file
    pub dockerfile: Option<&'a str>,
    pub context: GenerationContext<'a>,
}

/// Input to a targeted repair of both artifacts.
#[derive(Debug, Clone, Copy)]
pub struct RepairRequest<'a> {
    pub analysis: &'a ProjectAnalysis,
    pub dockerfile: &'a str,
    pub compose: &'a str,
    /// Runtime phase that failed
    pub failed_phase: Phase,
    pub context: GenerationContext<'a>,
}

/// Result of a repair. `None` means the artifact was left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairedArtifacts {
    pub dockerfile: Option<String>,
    pub compose: Option<String>,
}

impl RepairedArtifacts {
    pub fn is_unchanged(&self) -> bool {
        self.dockerfile.is_none() && self.compose.is_none()
    }
}

/// Extracts project metadata.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, project_dir: &Path) -> HealingResult<ProjectAnalysis>;
}

/// Collects secret values and makes them available to the containers.
///
/// Returns the names that were collected. Values never flow back into the
/// run state.
#[async_trait]
pub trait SecretCollector: Send + Sync {
    async fn collect(&self, project_dir: &Path, names: &[String]) -> HealingResult<Vec<String>>;
}

/// Produces new or repaired artifact text.
#[async_trait]
pub trait GenerationOracle: Send + Sync {
    async fn generate(&self, request: GenerationRequest<'_>) -> HealingResult<String>;

    async fn repair(&self, request: RepairRequest<'_>) -> HealingResult<RepairedArtifacts>;
}

/// Static checks on a Dockerfile.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, dockerfile: &str) -> HealingResult<()>;
}

/// Builds, starts and stops the compose project in a directory.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn build(&self, project_dir: &Path) -> HealingResult<()>;

    /// Container ids in the order the runtime reports them.
    async fn start(&self, project_dir: &Path) -> HealingResult<Vec<ContainerId>>;

    async fn stop(&self, project_dir: &Path) -> HealingResult<()>;
}
