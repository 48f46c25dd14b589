//! Agent configuration.
//!
//! Layers, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. `DOCKERIZE_*` environment variables
//! 3. `dockerize.toml` in the project root (or `--config FILE`)
//! 4. command-line flags
//!
//! The TOML layer is merged table by table, so a file that only sets
//! `[oracle] model` keeps everything else from the layers below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use healing::{ReadinessConfig, RetryBudget};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::validator::HadolintMode;

pub const CONFIG_FILE_NAME: &str = "dockerize.toml";

/// OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Base URL up to and including the version segment, e.g. `http://host:8080/v1`
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout_secs: 120,
            temperature: 0.2,
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub hadolint: HadolintMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".dockerize-cache"),
        }
    }
}

/// HTTP readiness probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub host: String,
    pub timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            timeout_ms: 2000,
        }
    }
}

/// Container runtime commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub docker_bin: String,
    /// Upper bound for a single `docker compose` invocation
    pub command_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            command_timeout_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub oracle: OracleConfig,
    pub budget: RetryBudget,
    pub readiness: ReadinessConfig,
    pub validator: ValidatorConfig,
    pub cache: CacheConfig,
    pub probe: ProbeConfig,
    pub runtime: RuntimeConfig,
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub max_generation_attempts: Option<u32>,
    pub max_runtime_attempts: Option<u32>,
    pub healthcheck_timeout_secs: Option<u64>,
    pub cache_dir: Option<PathBuf>,
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: Option<String>) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    let raw = raw?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(var = name, value = %raw, error = %e, "Ignoring invalid environment value");
            None
        }
    }
}

/// Platform cache root: `$XDG_CACHE_HOME/dockerize` or `~/.cache/dockerize`.
fn default_cache_dir(lookup: &dyn Fn(&str) -> Option<String>) -> Option<PathBuf> {
    lookup("XDG_CACHE_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            lookup("HOME")
                .filter(|v| !v.is_empty())
                .map(|home| PathBuf::from(home).join(".cache"))
        })
        .map(|root| root.join("dockerize"))
}

impl AgentConfig {
    /// Defaults plus the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults plus variables read through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = default_cache_dir(&lookup) {
            config.cache.dir = dir;
        }
        if let Some(url) = lookup("DOCKERIZE_LLM_URL") {
            config.oracle.base_url = url;
        }
        if let Some(model) = lookup("DOCKERIZE_LLM_MODEL") {
            config.oracle.model = model;
        }
        if let Some(key) = lookup("DOCKERIZE_LLM_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            config.oracle.api_key = Some(key);
        }
        if let Some(dir) = lookup("DOCKERIZE_CACHE_DIR") {
            config.cache.dir = PathBuf::from(dir);
        }
        if let Some(secs) = parse_env::<u64>(
            "DOCKERIZE_HEALTHCHECK_TIMEOUT_SECS",
            lookup("DOCKERIZE_HEALTHCHECK_TIMEOUT_SECS"),
        ) {
            config.readiness.timeout = Duration::from_secs(secs);
        }
        if let Some(ms) =
            parse_env::<u64>("DOCKERIZE_POLL_INTERVAL_MS", lookup("DOCKERIZE_POLL_INTERVAL_MS"))
        {
            config.readiness.poll_interval = Duration::from_millis(ms);
        }
        if let Some(mode) =
            parse_env::<HadolintMode>("DOCKERIZE_HADOLINT", lookup("DOCKERIZE_HADOLINT"))
        {
            config.validator.hadolint = mode;
        }
        config
    }

    /// Merge a TOML document over this configuration.
    pub fn merge_toml(self, source: &str) -> Result<Self> {
        let overlay: toml::Table = toml::from_str(source).context("Invalid configuration TOML")?;
        let mut base = toml::Table::try_from(&self).context("Failed to serialise configuration")?;
        merge_tables(&mut base, overlay);
        base.try_into().context("Invalid configuration values")
    }

    /// Environment, then `explicit` or `<project_dir>/dockerize.toml`.
    ///
    /// An explicit path must exist; the project file is optional.
    pub fn load(project_dir: &Path, explicit: Option<&Path>) -> Result<Self> {
        let config = Self::from_env();
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let candidate = project_dir.join(CONFIG_FILE_NAME);
                candidate.is_file().then_some(candidate)
            }
        };
        let Some(path) = path else {
            return Ok(config);
        };

        debug!(path = %path.display(), "Loading configuration file");
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        config
            .merge_toml(&source)
            .with_context(|| format!("Failed to load {}", path.display()))
    }

    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(n) = overrides.max_generation_attempts {
            self.budget.max_generation_attempts = n;
        }
        if let Some(n) = overrides.max_runtime_attempts {
            self.budget.max_runtime_attempts = n;
        }
        if let Some(secs) = overrides.healthcheck_timeout_secs {
            self.readiness.timeout = Duration::from_secs(secs);
        }
        if let Some(dir) = &overrides.cache_dir {
            self.cache.dir = dir.clone();
        }
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
