//! OpenAI-compatible generation oracle.
//!
//! Talks to any `/chat/completions` endpoint (vLLM, llama.cpp server, a
//! hosted API) and pulls artifacts out of fenced code blocks in the reply.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use healing::{
    ArtifactKind, GenerationOracle, GenerationRequest, HealingError, HealingResult,
    RepairRequest, RepairedArtifacts,
};
use regex::Regex;
use tracing::{debug, info};

use crate::config::OracleConfig;
use crate::prompts;

static FENCED_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([A-Za-z0-9_-]*)[ \t]*\r?\n(.*?)```")
        .expect("fenced block regex should compile")
});

/// One fenced block from a model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencedBlock {
    /// Lower-cased info string, empty when the fence had none
    pub tag: String,
    pub body: String,
}

/// Every fenced block in `reply`, in order.
pub fn extract_blocks(reply: &str) -> Vec<FencedBlock> {
    FENCED_BLOCK_RE
        .captures_iter(reply)
        .map(|caps| FencedBlock {
            tag: caps[1].to_ascii_lowercase(),
            body: caps[2].to_string(),
        })
        .collect()
}

fn tag_matches(kind: ArtifactKind, tag: &str) -> bool {
    match kind {
        ArtifactKind::Dockerfile => matches!(tag, "dockerfile" | "docker" | "containerfile"),
        ArtifactKind::Compose => matches!(tag, "yaml" | "yml" | "compose"),
    }
}

/// Guess the artifact in an untagged block.
fn sniff_kind(body: &str) -> Option<ArtifactKind> {
    let first = body
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))?;
    let keyword = first
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    if keyword == "FROM" || keyword == "ARG" {
        Some(ArtifactKind::Dockerfile)
    } else if body.lines().any(|line| line.trim_end() == "services:") {
        Some(ArtifactKind::Compose)
    } else {
        None
    }
}

fn block_kind(block: &FencedBlock) -> Option<ArtifactKind> {
    [ArtifactKind::Dockerfile, ArtifactKind::Compose]
        .into_iter()
        .find(|&kind| tag_matches(kind, &block.tag))
        .or_else(|| {
            if block.tag.is_empty() {
                sniff_kind(&block.body)
            } else {
                None
            }
        })
}

/// The artifact of `kind` in a generation reply.
///
/// A block tagged for the kind wins; otherwise the first block is taken.
pub fn extract_artifact(reply: &str, kind: ArtifactKind) -> HealingResult<String> {
    let blocks = extract_blocks(reply);
    let block = blocks
        .iter()
        .find(|b| tag_matches(kind, &b.tag))
        .or_else(|| blocks.first())
        .ok_or_else(|| {
            HealingError::generation(format!("reply contains no fenced {kind} block"))
        })?;

    let text = normalize(&block.body);
    if text.trim().is_empty() {
        return Err(HealingError::generation(format!("{kind} block is empty")));
    }
    if kind == ArtifactKind::Compose {
        check_compose(&text)?;
    }
    Ok(text)
}

/// Split a repair reply into changed artifacts.
///
/// A block identical to the current artifact counts as untouched.
pub fn extract_repair(
    reply: &str,
    current_dockerfile: &str,
    current_compose: &str,
) -> HealingResult<RepairedArtifacts> {
    let mut repaired = RepairedArtifacts::default();
    for block in extract_blocks(reply) {
        let text = normalize(&block.body);
        if text.trim().is_empty() {
            continue;
        }
        match block_kind(&block) {
            Some(ArtifactKind::Dockerfile) if repaired.dockerfile.is_none() => {
                if !same_artifact(&text, current_dockerfile) {
                    repaired.dockerfile = Some(text);
                }
            }
            Some(ArtifactKind::Compose) if repaired.compose.is_none() => {
                check_compose(&text)?;
                if !same_artifact(&text, current_compose) {
                    repaired.compose = Some(text);
                }
            }
            _ => debug!(tag = %block.tag, "Ignoring fenced block in repair reply"),
        }
    }
    Ok(repaired)
}

fn normalize(body: &str) -> String {
    let mut text = body.trim().to_string();
    text.push('\n');
    text
}

fn same_artifact(a: &str, b: &str) -> bool {
    a.trim() == b.trim()
}

/// A compose file must parse as YAML and declare `services`.
pub fn check_compose(text: &str) -> HealingResult<()> {
    let doc: serde_yaml::Value = serde_yaml::from_str(text)
        .map_err(|e| HealingError::generation(format!("compose file is not valid YAML: {e}")))?;
    match doc.get("services") {
        Some(serde_yaml::Value::Mapping(services)) if !services.is_empty() => Ok(()),
        _ => Err(HealingError::generation(
            "compose file declares no services",
        )),
    }
}

pub struct HttpOracle {
    config: OracleConfig,
    client: reqwest::Client,
}

impl HttpOracle {
    pub fn new(config: OracleConfig) -> HealingResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| HealingError::services(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> HealingResult<String> {
        let start = Instant::now();
        let request_body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ],
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature
        });

        let mut request = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .json(&request_body);
        if let Some(api_key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| HealingError::services(format!("oracle request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(HealingError::services(format!(
                "oracle API error ({status}): {body}"
            )));
        }

        let resp_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| HealingError::services(format!("unparseable oracle response: {e}")))?;

        let content = resp_json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        debug!(
            model = %self.config.model,
            response_time_ms = start.elapsed().as_millis() as u64,
            chars = content.len(),
            "Oracle replied"
        );
        if content.trim().is_empty() {
            return Err(HealingError::generation("oracle returned an empty reply"));
        }
        Ok(content)
    }
}

#[async_trait]
impl GenerationOracle for HttpOracle {
    async fn generate(&self, request: GenerationRequest<'_>) -> HealingResult<String> {
        info!(
            kind = %request.kind,
            learnings = request.context.learnings.len(),
            hints = request.context.hints.len(),
            prompt_version = prompts::PROMPT_VERSION,
            "Generating artifact"
        );
        let reply = self
            .complete(
                prompts::system_prompt(request.kind),
                &prompts::generation_prompt(&request),
            )
            .await?;
        extract_artifact(&reply, request.kind)
    }

    async fn repair(&self, request: RepairRequest<'_>) -> HealingResult<RepairedArtifacts> {
        info!(
            failed_phase = %request.failed_phase,
            learnings = request.context.learnings.len(),
            prompt_version = prompts::PROMPT_VERSION,
            "Requesting repair"
        );
        let reply = self
            .complete(
                prompts::REPAIR_SYSTEM_PROMPT,
                &prompts::repair_prompt(&request),
            )
            .await?;
        extract_repair(&reply, request.dockerfile, request.compose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPOSE: &str = "services:\n  web:\n    build: .\n    ports:\n      - \"8000:8000\"\n";

    #[test]
    fn test_extracts_tagged_dockerfile() {
        let reply = "Here you go:\n\n```dockerfile\nFROM python:3.12-slim\nCMD [\"python\", \"app.py\"]\n```\n";
        let text = extract_artifact(reply, ArtifactKind::Dockerfile).unwrap();
        assert_eq!(text, "FROM python:3.12-slim\nCMD [\"python\", \"app.py\"]\n");
    }

    #[test]
    fn test_prefers_block_tagged_for_kind() {
        let reply = format!("```bash\ndocker compose up\n```\n\n```yaml\n{COMPOSE}```");
        let text = extract_artifact(&reply, ArtifactKind::Compose).unwrap();
        assert!(text.starts_with("services:"));
    }

    #[test]
    fn test_unfenced_reply_is_a_generation_error() {
        let err = extract_artifact("FROM alpine:3.20", ArtifactKind::Dockerfile).unwrap_err();
        assert!(matches!(err, HealingError::Generation { .. }));
    }

    #[test]
    fn test_empty_block_is_a_generation_error() {
        let err = extract_artifact("```dockerfile\n\n```", ArtifactKind::Dockerfile).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_compose_without_services_is_rejected() {
        let err = extract_artifact("```yaml\nversion: '3'\n```", ArtifactKind::Compose).unwrap_err();
        assert!(err.to_string().contains("no services"));
    }

    #[test]
    fn test_crlf_fences_are_recognised() {
        let reply = "```dockerfile\r\nFROM alpine:3.20\r\nCMD [\"sh\"]\r\n```";
        let blocks = extract_blocks(reply);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].tag, "dockerfile");
    }

    #[test]
    fn test_repair_keeps_only_changed_artifacts() {
        let dockerfile = "FROM python:3.12-slim\nCMD [\"python\", \"app.py\"]\n";
        let reply = format!(
            "```dockerfile\n{dockerfile}```\n\n```yaml\nservices:\n  web:\n    build: .\n    env_file: .env\n```"
        );
        let repaired = extract_repair(&reply, dockerfile, COMPOSE).unwrap();
        assert_eq!(repaired.dockerfile, None);
        assert!(repaired.compose.unwrap().contains("env_file"));
    }

    #[test]
    fn test_repair_without_blocks_is_unchanged() {
        let repaired = extract_repair("Looks fine to me.", "FROM a\n", COMPOSE).unwrap();
        assert!(repaired.is_unchanged());
    }

    #[test]
    fn test_repair_sniffs_untagged_blocks() {
        let reply = "```\nFROM node:20-alpine\nCMD [\"node\", \"server.js\"]\n```";
        let repaired = extract_repair(reply, "FROM node:18\n", COMPOSE).unwrap();
        assert!(repaired.dockerfile.unwrap().starts_with("FROM node:20-alpine"));
        assert!(repaired.compose.is_none());
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let oracle = HttpOracle::new(OracleConfig {
            base_url: "http://localhost:8080/v1/".into(),
            ..OracleConfig::default()
        })
        .unwrap();
        assert_eq!(oracle.endpoint(), "http://localhost:8080/v1/chat/completions");
    }
}
