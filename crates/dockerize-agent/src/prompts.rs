//! Prompt text for the generation oracle.
//!
//! Bump `PROMPT_VERSION` whenever any prompt changes so run reports can be
//! traced back to the prompts that produced their artifacts.

use healing::{ArtifactKind, GenerationRequest, RepairRequest};

pub const PROMPT_VERSION: &str = "1.2.0";

pub const DOCKERFILE_SYSTEM_PROMPT: &str = "\
You are a senior platform engineer who writes production Dockerfiles.

Rules:
- Pin base images to a specific version tag, never `latest`.
- Prefer slim or alpine variants and multi-stage builds for compiled languages.
- Copy dependency manifests and install dependencies before copying the rest \
  of the source so layers cache well.
- Never bake secrets into the image. Secrets arrive at runtime through `.env`.
- The final stage must declare `CMD` or `ENTRYPOINT`.
- `EXPOSE` every port the application listens on.

Reply with exactly one fenced ```dockerfile block and nothing else.";

pub const COMPOSE_SYSTEM_PROMPT: &str = "\
You are a senior platform engineer who writes docker compose files.

Rules:
- Build the application service from the Dockerfile in the project root (`build: .`).
- Publish every application port on the host with an explicit `ports:` mapping.
- Load runtime secrets with `env_file: .env` when the project has secrets.
- Add backing services (databases, caches) only when the project clearly needs them.
- Do not use the obsolete top-level `version:` key.

Reply with exactly one fenced ```yaml block and nothing else.";

pub const REPAIR_SYSTEM_PROMPT: &str = "\
You are a senior platform engineer fixing a containerized application that \
failed to build, start or pass its healthcheck.

You receive the current Dockerfile, the current docker-compose.yaml and the \
history of failures. Make the smallest change that fixes the most recent \
failure without reintroducing an earlier one.

Reply with a fenced ```dockerfile block if the Dockerfile must change and a \
fenced ```yaml block if the compose file must change. Omit a block to leave \
that file untouched. No other prose is needed.";

pub fn system_prompt(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Dockerfile => DOCKERFILE_SYSTEM_PROMPT,
        ArtifactKind::Compose => COMPOSE_SYSTEM_PROMPT,
    }
}

/// User message for a fresh generation.
pub fn generation_prompt(request: &GenerationRequest<'_>) -> String {
    let mut out = format!(
        "## Project\n\n{}\n",
        request.analysis.render().trim_end()
    );

    if let Some(dockerfile) = request.dockerfile {
        out.push_str(&format!(
            "\n## Dockerfile\n\n```dockerfile\n{}\n```\n",
            dockerfile.trim_end()
        ));
    }
    if let Some(prior) = request.prior_artifact {
        out.push_str(&format!(
            "\n## Previous {}\n\n```{}\n{}\n```\n",
            request.kind.file_name(),
            fence_tag(request.kind),
            prior.trim_end()
        ));
    }

    let context = request.context.render();
    if !context.is_empty() {
        out.push('\n');
        out.push_str(&context);
    }

    out.push_str(&format!("\nWrite the {}.\n", request.kind.file_name()));
    out
}

/// User message for a targeted repair.
pub fn repair_prompt(request: &RepairRequest<'_>) -> String {
    let mut out = format!(
        "## Project\n\n{}\n\n## Failed phase\n\n{}\n\n\
         ## Dockerfile\n\n```dockerfile\n{}\n```\n\n\
         ## docker-compose.yaml\n\n```yaml\n{}\n```\n",
        request.analysis.render().trim_end(),
        request.failed_phase,
        request.dockerfile.trim_end(),
        request.compose.trim_end(),
    );

    let context = request.context.render();
    if !context.is_empty() {
        out.push('\n');
        out.push_str(&context);
    }
    out.push_str("\nFix the most recent failure.\n");
    out
}

pub fn fence_tag(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Dockerfile => "dockerfile",
        ArtifactKind::Compose => "yaml",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healing::{
        ErrorKind, GenerationContext, HintRecord, Learning, Phase, ProjectAnalysis,
    };

    #[test]
    fn test_generation_prompt_includes_context_and_prior() {
        let analysis = ProjectAnalysis::new("shop");
        let learnings = vec![Learning::new(
            Phase::Validate,
            ErrorKind::Validation,
            "missing CMD",
            1,
        )];
        let hints = vec![HintRecord::new("use python:3.12-slim")];
        let request = GenerationRequest {
            kind: ArtifactKind::Dockerfile,
            analysis: &analysis,
            prior_artifact: Some("FROM python:3.12\n"),
            dockerfile: None,
            context: GenerationContext {
                learnings: &learnings,
                hints: &hints,
            },
        };

        let prompt = generation_prompt(&request);
        assert!(prompt.contains("Project: shop"));
        assert!(prompt.contains("## Previous Dockerfile"));
        assert!(prompt.contains("missing CMD"));
        assert!(prompt.contains("use python:3.12-slim"));
        assert!(prompt.trim_end().ends_with("Write the Dockerfile."));
    }

    #[test]
    fn test_compose_prompt_carries_dockerfile() {
        let analysis = ProjectAnalysis::new("shop");
        let request = GenerationRequest {
            kind: ArtifactKind::Compose,
            analysis: &analysis,
            prior_artifact: None,
            dockerfile: Some("FROM node:20-alpine\nCMD [\"node\", \"index.js\"]\n"),
            context: GenerationContext::empty(),
        };
        let prompt = generation_prompt(&request);
        assert!(prompt.contains("```dockerfile\nFROM node:20-alpine"));
        assert!(!prompt.contains("Previous failures"));
    }

    #[test]
    fn test_repair_prompt_names_failed_phase() {
        let analysis = ProjectAnalysis::new("shop");
        let request = RepairRequest {
            analysis: &analysis,
            dockerfile: "FROM alpine:3.20\n",
            compose: "services: {}\n",
            failed_phase: Phase::Healthcheck,
            context: GenerationContext::empty(),
        };
        let prompt = repair_prompt(&request);
        assert!(prompt.contains(&format!("## Failed phase\n\n{}", Phase::Healthcheck)));
        assert!(prompt.contains("```yaml\nservices: {}\n```"));
    }
}
