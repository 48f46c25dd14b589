//! Dockerfile validation: a built-in lint plus optional hadolint.

use std::sync::Arc;

use async_trait::async_trait;
use healing::{HealingError, HealingResult, Validator};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::command::{CommandError, CommandRequest, CommandRunner};

const KNOWN_INSTRUCTIONS: &[&str] = &[
    "ADD",
    "ARG",
    "CMD",
    "COPY",
    "ENTRYPOINT",
    "ENV",
    "EXPOSE",
    "FROM",
    "HEALTHCHECK",
    "LABEL",
    "MAINTAINER",
    "ONBUILD",
    "RUN",
    "SHELL",
    "STOPSIGNAL",
    "USER",
    "VOLUME",
    "WORKDIR",
];

/// When to run hadolint after the built-in lint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HadolintMode {
    Off,
    /// Run it when it is installed
    #[default]
    Auto,
    /// A missing binary fails validation
    Required,
}

impl std::str::FromStr for HadolintMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "false" | "0" => Ok(Self::Off),
            "auto" => Ok(Self::Auto),
            "required" | "true" | "1" => Ok(Self::Required),
            other => Err(format!("unknown hadolint mode `{other}`")),
        }
    }
}

/// Logical Dockerfile instructions: continuation lines joined, comments and
/// heredoc bodies dropped. Each entry is `(line_number, text)`.
fn instructions(dockerfile: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;
    let mut heredoc_end: Option<String> = None;

    for (idx, raw) in dockerfile.lines().enumerate() {
        let line_no = idx + 1;
        if let Some(end) = &heredoc_end {
            if raw.trim() == end {
                heredoc_end = None;
            }
            continue;
        }

        let trimmed = raw.trim();
        if trimmed.starts_with('#') || (pending.is_none() && trimmed.is_empty()) {
            continue;
        }

        let (continues, text) = match trimmed.strip_suffix('\\') {
            Some(head) => (true, head.trim_end()),
            None => (false, trimmed),
        };

        let entry = pending.get_or_insert_with(|| (line_no, String::new()));
        if !entry.1.is_empty() && !text.is_empty() {
            entry.1.push(' ');
        }
        entry.1.push_str(text);

        if !continues {
            if let Some((start, instruction)) = pending.take() {
                heredoc_end = heredoc_marker(&instruction);
                out.push((start, instruction));
            }
        }
    }
    if let Some(entry) = pending {
        out.push(entry);
    }
    out
}

/// `RUN <<EOF` style heredoc terminator, if the instruction opens one.
fn heredoc_marker(instruction: &str) -> Option<String> {
    let start = instruction.find("<<")?;
    let rest = instruction[start + 2..].trim_start_matches('-');
    let marker: String = rest
        .trim_matches(|c| c == '"' || c == '\'')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    (!marker.is_empty()).then_some(marker)
}

/// Built-in structural checks. Returns every problem found.
pub fn lint(dockerfile: &str) -> Vec<String> {
    let instructions = instructions(dockerfile);
    if instructions.is_empty() {
        return vec!["Dockerfile is empty".to_string()];
    }

    let mut problems = Vec::new();
    let keyword = |text: &str| {
        text.split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase()
    };

    let (first_line, first) = &instructions[0];
    let first_kw = keyword(first);
    if first_kw != "FROM" && first_kw != "ARG" {
        problems.push(format!(
            "line {first_line}: first instruction must be FROM or ARG, found {first_kw}"
        ));
    }
    if !instructions.iter().any(|(_, text)| keyword(text) == "FROM") {
        problems.push("no FROM instruction".to_string());
    }

    for (line, text) in &instructions {
        let kw = keyword(text);
        if !KNOWN_INSTRUCTIONS.contains(&kw.as_str()) {
            problems.push(format!("line {line}: unknown instruction {kw}"));
        }
    }

    if !instructions
        .iter()
        .any(|(_, text)| matches!(keyword(text).as_str(), "CMD" | "ENTRYPOINT"))
    {
        problems.push("no CMD or ENTRYPOINT instruction".to_string());
    }
    problems
}

#[derive(Debug, Deserialize)]
struct HadolintFinding {
    code: String,
    level: String,
    line: u32,
    message: String,
}

/// Error-level findings from `hadolint -f json` output.
pub fn hadolint_errors(json: &str) -> Result<Vec<String>, serde_json::Error> {
    let trimmed = json.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let findings: Vec<HadolintFinding> = serde_json::from_str(trimmed)?;
    Ok(findings
        .into_iter()
        .filter(|f| f.level.eq_ignore_ascii_case("error"))
        .map(|f| format!("line {}: {} {}", f.line, f.code, f.message))
        .collect())
}

pub struct DockerfileValidator {
    runner: Arc<dyn CommandRunner>,
    hadolint: HadolintMode,
    hadolint_bin: String,
}

impl DockerfileValidator {
    pub fn new(runner: Arc<dyn CommandRunner>, hadolint: HadolintMode) -> Self {
        Self {
            runner,
            hadolint,
            hadolint_bin: "hadolint".to_string(),
        }
    }

    pub fn with_hadolint_bin(mut self, bin: impl Into<String>) -> Self {
        self.hadolint_bin = bin.into();
        self
    }

    async fn run_hadolint(&self, dockerfile: &str) -> HealingResult<Vec<String>> {
        let request = CommandRequest::new(&self.hadolint_bin)
            .args(["-f", "json", "-"])
            .stdin(dockerfile);
        let output = match self.runner.run(&request).await {
            Ok(output) => output,
            Err(CommandError::NotFound { program }) if self.hadolint == HadolintMode::Auto => {
                debug!(program = %program, "hadolint not installed; skipping");
                return Ok(Vec::new());
            }
            Err(e) => return Err(HealingError::validation(e.to_string())),
        };

        // hadolint exits non-zero whenever it reports anything, so the
        // findings decide, not the exit code.
        match hadolint_errors(&output.stdout) {
            Ok(errors) => Ok(errors),
            Err(e) => {
                warn!(error = %e, "Unreadable hadolint output");
                if output.success() {
                    Ok(Vec::new())
                } else {
                    Err(HealingError::validation(format!(
                        "hadolint failed: {}",
                        output.diagnostic_tail(10)
                    )))
                }
            }
        }
    }
}

#[async_trait]
impl Validator for DockerfileValidator {
    async fn validate(&self, dockerfile: &str) -> HealingResult<()> {
        let mut problems = lint(dockerfile);
        if problems.is_empty() && self.hadolint != HadolintMode::Off {
            problems = self.run_hadolint(dockerfile).await?;
        }

        if problems.is_empty() {
            debug!("Dockerfile passed validation");
            return Ok(());
        }
        Err(HealingError::validation(problems.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use std::sync::Mutex;

    const GOOD: &str = "\
# syntax=docker/dockerfile:1
ARG PYTHON=3.12
FROM python:${PYTHON}-slim
WORKDIR /app
COPY requirements.txt .
RUN pip install --no-cache-dir \\
    -r requirements.txt
COPY . .
EXPOSE 8000
CMD [\"gunicorn\", \"-b\", \"0.0.0.0:8000\", \"app:app\"]
";

    #[test]
    fn test_good_dockerfile_has_no_problems() {
        assert!(lint(GOOD).is_empty(), "{:?}", lint(GOOD));
    }

    #[test]
    fn test_empty_dockerfile() {
        assert_eq!(lint("\n# just a comment\n"), vec!["Dockerfile is empty"]);
    }

    #[test]
    fn test_first_instruction_must_be_from_or_arg() {
        let problems = lint("RUN echo hi\nFROM alpine:3.20\nCMD [\"sh\"]\n");
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("first instruction"));
    }

    #[test]
    fn test_unknown_instruction_is_reported_with_line() {
        let problems = lint("FROM alpine:3.20\nINSTALL curl\nCMD [\"sh\"]\n");
        assert_eq!(problems, vec!["line 2: unknown instruction INSTALL"]);
    }

    #[test]
    fn test_missing_cmd() {
        let problems = lint("FROM alpine:3.20\nRUN apk add curl\n");
        assert_eq!(problems, vec!["no CMD or ENTRYPOINT instruction"]);
    }

    #[test]
    fn test_heredoc_body_is_not_linted() {
        let dockerfile = "\
FROM alpine:3.20
RUN <<EOF
apk add --no-cache curl
echo done
EOF
ENTRYPOINT [\"curl\"]
";
        assert!(lint(dockerfile).is_empty(), "{:?}", lint(dockerfile));
    }

    #[test]
    fn test_hadolint_errors_only() {
        let json = r#"[
            {"code":"DL3006","column":1,"file":"-","level":"warning","line":1,"message":"Always tag the version"},
            {"code":"DL3000","column":1,"file":"-","level":"error","line":3,"message":"Use absolute WORKDIR"}
        ]"#;
        assert_eq!(
            hadolint_errors(json).unwrap(),
            vec!["line 3: DL3000 Use absolute WORKDIR"]
        );
    }

    #[test]
    fn test_hadolint_mode_parsing() {
        assert_eq!("OFF".parse::<HadolintMode>().unwrap(), HadolintMode::Off);
        assert_eq!("required".parse::<HadolintMode>().unwrap(), HadolintMode::Required);
        assert!("sometimes".parse::<HadolintMode>().is_err());
    }

    struct HadolintRunner {
        result: Mutex<Option<Result<CommandOutput, CommandError>>>,
        calls: Mutex<u32>,
    }

    impl HadolintRunner {
        fn new(result: Result<CommandOutput, CommandError>) -> Arc<Self> {
            Arc::new(Self {
                result: Mutex::new(Some(result)),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl CommandRunner for HadolintRunner {
        async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, CommandError> {
            assert_eq!(request.stdin.as_deref(), Some(GOOD));
            *self.calls.lock().unwrap() += 1;
            self.result
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Ok(CommandOutput::default()))
        }
    }

    fn not_found() -> Result<CommandOutput, CommandError> {
        Err(CommandError::NotFound {
            program: "hadolint".into(),
        })
    }

    #[tokio::test]
    async fn test_missing_hadolint_is_skipped_in_auto_mode() {
        let runner = HadolintRunner::new(not_found());
        DockerfileValidator::new(runner.clone(), HadolintMode::Auto)
            .validate(GOOD)
            .await
            .unwrap();
        assert_eq!(*runner.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_hadolint_fails_when_required() {
        let runner = HadolintRunner::new(not_found());
        let err = DockerfileValidator::new(runner, HadolintMode::Required)
            .validate(GOOD)
            .await
            .unwrap_err();
        assert!(matches!(err, HealingError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_hadolint_error_fails_validation() {
        let runner = HadolintRunner::new(Ok(CommandOutput {
            exit_code: Some(1),
            stdout: r#"[{"code":"DL3000","level":"error","line":4,"message":"Use absolute WORKDIR"}]"#
                .into(),
            stderr: String::new(),
        }));
        let err = DockerfileValidator::new(runner, HadolintMode::Auto)
            .validate(GOOD)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("DL3000"));
    }

    #[tokio::test]
    async fn test_lint_failure_skips_hadolint() {
        let runner = HadolintRunner::new(not_found());
        let err = DockerfileValidator::new(runner.clone(), HadolintMode::Required)
            .validate("FROM alpine:3.20\n")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("CMD or ENTRYPOINT"));
        assert_eq!(*runner.calls.lock().unwrap(), 0);
    }
}
