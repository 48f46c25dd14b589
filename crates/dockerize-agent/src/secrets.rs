//! Secret collection into the project's `.env` file.
//!
//! Values come from an existing `.env`, then the process environment, then
//! the operator. They are written to `.env` for compose's `env_file` and
//! never returned to the caller.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use healing::{HealingError, HealingResult, SecretCollector};
use tracing::{debug, info};

use crate::prompt::Prompter;

pub const ENV_FILE: &str = ".env";

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub struct PromptSecretCollector {
    prompter: Option<Arc<Prompter>>,
    lookup: EnvLookup,
}

impl PromptSecretCollector {
    /// Collector that asks the operator for anything it cannot find.
    pub fn interactive(prompter: Arc<Prompter>) -> Self {
        Self {
            prompter: Some(prompter),
            lookup: Arc::new(|name| std::env::var(name).ok()),
        }
    }

    /// Collector that only uses `.env` and the environment.
    pub fn non_interactive() -> Self {
        Self {
            prompter: None,
            lookup: Arc::new(|name| std::env::var(name).ok()),
        }
    }

    /// Replace the process environment lookup.
    pub fn with_lookup(
        mut self,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.lookup = Arc::new(lookup);
        self
    }

    async fn ask(&self, name: &str) -> HealingResult<Option<String>> {
        let Some(prompter) = &self.prompter else {
            return Ok(None);
        };
        let answer = prompter
            .ask(&format!("Value for secret {name} (empty to skip): "))
            .await
            .map_err(|e| HealingError::secrets(format!("failed to read {name}: {e}")))?;
        Ok(answer.filter(|value| !value.is_empty()))
    }
}

/// `NAME=value` pairs from a dotenv file. Later duplicates win.
pub fn parse_env_file(contents: &str) -> BTreeMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (name, value) = line.split_once('=')?;
            Some((name.trim().to_string(), unquote(value.trim())))
        })
        .collect()
}

fn unquote(value: &str) -> String {
    let stripped = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .map(|v| v.replace("\\\"", "\"").replace("\\\\", "\\"));
    match stripped {
        Some(v) => v,
        None => value
            .strip_prefix('\'')
            .and_then(|v| v.strip_suffix('\''))
            .unwrap_or(value)
            .to_string(),
    }
}

/// Render a value so compose reads it back unchanged.
pub fn quote(value: &str) -> String {
    let plain = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "_-./:@+,".contains(c));
    if plain && !value.is_empty() {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

async fn write_env_file(path: &Path, contents: &str) -> std::io::Result<()> {
    tokio::fs::write(path, contents).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}

#[async_trait]
impl SecretCollector for PromptSecretCollector {
    async fn collect(&self, project_dir: &Path, names: &[String]) -> HealingResult<Vec<String>> {
        let env_path = project_dir.join(ENV_FILE);
        let mut contents = match tokio::fs::read_to_string(&env_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(HealingError::secrets(format!(
                    "failed to read {}: {e}",
                    env_path.display()
                )))
            }
        };
        let existing = parse_env_file(&contents);

        let mut collected = Vec::new();
        let mut additions = Vec::new();
        let mut missing = Vec::new();
        for name in names {
            if existing.get(name).is_some_and(|v| !v.is_empty()) {
                debug!(secret = %name, "Secret already present in .env");
                collected.push(name.clone());
                continue;
            }
            let value = match (self.lookup)(name).filter(|v| !v.is_empty()) {
                Some(value) => Some(value),
                None => self.ask(name).await?,
            };
            match value {
                Some(value) => {
                    additions.push(format!("{name}={}", quote(&value)));
                    collected.push(name.clone());
                }
                None => missing.push(name.clone()),
            }
        }

        if !missing.is_empty() {
            return Err(HealingError::secrets(format!(
                "no value for secret(s): {}",
                missing.join(", ")
            )));
        }

        if !additions.is_empty() {
            if !contents.is_empty() && !contents.ends_with('\n') {
                contents.push('\n');
            }
            for line in &additions {
                contents.push_str(line);
                contents.push('\n');
            }
            write_env_file(&env_path, &contents).await.map_err(|e| {
                HealingError::secrets(format!("failed to write {}: {e}", env_path.display()))
            })?;
            info!(added = additions.len(), path = %env_path.display(), "Secrets written");
        }
        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_and_quote() {
        let parsed = parse_env_file("A=1\nexport B=\"two words\"\n# C=3\nD='x'\n");
        assert_eq!(parsed.get("A").map(String::as_str), Some("1"));
        assert_eq!(parsed.get("B").map(String::as_str), Some("two words"));
        assert_eq!(parsed.get("D").map(String::as_str), Some("x"));
        assert!(!parsed.contains_key("C"));

        assert_eq!(quote("sk_live_123"), "sk_live_123");
        assert_eq!(quote("p@ss word"), "\"p@ss word\"");
        assert_eq!(parse_env_file(&format!("X={}", quote("a\"b"))).get("X").map(String::as_str), Some("a\"b"));
    }

    #[tokio::test]
    async fn test_existing_env_values_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "API_TOKEN=abc\n").unwrap();

        let collector = PromptSecretCollector::non_interactive().with_lookup(|_| None);
        let collected = collector
            .collect(dir.path(), &names(&["API_TOKEN"]))
            .await
            .unwrap();

        assert_eq!(collected, names(&["API_TOKEN"]));
        assert_eq!(
            std::fs::read_to_string(dir.path().join(".env")).unwrap(),
            "API_TOKEN=abc\n"
        );
    }

    #[tokio::test]
    async fn test_environment_then_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let prompter = Arc::new(Prompter::new(&b"hunter2\n"[..], tokio::io::sink()));
        let collector = PromptSecretCollector::interactive(prompter).with_lookup(|name| {
            (name == "STRIPE_API_KEY").then(|| "sk_test_1".to_string())
        });

        let collected = collector
            .collect(dir.path(), &names(&["STRIPE_API_KEY", "DB_PASSWORD"]))
            .await
            .unwrap();

        assert_eq!(collected, names(&["STRIPE_API_KEY", "DB_PASSWORD"]));
        let written = std::fs::read_to_string(dir.path().join(".env")).unwrap();
        assert_eq!(written, "STRIPE_API_KEY=sk_test_1\nDB_PASSWORD=hunter2\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.path().join(".env"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_missing_value_is_a_secrets_error() {
        let dir = tempfile::tempdir().unwrap();
        let collector = PromptSecretCollector::non_interactive().with_lookup(|_| None);

        let err = collector
            .collect(dir.path(), &names(&["GITHUB_TOKEN"]))
            .await
            .unwrap_err();

        assert!(matches!(err, HealingError::Secrets { .. }));
        assert!(err.to_string().contains("GITHUB_TOKEN"));
        assert!(!dir.path().join(".env").exists());
    }
}
