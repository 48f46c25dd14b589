//! Manifest-sniffing project analyzer.
//!
//! Walks the top two levels of the project (honouring `.gitignore`), maps
//! well-known manifests to a language, sniffs the framework from the root
//! manifest and reads variable names from `.env.example`-style files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use healing::{Analyzer, HealingError, HealingResult, ProjectAnalysis};
use ignore::WalkBuilder;
use tracing::{debug, info};

const MAX_DEPTH: usize = 2;

const SKIPPED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "vendor",
    "__pycache__",
    ".venv",
    "venv",
    "dist",
    "build",
];

/// Manifest file name → language.
const MANIFESTS: &[(&str, &str)] = &[
    ("Cargo.toml", "rust"),
    ("package.json", "javascript"),
    ("requirements.txt", "python"),
    ("pyproject.toml", "python"),
    ("Pipfile", "python"),
    ("go.mod", "go"),
    ("pom.xml", "java"),
    ("build.gradle", "java"),
    ("Gemfile", "ruby"),
    ("composer.json", "php"),
];

/// (language, dependency needle, framework, default port). First match wins.
const FRAMEWORKS: &[(&str, &str, &str, u16)] = &[
    ("python", "django", "django", 8000),
    ("python", "fastapi", "fastapi", 8000),
    ("python", "flask", "flask", 5000),
    ("javascript", "\"next\"", "nextjs", 3000),
    ("javascript", "@nestjs/core", "nestjs", 3000),
    ("javascript", "\"express\"", "express", 3000),
    ("javascript", "\"fastify\"", "fastify", 3000),
    ("rust", "actix-web", "actix-web", 8080),
    ("rust", "axum", "axum", 3000),
    ("rust", "rocket", "rocket", 8000),
    ("go", "github.com/gin-gonic/gin", "gin", 8080),
    ("go", "github.com/labstack/echo", "echo", 1323),
    ("java", "spring-boot", "spring-boot", 8080),
    ("ruby", "rails", "rails", 3000),
    ("ruby", "sinatra", "sinatra", 4567),
    ("php", "laravel/framework", "laravel", 8000),
];

const ENV_TEMPLATES: &[&str] = &[".env.example", ".env.sample", ".env.template"];

const SECRET_MARKERS: &[&str] = &[
    "SECRET",
    "TOKEN",
    "PASSWORD",
    "API_KEY",
    "PRIVATE_KEY",
    "CREDENTIAL",
];

/// Whether an environment variable name looks like it holds a secret.
pub fn is_secret_name(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    SECRET_MARKERS.iter().any(|marker| upper.contains(marker))
}

/// Variable names declared in a dotenv-style file, in file order.
pub fn parse_env_names(contents: &str) -> Vec<String> {
    let mut names = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((name, _)) = line.split_once('=') else {
            continue;
        };
        let name = name.trim();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// `PORT=8000` style value for a variable in a dotenv file.
fn env_port(contents: &str) -> Option<u16> {
    contents.lines().find_map(|line| {
        let line = line.trim();
        let line = line.strip_prefix("export ").unwrap_or(line);
        let (name, value) = line.split_once('=')?;
        if name.trim() != "PORT" {
            return None;
        }
        value.trim().trim_matches(|c| c == '"' || c == '\'').parse().ok()
    })
}

/// Manifest files within the walk depth, shallowest first.
fn find_manifests(root: &Path) -> Vec<PathBuf> {
    let walker = WalkBuilder::new(root)
        .max_depth(Some(MAX_DEPTH))
        .hidden(false)
        .git_ignore(true)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(entry.file_type().is_some_and(|t| t.is_dir())
                && SKIPPED_DIRS.iter().any(|dir| *dir == name))
        })
        .build();

    let mut found: Vec<PathBuf> = walker
        .flatten()
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            MANIFESTS.iter().any(|(manifest, _)| *manifest == name)
        })
        .map(|entry| entry.into_path())
        .collect();

    found.sort_by_key(|path| {
        let rel = path.strip_prefix(root).unwrap_or(path);
        (rel.components().count(), rel.to_path_buf())
    });
    found
}

fn language_of(manifest: &Path) -> Option<&'static str> {
    let name = manifest.file_name()?.to_string_lossy();
    MANIFESTS
        .iter()
        .find(|(file, _)| *file == name)
        .map(|(_, language)| *language)
}

/// Blocking analysis of `root`.
pub fn analyze_dir(root: &Path) -> HealingResult<ProjectAnalysis> {
    if !root.is_dir() {
        return Err(HealingError::analysis(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let manifests = find_manifests(root);
    let Some(primary) = manifests.first() else {
        return Err(HealingError::analysis(format!(
            "no recognised manifest in {} (looked for {})",
            root.display(),
            MANIFESTS
                .iter()
                .map(|(name, _)| *name)
                .collect::<Vec<_>>()
                .join(", ")
        )));
    };

    let project_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "app".to_string());
    let mut analysis = ProjectAnalysis::new(project_name);
    analysis.manifests = manifests
        .iter()
        .map(|path| {
            path.strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();

    let mut language = language_of(primary);
    if language == Some("javascript") && root.join("tsconfig.json").is_file() {
        language = Some("typescript");
    }
    analysis.language = language.map(str::to_string);

    // Framework sniffing looks at every manifest of the primary language.
    let manifest_text: String = manifests
        .iter()
        .filter(|path| language_of(path) == language_of(primary))
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .collect::<Vec<_>>()
        .join("\n")
        .to_ascii_lowercase();
    if let Some((_, _, framework, port)) = FRAMEWORKS.iter().find(|(lang, needle, _, _)| {
        language_of(primary) == Some(*lang) && manifest_text.contains(needle)
    }) {
        analysis.framework = Some(framework.to_string());
        analysis.ports.push(*port);
    }

    for template in ENV_TEMPLATES {
        let Ok(contents) = std::fs::read_to_string(root.join(template)) else {
            continue;
        };
        debug!(file = template, "Reading environment template");
        for name in parse_env_names(&contents) {
            let bucket = if is_secret_name(&name) {
                &mut analysis.secrets
            } else {
                &mut analysis.env_vars
            };
            if !bucket.contains(&name) {
                bucket.push(name);
            }
        }
        if let Some(port) = env_port(&contents) {
            if !analysis.ports.contains(&port) {
                analysis.ports.insert(0, port);
            }
        }
    }

    Ok(analysis)
}

/// [`Analyzer`] over the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct ManifestAnalyzer;

#[async_trait]
impl Analyzer for ManifestAnalyzer {
    async fn analyze(&self, project_dir: &Path) -> HealingResult<ProjectAnalysis> {
        let root = project_dir.to_path_buf();
        let analysis = tokio::task::spawn_blocking(move || analyze_dir(&root))
            .await
            .map_err(|e| HealingError::analysis(format!("analysis task failed: {e}")))??;

        info!(
            project = %analysis.project_name,
            language = analysis.language.as_deref().unwrap_or("unknown"),
            framework = analysis.framework.as_deref().unwrap_or("none"),
            secrets = analysis.secrets.len(),
            "Project analysed"
        );
        Ok(analysis)
    }
}
