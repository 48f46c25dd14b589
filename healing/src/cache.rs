//! On-disk cache of analysis, artifacts and run state, keyed per project.
//!
//! Layout: `<cache_root>/<key>/` where `key` is the first 16 hex characters of
//! the blake3 hash of the canonical project path.
//!
//! ```text
//! analysis.json         ProjectAnalysis from the last Analyze
//! Dockerfile            last generated Dockerfile
//! docker-compose.yaml   last generated compose file
//! learnings.json        ledger of the last run
//! run_state.json        resumable RunState
//! run.lock              ProjectLock
//! run-report.json       summary of the last finished run
//! ```

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::collaborators::{ArtifactKind, ProjectAnalysis};
use crate::error::HealingResult;
use crate::ledger::LearningLedger;

const ANALYSIS_FILE: &str = "analysis.json";
const LEARNINGS_FILE: &str = "learnings.json";
const STATE_FILE: &str = "run_state.json";
const LOCK_FILE: &str = "run.lock";
const REPORT_FILE: &str = "run-report.json";

/// Cache key for a project directory.
pub fn project_key(project_dir: &Path) -> String {
    let canonical = project_dir
        .canonicalize()
        .unwrap_or_else(|_| project_dir.to_path_buf());
    let hash = blake3::hash(canonical.to_string_lossy().as_bytes());
    hash.to_hex()[..16].to_string()
}

/// Cache directory for one project.
#[derive(Debug, Clone)]
pub struct RunCache {
    dir: PathBuf,
}

impl RunCache {
    pub fn new(cache_root: &Path, project_dir: &Path) -> Self {
        Self {
            dir: cache_root.join(project_key(project_dir)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure(&self) -> HealingResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join(REPORT_FILE)
    }

    pub fn load_analysis(&self) -> HealingResult<Option<ProjectAnalysis>> {
        self.read_json(ANALYSIS_FILE)
    }

    pub fn save_analysis(&self, analysis: &ProjectAnalysis) -> HealingResult<()> {
        self.write_json(ANALYSIS_FILE, analysis)
    }

    pub fn load_artifact(&self, kind: ArtifactKind) -> HealingResult<Option<String>> {
        let path = self.dir.join(kind.file_name());
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(path)?))
    }

    pub fn save_artifact(&self, kind: ArtifactKind, text: &str) -> HealingResult<()> {
        self.ensure()?;
        std::fs::write(self.dir.join(kind.file_name()), text)?;
        Ok(())
    }

    pub fn save_learnings(&self, ledger: &LearningLedger) -> HealingResult<()> {
        self.write_json(LEARNINGS_FILE, ledger)
    }

    pub fn load_learnings(&self) -> HealingResult<Option<LearningLedger>> {
        self.read_json(LEARNINGS_FILE)
    }

    /// Drop cached analysis, artifacts and learnings (`--rebuild`).
    ///
    /// Run state and the lock are left alone.
    pub fn invalidate(&self) -> HealingResult<()> {
        let files = [
            ANALYSIS_FILE,
            LEARNINGS_FILE,
            ArtifactKind::Dockerfile.file_name(),
            ArtifactKind::Compose.file_name(),
        ];
        for name in files {
            let path = self.dir.join(name);
            if path.exists() {
                std::fs::remove_file(&path)?;
                debug!(path = %path.display(), "Removed cached file");
            }
        }
        info!(cache = %self.dir.display(), "Cache invalidated");
        Ok(())
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, name: &str) -> HealingResult<Option<T>> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn write_json<T: serde::Serialize>(&self, name: &str, value: &T) -> HealingResult<()> {
        self.ensure()?;
        let json = serde_json::to_string_pretty(value)?;
        std::fs::write(self.dir.join(name), json)?;
        Ok(())
    }
}
