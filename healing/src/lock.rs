//! Exclusive per-project run lock.
//!
//! Two runs against the same project would fight over the same compose
//! project and the same run state. The lock is a file created with
//! `create_new`, holding the owner's pid and run id; it is removed when the
//! guard drops.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HealingError, HealingResult};

/// Contents of the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub run_id: String,
    pub acquired_at: chrono::DateTime<chrono::Utc>,
}

/// Held lock. Releases on drop.
#[derive(Debug)]
pub struct ProjectLock {
    path: PathBuf,
    owner: LockOwner,
}

impl ProjectLock {
    /// Acquire the lock at `path`, failing with `ProjectLocked` if another
    /// run holds it.
    pub fn acquire(path: &Path, run_id: &str) -> HealingResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(HealingError::ProjectLocked {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let owner = LockOwner {
            pid: std::process::id(),
            run_id: run_id.to_string(),
            acquired_at: chrono::Utc::now(),
        };
        file.write_all(serde_json::to_string(&owner)?.as_bytes())?;
        tracing::debug!(path = %path.display(), run_id, "Acquired project lock");

        Ok(Self {
            path: path.to_path_buf(),
            owner,
        })
    }

    /// Who holds the lock at `path`, if anyone.
    pub fn owner_of(path: &Path) -> HealingResult<Option<LockOwner>> {
        match std::fs::read_to_string(path) {
            Ok(json) => Ok(serde_json::from_str(&json).ok()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a lock left behind by a crashed run.
    pub fn break_stale(path: &Path) -> HealingResult<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => {
                tracing::warn!(path = %path.display(), "Removed stale project lock");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn owner(&self) -> &LockOwner {
        &self.owner
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release project lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.lock");

        let first = ProjectLock::acquire(&path, "run-a").unwrap();
        let err = ProjectLock::acquire(&path, "run-b").unwrap_err();
        assert!(matches!(err, HealingError::ProjectLocked { .. }));
        assert_eq!(ProjectLock::owner_of(&path).unwrap().unwrap().run_id, "run-a");

        drop(first);
        assert!(!path.exists());
        let second = ProjectLock::acquire(&path, "run-b").unwrap();
        assert_eq!(second.owner().run_id, "run-b");
    }

    #[test]
    fn test_break_stale_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.lock");
        std::fs::write(&path, "garbage").unwrap();

        assert!(ProjectLock::owner_of(&path).unwrap().is_none());
        assert!(ProjectLock::break_stale(&path).unwrap());
        assert!(!ProjectLock::break_stale(&path).unwrap());
        ProjectLock::acquire(&path, "run-c").unwrap();
    }
}
