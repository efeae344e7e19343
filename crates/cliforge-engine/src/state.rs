//! Best-effort workflow checkpoints.
//!
//! Each invocation serialises its `ExecutionState` to
//! `<state_home>/<app>/workflows/<workflow_id>.json` after every level.
//! Checkpoints are scaffolding for inspection, not a recovery log:
//! write failures are logged and ignored.

use crate::workflow::ExecutionState;
use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct StateManager {
    directory: PathBuf,
}

impl StateManager {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Conventional location for an app's workflow checkpoints
    pub fn for_app(app: &str) -> Self {
        Self::new(cliforge_core::paths::workflow_state_dir(app))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn state_path(&self, workflow_id: &str) -> PathBuf {
        self.directory.join(format!("{}.json", workflow_id))
    }

    /// Write a checkpoint; failures are swallowed after logging
    pub fn checkpoint(&self, state: &ExecutionState) {
        let attempt = || -> Result<()> {
            std::fs::create_dir_all(&self.directory)?;
            let serialized = serde_json::to_vec_pretty(state)?;
            std::fs::write(self.state_path(&state.workflow_id), serialized)?;
            Ok(())
        };
        match attempt() {
            Ok(()) => debug!("checkpointed workflow '{}'", state.workflow_id),
            Err(e) => warn!("failed to checkpoint workflow '{}': {}", state.workflow_id, e),
        }
    }

    pub fn load(&self, workflow_id: &str) -> Result<ExecutionState> {
        let path = self.state_path(workflow_id);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("no checkpoint for workflow '{}'", workflow_id))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("corrupted checkpoint at {}", path.display()))
    }

    /// All stored checkpoints, newest first
    pub fn list(&self) -> Vec<ExecutionState> {
        let Ok(entries) = std::fs::read_dir(&self.directory) else {
            return Vec::new();
        };
        let mut states: Vec<ExecutionState> = entries
            .flatten()
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
            .filter_map(|entry| {
                let raw = std::fs::read_to_string(entry.path()).ok()?;
                serde_json::from_str(&raw).ok()
            })
            .collect();
        states.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        states
    }

    /// Remove one checkpoint; Ok(false) when none existed
    pub fn delete(&self, workflow_id: &str) -> Result<bool> {
        let path = self.state_path(workflow_id);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)?;
        Ok(true)
    }

    /// Remove checkpoints older than `age`; returns how many
    pub fn prune(&self, age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::days(365));
        let mut removed = 0;
        for state in self.list() {
            if state.start_time < cutoff && self.delete(&state.workflow_id).unwrap_or(false) {
                removed += 1;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::ExecutionStatus;
    use tempfile::TempDir;

    #[test]
    fn checkpoint_roundtrip() {
        let dir = TempDir::new().unwrap();
        let manager = StateManager::new(dir.path());

        let mut state = ExecutionState::new("deploy-1");
        state.status = ExecutionStatus::Running;
        state.completed_steps.push("create".to_string());
        manager.checkpoint(&state);

        let loaded = manager.load("deploy-1").unwrap();
        assert_eq!(loaded.workflow_id, "deploy-1");
        assert_eq!(loaded.status, ExecutionStatus::Running);
        assert_eq!(loaded.completed_steps, vec!["create".to_string()]);
    }

    #[test]
    fn list_and_delete() {
        let dir = TempDir::new().unwrap();
        let manager = StateManager::new(dir.path());
        manager.checkpoint(&ExecutionState::new("a"));
        manager.checkpoint(&ExecutionState::new("b"));

        assert_eq!(manager.list().len(), 2);
        assert!(manager.delete("a").unwrap());
        assert!(!manager.delete("a").unwrap());
        assert_eq!(manager.list().len(), 1);
    }

    #[test]
    fn prune_by_age() {
        let dir = TempDir::new().unwrap();
        let manager = StateManager::new(dir.path());

        let mut stale = ExecutionState::new("stale");
        stale.start_time = Utc::now() - chrono::Duration::days(3);
        manager.checkpoint(&stale);
        manager.checkpoint(&ExecutionState::new("fresh"));

        let removed = manager.prune(Duration::from_secs(24 * 3600));
        assert_eq!(removed, 1);
        assert!(manager.load("fresh").is_ok());
        assert!(manager.load("stale").is_err());
    }

    #[test]
    fn checkpoint_failure_is_swallowed() {
        let manager = StateManager::new("/proc/definitely/not/writable");
        manager.checkpoint(&ExecutionState::new("x"));
    }
}
