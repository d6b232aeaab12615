//! Strategy Factory (C7): pick a backing strategy (`git`, `file`, `auto`),
//! fall back on unavailability, allow a runtime switch.
//!
//! Grounded on the teacher's provider-selection `match` in
//! `ModelManager::new_with_credentials` (string tag → concrete client),
//! generalized to snapshot backing strategies.

use super::git_strategy::GitStrategy;
use super::store::{SnapshotStore, StoreLimits};
use super::{Snapshot, SnapshotId, SnapshotMode};
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[async_trait]
pub trait Strategy: Send + Sync {
    async fn create_snapshot(&mut self, instruction: String, files: BTreeMap<String, Vec<u8>>) -> SnapshotId;
    async fn get_snapshot(&self, id: &str) -> Option<Snapshot>;
    async fn get_snapshot_resolved(&self, id: &str) -> Option<Snapshot>;
    async fn list_snapshots(&self, limit: Option<usize>) -> Vec<Snapshot>;
    async fn delete_snapshot(&mut self, id: &str) -> bool;
    async fn clear(&mut self);
    fn mode(&self) -> SnapshotMode;
}

pub struct FileStrategy {
    store: SnapshotStore,
}

impl FileStrategy {
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            store: SnapshotStore::new(limits),
        }
    }
}

#[async_trait]
impl Strategy for FileStrategy {
    async fn create_snapshot(&mut self, instruction: String, files: BTreeMap<String, Vec<u8>>) -> SnapshotId {
        self.store.create(instruction, SnapshotMode::File, files)
    }

    async fn get_snapshot(&self, id: &str) -> Option<Snapshot> {
        self.store.get(id)
    }

    async fn get_snapshot_resolved(&self, id: &str) -> Option<Snapshot> {
        self.store.get_resolved(id)
    }

    async fn list_snapshots(&self, limit: Option<usize>) -> Vec<Snapshot> {
        self.store.list(limit)
    }

    async fn delete_snapshot(&mut self, id: &str) -> bool {
        self.store.delete(id)
    }

    async fn clear(&mut self) {
        self.store.clear();
    }

    fn mode(&self) -> SnapshotMode {
        SnapshotMode::File
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyMode {
    Git,
    File,
    Auto,
}

impl std::str::FromStr for StrategyMode {
    type Err = CoreError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git" => Ok(StrategyMode::Git),
            "file" => Ok(StrategyMode::File),
            "auto" => Ok(StrategyMode::Auto),
            other => Err(CoreError::StrategyUnavailable { mode: other.to_string() }),
        }
    }
}

pub struct SwitchResult {
    pub success: bool,
    pub previous_strategy: SnapshotMode,
    pub new_strategy: SnapshotMode,
}

/// Picks and owns the active [`Strategy`]. `auto` probes `git --version`
/// and `git rev-parse --is-inside-work-tree` in `workspace_root`; any probe
/// failure is treated as unavailable, not an error.
pub struct StrategyFactory {
    workspace_root: PathBuf,
    limits: StoreLimits,
    active: Box<dyn Strategy>,
}

impl StrategyFactory {
    pub async fn new(requested: StrategyMode, workspace_root: PathBuf, limits: StoreLimits) -> Self {
        let resolved = Self::resolve(requested, &workspace_root).await;
        let active: Box<dyn Strategy> = match resolved {
            SnapshotMode::Git => Box::new(GitStrategy::new(workspace_root.clone())),
            SnapshotMode::File => Box::new(FileStrategy::new(limits.clone())),
        };
        Self {
            workspace_root,
            limits,
            active,
        }
    }

    async fn resolve(requested: StrategyMode, workspace_root: &PathBuf) -> SnapshotMode {
        match requested {
            StrategyMode::File => SnapshotMode::File,
            StrategyMode::Git => SnapshotMode::Git,
            StrategyMode::Auto => {
                if GitStrategy::probe_available(workspace_root).await {
                    tracing::info!("auto strategy: git available, using git backing");
                    SnapshotMode::Git
                } else {
                    tracing::info!("auto strategy: git unavailable, falling back to file backing");
                    SnapshotMode::File
                }
            }
        }
    }

    pub fn active(&self) -> &dyn Strategy {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> &mut dyn Strategy {
        self.active.as_mut()
    }

    /// Snapshots do not migrate across strategies; switching starts the new
    /// strategy with an empty store.
    pub async fn switch_strategy(&mut self, requested: StrategyMode) -> CoreResult<SwitchResult> {
        let previous = self.active.mode();
        let resolved = Self::resolve(requested, &self.workspace_root).await;
        self.active = match resolved {
            SnapshotMode::Git => Box::new(GitStrategy::new(self.workspace_root.clone())),
            SnapshotMode::File => Box::new(FileStrategy::new(self.limits.clone())),
        };
        Ok(SwitchResult {
            success: true,
            previous_strategy: previous,
            new_strategy: resolved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_mode_never_probes_git() {
        let factory = StrategyFactory::new(StrategyMode::File, PathBuf::from("."), StoreLimits::default()).await;
        assert_eq!(factory.active().mode(), SnapshotMode::File);
    }

    #[tokio::test]
    async fn switch_strategy_reports_previous_and_new() {
        let mut factory = StrategyFactory::new(StrategyMode::File, PathBuf::from("."), StoreLimits::default()).await;
        let result = factory.switch_strategy(StrategyMode::File).await.unwrap();
        assert_eq!(result.previous_strategy, SnapshotMode::File);
        assert_eq!(result.new_strategy, SnapshotMode::File);
    }
}
