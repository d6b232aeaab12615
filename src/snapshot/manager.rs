//! Snapshot Manager (C10): the façade other modules talk to. Wraps the
//! Strategy Factory behind a bounded concurrency queue so snapshot creation
//! never runs unbounded alongside a busy tool-dispatch loop.
//!
//! Grounded on the teacher's `ModelManager`, whose `Arc<Semaphore>`-per-model
//! pattern is reused here as a single crate-wide admission semaphore around
//! the one active strategy.

use super::store::StoreLimits;
use super::strategy::{StrategyFactory, StrategyMode, SwitchResult};
use super::{Snapshot, SnapshotId, SnapshotMode};
use crate::events::{CoreEvent, EventSender};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::{Mutex, Semaphore};

pub struct ManagerStatus {
    pub active_mode: SnapshotMode,
    pub snapshot_count: usize,
}

#[derive(Default)]
pub struct ManagerMetrics {
    pub operations: u64,
    pub snapshots_created: u64,
    pub errors: u64,
}

impl ManagerMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.operations == 0 {
            0.0
        } else {
            self.errors as f64 / self.operations as f64
        }
    }
}

pub struct SnapshotManager {
    factory: Mutex<StrategyFactory>,
    admission: Semaphore,
    events: Option<EventSender>,
    metrics: Mutex<ManagerMetrics>,
}

fn mode_label(mode: SnapshotMode) -> String {
    match mode {
        SnapshotMode::Git => "git".to_string(),
        SnapshotMode::File => "file".to_string(),
    }
}

impl SnapshotManager {
    pub async fn new(mode: StrategyMode, workspace_root: PathBuf, limits: StoreLimits, max_concurrent: usize) -> Self {
        Self::new_with_events(mode, workspace_root, limits, max_concurrent, None).await
    }

    pub async fn new_with_events(
        mode: StrategyMode,
        workspace_root: PathBuf,
        limits: StoreLimits,
        max_concurrent: usize,
        events: Option<EventSender>,
    ) -> Self {
        let factory = StrategyFactory::new(mode, workspace_root, limits).await;
        let active_mode = factory.active().mode();
        if let Some(tx) = &events {
            let _ = tx.send(CoreEvent::StrategyInitialized { mode: mode_label(active_mode) });
        }
        tracing::info!(mode = %mode_label(active_mode), "strategy:initialized");
        Self {
            factory: Mutex::new(factory),
            admission: Semaphore::new(max_concurrent.max(1)),
            events,
            metrics: Mutex::new(ManagerMetrics::default()),
        }
    }

    /// `instruction` must be non-empty.
    pub async fn create_snapshot(&self, instruction: String, files: BTreeMap<String, Vec<u8>>) -> Result<SnapshotId, String> {
        if instruction.trim().is_empty() {
            self.record(false).await;
            return Err("snapshot instruction must not be empty".to_string());
        }
        let _permit = self.admission.acquire().await.expect("semaphore never closed");
        let mut factory = self.factory.lock().await;
        let mode = factory.active().mode();
        let id = factory.active_mut().create_snapshot(instruction, files).await;
        drop(factory);
        self.record(true).await;
        if let Some(tx) = &self.events {
            let _ = tx.send(CoreEvent::SnapshotCreated {
                id: id.clone(),
                mode: mode_label(mode),
            });
        }
        tracing::info!(id = %id, "snapshot:created");
        Ok(id)
    }

    async fn record(&self, success: bool) {
        let mut metrics = self.metrics.lock().await;
        metrics.operations += 1;
        if success {
            metrics.snapshots_created += 1;
        } else {
            metrics.errors += 1;
        }
    }

    pub async fn get_metrics(&self) -> ManagerMetrics {
        let m = self.metrics.lock().await;
        ManagerMetrics {
            operations: m.operations,
            snapshots_created: m.snapshots_created,
            errors: m.errors,
        }
    }

    pub async fn get_snapshot(&self, id: &str) -> Option<Snapshot> {
        self.factory.lock().await.active().get_snapshot(id).await
    }

    pub async fn get_snapshot_resolved(&self, id: &str) -> Option<Snapshot> {
        self.factory.lock().await.active().get_snapshot_resolved(id).await
    }

    pub async fn get_snapshots(&self, limit: Option<usize>) -> Vec<Snapshot> {
        self.factory.lock().await.active().list_snapshots(limit).await
    }

    pub async fn delete_snapshot(&self, id: &str) -> bool {
        let deleted = self.factory.lock().await.active_mut().delete_snapshot(id).await;
        if deleted {
            if let Some(tx) = &self.events {
                let _ = tx.send(CoreEvent::SnapshotDeleted { id: id.to_string() });
            }
            tracing::info!(id = %id, "snapshot:deleted");
        }
        deleted
    }

    pub async fn clear_snapshots(&self) {
        self.factory.lock().await.active_mut().clear().await;
    }

    pub async fn switch_strategy(&self, mode: StrategyMode) -> crate::error::CoreResult<SwitchResult> {
        let result = self.factory.lock().await.switch_strategy(mode).await?;
        if let Some(tx) = &self.events {
            let _ = tx.send(CoreEvent::StrategySwitched {
                previous: mode_label(result.previous_strategy),
                new: mode_label(result.new_strategy),
            });
        }
        tracing::info!(previous = %mode_label(result.previous_strategy), new = %mode_label(result.new_strategy), "strategy:switched");
        Ok(result)
    }

    pub async fn get_status(&self) -> ManagerStatus {
        let factory = self.factory.lock().await;
        ManagerStatus {
            active_mode: factory.active().mode(),
            snapshot_count: factory.active().list_snapshots(None).await.len(),
        }
    }

    /// Drains the admission semaphore so no new snapshot work is admitted
    /// once this resolves; in-flight work already holding a permit still
    /// completes.
    pub async fn shutdown(&self) {
        let _ = self.admission.acquire_many(self.admission.available_permits().max(1) as u32).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(entries: &[(&str, &str)]) -> BTreeMap<String, Vec<u8>> {
        entries.iter().map(|(p, c)| (p.to_string(), c.as_bytes().to_vec())).collect()
    }

    #[tokio::test]
    async fn create_and_fetch_round_trips() {
        let manager = SnapshotManager::new(StrategyMode::File, PathBuf::from("."), StoreLimits::default(), 4).await;
        let id = manager.create_snapshot("edit".to_string(), files(&[("a.txt", "x")])).await.unwrap();
        let snap = manager.get_snapshot(&id).await.unwrap();
        assert_eq!(snap.instruction, "edit");
    }

    #[tokio::test]
    async fn status_reports_active_mode_and_count() {
        let manager = SnapshotManager::new(StrategyMode::File, PathBuf::from("."), StoreLimits::default(), 4).await;
        manager.create_snapshot("edit".to_string(), files(&[("a.txt", "x")])).await.unwrap();
        let status = manager.get_status().await;
        assert_eq!(status.active_mode, SnapshotMode::File);
        assert_eq!(status.snapshot_count, 1);
    }

    #[tokio::test]
    async fn empty_instruction_is_rejected() {
        let manager = SnapshotManager::new(StrategyMode::File, PathBuf::from("."), StoreLimits::default(), 4).await;
        let err = manager.create_snapshot("   ".to_string(), files(&[("a.txt", "x")])).await.unwrap_err();
        assert!(err.contains("empty"));
        assert_eq!(manager.get_metrics().await.errors, 1);
    }
}
