//! Tool-Execution Hook (C9): wraps a file-modifying tool handler so every
//! invocation is bracketed by a workspace capture, producing a snapshot of
//! what actually changed.
//!
//! Grounded on the teacher's tool-handler composition in
//! `engine/tools.rs` (handlers implement one trait and are registered
//! interchangeably); this core decorates a handler rather than the
//! dispatcher itself, since [`crate::conversation::dispatch`]'s
//! `ToolRegistry::dispatch` is private to the conversation module.

use super::change_detector::{self, CaptureConfig};
use super::manager::SnapshotManager;
use crate::conversation::{ToolContext, ToolHandler};
use crate::llm::{ToolCallRequest, ToolSchema};
use crate::tools::is_file_modifying;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// Decorates `inner` with pre/post capture + diff. Non-modifying tools pass
/// straight through with no capture overhead. Snapshot creation failures are
/// logged, never surfaced to the caller — a hook must not make an otherwise
/// successful tool call fail.
pub struct SnapshotHook {
    inner: Arc<dyn ToolHandler>,
    manager: Arc<SnapshotManager>,
    workspace_root: PathBuf,
    capture_config: CaptureConfig,
}

impl SnapshotHook {
    pub fn wrap(inner: Arc<dyn ToolHandler>, manager: Arc<SnapshotManager>, workspace_root: PathBuf) -> Arc<dyn ToolHandler> {
        Arc::new(Self {
            inner,
            manager,
            workspace_root,
            capture_config: CaptureConfig::default(),
        })
    }
}

#[async_trait]
impl ToolHandler for SnapshotHook {
    fn schema(&self) -> ToolSchema {
        self.inner.schema()
    }

    async fn invoke(&self, tool_call: &ToolCallRequest, ctx: &ToolContext) -> Result<String, String> {
        if !is_file_modifying(&tool_call.function.name) {
            return self.inner.invoke(tool_call, ctx).await;
        }

        let before = change_detector::capture(&self.workspace_root, &self.capture_config);
        let result = self.inner.invoke(tool_call, ctx).await;
        let after = change_detector::capture(&self.workspace_root, &self.capture_config);
        let change_set = change_detector::compare(&before, &after);
        let worth_snapshotting = change_detector::should_create_snapshot(&change_set, self.capture_config.minimum_change_size);

        if result.is_err() && worth_snapshotting {
            tracing::warn!(
                tool = %tool_call.function.name,
                "tool reported failure but the workspace changed anyway; snapshotting regardless"
            );
        }
        if result.is_ok() && !worth_snapshotting {
            tracing::debug!(tool = %tool_call.function.name, "file-modifying tool ran but produced no observable change");
        }

        if worth_snapshotting {
            let files = collect_changed_contents(&self.workspace_root, &change_set);
            let instruction = format!("{}: {}", tool_call.function.name, tool_call.function.arguments);
            if let Err(e) = self.manager.create_snapshot(instruction, files).await {
                tracing::warn!(tool = %tool_call.function.name, "snapshot creation failed: {e}");
            }
        }

        result
    }
}

fn collect_changed_contents(
    workspace_root: &std::path::Path,
    change_set: &change_detector::ChangeSet,
) -> std::collections::BTreeMap<String, Vec<u8>> {
    let mut files = std::collections::BTreeMap::new();
    for change in &change_set.changes {
        match change {
            change_detector::Change::Created(path) | change_detector::Change::Modified { path, .. } => {
                if let Ok(bytes) = std::fs::read(workspace_root.join(path)) {
                    files.insert(path.clone(), bytes);
                }
            }
            change_detector::Change::Deleted(_) => {}
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::store::StoreLimits;
    use crate::snapshot::strategy::StrategyMode;
    use tempfile::tempdir;

    struct WriteOnce;

    #[async_trait]
    impl ToolHandler for WriteOnce {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "write_file".to_string(),
                description: "test".to_string(),
                parameters: serde_json::json!({}),
            }
        }

        async fn invoke(&self, _tool_call: &ToolCallRequest, ctx: &ToolContext) -> Result<String, String> {
            std::fs::write(ctx.cwd.join("out.txt"), "written").map_err(|e| e.to_string())?;
            Ok("ok".to_string())
        }
    }

    fn call() -> ToolCallRequest {
        ToolCallRequest {
            id: "1".to_string(),
            function: crate::llm::ToolCallFunction {
                name: "write_file".to_string(),
                arguments: "{}".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn modifying_tool_produces_a_snapshot() {
        let dir = tempdir().unwrap();
        let manager = Arc::new(SnapshotManager::new(StrategyMode::File, dir.path().to_path_buf(), StoreLimits::default(), 4).await);
        let hook = SnapshotHook::wrap(Arc::new(WriteOnce), manager.clone(), dir.path().to_path_buf());
        let ctx = ToolContext {
            current_role: "test".to_string(),
            current_agent_id: None,
            cwd: dir.path().to_path_buf(),
        };

        hook.invoke(&call(), &ctx).await.unwrap();

        let snapshots = manager.get_snapshots(None).await;
        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].files.contains_key("out.txt"));
    }
}
