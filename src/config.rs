//! Runtime configuration: model catalogue, role-level assignment, snapshot
//! strategy/limits, conversation bounds, and logging.
//!
//! Grounded on the teacher's `Config`/`ModelConfig` TOML layout in this same
//! file, generalized from the teacher's YAML-frontmatter `AgentSpec` (roles
//! now live in the Role Registry's own JSON files, per §3) to the model,
//! snapshot, and conversation sections this core needs instead.

use crate::role::ModelLevel;
use crate::snapshot::store::StoreLimits;
use crate::snapshot::strategy::StrategyMode;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    pub id: String,
    pub provider: String, // "ollama" | "openai"
    pub url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RoleLevelsConfig {
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub smart: Option<String>,
    #[serde(default)]
    pub fast: Option<String>,
}

impl RoleLevelsConfig {
    pub fn to_level_map(&self) -> HashMap<ModelLevel, String> {
        let mut levels = HashMap::new();
        if let Some(id) = &self.base {
            levels.insert(ModelLevel::Base, id.clone());
        }
        if let Some(id) = &self.smart {
            levels.insert(ModelLevel::Smart, id.clone());
        }
        if let Some(id) = &self.fast {
            levels.insert(ModelLevel::Fast, id.clone());
        }
        levels
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SnapshotConfig {
    #[serde(default = "default_strategy")]
    pub strategy: String, // "git" | "file" | "auto"
    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: usize,
    #[serde(default = "default_memory_limit_bytes")]
    pub memory_limit_bytes: u64,
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,
    #[serde(default = "default_max_concurrent_operations")]
    pub max_concurrent_operations: usize,
}

fn default_strategy() -> String {
    "auto".to_string()
}
fn default_max_snapshots() -> usize {
    200
}
fn default_memory_limit_bytes() -> u64 {
    256 * 1024 * 1024
}
fn default_compression_threshold() -> usize {
    64 * 1024
}
fn default_max_concurrent_operations() -> usize {
    4
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            max_snapshots: default_max_snapshots(),
            memory_limit_bytes: default_memory_limit_bytes(),
            compression_threshold: default_compression_threshold(),
            max_concurrent_operations: default_max_concurrent_operations(),
        }
    }
}

impl SnapshotConfig {
    pub fn strategy_mode(&self) -> StrategyMode {
        self.strategy.parse().unwrap_or(StrategyMode::Auto)
    }

    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            max_snapshots: Some(self.max_snapshots),
            memory_limit_bytes: Some(self.memory_limit_bytes),
            compression_threshold: self.compression_threshold,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConversationSettings {
    #[serde(default = "default_tool_call_budget")]
    pub tool_call_budget: usize,
    #[serde(default = "default_max_completion_tokens")]
    pub max_completion_tokens: usize,
}

fn default_tool_call_budget() -> usize {
    25
}
fn default_max_completion_tokens() -> usize {
    4096
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            tool_call_budget: default_tool_call_budget(),
            max_completion_tokens: default_max_completion_tokens(),
        }
    }
}

/// Owned, serializable mirror of [`crate::logging::LoggingSettings`], whose
/// borrowed `&str` fields can't be deserialized directly.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub retention_days: Option<u64>,
}

impl LoggingConfig {
    pub fn as_settings(&self) -> crate::logging::LoggingSettings<'_> {
        crate::logging::LoggingSettings {
            level: self.level.as_deref(),
            directory: self.directory.as_deref(),
            retention_days: self.retention_days,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub levels: RoleLevelsConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub conversation: ConversationSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Directory the Role Registry loads `*.json` / `*.<group>.json` files
    /// from.
    #[serde(default = "default_roles_dir")]
    pub roles_dir: String,
}

fn default_roles_dir() -> String {
    "roles".to_string()
}

impl Config {
    /// Load `coreagent.toml` from the current directory; fall back to
    /// defaults when absent.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("coreagent.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let config = Config::load_from(Path::new("/nonexistent/coreagent.toml")).unwrap();
        assert_eq!(config.snapshot.strategy, "auto");
        assert_eq!(config.roles_dir, "roles");
    }

    #[test]
    fn parses_minimal_toml() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("coreagent.toml");
        fs::write(
            &path,
            r#"
            roles_dir = "my-roles"

            [[models]]
            id = "base"
            provider = "ollama"
            url = "http://127.0.0.1:11434"
            model = "qwen3-coder"

            [levels]
            base = "base"
            "#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.roles_dir, "my-roles");
        assert_eq!(config.models.len(), 1);
        assert_eq!(config.levels.to_level_map().get(&ModelLevel::Base), Some(&"base".to_string()));
    }

    #[test]
    fn snapshot_config_converts_to_store_limits_and_strategy_mode() {
        let snapshot = SnapshotConfig {
            strategy: "file".to_string(),
            max_snapshots: 10,
            memory_limit_bytes: 1024,
            compression_threshold: 512,
            max_concurrent_operations: 2,
        };
        assert_eq!(snapshot.strategy_mode(), StrategyMode::File);
        let limits = snapshot.store_limits();
        assert_eq!(limits.max_snapshots, Some(10));
    }
}
