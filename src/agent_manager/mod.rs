//! Agent Manager (C4): process-wide singleton registry of worker agents,
//! their hierarchy, and their lifecycle.
//!
//! Grounded on the teacher's single-mutex-per-map-family layout in this same
//! file (`agents: HashMap<..>` and a separate hierarchy map, each behind its
//! own lock), generalized from "agents by project" to "agents by id" since
//! this core has no project concept, and from the teacher's `redb`-backed
//! `Db` to an in-memory map — cross-restart persistence is an explicit
//! non-goal here.

use crate::conversation::{AgentConversation, ConversationConfig, Observer, ToolContext, ToolRegistry};
use crate::error::{CoreError, CoreResult};
use crate::llm::manager::ModelManager;
use crate::role::{EnvironmentContext, RoleRegistry};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Running,
    Inactive,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub status: String,
    pub summary: String,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub known_issues: Vec<String>,
}

/// One spawned agent. The conversation lives behind its own lock so a
/// `send_message` on one agent never blocks status reads on another.
pub struct Agent {
    pub agent_id: String,
    pub role_name: String,
    pub parent_agent_id: Option<String>,
    pub task_description: String,
    pub status: AgentStatus,
    pub result: Option<AgentResult>,
    pub conversation: Arc<Mutex<AgentConversation>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub agent_id: String,
    pub role_name: String,
    pub parent_agent_id: Option<String>,
    pub task_description: String,
    pub status: AgentStatus,
    pub result: Option<AgentResult>,
}

impl From<&Agent> for AgentSummary {
    fn from(a: &Agent) -> Self {
        Self {
            agent_id: a.agent_id.clone(),
            role_name: a.role_name.clone(),
            parent_agent_id: a.parent_agent_id.clone(),
            task_description: a.task_description.clone(),
            status: a.status,
            result: a.result.clone(),
        }
    }
}

/// Shared collaborators a worker's C3 instance is built from, so `spawn`
/// doesn't need its own constructor arguments threaded through every call
/// site.
pub struct SpawnContext {
    pub role_registry: Arc<RoleRegistry>,
    pub model_manager: Arc<ModelManager>,
    pub tool_registry: Arc<ToolRegistry>,
    pub conversation_config: ConversationConfig,
}

pub struct SendOutcome {
    pub message_sent: bool,
    pub agent_id: String,
    pub status: AgentStatus,
}

#[derive(Default)]
pub struct AgentManager {
    agents: RwLock<HashMap<String, Agent>>,
    hierarchy: RwLock<HashMap<String, HashSet<String>>>,
}

impl AgentManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-checks `can_spawn_agent` against the Role Registry on every call;
    /// a stale cached permission is never trusted.
    pub async fn spawn(
        &self,
        parent_role: &str,
        worker_role_spec: &str,
        parent_agent_id: Option<String>,
        task_description: String,
        context: &SpawnContext,
    ) -> CoreResult<String> {
        if !context.role_registry.can_spawn_agent(parent_role, worker_role_spec)? {
            return Err(CoreError::SpawnUnauthorized {
                parent: parent_role.to_string(),
                child: worker_role_spec.to_string(),
            });
        }

        let agent_id = Uuid::new_v4().to_string();
        let mut conversation = AgentConversation::new(
            worker_role_spec.to_string(),
            context.role_registry.clone(),
            context.model_manager.clone(),
            context.tool_registry.clone(),
            ConversationConfig {
                tool_call_budget: context.conversation_config.tool_call_budget,
                max_completion_tokens: context.conversation_config.max_completion_tokens,
            },
        );
        conversation.push_user_message(task_description.clone());

        let agent = Agent {
            agent_id: agent_id.clone(),
            role_name: worker_role_spec.to_string(),
            parent_agent_id: parent_agent_id.clone(),
            task_description,
            status: AgentStatus::Active,
            result: None,
            conversation: Arc::new(Mutex::new(conversation)),
        };

        self.agents.write().await.insert(agent_id.clone(), agent);
        if let Some(parent_id) = parent_agent_id {
            self.hierarchy.write().await.entry(parent_id).or_default().insert(agent_id.clone());
        }

        Ok(agent_id)
    }

    /// Requires the agent exists and is not currently `Running`. Returns
    /// immediately; the send cycle is driven on a spawned task and the
    /// status transitions to `Inactive` or `Failed` once it completes.
    pub async fn send_message(
        self: &Arc<Self>,
        agent_id: &str,
        content: String,
        ctx: ToolContext,
        observer: Arc<dyn Observer>,
        env: EnvironmentContext,
    ) -> CoreResult<SendOutcome> {
        let conversation = {
            let mut agents = self.agents.write().await;
            let agent = agents.get_mut(agent_id).ok_or_else(|| CoreError::UnknownAgent { id: agent_id.to_string() })?;
            if agent.status == AgentStatus::Running {
                return Err(CoreError::AgentBusy { id: agent_id.to_string() });
            }
            agent.status = AgentStatus::Running;
            agent.conversation.clone()
        };

        {
            let mut conv = conversation.lock().await;
            conv.push_user_message(content);
        }

        let manager = self.clone();
        let agent_id_owned = agent_id.to_string();
        tokio::spawn(async move {
            let outcome = {
                let mut conv = conversation.lock().await;
                conv.send(&ctx, observer.as_ref(), &env).await
            };
            let mut agents = manager.agents.write().await;
            if let Some(agent) = agents.get_mut(&agent_id_owned) {
                agent.status = match outcome {
                    Ok(_) => AgentStatus::Inactive,
                    Err(e) => {
                        tracing::warn!(agent = %agent_id_owned, "agent send cycle failed: {e}");
                        AgentStatus::Failed
                    }
                };
            }
        });

        Ok(SendOutcome {
            message_sent: true,
            agent_id: agent_id.to_string(),
            status: AgentStatus::Running,
        })
    }

    pub async fn get_status(&self, agent_id: &str) -> Option<AgentSummary> {
        self.agents.read().await.get(agent_id).map(AgentSummary::from)
    }

    /// Agents spawned directly by `parent_id`, optionally excluding those
    /// already `Completed`.
    pub async fn list(&self, parent_id: &str, include_completed: bool) -> Vec<AgentSummary> {
        let hierarchy = self.hierarchy.read().await;
        let Some(children) = hierarchy.get(parent_id) else {
            return Vec::new();
        };
        let agents = self.agents.read().await;
        children
            .iter()
            .filter_map(|id| agents.get(id))
            .filter(|a| include_completed || a.status != AgentStatus::Completed)
            .map(AgentSummary::from)
            .collect()
    }

    pub async fn report_result(&self, worker_id: &str, result: AgentResult) -> CoreResult<()> {
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(worker_id).ok_or_else(|| CoreError::UnknownAgent { id: worker_id.to_string() })?;
        agent.status = AgentStatus::Completed;
        agent.result = Some(result);
        Ok(())
    }

    /// Clears all state. Callers holding an `Arc<AgentManager>` observe an
    /// empty manager on their next call, not a stale snapshot.
    pub async fn reset(&self) {
        self.agents.write().await.clear();
        self.hierarchy.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn registry_with_lead_and_worker() -> Arc<RoleRegistry> {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("roles.json"),
            r#"{
                "lead": {"system_message": "lead", "enabled_agents": ["worker"]},
                "worker": {"system_message": "worker"}
            }"#,
        )
        .unwrap();
        Arc::new(RoleRegistry::load(dir.path()).unwrap())
    }

    fn spawn_context(role_registry: Arc<RoleRegistry>) -> SpawnContext {
        let mut levels = StdHashMap::new();
        levels.insert(crate::role::ModelLevel::Base, "m".to_string());
        SpawnContext {
            role_registry,
            model_manager: Arc::new(ModelManager::new(&[], levels)),
            tool_registry: Arc::new(ToolRegistry::new()),
            conversation_config: ConversationConfig::default(),
        }
    }

    #[tokio::test]
    async fn spawn_rejects_unauthorized_pair() {
        let manager = AgentManager::new();
        let registry = registry_with_lead_and_worker();
        let ctx = spawn_context(registry);
        let err = manager.spawn("worker", "lead", None, "do stuff".to_string(), &ctx).await.unwrap_err();
        assert!(matches!(err, CoreError::SpawnUnauthorized { .. }));
    }

    #[tokio::test]
    async fn spawn_registers_agent_and_hierarchy() {
        let manager = AgentManager::new();
        let registry = registry_with_lead_and_worker();
        let ctx = spawn_context(registry);
        let id = manager
            .spawn("lead", "worker", Some("parent-1".to_string()), "do stuff".to_string(), &ctx)
            .await
            .unwrap();

        let status = manager.get_status(&id).await.unwrap();
        assert_eq!(status.status, AgentStatus::Active);
        let children = manager.list("parent-1", true).await;
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].agent_id, id);
    }

    #[tokio::test]
    async fn report_result_marks_completed() {
        let manager = AgentManager::new();
        let registry = registry_with_lead_and_worker();
        let ctx = spawn_context(registry);
        let id = manager.spawn("lead", "worker", None, "do stuff".to_string(), &ctx).await.unwrap();

        manager
            .report_result(
                &id,
                AgentResult {
                    status: "ok".to_string(),
                    summary: "finished".to_string(),
                    artifacts: vec![],
                    known_issues: vec![],
                },
            )
            .await
            .unwrap();

        let status = manager.get_status(&id).await.unwrap();
        assert_eq!(status.status, AgentStatus::Completed);
        assert_eq!(status.result.unwrap().summary, "finished");
    }

    #[tokio::test]
    async fn list_excludes_completed_when_requested() {
        let manager = AgentManager::new();
        let registry = registry_with_lead_and_worker();
        let ctx = spawn_context(registry);
        let id = manager
            .spawn("lead", "worker", Some("parent-1".to_string()), "t".to_string(), &ctx)
            .await
            .unwrap();
        manager
            .report_result(
                &id,
                AgentResult {
                    status: "ok".to_string(),
                    summary: "done".to_string(),
                    artifacts: vec![],
                    known_issues: vec![],
                },
            )
            .await
            .unwrap();

        assert!(manager.list("parent-1", false).await.is_empty());
        assert_eq!(manager.list("parent-1", true).await.len(), 1);
    }

    #[tokio::test]
    async fn reset_clears_all_state() {
        let manager = AgentManager::new();
        let registry = registry_with_lead_and_worker();
        let ctx = spawn_context(registry);
        let id = manager.spawn("lead", "worker", None, "t".to_string(), &ctx).await.unwrap();
        manager.reset().await;
        assert!(manager.get_status(&id).await.is_none());
    }

    #[tokio::test]
    async fn unknown_agent_lookups_return_none_or_error() {
        let manager = AgentManager::new();
        assert!(manager.get_status("nope").await.is_none());
        let err = manager
            .report_result(
                "nope",
                AgentResult {
                    status: "ok".to_string(),
                    summary: "x".to_string(),
                    artifacts: vec![],
                    known_issues: vec![],
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownAgent { .. }));
    }
}
