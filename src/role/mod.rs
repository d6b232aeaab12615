//! Role Registry (C1): declarative role definitions loaded from a directory
//! tree, grouped by file-name suffix, resolved by `group.name` spec.
//!
//! Grounded on the teacher's `AgentSpec::from_markdown` / `AgentSpecRef`
//! loading pattern in `config.rs` and `agent_manager::load_agent_specs_for_project`
//! (directory-of-definition-files → in-memory registry), generalized from
//! one-file-per-agent to the `stem[.group].ext` grouping this core needs,
//! and from YAML-frontmatter-over-markdown to plain JSON per the role file
//! format.

use crate::error::{CoreError, CoreResult};
use crate::llm::ChatMessage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

pub const GLOBAL_GROUP: &str = "global";

/// Coordination tools every agentic role gets auto-augmented with (§4.2).
pub const COORDINATION_TOOLS: &[&str] = &["spawn_agent", "speak_to_agent", "get_agents", "return_results"];
/// Task-viewing tools added alongside the coordination tools.
pub const TASK_VIEW_TOOLS: &[&str] = &["list_tasks", "get_task"];
/// Task-editing tools added when a role can create tasks for others.
pub const TASK_EDIT_TOOLS: &[&str] = &["list_tasks", "edit_tasks", "get_task"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelLevel {
    Base,
    Smart,
    Fast,
}

impl Default for ModelLevel {
    fn default() -> Self {
        ModelLevel::Base
    }
}

/// On-disk shape of a single role entry. A role file is a JSON object keyed
/// by role name; each value deserializes into this struct.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleDef {
    #[serde(default)]
    pub system_message: String,
    #[serde(default)]
    pub level: ModelLevel,
    /// `Some` marks the list as declared (whitelist mode), even when empty.
    #[serde(default)]
    pub included_tools: Option<Vec<String>>,
    #[serde(default)]
    pub excluded_tools: Option<Vec<String>>,
    #[serde(default)]
    pub parsing_tools: Vec<String>,
    #[serde(default)]
    pub reminder: Option<String>,
    #[serde(default)]
    pub examples: Vec<ChatMessage>,
    /// Presence of this field (even empty) marks the role agentic.
    #[serde(default)]
    pub enabled_agents: Option<Vec<String>>,
    #[serde(default)]
    pub can_create_tasks_for: Vec<String>,
    #[serde(default)]
    pub agent_description: Option<String>,
}

/// A resolved, named role living in a specific group.
#[derive(Debug, Clone)]
pub struct Role {
    pub name: String,
    pub group: String,
    pub def: RoleDef,
}

impl Role {
    pub fn is_agentic(&self) -> bool {
        self.def.enabled_agents.is_some()
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.def.included_tools.is_some() && self.def.excluded_tools.is_some() {
            return Err(CoreError::ToolConfigConflict {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolveResult {
    pub role_name: String,
    pub group: String,
    pub found: bool,
    pub ambiguous: bool,
    pub available_groups: Vec<String>,
}

/// Environment values substituted into the coordination block's template.
#[derive(Debug, Clone)]
pub struct EnvironmentContext {
    pub os: String,
    pub cwd: String,
    pub index_exists: bool,
    pub current_date_time: String,
}

const DEFAULT_ENV_TEMPLATE: &str = "\n\n## Environment\n\
- OS: {os}\n\
- Working directory: {cwd}\n\
- Index present: {index_exists}\n\
- Current date/time: {current_date_time}\n";

/// Process-wide, reloadable registry: name→Role (keyed by group+name) plus
/// group→ordered role-name list.
pub struct RoleRegistry {
    roles: HashMap<(String, String), Role>,
    by_group: HashMap<String, Vec<String>>,
    env_template: String,
}

impl RoleRegistry {
    /// Load every `*.json` / `*.<group>.json` file directly under `dir`.
    /// Each file is a JSON object keyed by role name.
    pub fn load(dir: &Path) -> CoreResult<Self> {
        let mut roles = HashMap::new();
        let mut by_group: HashMap<String, Vec<String>> = HashMap::new();

        if dir.is_dir() {
            let mut entries: Vec<_> = std::fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();
            entries.sort_by_key(|e| e.file_name());
            for entry in entries {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let group = group_from_stem(&path);
                let content = std::fs::read_to_string(&path)?;
                let defs: HashMap<String, RoleDef> = serde_json::from_str(&content)?;
                for (name, def) in defs {
                    let role = Role {
                        name: name.clone(),
                        group: group.clone(),
                        def,
                    };
                    role.validate()?;
                    by_group.entry(group.clone()).or_default().push(name.clone());
                    roles.insert((group.clone(), name), role);
                }
            }
        }

        Ok(Self {
            roles,
            by_group,
            env_template: DEFAULT_ENV_TEMPLATE.to_string(),
        })
    }

    pub fn empty() -> Self {
        Self {
            roles: HashMap::new(),
            by_group: HashMap::new(),
            env_template: DEFAULT_ENV_TEMPLATE.to_string(),
        }
    }

    /// Roles registered in `group`, as a freshly sorted copy. Never sorts
    /// the stored insertion-order list in place.
    pub fn roles_in_group(&self, group: &str) -> Vec<String> {
        let mut names = self.by_group.get(group).cloned().unwrap_or_default();
        names.sort();
        names
    }

    /// Every group that has at least one role registered, sorted.
    pub fn groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.by_group.keys().cloned().collect();
        groups.sort();
        groups
    }

    pub fn resolve(&self, spec: &str) -> ResolveResult {
        if let Some((group, name)) = spec.split_once('.') {
            let found = self.roles.contains_key(&(group.to_string(), name.to_string()));
            return ResolveResult {
                role_name: name.to_string(),
                group: group.to_string(),
                found,
                ambiguous: false,
                available_groups: Vec::new(),
            };
        }

        if self.roles.contains_key(&(GLOBAL_GROUP.to_string(), spec.to_string())) {
            return ResolveResult {
                role_name: spec.to_string(),
                group: GLOBAL_GROUP.to_string(),
                found: true,
                ambiguous: false,
                available_groups: Vec::new(),
            };
        }

        let mut owning_groups: Vec<String> = self
            .by_group
            .iter()
            .filter(|(group, names)| group.as_str() != GLOBAL_GROUP && names.iter().any(|n| n == spec))
            .map(|(group, _)| group.clone())
            .collect();
        owning_groups.sort();

        match owning_groups.len() {
            1 => ResolveResult {
                role_name: spec.to_string(),
                group: owning_groups.into_iter().next().unwrap(),
                found: true,
                ambiguous: false,
                available_groups: Vec::new(),
            },
            0 => ResolveResult {
                role_name: spec.to_string(),
                group: String::new(),
                found: false,
                ambiguous: false,
                available_groups: Vec::new(),
            },
            _ => ResolveResult {
                role_name: spec.to_string(),
                group: String::new(),
                found: false,
                ambiguous: true,
                available_groups: owning_groups,
            },
        }
    }

    pub fn has_role(&self, spec: &str) -> bool {
        self.resolve(spec).found
    }

    /// Looks up the resolved `Role` itself, for callers (capability filter,
    /// conversation state machine) that need more than one field at once.
    pub fn role(&self, spec: &str) -> CoreResult<&Role> {
        self.get(spec)
    }

    fn get(&self, spec: &str) -> CoreResult<&Role> {
        let r = self.resolve(spec);
        if r.ambiguous {
            return Err(CoreError::AmbiguousRole {
                name: spec.to_string(),
                groups: r.available_groups,
            });
        }
        if !r.found {
            let mut available: Vec<String> = self.roles.keys().map(|(_, n)| n.clone()).collect();
            available.sort();
            available.dedup();
            return Err(CoreError::UnknownRole {
                requested: spec.to_string(),
                available,
            });
        }
        self.roles
            .get(&(r.group, r.role_name))
            .ok_or_else(|| CoreError::UnknownRole {
                requested: spec.to_string(),
                available: Vec::new(),
            })
    }

    pub fn get_level(&self, spec: &str) -> CoreResult<ModelLevel> {
        Ok(self.get(spec)?.def.level)
    }

    pub fn get_reminder(&self, spec: &str) -> CoreResult<Option<String>> {
        Ok(self.get(spec)?.def.reminder.clone())
    }

    pub fn get_examples(&self, spec: &str) -> CoreResult<Vec<ChatMessage>> {
        Ok(self.get(spec)?.def.examples.clone())
    }

    pub fn get_excluded_tools(&self, spec: &str) -> CoreResult<Vec<String>> {
        Ok(self.get(spec)?.def.excluded_tools.clone().unwrap_or_default())
    }

    pub fn get_included_tools(&self, spec: &str) -> CoreResult<Vec<String>> {
        Ok(self.get(spec)?.def.included_tools.clone().unwrap_or_default())
    }

    pub fn get_parsing_tools(&self, spec: &str) -> CoreResult<Vec<String>> {
        Ok(self.get(spec)?.def.parsing_tools.clone())
    }

    pub fn get_enabled_agents(&self, spec: &str) -> CoreResult<Vec<String>> {
        Ok(self.get(spec)?.def.enabled_agents.clone().unwrap_or_default())
    }

    pub fn get_can_create_tasks_for(&self, spec: &str) -> CoreResult<Vec<String>> {
        Ok(self.get(spec)?.def.can_create_tasks_for.clone())
    }

    pub fn is_agentic(&self, spec: &str) -> CoreResult<bool> {
        Ok(self.get(spec)?.is_agentic())
    }

    /// True iff `child_spec` resolves to a role whose simple or prefixed
    /// name appears in `parent_spec`'s `enabled_agents`.
    pub fn can_spawn_agent(&self, parent_spec: &str, child_spec: &str) -> CoreResult<bool> {
        let parent = self.get(parent_spec)?;
        let child = self.get(child_spec)?;
        let Some(enabled) = &parent.def.enabled_agents else {
            return Ok(false);
        };
        let prefixed = format!("{}.{}", child.group, child.name);
        Ok(enabled.iter().any(|e| e == &child.name || e == &prefixed))
    }

    /// Builds the role's system message, appending the coordination block
    /// (for agentic roles) and the environment block.
    pub fn get_system_message(&self, spec: &str, env: &EnvironmentContext) -> CoreResult<String> {
        let role = self.get(spec)?;
        let mut message = role.def.system_message.clone();

        if let Some(enabled) = &role.def.enabled_agents {
            message.push_str("\n\n## Available agents\n");
            for agent_spec in enabled {
                let description = self
                    .get(agent_spec)
                    .ok()
                    .and_then(|r| r.def.agent_description.clone())
                    .unwrap_or_else(|| "No description available".to_string());
                message.push_str(&format!("- {}: {}\n", agent_spec, description));
            }
            if !role.def.can_create_tasks_for.is_empty() {
                message.push_str("\n## Can create tasks for\n");
                for name in &role.def.can_create_tasks_for {
                    message.push_str(&format!("- {}\n", name));
                }
            }
            message.push_str(
                "\nUse spawn_agent to delegate work to an available agent, speak_to_agent to \
                 send it further instructions, get_agents to check on its progress, and \
                 return_results once delegated work is complete.\n",
            );
        }

        message.push_str(&substitute_env(&self.env_template, env));
        Ok(message)
    }
}

fn substitute_env(template: &str, env: &EnvironmentContext) -> String {
    template
        .replace("{os}", &env.os)
        .replace("{cwd}", &env.cwd)
        .replace("{index_exists}", &env.index_exists.to_string())
        .replace("{current_date_time}", &env.current_date_time)
}

fn group_from_stem(path: &Path) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    match stem.rsplit_once('.') {
        Some((_, group)) => group.to_string(),
        None => GLOBAL_GROUP.to_string(),
    }
}

/// Handle shared by every reader; reload swaps the `Arc` wholesale so
/// in-flight readers finish against the snapshot they started with.
#[derive(Clone)]
pub struct SharedRoleRegistry(Arc<RwLock<Arc<RoleRegistry>>>);

impl SharedRoleRegistry {
    pub fn new(registry: RoleRegistry) -> Self {
        Self(Arc::new(RwLock::new(Arc::new(registry))))
    }

    pub fn current(&self) -> Arc<RoleRegistry> {
        self.0.read().expect("role registry lock poisoned").clone()
    }

    pub fn reload(&self, dir: &Path) -> CoreResult<()> {
        let fresh = RoleRegistry::load(dir)?;
        *self.0.write().expect("role registry lock poisoned") = Arc::new(fresh);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_role_file(dir: &Path, filename: &str, json: &str) {
        std::fs::write(dir.join(filename), json).unwrap();
    }

    fn env() -> EnvironmentContext {
        EnvironmentContext {
            os: "linux".to_string(),
            cwd: "/tmp".to_string(),
            index_exists: false,
            current_date_time: "2026-07-26T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn resolves_global_role_without_group_prefix() {
        let dir = tempdir().unwrap();
        write_role_file(
            dir.path(),
            "roles.json",
            r#"{"coder": {"system_message": "you write code"}}"#,
        );
        let registry = RoleRegistry::load(dir.path()).unwrap();
        let resolved = registry.resolve("coder");
        assert!(resolved.found);
        assert_eq!(resolved.group, GLOBAL_GROUP);
    }

    #[test]
    fn resolves_unique_non_global_role_by_simple_name() {
        let dir = tempdir().unwrap();
        write_role_file(
            dir.path(),
            "roles.eng.json",
            r#"{"reviewer": {"system_message": "you review code"}}"#,
        );
        let registry = RoleRegistry::load(dir.path()).unwrap();
        let resolved = registry.resolve("reviewer");
        assert!(resolved.found);
        assert_eq!(resolved.group, "eng");
    }

    #[test]
    fn ambiguous_across_two_non_global_groups() {
        let dir = tempdir().unwrap();
        write_role_file(
            dir.path(),
            "roles.eng.json",
            r#"{"reviewer": {"system_message": "eng review"}}"#,
        );
        write_role_file(
            dir.path(),
            "roles.design.json",
            r#"{"reviewer": {"system_message": "design review"}}"#,
        );
        let registry = RoleRegistry::load(dir.path()).unwrap();
        let resolved = registry.resolve("reviewer");
        assert!(!resolved.found);
        assert!(resolved.ambiguous);
        assert_eq!(resolved.available_groups, vec!["design".to_string(), "eng".to_string()]);
    }

    #[test]
    fn explicit_group_prefix_bypasses_ambiguity() {
        let dir = tempdir().unwrap();
        write_role_file(
            dir.path(),
            "roles.eng.json",
            r#"{"reviewer": {"system_message": "eng review"}}"#,
        );
        write_role_file(
            dir.path(),
            "roles.design.json",
            r#"{"reviewer": {"system_message": "design review"}}"#,
        );
        let registry = RoleRegistry::load(dir.path()).unwrap();
        let resolved = registry.resolve("eng.reviewer");
        assert!(resolved.found);
        assert_eq!(resolved.group, "eng");
    }

    #[test]
    fn conflicting_tool_lists_rejected() {
        let dir = tempdir().unwrap();
        write_role_file(
            dir.path(),
            "roles.json",
            r#"{"bad": {"system_message": "x", "included_tools": ["a"], "excluded_tools": ["b"]}}"#,
        );
        let err = RoleRegistry::load(dir.path()).unwrap_err();
        assert!(matches!(err, CoreError::ToolConfigConflict { .. }));
    }

    #[test]
    fn agentic_role_gets_coordination_block() {
        let dir = tempdir().unwrap();
        write_role_file(
            dir.path(),
            "roles.json",
            r#"{
                "lead": {"system_message": "you lead", "enabled_agents": ["worker"], "can_create_tasks_for": ["worker"]},
                "worker": {"system_message": "you work", "agent_description": "does the work"}
            }"#,
        );
        let registry = RoleRegistry::load(dir.path()).unwrap();
        assert!(registry.is_agentic("lead").unwrap());
        assert!(!registry.is_agentic("worker").unwrap());
        let message = registry.get_system_message("lead", &env()).unwrap();
        assert!(message.contains("does the work"));
        assert!(message.contains("Current date/time: 2026-07-26T00:00:00Z"));
    }

    #[test]
    fn can_spawn_agent_checks_enabled_agents() {
        let dir = tempdir().unwrap();
        write_role_file(
            dir.path(),
            "roles.json",
            r#"{
                "lead": {"system_message": "you lead", "enabled_agents": ["worker"]},
                "worker": {"system_message": "you work"}
            }"#,
        );
        let registry = RoleRegistry::load(dir.path()).unwrap();
        assert!(registry.can_spawn_agent("lead", "worker").unwrap());
        assert!(!registry.can_spawn_agent("worker", "lead").unwrap());
    }

    #[test]
    fn unknown_role_lists_available_names() {
        let dir = tempdir().unwrap();
        write_role_file(dir.path(), "roles.json", r#"{"coder": {"system_message": "x"}}"#);
        let registry = RoleRegistry::load(dir.path()).unwrap();
        let err = registry.get_level("nope").unwrap_err();
        match err {
            CoreError::UnknownRole { requested, available } => {
                assert_eq!(requested, "nope");
                assert_eq!(available, vec!["coder".to_string()]);
            }
            _ => panic!("expected UnknownRole"),
        }
    }

    #[test]
    fn roles_in_group_returns_sorted_copy_without_mutating_insertion_order() {
        let dir = tempdir().unwrap();
        write_role_file(
            dir.path(),
            "roles.json",
            r#"{"zebra": {"system_message": "z"}, "alpha": {"system_message": "a"}}"#,
        );
        let registry = RoleRegistry::load(dir.path()).unwrap();
        let sorted = registry.roles_in_group(GLOBAL_GROUP);
        assert_eq!(sorted, vec!["alpha".to_string(), "zebra".to_string()]);
        // Calling again must yield the same sorted result regardless of the
        // HashMap's randomized iteration order at load time.
        assert_eq!(registry.roles_in_group(GLOBAL_GROUP), sorted);
    }

    #[test]
    fn groups_lists_every_group_with_at_least_one_role() {
        let dir = tempdir().unwrap();
        write_role_file(dir.path(), "roles.json", r#"{"coder": {"system_message": "x"}}"#);
        write_role_file(dir.path(), "roles.eng.json", r#"{"reviewer": {"system_message": "y"}}"#);
        let registry = RoleRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.groups(), vec!["eng".to_string(), GLOBAL_GROUP.to_string()]);
    }
}
