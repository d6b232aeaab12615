//! Tool Capability Filter (C2): decide, for a role and a tool name, whether
//! the call is permitted.
//!
//! Pattern matching is grounded on the teacher's glob-based `work_globs`
//! check in `agent_manager::is_path_allowed` (`globset::Glob`), generalized
//! here from path globs to the three pattern kinds the role format allows
//! (exact, wildcard, regex), with `regex` added for the `/body/flags` case.

use crate::role::{Role, COORDINATION_TOOLS, TASK_EDIT_TOOLS, TASK_VIEW_TOOLS};
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

enum Pattern {
    Exact(String),
    Compiled(Regex),
}

impl Pattern {
    fn compile(raw: &str) -> Self {
        if let Some(body) = raw.strip_prefix('/') {
            if let Some(last_slash) = body.rfind('/') {
                let (expr, flags) = body.split_at(last_slash);
                let flags = &flags[1..]; // drop the closing '/'
                let case_insensitive = flags.contains('i');
                let anchored = format!("^(?:{})$", expr);
                if let Ok(re) = RegexBuilder::new(&anchored)
                    .case_insensitive(case_insensitive)
                    .build()
                {
                    return Pattern::Compiled(re);
                }
            }
            // Invalid regex: literal match including the delimiters.
            return Pattern::Exact(raw.to_string());
        }

        if raw.contains('*') {
            let escaped = regex::escape(raw).replace("\\*", ".*");
            let anchored = format!("^{}$", escaped);
            if let Ok(re) = Regex::new(&anchored) {
                return Pattern::Compiled(re);
            }
            return Pattern::Exact(raw.to_string());
        }

        Pattern::Exact(raw.to_string())
    }

    fn matches(&self, tool_name: &str) -> bool {
        match self {
            Pattern::Exact(s) => s == tool_name,
            Pattern::Compiled(re) => re.is_match(tool_name),
        }
    }
}

fn any_matches(patterns: &[String], tool_name: &str) -> bool {
    patterns.iter().any(|p| Pattern::compile(p).matches(tool_name))
}

/// Precedence: whitelist (`included_tools`, even empty) beats blacklist
/// (`excluded_tools`); with neither declared, default-deny.
pub fn is_tool_allowed(role: &Role, tool_name: &str) -> bool {
    if let Some(included) = &role.def.included_tools {
        return any_matches(included, tool_name);
    }
    if let Some(excluded) = &role.def.excluded_tools {
        return !any_matches(excluded, tool_name);
    }
    false
}

/// The full set of tool names a role may call, after whitelist/blacklist
/// resolution and auto-augmentation (§4.2). `all_known_tools` is the
/// universe of registered tool names to test whitelist/wildcard/regex
/// patterns against.
pub fn resolve_allowed_tools(role: &Role, all_known_tools: &[String]) -> HashSet<String> {
    let mut allowed: HashSet<String> = all_known_tools
        .iter()
        .filter(|name| is_tool_allowed(role, name))
        .cloned()
        .collect();

    if role.def.enabled_agents.is_some() {
        for tool in COORDINATION_TOOLS.iter().chain(TASK_VIEW_TOOLS.iter()) {
            add_if_not_excluded(&mut allowed, role, tool);
        }
    }
    if !role.def.can_create_tasks_for.is_empty() {
        for tool in TASK_EDIT_TOOLS {
            add_if_not_excluded(&mut allowed, role, tool);
        }
    }

    allowed
}

fn add_if_not_excluded(allowed: &mut HashSet<String>, role: &Role, tool: &str) {
    if allowed.contains(tool) {
        return;
    }
    if let Some(excluded) = &role.def.excluded_tools {
        if any_matches(excluded, tool) {
            return;
        }
    }
    allowed.insert(tool.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::RoleDef;

    fn as_opt(items: &[&str]) -> Option<Vec<String>> {
        if items.is_empty() {
            None
        } else {
            Some(items.iter().map(|s| s.to_string()).collect())
        }
    }

    fn role_with(included: &[&str], excluded: &[&str]) -> Role {
        Role {
            name: "test".to_string(),
            group: "global".to_string(),
            def: RoleDef {
                included_tools: as_opt(included),
                excluded_tools: as_opt(excluded),
                ..Default::default()
            },
        }
    }

    #[test]
    fn whitelist_exact_match() {
        let role = role_with(&["read_file"], &[]);
        assert!(is_tool_allowed(&role, "read_file"));
        assert!(!is_tool_allowed(&role, "write_file"));
    }

    #[test]
    fn blacklist_excludes_named_tool() {
        let role = role_with(&[], &["bash"]);
        assert!(is_tool_allowed(&role, "read_file"));
        assert!(!is_tool_allowed(&role, "bash"));
    }

    #[test]
    fn no_lists_default_deny() {
        let role = role_with(&[], &[]);
        assert!(!is_tool_allowed(&role, "read_file"));
    }

    #[test]
    fn wildcard_pattern_matches_prefix() {
        let role = role_with(&["file_*"], &[]);
        assert!(is_tool_allowed(&role, "file_read"));
        assert!(is_tool_allowed(&role, "file_write"));
        assert!(!is_tool_allowed(&role, "bash"));
    }

    #[test]
    fn regex_pattern_with_case_insensitive_flag() {
        let role = role_with(&["/^BASH$/i"], &[]);
        assert!(is_tool_allowed(&role, "bash"));
        assert!(is_tool_allowed(&role, "BASH"));
        assert!(!is_tool_allowed(&role, "bashful"));
    }

    #[test]
    fn invalid_regex_falls_back_to_literal_with_delimiters() {
        let raw = "/unterminated(";
        let role = role_with(&[raw], &[]);
        assert!(is_tool_allowed(&role, raw));
        assert!(!is_tool_allowed(&role, "unterminated("));
    }

    #[test]
    fn agentic_role_gets_coordination_tools_auto_added() {
        let mut role = role_with(&["read_file"], &[]);
        role.def.enabled_agents = Some(vec!["worker".to_string()]);
        let known = vec!["read_file".to_string()];
        let allowed = resolve_allowed_tools(&role, &known);
        assert!(allowed.contains("spawn_agent"));
        assert!(allowed.contains("get_agents"));
        assert!(allowed.contains("list_tasks"));
    }

    #[test]
    fn coordination_tool_not_added_if_excluded() {
        let mut role = role_with(&[], &["spawn_agent"]);
        role.def.enabled_agents = Some(vec![]);
        let allowed = resolve_allowed_tools(&role, &[]);
        assert!(!allowed.contains("spawn_agent"));
        assert!(allowed.contains("get_agents"));
    }

    #[test]
    fn can_create_tasks_for_adds_task_edit_tools() {
        let mut role = role_with(&[], &[]);
        role.def.can_create_tasks_for = vec!["worker".to_string()];
        let allowed = resolve_allowed_tools(&role, &[]);
        assert!(allowed.contains("edit_tasks"));
        assert!(allowed.contains("list_tasks"));
        assert!(allowed.contains("get_task"));
    }
}
