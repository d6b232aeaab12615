//! Tool dispatch loop (§4.3.2): budget enforcement, multicall expansion,
//! reminder injection, and the tool-handler interface itself.
//!
//! Grounded on the teacher's tool-execution pipeline in `engine/dispatch.rs`
//! and `engine/tool_exec.rs` (dispatch-by-name, synthesize an error `tool`
//! message on handler failure rather than aborting the cycle).

use super::{AgentConversation, Message};
use crate::capability;
use crate::error::CoreResult;
use crate::llm::{ChatMessage, ToolCallRequest, ToolChoice, ToolSchema};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// A tool implementation. `invoke` returns the tool-result content string on
/// success, or an error string that becomes `"Error: <msg>"` in the
/// conversation (never fatal to the cycle).
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn schema(&self) -> ToolSchema;
    async fn invoke(&self, tool_call: &ToolCallRequest, ctx: &ToolContext) -> Result<String, String>;
}

/// Per-call context handed to every tool handler, per §6.
pub struct ToolContext {
    pub current_role: String,
    pub current_agent_id: Option<String>,
    pub cwd: PathBuf,
}

#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(handler.schema().name.clone(), handler);
    }

    pub fn all_names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    /// Tool schemas this role is permitted to see, per the capability
    /// filter's whitelist/blacklist/auto-augmentation rules (§4.2).
    pub fn schemas_for(&self, role_spec: &str, role_registry: &crate::role::RoleRegistry) -> CoreResult<Vec<ToolSchema>> {
        let role = role_registry.role(role_spec)?;
        let known: Vec<String> = self.all_names();
        let allowed = capability::resolve_allowed_tools(role, &known);
        Ok(self
            .handlers
            .iter()
            .filter(|(name, _)| allowed.contains(name.as_str()))
            .map(|(_, h)| h.schema())
            .collect())
    }

    async fn dispatch(&self, tool_call: &ToolCallRequest, ctx: &ToolContext) -> String {
        match self.handlers.get(&tool_call.function.name) {
            Some(handler) => match handler.invoke(tool_call, ctx).await {
                Ok(content) => content,
                Err(message) => format!("Error: {message}"),
            },
            None => format!("Error: unknown tool '{}'", tool_call.function.name),
        }
    }
}

/// Parsed result of a role's in-process parse-response handler.
pub struct ParsedResponse {
    pub success: bool,
    pub content: String,
}

/// Observer callback bundle (§4.3). Every method is a no-op by default
/// except `parse_response_handler`, whose absence is a hard error when a
/// role declares a parsing tool.
pub trait Observer: Send + Sync {
    fn on_thinking(&self, _text: &str) {}
    fn on_chain_of_thought(&self, _text: &str) {}
    fn on_tool_execution(&self, _tool_name: &str, _args: &JsonValue) {}
    fn on_response(&self, _content: &str) {}
    fn on_error(&self, _message: &str) {}
    fn on_reminder(&self, reminder: &str) -> String {
        reminder.to_string()
    }
    fn on_content_display(&self, _content: &str) {}
    fn on_message_push(&self, _message: &ChatMessage) {}
    /// Called when the budget is exceeded; returning `true` raises the
    /// limit by the original value and continues, `false` stops the cycle.
    fn on_budget_exceeded(&self, _limit: usize) -> bool {
        false
    }
    fn on_max_tool_calls_exceeded(&self, _limit: usize) {}
    fn parse_response_handler(&self) -> Option<Box<dyn Fn(&ToolCallRequest) -> ParsedResponse + '_>> {
        None
    }
}

pub(super) fn resolve_tool_choice(parsing_tools: &[String]) -> Option<ToolChoice> {
    match parsing_tools.len() {
        1 => Some(ToolChoice::Forced(parsing_tools[0].clone())),
        0 => None,
        _ => {
            tracing::warn!("role declares {} parsing-only tools; leaving tool_choice=auto", parsing_tools.len());
            Some(ToolChoice::Auto)
        }
    }
}

pub(super) enum DispatchOutcome {
    /// Tool results were pushed; the caller should loop back to ApiCalling.
    Continue,
    /// The cycle is over (budget exhausted without a confirmation).
    Final(String),
}

/// Runs one pass of the tool dispatch loop: pushes the assistant message
/// (after multicall expansion), executes every outstanding tool call
/// subject to the budget, then injects the role's reminder if configured.
pub(super) async fn run_tool_dispatch(
    conv: &mut AgentConversation,
    assistant_message: &ChatMessage,
    ctx: &ToolContext,
    observer: &dyn Observer,
) -> CoreResult<DispatchOutcome> {
    let tool_calls = expand_multicall(conv, &assistant_message.tool_calls, ctx).await;

    let assistant_msg = Message::Assistant {
        content: assistant_message.content.clone(),
        tool_calls: tool_calls.clone(),
    };
    let chat_msg = assistant_msg.to_chat_message();
    conv.conversation_mut().push(assistant_msg);
    observer.on_message_push(&chat_msg);

    let pending = tool_calls.len();
    let limit = *conv.budget_limit_mut();
    let counter = *conv.tool_call_counter_mut();
    if counter + pending > limit {
        if observer.on_budget_exceeded(limit) {
            *conv.budget_limit_mut() = limit + conv.original_tool_call_budget();
        } else {
            observer.on_max_tool_calls_exceeded(limit);
            let content = conv.conversation.last_assistant_content().unwrap_or_else(|| "stopped: tool-call budget exceeded".to_string());
            return Ok(DispatchOutcome::Final(content));
        }
    }

    for tool_call in &tool_calls {
        observer.on_tool_execution(&tool_call.function.name, &tool_call.function.parsed_arguments());
        let content = conv.tool_registry().dispatch(tool_call, ctx).await;
        let tool_msg = Message::Tool {
            tool_call_id: tool_call.id.clone(),
            content,
        };
        let chat_msg = tool_msg.to_chat_message();
        conv.conversation_mut().push(tool_msg);
        observer.on_message_push(&chat_msg);
        *conv.tool_call_counter_mut() += 1;
    }

    if let Some(reminder) = conv.role_registry().get_reminder(&conv.role_spec_owned())? {
        let rendered = observer.on_reminder(&reminder);
        let user_msg = Message::User(rendered);
        let chat_msg = user_msg.to_chat_message();
        conv.conversation_mut().push(user_msg);
        observer.on_message_push(&chat_msg);
    }

    Ok(DispatchOutcome::Continue)
}

/// If the tool calls include a `multicall`, execute it and splice its
/// validated `expanded_tool_calls` entries in its place. Falls back to the
/// original list untouched on any malformed expansion.
async fn expand_multicall(conv: &AgentConversation, tool_calls: &[ToolCallRequest], ctx: &ToolContext) -> Vec<ToolCallRequest> {
    let Some(pos) = tool_calls.iter().position(|tc| tc.function.name == "multicall") else {
        return tool_calls.to_vec();
    };
    let multicall = &tool_calls[pos];
    let result = conv.tool_registry().dispatch(multicall, ctx).await;
    let Ok(parsed) = serde_json::from_str::<JsonValue>(&result) else {
        return tool_calls.to_vec();
    };
    let Some(entries) = parsed.get("expanded_tool_calls").and_then(|v| v.as_array()) else {
        return tool_calls.to_vec();
    };

    let mut expanded = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(id) = entry.get("id").and_then(|v| v.as_str()) else {
            return tool_calls.to_vec();
        };
        let Some(function) = entry.get("function") else {
            return tool_calls.to_vec();
        };
        let Some(name) = function.get("name").and_then(|v| v.as_str()) else {
            return tool_calls.to_vec();
        };
        let arguments = function.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}").to_string();
        expanded.push(ToolCallRequest {
            id: id.to_string(),
            function: crate::llm::ToolCallFunction {
                name: name.to_string(),
                arguments,
            },
        });
    }

    let mut out = tool_calls.to_vec();
    out.splice(pos..=pos, expanded);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopObserver;
    impl Observer for NoopObserver {}

    #[test]
    fn resolve_tool_choice_forces_single_parsing_tool() {
        let choice = resolve_tool_choice(&["rewrite_prompt".to_string()]);
        assert!(matches!(choice, Some(ToolChoice::Forced(name)) if name == "rewrite_prompt"));
    }

    #[test]
    fn resolve_tool_choice_auto_when_none_declared() {
        assert!(resolve_tool_choice(&[]).is_none());
    }

    #[test]
    fn default_observer_budget_hook_stops_the_cycle() {
        let observer = NoopObserver;
        assert!(!observer.on_budget_exceeded(10));
    }
}
