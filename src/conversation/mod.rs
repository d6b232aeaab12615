//! Conversation State Machine (C3): drives the request → response →
//! tool-call loop for a single agent, enforcing message ordering, reasoning
//! extraction, and tool-call budget.
//!
//! Grounded on the teacher's `AgentEngine::run_agent_loop` in
//! `engine/mod.rs` (the send/act/observe cycle, progress callbacks,
//! tool-call dispatch) generalized away from the teacher's
//! plan/session/skills machinery to the explicit five-state machine this
//! core specifies, and on `ModelManager`'s semaphore-guarded per-model
//! dispatch for the LLM call itself.

mod dispatch;
mod normalize;

pub use dispatch::{Observer, ToolContext, ToolHandler, ToolRegistry};

use crate::error::{CoreError, CoreResult};
use crate::llm::manager::ModelManager;
use crate::llm::{ChatMessage, ToolCallRequest};
use crate::role::{EnvironmentContext, RoleRegistry};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum Message {
    System(String),
    User(String),
    Assistant { content: String, tool_calls: Vec<ToolCallRequest> },
    Tool { tool_call_id: String, content: String },
    Example(ChatMessage),
}

impl Message {
    fn to_chat_message(&self) -> ChatMessage {
        match self {
            Message::System(c) => ChatMessage::new("system", c.clone()),
            Message::User(c) => ChatMessage::new("user", c.clone()),
            Message::Assistant { content, tool_calls } => {
                let mut m = ChatMessage::new("assistant", content.clone());
                m.tool_calls = tool_calls.clone();
                m
            }
            Message::Tool { tool_call_id, content } => ChatMessage::tool_result(tool_call_id.clone(), content.clone()),
            Message::Example(m) => m.clone(),
        }
    }

    fn tool_call_id(&self) -> Option<&str> {
        match self {
            Message::Tool { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }
}

/// Ordered message log for one agent. Owns its own normalization; callers
/// never need to reorder messages manually.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self { messages: Vec::new() }
    }

    pub fn has_system_message(&self) -> bool {
        matches!(self.messages.first(), Some(Message::System(_)))
    }

    pub fn set_system_message(&mut self, content: String) {
        if self.has_system_message() {
            self.messages[0] = Message::System(content);
        } else {
            self.messages.insert(0, Message::System(content));
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn push_examples(&mut self, examples: Vec<ChatMessage>) {
        let insert_at = if self.has_system_message() { 1 } else { 0 };
        for (offset, example) in examples.into_iter().enumerate() {
            self.messages.insert(insert_at + offset, Message::Example(example));
        }
    }

    pub fn last_assistant_content(&self) -> Option<String> {
        self.messages.iter().rev().find_map(|m| match m {
            Message::Assistant { content, .. } => Some(content.clone()),
            _ => None,
        })
    }

    pub fn as_chat_messages(&self) -> Vec<ChatMessage> {
        self.messages.iter().map(Message::to_chat_message).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingState {
    Idle,
    Preparing,
    ApiCalling,
    ProcessingTools,
    Finalizing,
}

pub struct ConversationConfig {
    pub tool_call_budget: usize,
    pub max_completion_tokens: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            tool_call_budget: 25,
            max_completion_tokens: 4096,
        }
    }
}

/// One C3 instance: a conversation, a current role, a tool registry, a
/// budget, and an LLM client selected by role level.
pub struct AgentConversation {
    pub conversation: Conversation,
    role_spec: String,
    state: ProcessingState,
    tool_call_counter: usize,
    budget_limit: usize,
    config: ConversationConfig,
    role_registry: Arc<RoleRegistry>,
    model_manager: Arc<ModelManager>,
    tool_registry: Arc<ToolRegistry>,
}

impl AgentConversation {
    pub fn new(
        role_spec: impl Into<String>,
        role_registry: Arc<RoleRegistry>,
        model_manager: Arc<ModelManager>,
        tool_registry: Arc<ToolRegistry>,
        config: ConversationConfig,
    ) -> Self {
        Self {
            conversation: Conversation::new(),
            role_spec: role_spec.into(),
            state: ProcessingState::Idle,
            tool_call_counter: 0,
            budget_limit: config.tool_call_budget,
            config,
            role_registry,
            model_manager,
            tool_registry,
        }
    }

    pub fn state(&self) -> ProcessingState {
        self.state
    }

    pub fn role_spec(&self) -> &str {
        &self.role_spec
    }

    /// Installs the role's system message (plus few-shot examples) if the
    /// conversation doesn't already have one.
    pub fn ensure_system_message(&mut self, env: &EnvironmentContext) -> CoreResult<()> {
        if self.conversation.has_system_message() {
            return Ok(());
        }
        let message = self.role_registry.get_system_message(&self.role_spec, env)?;
        self.conversation.set_system_message(message);
        let examples = self.role_registry.get_examples(&self.role_spec)?;
        if !examples.is_empty() {
            self.conversation.push_examples(examples);
        }
        Ok(())
    }

    pub fn push_user_message(&mut self, content: impl Into<String>) {
        self.conversation.push(Message::User(content.into()));
    }

    /// Runs one full send cycle: Idle → Preparing → ApiCalling →
    /// (ProcessingTools → ApiCalling)* → Finalizing → Idle. Every exit path
    /// passes through the Idle-restoring tail; no early return bypasses it.
    pub async fn send(&mut self, ctx: &ToolContext, observer: &dyn Observer, env: &EnvironmentContext) -> CoreResult<String> {
        if self.state != ProcessingState::Idle {
            return Err(CoreError::InvalidRequest(format!(
                "conversation for role '{}' is not idle (state={:?})",
                self.role_spec, self.state
            )));
        }

        self.state = ProcessingState::Preparing;
        self.tool_call_counter = 0;
        let result = self.ensure_system_message(env).and(Ok(()));
        if let Err(e) = result {
            self.state = ProcessingState::Idle;
            return Err(e);
        }

        let outcome = self.run_cycle(ctx, observer).await;
        self.state = ProcessingState::Idle;
        outcome
    }

    async fn run_cycle(&mut self, ctx: &ToolContext, observer: &dyn Observer) -> CoreResult<String> {
        loop {
            self.state = ProcessingState::ApiCalling;
            normalize::normalize_message_order(&mut self.conversation);

            let tool_schemas = self.tool_registry.schemas_for(&self.role_spec, &self.role_registry)?;
            let parsing_tools = self.role_registry.get_parsing_tools(&self.role_spec)?;
            let tool_choice = dispatch::resolve_tool_choice(&parsing_tools);

            let request = crate::llm::CompletionRequest {
                model: String::new(),
                messages: self.conversation.as_chat_messages(),
                tools: tool_schemas,
                tool_choice,
                max_completion_tokens: self.config.max_completion_tokens,
            };

            let level = self.role_registry.get_level(&self.role_spec)?;
            let model_id = self
                .model_manager
                .resolve_id(level)
                .ok_or_else(|| CoreError::InvalidRequest("no model configured for role level".to_string()))?;

            let response = match self.model_manager.complete(&model_id, request).await {
                Ok(r) => r,
                Err(e) => {
                    observer.on_error(&e.to_string());
                    return Err(CoreError::ToolExecutionError {
                        tool: "<llm>".to_string(),
                        message: e.to_string(),
                    });
                }
            };

            let mut message = response.message;
            if let Some(reasoning) = message.reasoning_content.take() {
                observer.on_chain_of_thought(&reasoning);
            }

            let (parsing_calls, non_parsing_calls): (Vec<_>, Vec<_>) =
                message.tool_calls.iter().cloned().partition(|tc| parsing_tools.contains(&tc.function.name));

            if !parsing_calls.is_empty() && !non_parsing_calls.is_empty() {
                return Err(CoreError::ParsingToolMixed);
            }

            if !parsing_calls.is_empty() {
                self.state = ProcessingState::Finalizing;
                let call = &parsing_calls[0];
                let Some(handler) = observer.parse_response_handler() else {
                    return Err(CoreError::ParseHandlerMissing {
                        name: self.role_spec.clone(),
                    });
                };
                let parsed = handler(call);
                let assistant_msg = Message::Assistant {
                    content: parsed.content.clone(),
                    tool_calls: Vec::new(),
                };
                let chat_msg = assistant_msg.to_chat_message();
                self.conversation.push(assistant_msg);
                observer.on_message_push(&chat_msg);
                observer.on_response(&parsed.content);
                return Ok(parsed.content);
            }

            if non_parsing_calls.is_empty() {
                self.state = ProcessingState::Finalizing;
                let assistant_msg = Message::Assistant {
                    content: message.content.clone(),
                    tool_calls: Vec::new(),
                };
                let chat_msg = assistant_msg.to_chat_message();
                self.conversation.push(assistant_msg);
                observer.on_message_push(&chat_msg);
                observer.on_response(&message.content);
                return Ok(message.content);
            }

            message.tool_calls = non_parsing_calls;
            self.state = ProcessingState::ProcessingTools;
            let should_continue = dispatch::run_tool_dispatch(self, &message, ctx, observer).await?;
            if let dispatch::DispatchOutcome::Final(content) = should_continue {
                self.state = ProcessingState::Finalizing;
                return Ok(content);
            }
            // else: tool results were pushed; loop back to ApiCalling.
        }
    }

    pub(crate) fn conversation_mut(&mut self) -> &mut Conversation {
        &mut self.conversation
    }

    pub(crate) fn tool_call_counter_mut(&mut self) -> &mut usize {
        &mut self.tool_call_counter
    }

    pub(crate) fn budget_limit_mut(&mut self) -> &mut usize {
        &mut self.budget_limit
    }

    /// The configured `tool_call_budget` the conversation started with, used
    /// to raise `budget_limit` by a fixed increment each time it's exceeded
    /// rather than doubling it.
    pub(crate) fn original_tool_call_budget(&self) -> usize {
        self.config.tool_call_budget
    }

    pub(crate) fn role_registry(&self) -> &Arc<RoleRegistry> {
        &self.role_registry
    }

    pub(crate) fn tool_registry(&self) -> &Arc<ToolRegistry> {
        &self.tool_registry
    }

    pub(crate) fn role_spec_owned(&self) -> String {
        self.role_spec.clone()
    }
}
