//! Abstract LLM client interface (§6) plus two concrete adapters.
//!
//! The conversation state machine (`conversation`) only ever talks to the
//! `LlmClient` trait; `ollama` and `openai` are the two shapes real
//! providers take in the teacher's stack (`ProviderClient` in
//! `agent_manager/models.rs`), generalized here into swappable adapters
//! selected by `ModelConfig::provider`.

pub mod manager;
pub mod ollama;
pub mod openai;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One message in a conversation, in the shape every provider adapter
/// converts to/from on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
            reasoning_content: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: Vec::new(),
            reasoning_content: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    /// Raw JSON-encoded arguments, as providers hand them back.
    pub arguments: String,
}

impl ToolCallFunction {
    pub fn parsed_arguments(&self) -> JsonValue {
        serde_json::from_str(&self.arguments).unwrap_or(JsonValue::Null)
    }
}

/// A tool schema entry as sent to the provider in `request.tools`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: JsonValue,
}

/// `tool_choice` directive: let the model decide, or force a specific tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Forced(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    pub max_completion_tokens: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<usize>,
    pub completion_tokens: Option<usize>,
    pub total_tokens: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub message: ChatMessage,
    pub usage: Option<TokenUsage>,
}

/// The LLM HTTP API itself is an external collaborator (§1); this trait is
/// the interface boundary the core depends on. Implementations must be
/// retry-safe on the caller's side — the core never retries an in-flight
/// request itself.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn create_completion(&self, request: CompletionRequest) -> Result<CompletionResponse>;
}
