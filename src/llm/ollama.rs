//! Ollama-native adapter (`/api/chat`), grounded on the teacher's
//! `src/ollama.rs`: a thin `reqwest` wrapper, JSON request/response, an
//! optional bearer token, and tool schemas passed through verbatim.

use super::{ChatMessage, CompletionRequest, CompletionResponse, LlmClient, TokenUsage, ToolChoice};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OllamaClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: ChatMessage,
    #[serde(default)]
    prompt_eval_count: Option<usize>,
    #[serde(default)]
    eval_count: Option<usize>,
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn create_completion(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let total_len: usize = request.messages.iter().map(|m| m.content.len()).sum();
        tracing::info!(
            "Ollama request: model={}, messages={}, total_chars={}",
            request.model,
            request.messages.len(),
            total_len
        );

        let tools: Vec<JsonValue> = request
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        let tool_choice = match &request.tool_choice {
            Some(ToolChoice::Forced(name)) => Some(name.as_str()),
            _ => None,
        };

        let body = OllamaRequest {
            model: &request.model,
            messages: &request.messages,
            stream: false,
            tools,
            tool_choice,
        };

        let url = format!("{}/api/chat", self.base_url);
        let mut rb = self.http.post(url).json(&body);
        if let Some(key) = &self.api_key {
            rb = rb.header("Authorization", format!("Bearer {}", key));
        }
        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("ollama error ({}): {}", status, text);
        }

        let payload: OllamaResponse = resp.json().await?;
        Ok(CompletionResponse {
            message: payload.message,
            usage: Some(TokenUsage {
                prompt_tokens: payload.prompt_eval_count,
                completion_tokens: payload.eval_count,
                total_tokens: match (payload.prompt_eval_count, payload.eval_count) {
                    (Some(p), Some(c)) => Some(p + c),
                    _ => None,
                },
            }),
        })
    }
}
