//! OpenAI-compatible adapter (`/v1/chat/completions`), grounded on the
//! teacher's `src/openai.rs`. Covers OpenAI itself plus the many providers
//! (Groq, DeepSeek, local gateways) that speak the same wire format.

use super::{ChatMessage, CompletionRequest, CompletionResponse, LlmClient, TokenUsage, ToolChoice};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<JsonValue>,
    max_completion_tokens: usize,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<usize>,
    completion_tokens: Option<usize>,
    total_tokens: Option<usize>,
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn create_completion(&self, request: CompletionRequest) -> Result<CompletionResponse> {
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
            Some(ToolChoice::Forced(name)) => Some(serde_json::json!({
                "type": "function",
                "function": { "name": name }
            })),
            Some(ToolChoice::None) => Some(JsonValue::String("none".to_string())),
            Some(ToolChoice::Auto) => Some(JsonValue::String("auto".to_string())),
            None => None,
        };

        let body = OpenAiRequest {
            model: &request.model,
            messages: &request.messages,
            tools,
            tool_choice,
            max_completion_tokens: request.max_completion_tokens,
        };

        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut rb = self.http.post(url).json(&body);
        if let Some(key) = &self.api_key {
            rb = rb.header("Authorization", format!("Bearer {}", key));
        }
        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("openai-compatible error ({}): {}", status, text);
        }

        let payload: OpenAiResponse = resp.json().await?;
        let choice = payload
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty choices array in response"))?;
        Ok(CompletionResponse {
            message: choice.message,
            usage: payload.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }
}
