//! Prompt Enhancer (C5): rewrites a raw user prompt into a clearer one
//! before it reaches the primary agent conversation, via a throwaway
//! single-shot completion with a forced tool call.
//!
//! Grounded on the teacher's `chat_json` / `format: "json"` pattern in
//! `ollama.rs`, which forces a structured reply out of the model without
//! running the full agent loop; generalized here to this core's
//! `ToolChoice::Forced` mechanism (§4.3) instead of a provider-specific JSON
//! mode, since not every configured provider supports one.

use crate::llm::manager::ModelManager;
use crate::llm::{ChatMessage, CompletionRequest, ToolChoice, ToolSchema};
use crate::role::ModelLevel;
use std::sync::Arc;

const REWRITE_TOOL: &str = "rewrite_prompt";

#[derive(Debug, Clone)]
pub struct EnhancedPrompt {
    pub rewritten: String,
    pub rationale: Option<String>,
}

/// Rewrites prompts on a best-effort basis. Runs at [`ModelLevel::Fast`],
/// falling back to [`ModelLevel::Base`] when no fast model is configured
/// (the same fallback [`ModelManager::resolve_id`] already applies).
pub struct PromptEnhancer {
    model_manager: Arc<ModelManager>,
}

impl PromptEnhancer {
    pub fn new(model_manager: Arc<ModelManager>) -> Self {
        Self { model_manager }
    }

    /// Degrades to a no-op — the original prompt, `rationale: None` — on any
    /// failure: no model configured, the completion errors, or the model
    /// never calls the forced tool. A prompt enhancer must never be the
    /// reason a task fails to start.
    pub async fn enhance(&self, raw_prompt: &str) -> EnhancedPrompt {
        match self.try_enhance(raw_prompt).await {
            Ok(enhanced) => enhanced,
            Err(e) => {
                tracing::debug!("prompt enhancement skipped: {e}");
                EnhancedPrompt { rewritten: raw_prompt.to_string(), rationale: None }
            }
        }
    }

    async fn try_enhance(&self, raw_prompt: &str) -> anyhow::Result<EnhancedPrompt> {
        let model_id = self
            .model_manager
            .resolve_id(ModelLevel::Fast)
            .ok_or_else(|| anyhow::anyhow!("no model configured for prompt enhancement"))?;

        let request = CompletionRequest {
            model: String::new(),
            messages: vec![
                ChatMessage::new("system", SYSTEM_PROMPT),
                ChatMessage::new("user", raw_prompt),
            ],
            tools: vec![rewrite_tool_schema()],
            tool_choice: Some(ToolChoice::Forced(REWRITE_TOOL.to_string())),
            max_completion_tokens: 1024,
        };

        let response = self.model_manager.complete(&model_id, request).await?;
        let call = response
            .message
            .tool_calls
            .iter()
            .find(|c| c.function.name == REWRITE_TOOL)
            .ok_or_else(|| anyhow::anyhow!("model did not call {REWRITE_TOOL}"))?;

        let args = call.function.parsed_arguments();
        let rewritten = args
            .get("rewritten")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("{REWRITE_TOOL} call missing 'rewritten'"))?
            .to_string();
        let rationale = args.get("rationale").and_then(|v| v.as_str()).map(str::to_string);

        Ok(EnhancedPrompt { rewritten, rationale })
    }
}

const SYSTEM_PROMPT: &str = "You sharpen a user's task description into a clearer, more specific instruction for another agent to follow. Preserve the original intent exactly; do not add requirements the user did not ask for. Always respond by calling rewrite_prompt.";

fn rewrite_tool_schema() -> ToolSchema {
    ToolSchema {
        name: REWRITE_TOOL.to_string(),
        description: "Submit the rewritten prompt.".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "rewritten": {
                    "type": "string",
                    "description": "The clarified prompt text.",
                },
                "rationale": {
                    "type": "string",
                    "description": "One sentence on what changed and why.",
                },
            },
            "required": ["rewritten"],
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use std::collections::HashMap;

    fn manager_with_no_models() -> Arc<ModelManager> {
        Arc::new(ModelManager::new(&[], HashMap::new()))
    }

    #[tokio::test]
    async fn enhance_degrades_to_original_when_no_model_configured() {
        let enhancer = PromptEnhancer::new(manager_with_no_models());
        let result = enhancer.enhance("fix the bug").await;
        assert_eq!(result.rewritten, "fix the bug");
        assert!(result.rationale.is_none());
    }

    #[tokio::test]
    async fn enhance_degrades_when_configured_model_is_unreachable() {
        let configs = vec![ModelConfig {
            id: "fast-model".to_string(),
            provider: "openai".to_string(),
            url: "http://127.0.0.1:1".to_string(),
            model: "fast".to_string(),
            api_key: None,
        }];
        let mut levels = HashMap::new();
        levels.insert(ModelLevel::Fast, "fast-model".to_string());
        let manager = Arc::new(ModelManager::new(&configs, levels));

        let enhancer = PromptEnhancer::new(manager);
        let result = enhancer.enhance("add a retry").await;
        assert_eq!(result.rewritten, "add a retry");
        assert!(result.rationale.is_none());
    }
}
