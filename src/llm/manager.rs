//! Registry of configured model ids, one semaphore-guarded [`LlmClient`] per
//! id, plus a `level -> id` lookup for §4.3's role-level model selection.
//!
//! Grounded on the teacher's `ModelManager`/`ModelInstance` in
//! `agent_manager/models.rs`: a `HashMap<String, ModelInstance>` where each
//! instance wraps a provider client behind an `Arc<Semaphore>` bounding
//! concurrent in-flight requests to that model.

use crate::config::ModelConfig;
use crate::llm::openai::OpenAiClient;
use crate::llm::{ollama::OllamaClient, CompletionRequest, CompletionResponse, LlmClient};
use crate::role::ModelLevel;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

struct ModelInstance {
    client: Arc<dyn LlmClient>,
    semaphore: Arc<Semaphore>,
    model_name: String,
}

pub struct ModelManager {
    models: HashMap<String, ModelInstance>,
    levels: HashMap<ModelLevel, String>,
}

impl ModelManager {
    pub fn new(configs: &[ModelConfig], levels: HashMap<ModelLevel, String>) -> Self {
        let mut models = HashMap::new();
        for cfg in configs {
            let client: Arc<dyn LlmClient> = match cfg.provider.as_str() {
                "ollama" => Arc::new(OllamaClient::new(cfg.url.clone(), cfg.api_key.clone())),
                _ => Arc::new(OpenAiClient::new(cfg.url.clone(), cfg.api_key.clone())),
            };
            models.insert(
                cfg.id.clone(),
                ModelInstance {
                    client,
                    semaphore: Arc::new(Semaphore::new(1)),
                    model_name: cfg.model.clone(),
                },
            );
        }
        Self { models, levels }
    }

    /// Resolve a role level to a model id, falling back to `base` when the
    /// requested level has no configured model (§4.3).
    pub fn resolve_id(&self, level: ModelLevel) -> Option<String> {
        self.levels
            .get(&level)
            .or_else(|| self.levels.get(&ModelLevel::Base))
            .cloned()
    }

    /// Dispatches to the configured client for `model_id`, filling in the
    /// provider-facing model name from config (callers address models by
    /// id, never by the raw provider string).
    pub async fn complete(&self, model_id: &str, mut request: CompletionRequest) -> Result<CompletionResponse> {
        let instance = self
            .models
            .get(model_id)
            .with_context(|| format!("model '{model_id}' not configured"))?;
        request.model = instance.model_name.clone();
        let _permit = instance.semaphore.acquire().await?;
        instance.client.create_completion(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_id_falls_back_to_base() {
        let mut levels = HashMap::new();
        levels.insert(ModelLevel::Base, "base-model".to_string());
        let manager = ModelManager::new(&[], levels);
        assert_eq!(manager.resolve_id(ModelLevel::Smart), Some("base-model".to_string()));
    }

    #[test]
    fn resolve_id_uses_exact_level_when_configured() {
        let mut levels = HashMap::new();
        levels.insert(ModelLevel::Base, "base-model".to_string());
        levels.insert(ModelLevel::Fast, "fast-model".to_string());
        let manager = ModelManager::new(&[], levels);
        assert_eq!(manager.resolve_id(ModelLevel::Fast), Some("fast-model".to_string()));
    }
}
