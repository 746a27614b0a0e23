//! Loopback provider — routes completions back into the orchestrator.
//!
//! A `provider = "reqgate"` model names another configured model as its
//! target and carries its own requirements; completing with it runs a full
//! constrained session. This is what lets constrained models compose: a
//! fallback chain over loopback models, a loopback target that is itself a
//! fallback chain, and so on.

use std::sync::Weak;

use async_trait::async_trait;
use tracing::debug;

use reqgate_core::error::ProviderError;
use reqgate_core::message::Message;
use reqgate_core::model::ModelConfig;
use reqgate_core::provider::{Draft, Params, Provider};

use crate::orchestrator::Engine;
use crate::session::CompletionRequest;

/// Self-referential provider: completes by running a constrained session
/// against `provider_model` with the config's requirements.
pub struct LoopbackProvider {
    config: ModelConfig,
    engine: Weak<Engine>,
}

impl LoopbackProvider {
    pub(crate) fn new(config: ModelConfig, engine: Weak<Engine>) -> Self {
        Self { config, engine }
    }
}

#[async_trait]
impl Provider for LoopbackProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(
        &self,
        messages: &[Message],
        params: &Params,
    ) -> std::result::Result<Draft, ProviderError> {
        let engine = self.engine.upgrade().ok_or_else(|| {
            ProviderError::NotConfigured("engine no longer running".into())
        })?;

        debug!(
            model = %self.config.name,
            target = %self.config.provider_model,
            "Loopback: running inner constrained session"
        );

        let request = CompletionRequest {
            model: self.config.provider_model.clone(),
            requirements: self.config.requirements.clone().unwrap_or_default(),
            messages: messages.to_vec(),
            params: params.clone(),
            key: None,
            initial_response: None,
        };

        let response = engine
            .create_completion(request)
            .await
            .map_err(|e| ProviderError::CallFailed {
                provider: self.config.name.clone(),
                message: e.to_string(),
                partial: e.partial_payload().cloned(),
            })?;

        if !response.done {
            return Err(ProviderError::CallFailed {
                provider: self.config.name.clone(),
                message: "inner session did not finish".into(),
                partial: serde_json::to_value(&response).ok(),
            });
        }

        let choice = response.choices.into_iter().next().unwrap_or_default();
        Ok(Draft {
            id: choice
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            message: choice.message.unwrap_or_else(|| Message::assistant("")),
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".into()),
            attempts: Vec::new(),
        })
    }
}
