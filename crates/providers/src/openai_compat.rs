//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, Groq, Gemini's OpenAI endpoint, OpenRouter, Ollama,
//! vLLM, and any other backend exposing a compatible `/chat/completions`
//! route.

use async_trait::async_trait;
use reqgate_core::error::{Error, ProviderError};
use reqgate_core::message::Message;
use reqgate_core::model::ModelConfig;
use reqgate_core::provider::{Draft, Params, Provider};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    provider_model: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider directly from its parts.
    pub fn new(
        name: impl Into<String>,
        provider_model: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: name.into(),
            provider_model: provider_model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Build from a resolved model configuration. Fails fast when the API
    /// key env var is absent.
    pub fn from_config(config: &ModelConfig) -> Result<Self, Error> {
        let api_key = crate::api_key_from_env(
            &config.name,
            config.api_key_env.as_deref(),
            DEFAULT_API_KEY_ENV,
        )?;
        let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        Ok(Self::new(
            &config.name,
            &config.provider_model,
            base_url,
            api_key,
        ))
    }

    fn build_body(&self, messages: &[Message], params: &Params) -> serde_json::Value {
        let api_messages: Vec<ApiMessage> = messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.clone(),
                content: m.content.clone(),
            })
            .collect();

        let mut body = serde_json::Map::new();
        for (k, v) in params {
            body.insert(k.clone(), v.clone());
        }
        body.insert("model".into(), serde_json::json!(self.provider_model));
        body.insert("messages".into(), serde_json::json!(api_messages));
        serde_json::Value::Object(body)
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        messages: &[Message],
        params: &Params,
    ) -> std::result::Result<Draft, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(messages, params);

        debug!(provider = %self.name, model = %self.provider_model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited { retry_after_secs: 5 });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let raw = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let api_response: ApiResponse =
            serde_json::from_str(&raw).map_err(|e| ProviderError::CallFailed {
                provider: self.name.clone(),
                message: format!("Failed to parse response: {e}"),
                partial: Some(serde_json::Value::String(raw)),
            })?;

        api_response.into_draft().ok_or_else(|| ProviderError::CallFailed {
            provider: self.name.clone(),
            message: "No choices in response".into(),
            partial: None,
        })
    }
}

// --- OpenAI-compatible API types ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: Option<String>,
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ApiResponse {
    fn into_draft(self) -> Option<Draft> {
        let id = self
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let choice = self.choices.into_iter().next()?;
        Some(Draft {
            id,
            message: Message::assistant(choice.message.content.unwrap_or_default()),
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".into()),
            attempts: Vec::new(),
        })
    }
}
