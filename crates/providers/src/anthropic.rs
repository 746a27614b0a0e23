//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Non-assistant roles map to `user`

use async_trait::async_trait;
use reqgate_core::error::{Error, ProviderError};
use reqgate_core::message::{Message, ROLE_ASSISTANT, ROLE_SYSTEM};
use reqgate_core::model::ModelConfig;
use reqgate_core::provider::{Draft, Params, Provider};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    provider_model: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a provider directly from its parts.
    pub fn new(
        name: impl Into<String>,
        provider_model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: name.into(),
            provider_model: provider_model.into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create with a custom base URL (testing, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build from a resolved model configuration. Fails fast when the API
    /// key env var is absent.
    pub fn from_config(config: &ModelConfig) -> Result<Self, Error> {
        let api_key = crate::api_key_from_env(
            &config.name,
            config.api_key_env.as_deref(),
            DEFAULT_API_KEY_ENV,
        )?;
        let mut provider = Self::new(&config.name, &config.provider_model, api_key);
        if let Some(url) = &config.base_url {
            provider = provider.with_base_url(url);
        }
        Ok(provider)
    }

    /// Extract system messages from the message list.
    /// Anthropic puts the system prompt as a top-level field, not in messages.
    fn extract_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut non_system: Vec<&Message> = Vec::new();

        for msg in messages {
            if msg.role == ROLE_SYSTEM {
                system_parts.push(&msg.content);
            } else {
                non_system.push(msg);
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, non_system)
    }

    /// Convert messages to Anthropic API format. Any non-assistant role
    /// becomes `user`.
    fn to_api_messages(messages: &[&Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: if m.role == ROLE_ASSISTANT {
                    "assistant".into()
                } else {
                    "user".into()
                },
                content: m.content.clone(),
            })
            .collect()
    }

    fn build_body(&self, messages: &[Message], params: &Params) -> (serde_json::Value, Option<String>) {
        let (system, non_system) = Self::extract_system(messages);
        let api_messages = Self::to_api_messages(&non_system);

        let mut body = serde_json::Map::new();
        for (k, v) in params {
            body.insert(k.clone(), v.clone());
        }
        body.insert("model".into(), serde_json::json!(self.provider_model));
        body.insert("messages".into(), serde_json::json!(api_messages));
        body.entry("max_tokens".to_string())
            .or_insert_with(|| serde_json::json!(DEFAULT_MAX_TOKENS));
        if let Some(sys) = &system {
            body.insert("system".into(), serde_json::json!(sys));
        }

        (serde_json::Value::Object(body), system)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        messages: &[Message],
        params: &Params,
    ) -> std::result::Result<Draft, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let (body, _) = self.build_body(messages, params);

        debug!(provider = %self.name, model = %self.provider_model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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
                "Invalid Anthropic API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let raw = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let api_resp: ApiResponse =
            serde_json::from_str(&raw).map_err(|e| ProviderError::CallFailed {
                provider: self.name.clone(),
                message: format!("Failed to parse Anthropic response: {e}"),
                partial: Some(serde_json::Value::String(raw)),
            })?;

        Ok(api_resp.into_draft())
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    id: String,
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

impl ApiResponse {
    fn into_draft(self) -> Draft {
        let mut text = String::new();
        for block in &self.content {
            if let ContentBlock::Text { text: t } = block {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(t);
            }
        }

        Draft {
            id: self.id,
            message: Message::assistant(text),
            finish_reason: self.stop_reason.unwrap_or_else(|| "stop".into()),
            attempts: Vec::new(),
        }
    }
}
