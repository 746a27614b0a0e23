//! Fallback provider — ordered retry chain over configured models.
//!
//! The system's only redundancy mechanism: serial retries with delays traded
//! for resilience against transient backend failures. Every attempt routes
//! through the orchestrator with the chain's own requirements, so backing
//! models are constraint-checked like any other completion.

use std::sync::{Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use reqgate_core::error::ProviderError;
use reqgate_core::message::Message;
use reqgate_core::model::FallbackModelConfig;
use reqgate_core::provider::{Draft, Params, Provider};

use crate::orchestrator::Engine;
use crate::session::{CompletionRequest, CompletionResponse, FINISH_ERROR, FINISH_STOPPED};

/// A provider that walks an ordered model chain, remembering which model
/// succeeded last and preferring it on the next call.
pub struct FallbackProvider {
    config: FallbackModelConfig,
    engine: Weak<Engine>,
    /// Round-robin start pointer, advanced only on success. Concurrent
    /// completions may interleave updates; preferred-model drift is
    /// accepted rather than serializing calls.
    current_index: Mutex<usize>,
}

impl FallbackProvider {
    pub(crate) fn new(config: FallbackModelConfig, engine: Weak<Engine>) -> Self {
        Self {
            config,
            engine,
            current_index: Mutex::new(0),
        }
    }

    /// A response is usable iff the inner session finished, recorded no
    /// errors, produced a message, and its finish reason is not a terminal
    /// failure sentinel.
    fn accepts(response: &CompletionResponse) -> bool {
        let Some(choice) = response.choice() else {
            return false;
        };
        let finish = choice.finish_reason.as_deref().unwrap_or("");
        response.done
            && choice.errors.is_empty()
            && choice.message.is_some()
            && finish != FINISH_ERROR
            && finish != FINISH_STOPPED
    }

    fn into_draft(response: CompletionResponse, attempts: Vec<serde_json::Value>) -> Draft {
        let choice = response.choices.into_iter().next().unwrap_or_default();
        Draft {
            id: choice
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            message: choice.message.unwrap_or_else(|| Message::assistant("")),
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".into()),
            attempts,
        }
    }
}

#[async_trait]
impl Provider for FallbackProvider {
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

        let chain_len = self.config.models.len();
        if chain_len == 0 {
            return Err(ProviderError::NotConfigured(
                "No models in fallback chain".into(),
            ));
        }

        let requirements = self.config.requirements.clone().unwrap_or_default();
        let mut attempts: Vec<serde_json::Value> = Vec::new();

        // Start where the last success left off, not at the head.
        let start_index = *self.current_index.lock().expect("fallback lock poisoned");

        for offset in 0..chain_len {
            let idx = (start_index + offset) % chain_len;
            let entry = &self.config.models[idx];

            for attempt in 0..entry.max_retry {
                info!(
                    chain = %self.config.name,
                    model = %entry.model_name,
                    attempt = attempt + 1,
                    max_retry = entry.max_retry,
                    "Fallback: attempting model"
                );

                let request = CompletionRequest {
                    model: entry.model_name.clone(),
                    requirements: requirements.clone(),
                    messages: messages.to_vec(),
                    params: params.clone(),
                    key: None,
                    initial_response: None,
                };

                match engine.create_completion(request).await {
                    Ok(response) => {
                        let accepted = Self::accepts(&response);
                        attempts.push(serde_json::to_value(&response).unwrap_or_default());
                        if accepted {
                            *self.current_index.lock().expect("fallback lock poisoned") = idx;
                            return Ok(Self::into_draft(response, attempts));
                        }
                        warn!(
                            chain = %self.config.name,
                            model = %entry.model_name,
                            "Fallback: response rejected"
                        );
                    }
                    Err(e) => {
                        warn!(
                            chain = %self.config.name,
                            model = %entry.model_name,
                            error = %e,
                            "Fallback: attempt failed"
                        );
                        attempts.push(json!({
                            "error": e.to_string(),
                            "model": entry.model_name,
                        }));
                    }
                }

                // Sleep between attempts of the same model, not after the
                // final one.
                if attempt + 1 < entry.max_retry && entry.delay_between_retry > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(entry.delay_between_retry)).await;
                }
            }
        }

        Err(ProviderError::Exhausted {
            provider: self.config.name.clone(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqgate_core::model::ModelSpec;
    use crate::session::Choice;

    fn response(done: bool, finish: Option<&str>) -> CompletionResponse {
        let spec: ModelSpec = serde_json::from_value(serde_json::json!({
            "provider": "anthropic", "name": "m", "provider_model": "claude"
        }))
        .unwrap();
        CompletionResponse {
            id: "reqgate-1".into(),
            object: "chat.completion".into(),
            created: 0,
            model: "m".into(),
            model_config: spec,
            done,
            choices: vec![Choice {
                id: Some("d-1".into()),
                message: Some(Message::assistant("ok")),
                finish_reason: finish.map(String::from),
                prospects: vec![],
                errors: vec![],
            }],
        }
    }

    #[test]
    fn accepts_done_clean_response() {
        assert!(FallbackProvider::accepts(&response(true, Some("end_turn"))));
    }

    #[test]
    fn rejects_unfinished_response() {
        assert!(!FallbackProvider::accepts(&response(false, Some("end_turn"))));
    }

    #[test]
    fn rejects_terminal_sentinels() {
        assert!(!FallbackProvider::accepts(&response(true, Some(FINISH_ERROR))));
        assert!(!FallbackProvider::accepts(&response(true, Some(FINISH_STOPPED))));
    }

    #[test]
    fn rejects_response_with_errors() {
        let mut resp = response(true, Some("end_turn"));
        resp.choices[0].errors.push(crate::session::ErrorRecord {
            error: "boom".into(),
            error_type: "provider".into(),
            requirement: None,
            response: None,
        });
        assert!(!FallbackProvider::accepts(&resp));
    }

    #[test]
    fn draft_carries_attempt_history() {
        let attempts = vec![serde_json::json!({"error": "down", "model": "a"})];
        let draft = FallbackProvider::into_draft(response(true, Some("end_turn")), attempts);
        assert_eq!(draft.id, "d-1");
        assert_eq!(draft.attempts.len(), 1);
        assert_eq!(draft.finish_reason, "end_turn");
    }
}
