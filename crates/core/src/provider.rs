//! Provider trait — the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation to an LLM and get a draft
//! back, and how to estimate token counts for prompt budgeting. The engine
//! calls `complete()` without knowing which backend is being used.
//!
//! Implementations: Anthropic, OpenAI-compatible endpoints, the fallback
//! chain, and the loopback provider that routes back into the engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ProviderError};
use crate::message::Message;
use crate::selector::SelectionRules;

/// Completion parameters forwarded to the backend (`max_tokens`,
/// `temperature`, vendor-specific knobs). Kept as an open map so per-call
/// values can be merged over configured defaults key by key.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Merge per-call parameters over configured defaults.
/// Per-call values win on key collision.
pub fn merge_params(defaults: &Params, call: &Params) -> Params {
    let mut merged = defaults.clone();
    for (k, v) in call {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// One candidate completion produced by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    /// Backend-assigned (or generated) id for this draft.
    pub id: String,

    /// The generated message. Providers append their configured
    /// `output_tags` to `message.tags`.
    pub message: Message,

    /// Why generation stopped ("end_turn", "stop", "length", ...).
    pub finish_reason: String,

    /// Raw audit records of every attempt a fallback chain made before
    /// producing this draft. Empty for direct providers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<serde_json::Value>,
}

/// The core Provider trait.
///
/// Every backend implements this; the engine and the Written requirement
/// call through it without knowing the vendor.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider instance (the model name it
    /// was configured under).
    fn name(&self) -> &str;

    /// Send a conversation and get a complete draft.
    async fn complete(
        &self,
        messages: &[Message],
        params: &Params,
    ) -> std::result::Result<Draft, ProviderError>;

    /// Estimate the number of tokens in a string.
    ///
    /// Default: character-count heuristic (~4.3 chars per token), good
    /// enough for prompt budgeting when the backend exposes no tokenizer.
    fn estimate_tokens(&self, text: &str) -> u32 {
        (text.len() as f64 / 4.3) as u32
    }
}

/// Capability surface the engine exposes to requirement evaluation.
///
/// Model-graded requirements resolve models by name through this trait
/// rather than holding provider instances, so the registry stays the single
/// owner of provider construction and caching.
#[async_trait]
pub trait ModelHost: Send + Sync {
    /// Complete with the named model, merging `params` over the model's
    /// configured defaults.
    async fn complete_with_model(
        &self,
        model: &str,
        messages: &[Message],
        params: Params,
    ) -> std::result::Result<Draft, Error>;

    /// Estimate tokens using the named model's provider.
    fn estimate_tokens(&self, model: &str, text: &str) -> std::result::Result<u32, Error>;

    /// The named model's configured input-selection rules, if any.
    fn input_selection(&self, model: &str) -> std::result::Result<Option<SelectionRules>, Error>;
}
