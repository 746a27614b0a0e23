//! Model configuration types.
//!
//! A `ModelSpec` describes one named model the registry can serve: which
//! provider kind handles it, the backend model id, credentials, the model's
//! own requirements and input-selection rules, output tags, and default
//! completion parameters. The `provider` field is the serde discriminator —
//! an unknown provider kind is a fatal configuration error at
//! deserialization time, never a silent fallback.

use serde::{Deserialize, Serialize};

use crate::provider::Params;
use crate::requirement::Requirement;
use crate::selector::SelectionRules;

/// A named model the registry can resolve, tagged by provider kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ModelSpec {
    /// Native Anthropic Messages API.
    Anthropic(ModelConfig),
    /// Any OpenAI-compatible chat-completions endpoint.
    OpenaiCompat(ModelConfig),
    /// Loopback into this process's own engine: `provider_model` names
    /// another configured model and `requirements` are enforced on it.
    Reqgate(ModelConfig),
    /// Ordered retry chain over other configured models.
    Fallback(FallbackModelConfig),
}

/// Configuration for a direct (non-fallback) model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Unique name this model is registered under.
    pub name: String,

    /// Backend model identifier (e.g. "claude-sonnet-4-20250514"), or the
    /// target model name for the loopback provider.
    pub provider_model: String,

    /// Environment variable holding the API key. Falls back to the provider
    /// kind's conventional variable when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Override the provider's base URL (proxies, self-hosted endpoints).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Requirements enforced in addition to per-call requirements whenever
    /// this model is the completion target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Vec<Requirement>>,

    /// How this model wants its input conversation selected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_selection: Option<SelectionRules>,

    /// Tags stamped onto every draft message this model produces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_tags: Vec<String>,

    /// Default completion parameters; per-call values win on collision.
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub default_params: Params,
}

/// Configuration for a fallback chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackModelConfig {
    /// Unique name this chain is registered under.
    pub name: String,

    /// Ordered backing models with per-model retry budgets.
    pub models: Vec<ModelRetryParams>,

    /// Requirements passed into every backing completion attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Vec<Requirement>>,

    /// How this chain wants its input conversation selected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_selection: Option<SelectionRules>,

    /// Tags stamped onto every accepted draft message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_tags: Vec<String>,

    /// Default completion parameters; per-call values win on collision.
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub default_params: Params,
}

/// One backing model in a fallback chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRetryParams {
    /// Name of a configured model to attempt.
    pub model_name: String,

    /// How many times to attempt this model before moving on.
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,

    /// Seconds to sleep between attempts (not after the final one).
    #[serde(default)]
    pub delay_between_retry: f64,
}

fn default_max_retry() -> u32 {
    1
}

impl ModelSpec {
    /// The unique name this spec is registered under.
    pub fn name(&self) -> &str {
        match self {
            Self::Anthropic(c) | Self::OpenaiCompat(c) | Self::Reqgate(c) => &c.name,
            Self::Fallback(f) => &f.name,
        }
    }

    /// The model's own requirements, applied in addition to per-call ones.
    pub fn requirements(&self) -> Option<&[Requirement]> {
        match self {
            Self::Anthropic(c) | Self::OpenaiCompat(c) | Self::Reqgate(c) => {
                c.requirements.as_deref()
            }
            Self::Fallback(f) => f.requirements.as_deref(),
        }
    }

    /// The model's input-selection rules, if any.
    pub fn input_selection(&self) -> Option<&SelectionRules> {
        match self {
            Self::Anthropic(c) | Self::OpenaiCompat(c) | Self::Reqgate(c) => {
                c.input_selection.as_ref()
            }
            Self::Fallback(f) => f.input_selection.as_ref(),
        }
    }

    /// Tags stamped onto drafts produced under this spec.
    pub fn output_tags(&self) -> &[String] {
        match self {
            Self::Anthropic(c) | Self::OpenaiCompat(c) | Self::Reqgate(c) => &c.output_tags,
            Self::Fallback(f) => &f.output_tags,
        }
    }

    /// Default completion parameters.
    pub fn default_params(&self) -> &Params {
        match self {
            Self::Anthropic(c) | Self::OpenaiCompat(c) | Self::Reqgate(c) => &c.default_params,
            Self::Fallback(f) => &f.default_params,
        }
    }
}
