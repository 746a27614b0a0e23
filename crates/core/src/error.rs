//! Error types for the reqgate domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Each bounded context
//! has its own error variant; configuration errors are fatal and never
//! retried, provider-call failures carry the provider name and any partial
//! payload for diagnostic logging.

use thiserror::Error;

/// The top-level error type for all reqgate operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a configuration error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Short machine-readable kind used in session error records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provider(_) => "provider",
            Self::Config { .. } => "config",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }

    /// Any partial response payload captured before the failure.
    pub fn partial_payload(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Provider(e) => e.partial_payload(),
            _ => None,
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from model providers.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),

    /// A completion call failed mid-flight. Carries the provider's name,
    /// the causing error text, and any partial response payload obtained
    /// before the failure.
    #[error("Provider '{provider}' call failed: {message}")]
    CallFailed {
        provider: String,
        message: String,
        partial: Option<serde_json::Value>,
    },

    /// Every model in a fallback chain was exhausted. Carries the complete
    /// attempt list so the caller can distinguish "backend never responded
    /// usably" from "backend content failed a requirement".
    #[error("Provider '{provider}' exhausted all fallback models after {} attempts", attempts.len())]
    Exhausted {
        provider: String,
        attempts: Vec<serde_json::Value>,
    },
}

impl ProviderError {
    /// Any partial response payload captured before the failure.
    pub fn partial_payload(&self) -> Option<&serde_json::Value> {
        match self {
            Self::CallFailed { partial, .. } => partial.as_ref(),
            _ => None,
        }
    }
}
