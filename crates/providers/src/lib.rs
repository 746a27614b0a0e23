//! Vendor LLM adapters for reqgate.
//!
//! All adapters implement the `reqgate_core::Provider` trait. The engine's
//! registry selects and constructs the right adapter from a `ModelSpec`;
//! construction fails fast when a required credential is absent.

pub mod anthropic;
pub mod openai_compat;

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatProvider;

use reqgate_core::error::Error;

/// Read an API key from the configured env var (or the adapter's
/// conventional default). A missing key is a fatal configuration error
/// surfaced before the provider is ever cached.
pub(crate) fn api_key_from_env(
    model_name: &str,
    configured: Option<&str>,
    default_var: &str,
) -> Result<String, Error> {
    let var = configured.unwrap_or(default_var);
    std::env::var(var).map_err(|_| {
        Error::config(format!(
            "API key for model '{model_name}' not set (expected in ${var})"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_a_config_error() {
        let err = api_key_from_env("m", Some("REQGATE_TEST_NO_SUCH_VAR"), "ALSO_UNSET").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("REQGATE_TEST_NO_SUCH_VAR"));
    }
}
