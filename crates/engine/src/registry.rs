//! Model registry — name → configuration resolution and provider caching.
//!
//! Exactly one provider instance is constructed per model name and memoized;
//! construction failures (unknown model, missing credential) are fatal
//! configuration errors surfaced before anything is cached. Re-registering a
//! name is last-write-wins and invalidates the cached instance so the next
//! call rebuilds from the new configuration.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use tracing::{debug, info};

use reqgate_core::error::{Error, ProviderError, Result};
use reqgate_core::message::Message;
use reqgate_core::model::ModelSpec;
use reqgate_core::provider::{merge_params, Draft, Params, Provider};

use reqgate_providers::{AnthropicProvider, OpenAiCompatProvider};

use crate::fallback::FallbackProvider;
use crate::loopback::LoopbackProvider;
use crate::orchestrator::Engine;

/// Resolves model names to configurations and cached provider instances.
pub struct Registry {
    engine: Weak<Engine>,
    configs: RwLock<HashMap<String, ModelSpec>>,
    instances: RwLock<HashMap<String, Arc<dyn Provider>>>,
}

impl Registry {
    pub(crate) fn new(models: Vec<ModelSpec>, engine: Weak<Engine>) -> Self {
        let mut configs = HashMap::new();
        for spec in models {
            // Duplicate names silently overwrite: last write wins.
            configs.insert(spec.name().to_string(), spec);
        }
        Self {
            engine,
            configs: RwLock::new(configs),
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// The configuration registered under `name`, if any.
    pub fn spec(&self, name: &str) -> Option<ModelSpec> {
        self.configs
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// Names of every registered model.
    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .configs
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Register (or replace) a model configuration. Any cached provider for
    /// the name is invalidated so the next call rebuilds it.
    pub fn insert(&self, spec: ModelSpec) {
        let name = spec.name().to_string();
        info!(model = %name, "Registering model configuration");
        self.configs
            .write()
            .expect("registry lock poisoned")
            .insert(name.clone(), spec);
        self.instances
            .write()
            .expect("registry lock poisoned")
            .remove(&name);
    }

    /// Register a configuration together with a pre-built provider instance.
    /// Used by embedders and tests to supply custom backends.
    pub fn register_provider(&self, spec: ModelSpec, provider: Arc<dyn Provider>) {
        let name = spec.name().to_string();
        self.configs
            .write()
            .expect("registry lock poisoned")
            .insert(name.clone(), spec);
        self.instances
            .write()
            .expect("registry lock poisoned")
            .insert(name, provider);
    }

    /// Get or construct the provider for a model name.
    pub fn provider(&self, name: &str) -> Result<Arc<dyn Provider>> {
        if let Some(provider) = self
            .instances
            .read()
            .expect("registry lock poisoned")
            .get(name)
        {
            return Ok(provider.clone());
        }

        let spec = self
            .spec(name)
            .ok_or_else(|| Error::Provider(ProviderError::ModelNotFound(name.to_string())))?;

        debug!(model = %name, "Constructing provider");
        let provider = self.build(&spec)?;
        self.instances
            .write()
            .expect("registry lock poisoned")
            .insert(name.to_string(), provider.clone());
        Ok(provider)
    }

    fn build(&self, spec: &ModelSpec) -> Result<Arc<dyn Provider>> {
        Ok(match spec {
            ModelSpec::Anthropic(config) => Arc::new(AnthropicProvider::from_config(config)?),
            ModelSpec::OpenaiCompat(config) => Arc::new(OpenAiCompatProvider::from_config(config)?),
            ModelSpec::Reqgate(config) => {
                Arc::new(LoopbackProvider::new(config.clone(), self.engine.clone()))
            }
            ModelSpec::Fallback(config) => {
                Arc::new(FallbackProvider::new(config.clone(), self.engine.clone()))
            }
        })
    }

    /// Complete with the named model: merge per-call params over configured
    /// defaults (per-call wins), invoke the provider, and stamp the spec's
    /// `output_tags` onto the draft message.
    pub async fn complete_with_model(
        &self,
        name: &str,
        messages: &[Message],
        params: Params,
    ) -> Result<Draft> {
        let spec = self
            .spec(name)
            .ok_or_else(|| Error::Provider(ProviderError::ModelNotFound(name.to_string())))?;
        let provider = self.provider(name)?;
        let merged = merge_params(spec.default_params(), &params);

        let mut draft = provider
            .complete(messages, &merged)
            .await
            .map_err(|e| Error::Provider(wrap_call_error(name, e)))?;

        draft
            .message
            .tags
            .extend(spec.output_tags().iter().cloned());
        Ok(draft)
    }

    /// Estimate tokens with the named model's provider.
    pub fn estimate_tokens(&self, name: &str, text: &str) -> Result<u32> {
        Ok(self.provider(name)?.estimate_tokens(text))
    }
}

/// Wrap a raw provider failure with the model name for diagnostics, keeping
/// already-wrapped variants (with their payloads) intact.
fn wrap_call_error(name: &str, error: ProviderError) -> ProviderError {
    match error {
        e @ (ProviderError::CallFailed { .. } | ProviderError::Exhausted { .. }) => e,
        e => ProviderError::CallFailed {
            provider: name.to_string(),
            message: e.to_string(),
            partial: None,
        },
    }
}
