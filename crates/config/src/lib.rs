//! Configuration loading, validation, and persistence for reqgate.
//!
//! Loads `reqgate.toml` with environment variable overrides and validates at
//! startup. A missing file yields defaults. The models section round-trips
//! through the same serde definitions as the wire, so the gateway's
//! model-add route persists exactly what it registered. Credentials never
//! live in the file — model entries carry env var *names* only.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use reqgate_core::model::ModelSpec;

/// The root configuration structure, mapping to `reqgate.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Gateway bind settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Every model the engine can serve.
    #[serde(default)]
    pub models: Vec<ModelSpec>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            models: Vec::new(),
        }
    }
}

/// Gateway bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8372
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a file, applying environment overrides
    /// (`REQGATE_HOST`, `REQGATE_PORT`). A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            toml::from_str::<Self>(&content).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
        } else {
            tracing::info!("No config file found at {}, using defaults", path.display());
            Self::default()
        };

        if let Ok(host) = std::env::var("REQGATE_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("REQGATE_PORT") {
            config.server.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("REQGATE_PORT is not a port number: {port}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Persist the configuration as pretty TOML.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError {
            reason: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Insert or replace a model entry by name (last write wins), mirroring
    /// the registry's semantics so the file stays in sync with the process.
    pub fn upsert_model(&mut self, spec: ModelSpec) {
        match self
            .models
            .iter_mut()
            .find(|m| m.name() == spec.name())
        {
            Some(existing) => *existing = spec,
            None => self.models.push(spec),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for spec in &self.models {
            if spec.name().is_empty() {
                return Err(ConfigError::ValidationError(
                    "model name cannot be empty".into(),
                ));
            }
            if let ModelSpec::Fallback(fallback) = spec {
                if fallback.models.is_empty() {
                    return Err(ConfigError::ValidationError(format!(
                        "fallback chain '{}' has no models",
                        fallback.name
                    )));
                }
                for entry in &fallback.models {
                    if entry.max_retry == 0 {
                        return Err(ConfigError::ValidationError(format!(
                            "fallback chain '{}' entry '{}' has max_retry 0",
                            fallback.name, entry.model_name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Failed to serialize configuration: {reason}")]
    SerializeError { reason: String },

    #[error("Failed to write config file at {path}: {reason}")]
    WriteError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
