//! Core domain types and traits for reqgate.
//!
//! Everything the orchestrator, the provider adapters, and the gateway share
//! lives here: the `Message` value object, the conversation selector, the
//! polymorphic `Requirement` contract, the `Provider`/`ModelHost` traits, the
//! model configuration types, and the error taxonomy.

pub mod error;
pub mod message;
pub mod model;
pub mod provider;
pub mod requirement;
pub mod selector;

pub use error::{Error, ProviderError, Result};
pub use message::Message;
pub use model::{FallbackModelConfig, ModelConfig, ModelRetryParams, ModelSpec};
pub use provider::{merge_params, Draft, ModelHost, Params, Provider};
pub use requirement::{EvalRecord, Requirement, RequirementResult};
pub use selector::{select, RoleFilter, SelectionEntry, SelectionRules, TagFilter};
