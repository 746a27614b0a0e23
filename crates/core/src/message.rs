//! Message domain type.
//!
//! A conversation is an ordered `Vec<Message>`; ordering is causal order.
//! Messages are immutable values — the engine only ever appends to copies of
//! a caller's conversation, never mutates the original.

use serde::{Deserialize, Serialize};

/// Role of the end user.
pub const ROLE_USER: &str = "user";
/// Role of the model.
pub const ROLE_ASSISTANT: &str = "assistant";
/// Role for system instructions.
pub const ROLE_SYSTEM: &str = "system";

/// A single message in a conversation.
///
/// Roles are open strings rather than a closed enum: selection rules filter
/// on arbitrary role names supplied in configuration, and mid-conversation
/// custom roles must round-trip untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message ("user", "assistant", "system", ...).
    pub role: String,

    /// The text content.
    pub content: String,

    /// Tags attached by providers (from `output_tags`) or by callers.
    /// Selection rules can filter on these.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Message {
    /// Create a message with an arbitrary role.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            tags: Vec::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ROLE_USER, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ROLE_ASSISTANT, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ROLE_SYSTEM, content)
    }

    /// Attach tags to this message.
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}
