//! The polymorphic Requirement contract.
//!
//! A requirement evaluates a conversation (whose last message is the
//! candidate draft) and produces a pass/fail result plus an audit record.
//! Variants are dispatched through the serde `type` discriminator — an
//! unknown tag is a hard deserialization error, never silently ignored.
//!
//! A `fail` result is expected control flow (it drives a revision); the
//! `Err` channel of `evaluate` is reserved for system faults and terminates
//! the session.

mod contains;
mod regex;
mod written;

pub use contains::ContainsRequirement;
pub use regex::RegexRequirement;
pub use written::WrittenRequirement;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Message;
use crate::provider::ModelHost;

/// A machine-checkable or model-checked requirement on a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Requirement {
    /// The response must contain one of a set of literal substrings.
    Contains(ContainsRequirement),
    /// The response must match every positive pattern and no negative one.
    Regex(RegexRequirement),
    /// A grading model judges the response against written instructions.
    Written(WrittenRequirement),
}

impl Requirement {
    /// The stable discriminator this variant serializes under.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Contains(_) => "Contains",
            Self::Regex(_) => "Regex",
            Self::Written(_) => "Written",
        }
    }

    /// The configured instance name (may be empty).
    pub fn name(&self) -> &str {
        match self {
            Self::Contains(r) => &r.name,
            Self::Regex(r) => &r.name,
            Self::Written(r) => &r.name,
        }
    }

    /// The model that should draft revisions when this requirement fails,
    /// if one is configured.
    pub fn revision_model(&self) -> Option<&str> {
        match self {
            Self::Contains(r) => r.revision_model.as_deref(),
            Self::Regex(r) => r.revision_model.as_deref(),
            Self::Written(r) => r.revision_model.as_deref(),
        }
    }

    /// Correction instruction rendered into the revision turn when this
    /// requirement fails.
    pub fn prompt(&self) -> String {
        match self {
            Self::Contains(r) => r.prompt(),
            Self::Regex(r) => r.prompt(),
            Self::Written(r) => r.prompt(),
        }
    }

    /// Evaluate this requirement against a conversation whose last message
    /// is the candidate draft.
    pub async fn evaluate(
        &self,
        conversation: &[Message],
        host: &dyn ModelHost,
    ) -> Result<RequirementResult> {
        match self {
            Self::Contains(r) => Ok(r.evaluate(conversation, self)),
            Self::Regex(r) => Ok(r.evaluate(conversation, self)),
            Self::Written(r) => r.evaluate(conversation, self, host).await,
        }
    }
}

/// Outcome of evaluating one requirement against one draft.
#[derive(Debug, Clone)]
pub struct RequirementResult {
    /// Whether the draft complied.
    pub passed: bool,
    /// The audit record, always appended to the prospect's evaluation log.
    pub log: EvalRecord,
}

impl RequirementResult {
    /// Build a result with its audit record.
    pub fn record(
        requirement: &Requirement,
        passed: bool,
        details: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            passed,
            log: EvalRecord {
                requirement_type: requirement.type_tag().to_string(),
                requirement_name: requirement.name().to_string(),
                passed,
                details,
            },
        }
    }
}

/// One entry in a prospect's requirements-evaluation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalRecord {
    /// Which requirement variant produced this record.
    pub requirement_type: String,
    /// The requirement's configured name.
    pub requirement_name: String,
    /// Whether the check passed.
    pub passed: bool,
    /// Variant-specific diagnostics (failing pattern, grader invocation, ...).
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}
