//! Completion sessions — wire types, audit trail, and the live-session table.
//!
//! A session is created per completion call, mutated in place as prospects
//! are generated and evaluated, and removed from the table on every terminal
//! path. The table only ever holds in-flight sessions; `status` and `stop`
//! address them by the caller-supplied key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use reqgate_core::message::Message;
use reqgate_core::model::ModelSpec;
use reqgate_core::provider::{Draft, Params};
use reqgate_core::requirement::{EvalRecord, Requirement};

/// Finish reason set when the client stopped the session.
pub const FINISH_STOPPED: &str = "Stopped by client";
/// Terminal failure sentinel some backends report.
pub const FINISH_ERROR: &str = "error";
/// Finish reason when a provider call failed.
pub const FINISH_ERROR_GENERATING: &str = "Error generating prospect";
/// Finish reason when a requirement's evaluation logic faulted.
pub const FINISH_ERROR_EVALUATING: &str = "Error evaluating requirement";

/// A completion request entering the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// Name of the target model.
    pub model: String,
    /// Per-call requirements, checked before the model's configured ones.
    pub requirements: Vec<Requirement>,
    /// The caller's conversation. Never mutated — the engine appends to
    /// copies only.
    pub messages: Vec<Message>,
    /// Per-call completion parameters, merged over the model's defaults.
    pub params: Params,
    /// Caller-supplied session key for status/stop addressing. Reuse among
    /// concurrently active calls is caller error.
    pub key: Option<String>,
    /// A prior (possibly incomplete) response to resume from: its last
    /// prospect becomes the current draft and evaluation restarts without
    /// spending a generation call.
    pub initial_response: Option<CompletionResponse>,
}

impl CompletionRequest {
    /// Convenience constructor for the common fields.
    pub fn new(
        model: impl Into<String>,
        requirements: Vec<Requirement>,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            model: model.into(),
            requirements,
            messages,
            ..Self::default()
        }
    }
}

/// The full response object returned to callers and exposed via `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    /// Always `"chat.completion"`.
    pub object: String,
    /// Unix timestamp of session creation.
    pub created: i64,
    /// The requested model name.
    pub model: String,
    /// The resolved configuration the session ran under.
    pub model_config: ModelSpec,
    /// True iff every requirement passed.
    pub done: bool,
    pub choices: Vec<Choice>,
}

impl CompletionResponse {
    /// The single choice this engine produces.
    pub fn choice(&self) -> Option<&Choice> {
        self.choices.first()
    }

    /// Errors recorded on the choice; non-empty means the session ERRORED.
    pub fn errors(&self) -> &[ErrorRecord] {
        self.choice().map(|c| c.errors.as_slice()).unwrap_or(&[])
    }
}

/// The winning (or latest) draft plus the full prospect history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Every draft considered, in order, including the winning one.
    #[serde(default)]
    pub prospects: Vec<Prospect>,
    /// Error records; present and non-empty only when the session ERRORED.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorRecord>,
}

/// One candidate draft with its own audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prospect {
    pub id: String,
    pub message: Message,
    pub finish_reason: String,
    /// Fallback-chain attempt records, when this draft came from a chain.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<serde_json::Value>,
    /// Evaluation log: one entry per requirement checked, closed by an
    /// outcome marker. Replaying it reconstructs every decision the loop
    /// made for this draft.
    #[serde(default)]
    pub requirements_evaluation_log: Vec<EvalLogEntry>,
}

impl Prospect {
    /// Wrap a fresh draft with an empty evaluation log.
    pub fn from_draft(draft: Draft) -> Self {
        Self {
            id: draft.id,
            message: draft.message,
            finish_reason: draft.finish_reason,
            attempts: draft.attempts,
            requirements_evaluation_log: Vec::new(),
        }
    }

    /// Recover the draft view of this prospect (for resumption).
    pub fn to_draft(&self) -> Draft {
        Draft {
            id: self.id.clone(),
            message: self.message.clone(),
            finish_reason: self.finish_reason.clone(),
            attempts: self.attempts.clone(),
        }
    }
}

/// One entry in a prospect's evaluation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EvalLogEntry {
    /// A single requirement check.
    Check(EvalRecord),
    /// The terminal marker for this prospect.
    Outcome(ProspectOutcome),
}

/// Terminal marker recording how evaluation of one prospect ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProspectOutcome {
    /// Whether every requirement passed against this prospect.
    pub requirements_met: bool,
    /// False when a cooperative stop interrupted the round.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_all_requirements: Option<bool>,
    /// The exact revision call dispatched because this prospect failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_input: Option<RevisionInput>,
    /// Id of the draft the revision produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<String>,
}

/// The revision call recorded in the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionInput {
    pub model_name: String,
    pub messages: Vec<Message>,
    pub params: Params,
}

/// A recorded session error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Human-readable error text.
    pub error: String,
    /// Machine-readable error kind.
    pub error_type: String,
    /// The requirement being evaluated when the fault occurred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement: Option<String>,
    /// Any partial payload obtained before the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
}

/// Shared mutable state of one in-flight session.
pub(crate) struct SessionState {
    should_stop: AtomicBool,
    response: Mutex<CompletionResponse>,
}

impl SessionState {
    pub(crate) fn new(response: CompletionResponse) -> Self {
        Self {
            should_stop: AtomicBool::new(false),
            response: Mutex::new(response),
        }
    }

    pub(crate) fn request_stop(&self) {
        self.should_stop.store(true, Ordering::SeqCst);
    }

    pub(crate) fn should_stop(&self) -> bool {
        self.should_stop.load(Ordering::SeqCst)
    }

    /// Point-in-time clone of the response.
    pub(crate) fn snapshot(&self) -> CompletionResponse {
        self.response.lock().expect("session lock poisoned").clone()
    }

    /// Mutate the response under the lock.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut CompletionResponse) -> R) -> R {
        let mut response = self.response.lock().expect("session lock poisoned");
        f(&mut response)
    }
}

/// The process-wide table of in-flight sessions, addressed by caller key.
#[derive(Default)]
pub(crate) struct SessionTable {
    inner: Mutex<HashMap<String, Arc<SessionState>>>,
}

impl SessionTable {
    pub(crate) fn insert(&self, key: String, state: Arc<SessionState>) {
        self.inner
            .lock()
            .expect("session table lock poisoned")
            .insert(key, state);
    }

    pub(crate) fn get(&self, key: &str) -> Option<Arc<SessionState>> {
        self.inner
            .lock()
            .expect("session table lock poisoned")
            .get(key)
            .cloned()
    }

    pub(crate) fn remove(&self, key: &str) {
        self.inner
            .lock()
            .expect("session table lock poisoned")
            .remove(key);
    }
}

/// Removes a keyed session from the table when the call terminates, on every
/// exit path including future cancellation.
pub(crate) struct SessionGuard<'a> {
    table: &'a SessionTable,
    key: Option<String>,
}

impl<'a> SessionGuard<'a> {
    pub(crate) fn register(
        table: &'a SessionTable,
        key: Option<String>,
        state: Arc<SessionState>,
    ) -> Self {
        if let Some(key) = &key {
            table.insert(key.clone(), state);
        }
        Self { table, key }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = &self.key {
            self.table.remove(key);
        }
    }
}
