//! The constrained generation orchestrator.
//!
//! Owns the draft → evaluate → revise loop, the audit trail, and session
//! lifecycle. Each completion call is a single straight-line async flow:
//! generate a draft with the target model, check each requirement in order
//! (first failure short-circuits), and on failure ask a revision model for a
//! new draft, repeating until every requirement passes or the client stops
//! the session. There is deliberately no server-side loop bound — a
//! requirement that never passes loops until cancelled.

use std::sync::{Arc, Weak};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use reqgate_core::error::{Error, ProviderError, Result};
use reqgate_core::message::Message;
use reqgate_core::model::ModelSpec;
use reqgate_core::provider::{Draft, ModelHost, Params};
use reqgate_core::requirement::Requirement;
use reqgate_core::selector::{select, SelectionRules};

use crate::registry::Registry;
use crate::session::{
    Choice, CompletionRequest, CompletionResponse, ErrorRecord, EvalLogEntry, Prospect,
    ProspectOutcome, RevisionInput, SessionGuard, SessionState, SessionTable, FINISH_ERROR_EVALUATING,
    FINISH_ERROR_GENERATING, FINISH_STOPPED,
};

/// Correction turn rendered when a requirement fails.
fn revision_prompt(requirement_prompt: &str) -> String {
    format!(
        "Your previous response did not meet the following requirement: \
{requirement_prompt} Please revise your response to meet this requirement."
    )
}

/// The orchestrator. One per process; owns the registry and the live-session
/// table. Constructed with `Engine::new`, shared as `Arc<Engine>`.
pub struct Engine {
    registry: Registry,
    sessions: SessionTable,
}

impl Engine {
    /// Build an engine over an initial model list. Fallback and loopback
    /// providers hold a weak back-reference so constrained models compose
    /// without leaking the engine.
    pub fn new(models: Vec<ModelSpec>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Engine>| Engine {
            registry: Registry::new(models, weak.clone()),
            sessions: SessionTable::default(),
        })
    }

    /// The model registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Register or replace a model at runtime, invalidating any cached
    /// provider so the next call rebuilds from the new configuration.
    pub fn add_model(&self, spec: ModelSpec) {
        self.registry.insert(spec);
    }

    /// Point-in-time snapshot of an in-flight session.
    pub fn status(&self, key: &str) -> Option<CompletionResponse> {
        self.sessions.get(key).map(|s| s.snapshot())
    }

    /// Request cooperative stop of an in-flight session. Takes effect at
    /// the next checkpoint, never mid-network-call. Returns false for an
    /// unknown key.
    pub fn stop(&self, key: &str) -> bool {
        match self.sessions.get(key) {
            Some(state) => {
                info!(key, "Stop requested for session");
                state.request_stop();
                true
            }
            None => false,
        }
    }

    /// Run one constrained completion.
    ///
    /// An unknown target model is a configuration error raised before any
    /// session exists. Everything after that point is recorded *in* the
    /// session: provider failures and evaluation faults close it as errored
    /// with the last draft preserved; requirement failures drive revisions.
    pub async fn create_completion(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let spec = self.registry.spec(&request.model).ok_or_else(|| {
            Error::Provider(ProviderError::ModelNotFound(request.model.clone()))
        })?;

        // Per-call requirements first, then the model's own. Fallback and
        // loopback specs are skipped here: they enforce their configured
        // requirements inside the sessions they spawn, and re-checking the
        // accepted draft would double-spend every model-graded check.
        let mut requirements = request.requirements.clone();
        if matches!(spec, ModelSpec::Anthropic(_) | ModelSpec::OpenaiCompat(_)) {
            if let Some(own) = spec.requirements() {
                requirements.extend_from_slice(own);
            }
        }

        let target_rules = spec.input_selection().cloned().unwrap_or_default();

        let mut response = CompletionResponse {
            id: format!("reqgate-{}", Uuid::new_v4()),
            object: "chat.completion".into(),
            created: Utc::now().timestamp(),
            model: request.model.clone(),
            model_config: spec,
            done: false,
            choices: vec![Choice::default()],
        };

        // Resume: adopt the prior prospect history and re-enter evaluation
        // on its last draft instead of spending a generation call.
        let mut current: Option<Draft> = None;
        if let Some(previous) = &request.initial_response {
            if let Some(choice) = previous.choice() {
                if let Some(last) = choice.prospects.last() {
                    current = Some(last.to_draft());
                    response.choices[0].prospects = choice.prospects.clone();
                }
            }
        }

        let state = Arc::new(SessionState::new(response));
        let _guard = SessionGuard::register(&self.sessions, request.key.clone(), state.clone());

        let chat = request.messages.clone();

        let mut current = match current {
            Some(draft) => {
                state.update(|r| set_choice(&mut r.choices[0], &draft));
                draft
            }
            None => {
                info!(model = %request.model, session = %state.snapshot().id, "Generating prospect");
                let view = select(&chat, &target_rules);
                match self
                    .registry
                    .complete_with_model(&request.model, &view, request.params.clone())
                    .await
                {
                    Ok(draft) => {
                        state.update(|r| push_prospect(&mut r.choices[0], &draft));
                        draft
                    }
                    Err(e) => {
                        warn!(error = %e, "Initial generation failed");
                        state.update(|r| {
                            record_error(&mut r.choices[0], &e, None, FINISH_ERROR_GENERATING);
                        });
                        return Ok(state.snapshot());
                    }
                }
            }
        };

        // Iteratively re-draft until all requirements are met. The only
        // expected exits besides success are a client stop or a fault.
        loop {
            let mut conversation = select(&chat, &target_rules);
            conversation.push(current.message.clone());

            let mut failed: Option<Requirement> = None;

            for requirement in &requirements {
                // Cooperative-stop checkpoint before every check.
                if state.should_stop() {
                    state.update(|r| {
                        let choice = &mut r.choices[0];
                        push_outcome(
                            choice,
                            ProspectOutcome {
                                requirements_met: false,
                                checked_all_requirements: Some(false),
                                revision_input: None,
                                revision_id: None,
                            },
                        );
                        choice.finish_reason = Some(FINISH_STOPPED.into());
                    });
                    info!("Session stopped by client during evaluation");
                    return Ok(state.snapshot());
                }

                debug!(requirement = requirement.name(), "Evaluating requirement");
                match requirement.evaluate(&conversation, self).await {
                    Ok(result) => {
                        let passed = result.passed;
                        state.update(|r| {
                            r.choices[0]
                                .prospects
                                .last_mut()
                                .expect("session has a prospect")
                                .requirements_evaluation_log
                                .push(EvalLogEntry::Check(result.log));
                        });
                        if !passed {
                            info!(requirement = requirement.name(), "Requirement failed");
                            failed = Some(requirement.clone());
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(requirement = requirement.name(), error = %e, "Requirement evaluation faulted");
                        state.update(|r| {
                            record_error(
                                &mut r.choices[0],
                                &e,
                                Some(requirement.name().to_string()),
                                FINISH_ERROR_EVALUATING,
                            );
                        });
                        return Ok(state.snapshot());
                    }
                }
            }

            let Some(failed) = failed else {
                // All requirements met.
                state.update(|r| {
                    push_outcome(
                        &mut r.choices[0],
                        ProspectOutcome {
                            requirements_met: true,
                            checked_all_requirements: Some(true),
                            revision_input: None,
                            revision_id: None,
                        },
                    );
                    r.done = true;
                });
                info!(session = %state.snapshot().id, "All requirements met");
                return Ok(state.snapshot());
            };

            // Checkpoint again before dispatching a revision.
            if state.should_stop() {
                state.update(|r| {
                    r.choices[0].finish_reason = Some(FINISH_STOPPED.into());
                });
                info!("Session stopped by client before revision");
                return Ok(state.snapshot());
            }

            // The failed requirement's configured revision model, or the
            // original target.
            let revision_model = failed
                .revision_model()
                .unwrap_or(&request.model)
                .to_string();

            let revision_rules: SelectionRules = match self.registry.spec(&revision_model) {
                Some(spec) => spec.input_selection().cloned().unwrap_or_default(),
                None => {
                    let e = Error::Provider(ProviderError::ModelNotFound(revision_model));
                    state.update(|r| {
                        record_error(&mut r.choices[0], &e, None, FINISH_ERROR_GENERATING);
                    });
                    return Ok(state.snapshot());
                }
            };

            // Revision view: the revision model's own selection of the chat,
            // the draft under correction, then the correction turn.
            let mut revision_conversation = select(&chat, &revision_rules);
            revision_conversation.push(current.message.clone());
            revision_conversation.push(Message::user(revision_prompt(&failed.prompt())));

            let revision_input = RevisionInput {
                model_name: revision_model.clone(),
                messages: revision_conversation.clone(),
                params: request.params.clone(),
            };

            info!(model = %revision_model, requirement = failed.name(), "Generating revision");
            match self
                .registry
                .complete_with_model(&revision_model, &revision_conversation, request.params.clone())
                .await
            {
                Ok(draft) => {
                    state.update(|r| {
                        let choice = &mut r.choices[0];
                        push_outcome(
                            choice,
                            ProspectOutcome {
                                requirements_met: false,
                                checked_all_requirements: Some(true),
                                revision_input: Some(revision_input),
                                revision_id: Some(draft.id.clone()),
                            },
                        );
                        push_prospect(choice, &draft);
                    });
                    current = draft;
                }
                Err(e) => {
                    warn!(error = %e, "Revision generation failed");
                    state.update(|r| {
                        record_error(&mut r.choices[0], &e, None, FINISH_ERROR_GENERATING);
                    });
                    return Ok(state.snapshot());
                }
            }
        }
    }
}

/// Point the choice head at a draft.
fn set_choice(choice: &mut Choice, draft: &Draft) {
    choice.id = Some(draft.id.clone());
    choice.message = Some(draft.message.clone());
    choice.finish_reason = Some(draft.finish_reason.clone());
}

/// Append a draft as a fresh prospect and make it the choice head.
fn push_prospect(choice: &mut Choice, draft: &Draft) {
    choice.prospects.push(Prospect::from_draft(draft.clone()));
    set_choice(choice, draft);
}

/// Close the current prospect's log with a terminal marker.
fn push_outcome(choice: &mut Choice, outcome: ProspectOutcome) {
    if let Some(prospect) = choice.prospects.last_mut() {
        prospect
            .requirements_evaluation_log
            .push(EvalLogEntry::Outcome(outcome));
    }
}

/// Record a session-terminating fault.
fn record_error(choice: &mut Choice, error: &Error, requirement: Option<String>, finish: &str) {
    choice.errors.push(ErrorRecord {
        error: error.to_string(),
        error_type: error.kind().into(),
        requirement,
        response: error.partial_payload().cloned(),
    });
    choice.finish_reason = Some(finish.into());
}

#[async_trait::async_trait]
impl ModelHost for Engine {
    async fn complete_with_model(
        &self,
        model: &str,
        messages: &[Message],
        params: Params,
    ) -> Result<Draft> {
        self.registry.complete_with_model(model, messages, params).await
    }

    fn estimate_tokens(&self, model: &str, text: &str) -> Result<u32> {
        self.registry.estimate_tokens(model, text)
    }

    fn input_selection(&self, model: &str) -> Result<Option<SelectionRules>> {
        self.registry
            .spec(model)
            .map(|s| s.input_selection().cloned())
            .ok_or_else(|| Error::Provider(ProviderError::ModelNotFound(model.to_string())))
    }
}
