//! End-to-end orchestrator scenarios over mock providers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde_json::json;

use reqgate_core::error::ProviderError;
use reqgate_core::message::Message;
use reqgate_core::model::ModelSpec;
use reqgate_core::provider::{Draft, Params, Provider};
use reqgate_core::requirement::Requirement;
use reqgate_engine::{
    CompletionRequest, Engine, EvalLogEntry, FINISH_STOPPED,
};

/// Replays scripted responses, recording every call's messages and params.
struct ScriptedProvider {
    responses: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<(Vec<Message>, Params)>>,
}

impl ScriptedProvider {
    fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn call(&self, i: usize) -> (Vec<Message>, Params) {
        self.calls.lock().unwrap()[i].clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        messages: &[Message],
        params: &Params,
    ) -> Result<Draft, ProviderError> {
        let mut calls = self.calls.lock().unwrap();
        calls.push((messages.to_vec(), params.clone()));
        let n = calls.len();
        drop(calls);
        let content = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::Network("script exhausted".into()))?;
        Ok(Draft {
            id: format!("draft-{n}"),
            message: Message::assistant(content),
            finish_reason: "end_turn".into(),
            attempts: Vec::new(),
        })
    }
}

/// Always fails, counting calls.
struct FailingProvider {
    calls: Mutex<usize>,
}

impl FailingProvider {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(0),
        })
    }

    fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Provider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(
        &self,
        _messages: &[Message],
        _params: &Params,
    ) -> Result<Draft, ProviderError> {
        *self.calls.lock().unwrap() += 1;
        Err(ProviderError::Network("connection refused".into()))
    }
}

/// Answers like a grader, and optionally requests a session stop on its
/// first call — the deterministic way to exercise the cooperative-stop
/// checkpoint between two requirement checks.
struct GraderProvider {
    answer: String,
    stop: Option<(Weak<Engine>, String)>,
    calls: Mutex<Vec<Params>>,
}

impl GraderProvider {
    fn new(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: answer.into(),
            stop: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn stopping(answer: &str, engine: &Arc<Engine>, key: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: answer.into(),
            stop: Some((Arc::downgrade(engine), key.into())),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for GraderProvider {
    fn name(&self) -> &str {
        "grader"
    }

    async fn complete(
        &self,
        _messages: &[Message],
        params: &Params,
    ) -> Result<Draft, ProviderError> {
        self.calls.lock().unwrap().push(params.clone());
        if let Some((engine, key)) = &self.stop {
            if let Some(engine) = engine.upgrade() {
                engine.stop(key);
            }
        }
        Ok(Draft {
            id: "grade-1".into(),
            message: Message::assistant(self.answer.clone()),
            finish_reason: "end_turn".into(),
            attempts: Vec::new(),
        })
    }
}

fn spec(value: serde_json::Value) -> ModelSpec {
    serde_json::from_value(value).unwrap()
}

fn mock_spec(name: &str) -> ModelSpec {
    spec(json!({
        "provider": "openai_compat",
        "name": name,
        "provider_model": "mock-model"
    }))
}

fn requirement(value: serde_json::Value) -> Requirement {
    serde_json::from_value(value).unwrap()
}

fn outcome(entry: &EvalLogEntry) -> &reqgate_engine::ProspectOutcome {
    match entry {
        EvalLogEntry::Outcome(o) => o,
        EvalLogEntry::Check(c) => panic!("expected outcome entry, got check of {}", c.requirement_name),
    }
}

#[tokio::test]
async fn pass_on_first_try() {
    let engine = Engine::new(vec![]);
    let provider = ScriptedProvider::new(&["The sky is blue."]);
    engine.registry().register_provider(mock_spec("M"), provider.clone());

    let response = engine
        .create_completion(CompletionRequest::new(
            "M",
            vec![requirement(json!({"type": "Contains", "value": ["blue"]}))],
            vec![Message::user("What color is the sky?")],
        ))
        .await
        .unwrap();

    assert!(response.done);
    assert_eq!(provider.call_count(), 1);

    let choice = response.choice().unwrap();
    assert_eq!(choice.prospects.len(), 1);
    assert_eq!(choice.message.as_ref().unwrap().content, "The sky is blue.");

    let log = &choice.prospects[0].requirements_evaluation_log;
    assert_eq!(log.len(), 2);
    let last = outcome(&log[1]);
    assert!(last.requirements_met);
    assert_eq!(last.checked_all_requirements, Some(true));
    assert!(last.revision_input.is_none());
}

#[tokio::test]
async fn one_revision_cycle() {
    let engine = Engine::new(vec![]);
    let provider = ScriptedProvider::new(&["I'm sorry, I can't help.", "Here is the answer."]);
    engine.registry().register_provider(mock_spec("M"), provider.clone());

    let response = engine
        .create_completion(CompletionRequest::new(
            "M",
            vec![requirement(json!({
                "type": "Regex",
                "name": "no-apology",
                "positive_regexes": [],
                "negative_regexes": ["(?i)sorry"]
            }))],
            vec![Message::user("Help me.")],
        ))
        .await
        .unwrap();

    assert!(response.done);
    assert_eq!(provider.call_count(), 2);

    let choice = response.choice().unwrap();
    assert_eq!(choice.prospects.len(), 2);
    assert_eq!(choice.message.as_ref().unwrap().content, "Here is the answer.");

    // First prospect: failed check, then an outcome carrying the revision.
    let first_log = &choice.prospects[0].requirements_evaluation_log;
    let EvalLogEntry::Check(check) = &first_log[0] else {
        panic!("expected check entry");
    };
    assert!(!check.passed);
    assert_eq!(check.details["pattern_type"], "negative");
    let first_outcome = outcome(&first_log[1]);
    assert!(!first_outcome.requirements_met);
    assert_eq!(first_outcome.checked_all_requirements, Some(true));
    assert_eq!(first_outcome.revision_id.as_deref(), Some("draft-2"));

    let revision = first_outcome.revision_input.as_ref().unwrap();
    assert_eq!(revision.model_name, "M");
    // Revision conversation: chat, draft under correction, correction turn.
    let correction = revision.messages.last().unwrap();
    assert_eq!(correction.role, "user");
    assert!(correction
        .content
        .starts_with("Your previous response did not meet the following requirement:"));
    assert!(correction.content.contains("must not match"));

    // The provider actually received that conversation.
    let (messages, _) = provider.call(1);
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].content, "I'm sorry, I can't help.");

    // Second prospect: clean pass.
    let second_log = &choice.prospects[1].requirements_evaluation_log;
    assert!(outcome(&second_log[1]).requirements_met);
}

#[tokio::test]
async fn cooperative_stop_between_requirement_checks() {
    let engine = Engine::new(vec![]);
    engine
        .registry()
        .register_provider(mock_spec("M"), ScriptedProvider::new(&["draft text"]));
    // The grader passes the first requirement but flags the session stopped,
    // so the checkpoint before the second requirement fires.
    let grader = GraderProvider::stopping("yes", &engine, "abc");
    engine
        .registry()
        .register_provider(mock_spec("grader"), grader.clone());

    let request = CompletionRequest {
        key: Some("abc".into()),
        ..CompletionRequest::new(
            "M",
            vec![
                requirement(json!({
                    "type": "Written",
                    "name": "graded",
                    "evaluation_model": "grader",
                    "value": ["be helpful"]
                })),
                requirement(json!({"type": "Contains", "value": ["never-present"]})),
            ],
            vec![Message::user("hi")],
        )
    };

    let response = engine.create_completion(request).await.unwrap();

    assert!(!response.done);
    assert_eq!(grader.call_count(), 1);

    let choice = response.choice().unwrap();
    assert_eq!(choice.finish_reason.as_deref(), Some(FINISH_STOPPED));

    let log = &choice.prospects[0].requirements_evaluation_log;
    // One completed check, then the stop marker; the second requirement was
    // never evaluated.
    assert_eq!(log.len(), 2);
    let last = outcome(&log[1]);
    assert!(!last.requirements_met);
    assert_eq!(last.checked_all_requirements, Some(false));

    // Terminated sessions leave the table.
    assert!(engine.status("abc").is_none());
}

#[tokio::test]
async fn first_failure_short_circuits_remaining_requirements() {
    let engine = Engine::new(vec![]);
    engine.registry().register_provider(
        mock_spec("M"),
        ScriptedProvider::new(&["I'm sorry.", "Here is the answer."]),
    );
    let grader = GraderProvider::new("yes");
    engine
        .registry()
        .register_provider(mock_spec("grader"), grader.clone());

    let response = engine
        .create_completion(CompletionRequest::new(
            "M",
            vec![
                requirement(json!({
                    "type": "Regex",
                    "positive_regexes": [],
                    "negative_regexes": ["(?i)sorry"]
                })),
                requirement(json!({
                    "type": "Written",
                    "evaluation_model": "grader",
                    "value": ["be helpful"]
                })),
            ],
            vec![Message::user("Help me.")],
        ))
        .await
        .unwrap();

    assert!(response.done);
    // Round one failed on the regex before reaching the grader; only the
    // second round invoked it.
    assert_eq!(grader.call_count(), 1);

    // Grader calls pin decoding params: single token, zero temperature.
    let calls = grader.calls.lock().unwrap();
    assert_eq!(calls[0]["max_tokens"], json!(1));
    assert_eq!(calls[0]["temperature"], json!(0.0));
}

#[tokio::test]
async fn input_selection_shapes_the_provider_view() {
    let engine = Engine::new(vec![]);
    let provider = ScriptedProvider::new(&["ok"]);
    engine.registry().register_provider(
        spec(json!({
            "provider": "openai_compat",
            "name": "M",
            "provider_model": "mock",
            "input_selection": {"roles": ["user", "assistant"]}
        })),
        provider.clone(),
    );

    let response = engine
        .create_completion(CompletionRequest::new(
            "M",
            vec![],
            vec![
                Message::system("hidden instructions"),
                Message::user("visible"),
            ],
        ))
        .await
        .unwrap();
    assert!(response.done);

    let (messages, _) = provider.call(0);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "visible");
}

#[tokio::test]
async fn fallback_rotation_prefers_last_successful_model() {
    let engine = Engine::new(vec![]);
    let bad1 = FailingProvider::new();
    let bad2 = FailingProvider::new();
    let good = ScriptedProvider::new(&["first win", "second win"]);
    engine.registry().register_provider(mock_spec("m1"), bad1.clone());
    engine.registry().register_provider(mock_spec("m2"), bad2.clone());
    engine.registry().register_provider(mock_spec("m3"), good.clone());
    engine.registry().insert(spec(json!({
        "provider": "fallback",
        "name": "chain",
        "output_tags": ["resilient"],
        "models": [
            {"model_name": "m1"},
            {"model_name": "m2"},
            {"model_name": "m3"}
        ]
    })));

    let first = engine
        .create_completion(CompletionRequest::new("chain", vec![], vec![Message::user("go")]))
        .await
        .unwrap();
    assert!(first.done);
    assert_eq!(bad1.call_count(), 1);
    assert_eq!(bad2.call_count(), 1);
    assert_eq!(good.call_count(), 1);

    let choice = first.choice().unwrap();
    assert_eq!(choice.message.as_ref().unwrap().content, "first win");
    // Accepted drafts carry the chain's output tags and full attempt list.
    assert!(choice.message.as_ref().unwrap().tags.contains(&"resilient".to_string()));
    assert_eq!(choice.prospects[0].attempts.len(), 3);

    // Immediately after a success, the next search starts at the winner.
    let second = engine
        .create_completion(CompletionRequest::new("chain", vec![], vec![Message::user("go")]))
        .await
        .unwrap();
    assert!(second.done);
    assert_eq!(bad1.call_count(), 1);
    assert_eq!(bad2.call_count(), 1);
    assert_eq!(good.call_count(), 2);
}

#[tokio::test]
async fn fallback_exhaustion_is_one_aggregated_failure() {
    let engine = Engine::new(vec![]);
    let bad = FailingProvider::new();
    engine.registry().register_provider(mock_spec("m1"), bad.clone());
    engine.registry().insert(spec(json!({
        "provider": "fallback",
        "name": "chain",
        "models": [{"model_name": "m1", "max_retry": 3}]
    })));

    let response = engine
        .create_completion(CompletionRequest::new("chain", vec![], vec![Message::user("go")]))
        .await
        .unwrap();

    assert!(!response.done);
    assert_eq!(bad.call_count(), 3);
    assert_eq!(response.errors().len(), 1);
    assert!(response.errors()[0].error.contains("exhausted"));
}

#[tokio::test]
async fn loopback_composes_constrained_models() {
    let engine = Engine::new(vec![]);
    engine
        .registry()
        .register_provider(mock_spec("base"), ScriptedProvider::new(&["The sky is blue."]));
    engine.registry().insert(spec(json!({
        "provider": "reqgate",
        "name": "checked-base",
        "provider_model": "base",
        "output_tags": ["gated"],
        "requirements": [{"type": "Contains", "value": ["blue"]}]
    })));

    // The outer call has no requirements of its own; the loopback target
    // enforces its configured ones in the inner session.
    let response = engine
        .create_completion(CompletionRequest::new(
            "checked-base",
            vec![],
            vec![Message::user("color?")],
        ))
        .await
        .unwrap();

    assert!(response.done);
    let message = response.choice().unwrap().message.as_ref().unwrap();
    assert_eq!(message.content, "The sky is blue.");
    assert!(message.tags.contains(&"gated".to_string()));
}

#[tokio::test]
async fn written_requirement_drives_a_revision() {
    let engine = Engine::new(vec![]);
    let provider = ScriptedProvider::new(&["too informal", "Formal enough."]);
    engine.registry().register_provider(mock_spec("M"), provider.clone());
    // First grading says no, second says yes.
    let grader = ScriptedProvider::new(&["no", "yes"]);
    engine
        .registry()
        .register_provider(mock_spec("grader"), grader.clone());

    let response = engine
        .create_completion(CompletionRequest::new(
            "M",
            vec![requirement(json!({
                "type": "Written",
                "name": "formality",
                "evaluation_model": "grader",
                "value": ["use a formal register"],
                "positive_examples": ["Dear colleagues,"],
                "negative_examples": ["hey folks"]
            }))],
            vec![Message::user("Write a greeting.")],
        ))
        .await
        .unwrap();

    assert!(response.done);
    assert_eq!(provider.call_count(), 2);
    assert_eq!(grader.call_count(), 2);

    let choice = response.choice().unwrap();
    assert_eq!(choice.prospects.len(), 2);

    // The failed grading is fully auditable: invocation and raw response.
    let EvalLogEntry::Check(check) = &choice.prospects[0].requirements_evaluation_log[0] else {
        panic!("expected check entry");
    };
    assert!(!check.passed);
    assert_eq!(check.details["eval_result"], json!(false));
    assert_eq!(check.details["evaluation"]["model_name"], "grader");
    assert!(check.details["response"]["message"]["content"]
        .as_str()
        .unwrap()
        .contains("no"));

    // The grader saw the candidate and the examples.
    let (grader_messages, _) = grader.call(0);
    assert_eq!(grader_messages.len(), 2);
    assert!(grader_messages[1].content.contains("too informal"));
    assert!(grader_messages[1].content.contains("use a formal register"));
}
