//! Model-graded requirement.
//!
//! Judgment is delegated to a grading model: the candidate text, one
//! randomly chosen phrasing of the requirement, a token-budgeted subset of
//! positive/negative examples, and optional surrounding conversation
//! context are rendered into a yes/no classification prompt. Any failure of
//! the grading call is a *fail* result with the error recorded in the log —
//! never a silent pass.

use rand::seq::{IndexedRandom, SliceRandom};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::Result;
use crate::message::Message;
use crate::provider::{ModelHost, Params};
use crate::selector::select;

use super::{Requirement, RequirementResult};

const GRADER_SYSTEM_MSG: &str = "Determine if the given text meets the specified \
written requirement. Answer with only 'yes' or 'no'.";

/// Delegates pass/fail judgment on writing instructions to a grading model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrittenRequirement {
    /// The model that grades candidates.
    pub evaluation_model: String,

    /// Phrasings of the requirement; one is chosen uniformly at random per
    /// evaluation so the grader doesn't overfit to a single wording.
    pub value: Vec<String>,

    /// Example texts that meet the requirement.
    #[serde(default)]
    pub positive_examples: Vec<String>,

    /// Example texts that do not meet the requirement.
    #[serde(default)]
    pub negative_examples: Vec<String>,

    /// Token budget for the rendered grader prompt.
    #[serde(default = "default_token_limit")]
    pub token_limit: u32,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_model: Option<String>,
}

fn default_token_limit() -> u32 {
    1024
}

impl WrittenRequirement {
    pub(super) async fn evaluate(
        &self,
        conversation: &[Message],
        parent: &Requirement,
        host: &dyn ModelHost,
    ) -> Result<RequirementResult> {
        let Some(candidate) = conversation.last().map(|m| m.content.clone()) else {
            return Ok(self.fail(parent, "no candidate message to evaluate"));
        };
        let Some(phrasing) = self.value.choose(&mut rand::rng()).cloned() else {
            return Ok(self.fail(parent, "no requirement phrasings configured"));
        };

        // Surrounding context, selected through the grading model's own
        // input-selection rules (candidate excluded — it is rendered
        // separately as the text under evaluation).
        let history = &conversation[..conversation.len() - 1];
        let context = match host.input_selection(&self.evaluation_model) {
            Ok(Some(rules)) => select(history, &rules),
            Ok(None) => Vec::new(),
            Err(e) => return Ok(self.fail(parent, e)),
        };

        let render = |pos: &[&str], neg: &[&str]| {
            let (system, user) = render_grader_prompt(&phrasing, pos, neg, &context, &candidate);
            format!("{system}{user}")
        };

        let budgeted = budget_examples(
            &self.positive_examples,
            &self.negative_examples,
            self.token_limit,
            &mut rand::rng(),
            &render,
            |text| host.estimate_tokens(&self.evaluation_model, text),
        );
        let (positives, negatives) = match budgeted {
            Ok(sets) => sets,
            Err(e) => return Ok(self.fail(parent, e)),
        };

        let (system, user) =
            render_grader_prompt(&phrasing, &positives, &negatives, &context, &candidate);
        let eval_messages = vec![Message::system(system), Message::user(user)];

        let mut params = Params::new();
        params.insert("max_tokens".into(), json!(1));
        params.insert("temperature".into(), json!(0.0));

        let evaluation = json!({
            "model_name": self.evaluation_model,
            "messages": eval_messages.clone(),
            "params": params.clone(),
        });

        debug!(
            requirement = %self.name,
            grader = %self.evaluation_model,
            positives = positives.len(),
            negatives = negatives.len(),
            "Dispatching written-requirement grading call"
        );

        match host
            .complete_with_model(&self.evaluation_model, &eval_messages, params)
            .await
        {
            Ok(draft) => {
                let answer = draft.message.content.trim().to_lowercase();
                let passed = answer.contains("yes") && !answer.contains("no");

                let mut details = serde_json::Map::new();
                details.insert("evaluation".into(), evaluation);
                details.insert("eval_result".into(), json!(passed));
                details.insert("response".into(), serde_json::to_value(&draft)?);
                Ok(RequirementResult::record(parent, passed, details))
            }
            Err(e) => Ok(self.fail(parent, e)),
        }
    }

    fn fail(&self, parent: &Requirement, error: impl std::fmt::Display) -> RequirementResult {
        let mut details = serde_json::Map::new();
        details.insert(
            "error".into(),
            json!(format!(
                "Error evaluating written requirement '{}': {error}",
                self.name
            )),
        );
        RequirementResult::record(parent, false, details)
    }

    pub(super) fn prompt(&self) -> String {
        format!(
            "Your response should follow these written requirements: {}",
            self.value.join("; ")
        )
    }
}

/// Render the grader prompt as `(system, user)` messages.
fn render_grader_prompt(
    phrasing: &str,
    positives: &[&str],
    negatives: &[&str],
    context: &[Message],
    candidate: &str,
) -> (String, String) {
    let mut user = format!("Written requirement: {phrasing}");
    if !positives.is_empty() {
        user.push_str("\n\nExamples that meet the requirement:\n");
        user.push_str(&positives.join("\n\n"));
    }
    if !negatives.is_empty() {
        user.push_str("\n\nExamples that do NOT meet the requirement:\n");
        user.push_str(&negatives.join("\n\n"));
    }
    if !context.is_empty() {
        user.push_str("\n\nConversation context:\n");
        for msg in context {
            user.push_str(&format!("{}: {}\n", msg.role, msg.content));
        }
    }
    user.push_str(&format!(
        "\n\nText to evaluate:\n```txt\n{candidate}\n```\nDoes this text meet the requirement?"
    ));
    (GRADER_SYSTEM_MSG.to_string(), user)
}

/// Greedily pick examples under a token budget.
///
/// Pools both polarities, shuffles once, then accepts each example in turn
/// iff the fully re-rendered prompt still fits `token_limit`. The first
/// overflow stops inclusion entirely — later (possibly smaller) examples
/// are not considered.
fn budget_examples<'a>(
    positives: &'a [String],
    negatives: &'a [String],
    token_limit: u32,
    rng: &mut impl rand::Rng,
    render: &impl Fn(&[&'a str], &[&'a str]) -> String,
    estimate: impl Fn(&str) -> Result<u32>,
) -> Result<(Vec<&'a str>, Vec<&'a str>)> {
    let mut pool: Vec<(bool, &str)> = positives
        .iter()
        .map(|e| (true, e.as_str()))
        .chain(negatives.iter().map(|e| (false, e.as_str())))
        .collect();
    pool.shuffle(rng);

    let mut accepted_pos: Vec<&str> = Vec::new();
    let mut accepted_neg: Vec<&str> = Vec::new();

    for (is_positive, example) in pool {
        if is_positive {
            accepted_pos.push(example);
        } else {
            accepted_neg.push(example);
        }
        let rendered = render(&accepted_pos, &accepted_neg);
        if estimate(&rendered)? > token_limit {
            if is_positive {
                accepted_pos.pop();
            } else {
                accepted_neg.pop();
            }
            break;
        }
    }

    Ok((accepted_pos, accepted_neg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;

    fn chars_estimate(text: &str) -> Result<u32> {
        Ok((text.len() as f64 / 4.3) as u32)
    }

    #[test]
    fn prompt_joins_phrasings() {
        let req = WrittenRequirement {
            evaluation_model: "grader".into(),
            value: vec!["be formal".into(), "avoid slang".into()],
            positive_examples: vec![],
            negative_examples: vec![],
            token_limit: 1024,
            name: String::new(),
            revision_model: None,
        };
        assert_eq!(
            req.prompt(),
            "Your response should follow these written requirements: be formal; avoid slang"
        );
    }

    #[test]
    fn grader_prompt_renders_all_sections() {
        let context = vec![Message::user("hello")];
        let (system, user) = render_grader_prompt(
            "be formal",
            &["Dear sir"],
            &["yo"],
            &context,
            "Good day.",
        );
        assert!(system.contains("'yes' or 'no'"));
        assert!(user.starts_with("Written requirement: be formal"));
        assert!(user.contains("Examples that meet the requirement:\nDear sir"));
        assert!(user.contains("Examples that do NOT meet the requirement:\nyo"));
        assert!(user.contains("Conversation context:\nuser: hello"));
        assert!(user.contains("```txt\nGood day.\n```"));
        assert!(user.ends_with("Does this text meet the requirement?"));
    }

    #[test]
    fn zero_budget_accepts_no_examples() {
        let positives = vec!["a long positive example".to_string()];
        let negatives = vec!["a long negative example".to_string()];
        let render = |p: &[&str], n: &[&str]| {
            let (s, u) = render_grader_prompt("req", p, n, &[], "candidate");
            format!("{s}{u}")
        };
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let (pos, neg) =
            budget_examples(&positives, &negatives, 0, &mut rng, &render, chars_estimate)
                .unwrap();
        assert!(pos.is_empty());
        assert!(neg.is_empty());
    }

    #[test]
    fn generous_budget_accepts_everything() {
        let positives: Vec<String> = (0..3).map(|i| format!("good example {i}")).collect();
        let negatives: Vec<String> = (0..3).map(|i| format!("bad example {i}")).collect();
        let render = |p: &[&str], n: &[&str]| {
            let (s, u) = render_grader_prompt("req", p, n, &[], "candidate");
            format!("{s}{u}")
        };
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let (pos, neg) =
            budget_examples(&positives, &negatives, 100_000, &mut rng, &render, chars_estimate)
                .unwrap();
        assert_eq!(pos.len(), 3);
        assert_eq!(neg.len(), 3);
    }

    proptest! {
        /// The rendered prompt never exceeds the budget as long as the base
        /// prompt (no examples) fits — regardless of shuffle seed.
        #[test]
        fn budgeting_respects_the_token_limit(
            positives in proptest::collection::vec("[a-z ]{1,60}", 0..8),
            negatives in proptest::collection::vec("[a-z ]{1,60}", 0..8),
            seed in any::<u64>(),
            budget_slack in 0u32..200,
        ) {
            let render = |p: &[&str], n: &[&str]| {
                let (s, u) = render_grader_prompt("req", p, n, &[], "candidate");
                format!("{s}{u}")
            };
            let base = chars_estimate(&render(&[], &[])).unwrap();
            let limit = base + budget_slack;
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            let (pos, neg) = budget_examples(
                &positives, &negatives, limit, &mut rng, &render, chars_estimate,
            ).unwrap();

            // Budget-respecting.
            let rendered = render(&pos, &neg);
            prop_assert!(chars_estimate(&rendered).unwrap() <= limit);

            // Subset-of: every accepted example came from its pool.
            prop_assert!(pos.iter().all(|e| positives.iter().any(|p| p == e)));
            prop_assert!(neg.iter().all(|e| negatives.iter().any(|n| n == e)));
        }
    }
}
