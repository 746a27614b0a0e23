//! Literal-substring requirement.

use serde::{Deserialize, Serialize};

use crate::message::Message;

use super::{Requirement, RequirementResult};

/// Passes iff the final message's content contains at least one of the
/// configured literal substrings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainsRequirement {
    /// Accepted substrings — any one satisfies the requirement.
    pub value: Vec<String>,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_model: Option<String>,
}

impl ContainsRequirement {
    pub(super) fn evaluate(&self, conversation: &[Message], parent: &Requirement) -> RequirementResult {
        let passed = conversation
            .last()
            .is_some_and(|m| self.value.iter().any(|v| m.content.contains(v)));
        RequirementResult::record(parent, passed, serde_json::Map::new())
    }

    pub(super) fn prompt(&self) -> String {
        let values = self.value.join("\", \"");
        format!("Your response must contain at least one of the following: \"{values}\".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(values: &[&str]) -> Requirement {
        Requirement::Contains(ContainsRequirement {
            value: values.iter().map(|s| s.to_string()).collect(),
            name: "contains".into(),
            revision_model: None,
        })
    }

    fn eval(req: &Requirement, conversation: &[Message]) -> RequirementResult {
        let Requirement::Contains(inner) = req else {
            unreachable!()
        };
        inner.evaluate(conversation, req)
    }

    #[test]
    fn passes_when_any_value_present() {
        let conversation = vec![Message::user("color?"), Message::assistant("The sky is blue.")];
        assert!(eval(&req(&["green", "blue"]), &conversation).passed);
    }

    #[test]
    fn fails_when_no_value_present() {
        let conversation = vec![Message::assistant("The sky is gray.")];
        let result = eval(&req(&["blue"]), &conversation);
        assert!(!result.passed);
        assert_eq!(result.log.requirement_type, "Contains");
        assert_eq!(result.log.requirement_name, "contains");
    }

    #[test]
    fn only_the_last_message_counts() {
        let conversation = vec![Message::assistant("blue"), Message::assistant("gray")];
        assert!(!eval(&req(&["blue"]), &conversation).passed);
    }

    #[test]
    fn empty_conversation_fails() {
        assert!(!eval(&req(&["blue"]), &[]).passed);
    }

    #[test]
    fn prompt_lists_values() {
        let Requirement::Contains(inner) = req(&["blue", "azure"]) else {
            unreachable!()
        };
        assert_eq!(
            inner.prompt(),
            "Your response must contain at least one of the following: \"blue\", \"azure\"."
        );
    }
}
