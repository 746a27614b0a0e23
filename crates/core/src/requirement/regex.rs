//! Pattern-matching requirement.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::message::Message;

use super::{Requirement, RequirementResult};

/// Passes iff the final message matches every positive pattern and none of
/// the negative patterns.
///
/// A malformed pattern is an evaluation *failure* carrying the pattern and
/// compile error in the log — the draft gets revised, the session does not
/// crash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegexRequirement {
    /// Patterns the content must match.
    #[serde(default)]
    pub positive_regexes: Vec<String>,

    /// Patterns the content must not match.
    #[serde(default)]
    pub negative_regexes: Vec<String>,

    /// Extra guidance appended to the correction prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_prompt: Option<String>,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_model: Option<String>,
}

impl RegexRequirement {
    pub(super) fn evaluate(&self, conversation: &[Message], parent: &Requirement) -> RequirementResult {
        let content = conversation.last().map(|m| m.content.as_str()).unwrap_or("");

        for pattern in &self.positive_regexes {
            match regex::Regex::new(pattern) {
                Ok(re) => {
                    if !re.is_match(content) {
                        let mut details = serde_json::Map::new();
                        details.insert("pattern_type".into(), json!("positive"));
                        details.insert("pattern".into(), json!(pattern));
                        return RequirementResult::record(parent, false, details);
                    }
                }
                Err(e) => {
                    let mut details = serde_json::Map::new();
                    details.insert(
                        "error".into(),
                        json!(format!("Invalid positive regex '{pattern}': {e}")),
                    );
                    return RequirementResult::record(parent, false, details);
                }
            }
        }

        for pattern in &self.negative_regexes {
            match regex::Regex::new(pattern) {
                Ok(re) => {
                    if re.is_match(content) {
                        let mut details = serde_json::Map::new();
                        details.insert("pattern_type".into(), json!("negative"));
                        details.insert("pattern".into(), json!(pattern));
                        return RequirementResult::record(parent, false, details);
                    }
                }
                Err(e) => {
                    let mut details = serde_json::Map::new();
                    details.insert(
                        "error".into(),
                        json!(format!("Invalid negative regex '{pattern}': {e}")),
                    );
                    return RequirementResult::record(parent, false, details);
                }
            }
        }

        RequirementResult::record(parent, true, serde_json::Map::new())
    }

    pub(super) fn prompt(&self) -> String {
        let mut parts = Vec::new();
        if !self.positive_regexes.is_empty() {
            parts.push(format!(
                "Your response must match these regex patterns:\n```txt\n{}\n```",
                self.positive_regexes.join("\n")
            ));
        }
        if !self.negative_regexes.is_empty() {
            parts.push(format!(
                "Your response must not match these regex patterns:\n```txt\n{}\n```",
                self.negative_regexes.join("\n")
            ));
        }
        if let Some(extra) = &self.additional_prompt {
            parts.push(extra.clone());
        }
        parts.join("\n")
    }
}
