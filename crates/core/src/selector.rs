//! Conversation selection — building a model-specific view of a chat.
//!
//! Each model configuration may carry `input_selection` rules describing
//! which messages that model wants to see: a role filter, a tag filter, and
//! an index/range/injection list. Rules apply in that fixed order, and
//! `select` never mutates its input.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Sentinel tag standing for "this message carries no tags".
pub const NO_TAGS: &str = "none";

/// Selection rules for building a model's input view of a conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionRules {
    /// Which roles survive (applied first).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<RoleFilter>,

    /// Which tags survive (applied second).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<TagFilter>,

    /// Index/range/injection entries over the filtered sequence (applied
    /// last). Absent or empty passes the filtered sequence through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<SelectionEntry>>,
}

/// A role filter: either an inclusion list or a role → keep map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoleFilter {
    /// Only the listed roles survive. An empty list filters nothing.
    List(Vec<String>),
    /// If every value is `true` the map is an inclusion set (unlisted roles
    /// are dropped); otherwise a message survives unless its role is
    /// explicitly mapped to `false`.
    Map(BTreeMap<String, bool>),
}

/// A tag filter: either an inclusion list or a tag → keep map.
///
/// The literal tag `"none"` matches messages that carry no tags at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagFilter {
    /// A message survives if any of its tags is listed. Empty filters
    /// nothing.
    List(Vec<String>),
    /// Mode depends on the value distribution: all `true` → inclusion set;
    /// some `true` → a message survives iff none of its tags maps to
    /// `false` (first `false` excludes) and at least one maps to `true`;
    /// no `true` → pure exclusion list.
    Map(BTreeMap<String, bool>),
}

/// One entry in the index/range/injection selection list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectionEntry {
    /// A single index into the filtered sequence. Negative indices count
    /// from the end; out-of-range indices contribute nothing.
    Index(i64),
    /// An inclusive `(start, end)` range, iterating forward when
    /// `start <= end` and backward otherwise. Each visited index resolves
    /// through the negative-indexing rule; out-of-range positions are
    /// silently skipped.
    Range(i64, i64),
    /// A literal message injected verbatim.
    Literal(Message),
}

/// Apply selection rules to a conversation, producing a new sequence.
///
/// Pure: identical inputs always produce identical output.
pub fn select(conversation: &[Message], rules: &SelectionRules) -> Vec<Message> {
    let filtered: Vec<&Message> = conversation
        .iter()
        .filter(|m| role_survives(&m.role, rules.roles.as_ref()))
        .filter(|m| tags_survive(&m.tags, rules.tags.as_ref()))
        .collect();

    match rules.messages.as_deref() {
        None | Some([]) => filtered.into_iter().cloned().collect(),
        Some(entries) => apply_entries(&filtered, entries),
    }
}

fn role_survives(role: &str, filter: Option<&RoleFilter>) -> bool {
    match filter {
        None => true,
        Some(RoleFilter::List(roles)) => roles.is_empty() || roles.iter().any(|r| r == role),
        Some(RoleFilter::Map(map)) => {
            if map.is_empty() {
                return true;
            }
            if map.values().all(|&keep| keep) {
                // Pure inclusion set: only listed roles survive.
                map.contains_key(role)
            } else {
                // Mixed map: drop only roles explicitly marked false.
                map.get(role) != Some(&false)
            }
        }
    }
}

fn tags_survive(tags: &[String], filter: Option<&TagFilter>) -> bool {
    let Some(filter) = filter else { return true };

    // Untagged messages carry the sentinel for filtering purposes.
    let own: Vec<&str> = if tags.is_empty() {
        vec![NO_TAGS]
    } else {
        tags.iter().map(String::as_str).collect()
    };

    match filter {
        TagFilter::List(listed) => {
            listed.is_empty() || own.iter().any(|t| listed.iter().any(|l| l == t))
        }
        TagFilter::Map(map) => {
            if map.is_empty() {
                return true;
            }
            let includes = map.values().filter(|&&keep| keep).count();
            if includes == map.len() {
                // Every listed tag marked include: survives if any of its
                // tags is listed.
                own.iter().any(|t| map.contains_key(*t))
            } else if includes > 0 {
                // Mixed: the first explicitly excluded tag kills the
                // message; otherwise at least one included tag is required.
                let mut any_included = false;
                for tag in &own {
                    match map.get(*tag) {
                        Some(false) => return false,
                        Some(true) => any_included = true,
                        None => {}
                    }
                }
                any_included
            } else {
                // Pure exclusion list: survives unless explicitly excluded.
                !own.iter().any(|t| map.get(*t) == Some(&false))
            }
        }
    }
}

/// Resolve an index through the negative-indexing rule against `len`.
/// Returns `None` when the resolved position falls outside `[0, len)`.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let resolved = if index < 0 {
        index + len as i64
    } else {
        index
    };
    (0..len as i64)
        .contains(&resolved)
        .then_some(resolved as usize)
}

fn apply_entries(filtered: &[&Message], entries: &[SelectionEntry]) -> Vec<Message> {
    let mut out = Vec::new();
    for entry in entries {
        match entry {
            SelectionEntry::Index(i) => {
                if let Some(pos) = resolve_index(*i, filtered.len()) {
                    out.push(filtered[pos].clone());
                }
            }
            SelectionEntry::Range(start, end) => {
                let indices: Vec<i64> = if start <= end {
                    (*start..=*end).collect()
                } else {
                    (*end..=*start).rev().collect()
                };
                for i in indices {
                    if let Some(pos) = resolve_index(i, filtered.len()) {
                        out.push(filtered[pos].clone());
                    }
                }
            }
            SelectionEntry::Literal(msg) => out.push(msg.clone()),
        }
    }
    out
}
