//! History and prompt types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header of the system entry that carries the compacted summary.
pub const SUMMARY_PREFIX: &str = "[Summary of earlier conversation]";

/// Author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Injected context such as the compacted summary
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// One message of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    /// Model that produced an assistant turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            model: None,
            timestamp,
        }
    }

    pub fn assistant(
        text: impl Into<String>,
        model: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            model: Some(model.into()),
            timestamp,
        }
    }
}

/// Estimate token count from text (approximate: chars / 4).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Summary standing in for every turn evicted from the window so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactedSummary {
    pub text: String,
    /// Timestamp of the oldest summarized turn.
    pub covers_from: DateTime<Utc>,
    /// Timestamp of the newest summarized turn.
    pub covers_to: DateTime<Utc>,
    #[serde(default)]
    pub turns_compacted: usize,
    #[serde(default)]
    pub tokens_saved: usize,
}

/// A user's conversation state.
///
/// `turns` never holds more than the window size after an append. Turns that
/// left the window but could not be summarized yet wait in `pending`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(default)]
    pub turns: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<Turn>,
    #[serde(default)]
    pub summary: Option<CompactedSummary>,
}

impl HistoryRecord {
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty() && self.pending.is_empty() && self.summary.is_none()
    }
}

/// One entry of the material sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptEntry {
    pub role: Role,
    pub text: String,
}

/// Ordered context for the next model call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PromptMaterial {
    pub entries: Vec<PromptEntry>,
}

impl PromptMaterial {
    pub fn push(&mut self, role: Role, text: impl Into<String>) {
        self.entries.push(PromptEntry {
            role,
            text: text.into(),
        });
    }

    /// Append the new user message after the history.
    pub fn with_user_message(mut self, text: impl Into<String>) -> Self {
        self.push(Role::User, text);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What `/context`-style commands show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextStats {
    pub retained_turns: usize,
    pub pending_turns: usize,
    pub window: usize,
    pub turns_compacted: usize,
    pub tokens_saved: usize,
    pub has_summary: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("привет"), 2);
    }

    #[test]
    fn test_role_roundtrip() {
        for role in [Role::User, Role::Assistant, Role::System] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("tool"), None);
    }

    #[test]
    fn test_history_document_without_pending() {
        let json = r#"{"turns": [], "summary": null}"#;
        let history: HistoryRecord = serde_json::from_str(json).unwrap();
        assert!(history.is_empty());
        assert!(!serde_json::to_string(&history).unwrap().contains("pending"));
    }
}
