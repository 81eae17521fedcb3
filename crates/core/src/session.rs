//! Session: the durable conversational context of a turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A conversation, optionally owned by a parent session when it was
/// created for a delegated sub-agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,

    /// Set for sub-agent task sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,

    pub title: String,

    /// Derived by the store from persisted messages
    #[serde(default)]
    pub message_count: u64,

    #[serde(default)]
    pub prompt_tokens: u64,

    #[serde(default)]
    pub completion_tokens: u64,

    /// History before this message has been compacted into it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_message_id: Option<String>,

    /// Accumulated cost in USD
    #[serde(default)]
    pub cost: f64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            parent_session_id: None,
            title: title.into(),
            message_count: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            summary_message_id: None,
            cost: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    /// A session created for a delegated tool call.
    pub fn task(
        tool_call_id: impl Into<String>,
        parent_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            parent_session_id: Some(parent_id.into()),
            ..Self::new(tool_call_id, title)
        }
    }

    pub fn is_task(&self) -> bool {
        self.parent_session_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_empty() {
        let s = Session::new("s1", "New Session");
        assert_eq!(s.cost, 0.0);
        assert_eq!(s.prompt_tokens, 0);
        assert!(!s.is_task());
    }

    #[test]
    fn task_session_links_parent() {
        let s = Session::task("call_1", "s1", "Coder task");
        assert_eq!(s.id, "call_1");
        assert_eq!(s.parent_session_id.as_deref(), Some("s1"));
        assert!(s.is_task());
    }
}
