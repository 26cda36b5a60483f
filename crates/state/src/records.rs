//! On-disk record shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Closed,
}

/// The `session.json` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub status: SessionStatus,
    /// User-declared facts ("user_name", ...) stashed for prompt context.
    #[serde(default)]
    pub memory: Map<String, Value>,
    /// Requests processed in this session.
    #[serde(default)]
    pub requests: u64,
    /// Tasks that reached `completed`.
    #[serde(default)]
    pub tasks_completed: u64,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            created_at: now,
            last_activity: now,
            status: SessionStatus::Active,
            memory: Map::new(),
            requests: 0,
            tasks_completed: 0,
        }
    }

    /// Mint a fresh timestamp-suffixed session id.
    pub fn fresh_id() -> String {
        format!("session_{}", Utc::now().format("%Y%m%d_%H%M%S"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One line of `conversation.txt` (newline-delimited JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// `user`, `assistant`, or `system`.
    pub role: String,
    pub content: String,
    /// Monotonically increasing within a session.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    /// Set on entries produced by log compaction.
    #[serde(default)]
    pub summary: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_id_is_timestamp_suffixed() {
        let id = SessionState::fresh_id();
        assert!(id.starts_with("session_"));
        assert_eq!(id.len(), "session_20260801_120000".len());
    }

    #[test]
    fn session_roundtrip() {
        let mut s = SessionState::new("session_test");
        s.memory.insert("user_name".into(), serde_json::json!("Satoshi"));
        s.requests = 3;
        let json = serde_json::to_string(&s).unwrap();
        let back: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_id, "session_test");
        assert_eq!(back.status, SessionStatus::Active);
        assert_eq!(back.memory["user_name"], "Satoshi");
        assert_eq!(back.requests, 3);
    }

    #[test]
    fn entry_summary_defaults_false() {
        let raw = r#"{"role":"user","content":"hi","seq":1,"timestamp":"2026-01-01T00:00:00Z"}"#;
        let entry: ConversationEntry = serde_json::from_str(raw).unwrap();
        assert!(!entry.summary);
    }
}
