//! The task state machine records.
//!
//! A task is an intent to invoke one tool with specific arguments, tracked
//! from creation through a terminal state. The records here are passive;
//! the execution engine owns the loop and the state store owns persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CallError;

/// Reserved pseudo-tool: "ask the user". Never resolved through a server.
pub const CLARIFICATION_TOOL: &str = "CLARIFICATION";

/// Placeholder that substitutes the most recent completed result.
pub const PREVIOUS_RESULT_PLACEHOLDER: &str = "{{previous_result}}";

/// Prefix for natural-language dependency pointers resolved at execution time.
pub const DEPENDENCY_PREFIX: &str = "DEPENDENCY:";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    AwaitingUser,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::AwaitingUser => "awaiting_user",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Stable within a session.
    pub task_id: String,
    /// A tool name resolvable through the catalog, or [`CLARIFICATION_TOOL`].
    pub tool: String,
    /// Tool arguments. May contain placeholders until execution time.
    /// Never contains a `description` key.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Human-readable summary. Lives here, never inside `params`.
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CallError>,
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Earlier task ids whose results may be substituted into `params`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Task {
    pub fn new(
        task_id: impl Into<String>,
        tool: impl Into<String>,
        params: Map<String, Value>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            tool: tool.into(),
            params,
            description: description.into(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            depends_on: Vec::new(),
        }
    }

    pub fn is_clarification(&self) -> bool {
        self.tool == CLARIFICATION_TOOL
    }

    /// The question a clarification task asks the user.
    pub fn question(&self) -> Option<&str> {
        self.params.get("question").and_then(Value::as_str)
    }

    /// True if any string-valued param carries a placeholder token.
    pub fn has_placeholder(&self) -> bool {
        self.params.values().any(value_has_placeholder)
    }
}

fn value_has_placeholder(value: &Value) -> bool {
    match value {
        Value::String(s) => {
            s.contains(PREVIOUS_RESULT_PLACEHOLDER) || s.starts_with(DEPENDENCY_PREFIX)
        }
        Value::Array(items) => items.iter().any(value_has_placeholder),
        Value::Object(map) => map.values().any(value_has_placeholder),
        _ => false,
    }
}
