use serde::{Deserialize, Serialize};

/// Shared error type used across all Maestro crates.
///
/// These are the fatal-ish conditions: configuration problems, startup
/// failures, LLM transport failures. Per-call tool errors are not routed
/// through this enum; they are values, see [`CallError`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("connection: {0}")]
    Connection(String),

    #[error("handshake: {0}")]
    Handshake(String),

    #[error("LLM: {0}")]
    Llm(String),

    #[error("plan parse: {0}")]
    PlanParse(String),

    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-call error values
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What went wrong with a single tool call.
///
/// The execution engine drives its retry/repair policy off this kind, so
/// every failure path in the connection manager must map to exactly one of
/// these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallErrorKind {
    UnknownTool,
    InvalidParams,
    ToolError,
    Timeout,
    TransportClosed,
    DecodeError,
}

impl std::fmt::Display for CallErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UnknownTool => "unknown_tool",
            Self::InvalidParams => "invalid_params",
            Self::ToolError => "tool_error",
            Self::Timeout => "timeout",
            Self::TransportClosed => "transport_closed",
            Self::DecodeError => "decode_error",
        };
        f.write_str(s)
    }
}

/// A failed tool call: the kind drives policy, the message is for humans.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallError {
    pub kind: CallErrorKind,
    pub message: String,
}

impl CallError {
    pub fn new(kind: CallErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown_tool(tool: &str) -> Self {
        Self::new(CallErrorKind::UnknownTool, format!("no server exposes tool '{tool}'"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(CallErrorKind::InvalidParams, message)
    }

    pub fn tool_error(message: impl Into<String>) -> Self {
        Self::new(CallErrorKind::ToolError, message)
    }

    pub fn timeout(seconds: u64) -> Self {
        Self::new(CallErrorKind::Timeout, format!("no response within {seconds}s"))
    }

    pub fn transport_closed(server: &str) -> Self {
        Self::new(
            CallErrorKind::TransportClosed,
            format!("server '{server}' is no longer running"),
        )
    }

    /// Decode failures record only the length of the offending payload,
    /// never the bytes themselves.
    pub fn decode_error(raw_len: usize) -> Self {
        Self::new(
            CallErrorKind::DecodeError,
            format!("undecodable response ({raw_len} bytes)"),
        )
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
