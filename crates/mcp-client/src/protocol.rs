//! JSON-RPC 2.0 framing and the MCP payloads we exchange over it.
//!
//! One message per line. Three verbs matter to us: `initialize`,
//! `tools/list`, and `tools/call`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use maestro_domain::error::CallErrorKind;
use maestro_domain::tool::{ToolDescriptor, ToolSchema};

/// The MCP protocol revision we speak.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Framing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A request (carries an id, expects exactly one response).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A notification (no id, fire-and-forget).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcNotification {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    pub fn into_result(self) -> Result<Value, RpcErrorObject> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    /// Map a JSON-RPC error code onto our per-call error kinds.
    pub fn kind(&self) -> CallErrorKind {
        match self.code {
            -32601 => CallErrorKind::UnknownTool,
            -32602 => CallErrorKind::InvalidParams,
            _ => CallErrorKind::ToolError,
        }
    }
}

impl std::fmt::Display for RpcErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// initialize
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the `initialize` request parameters.
pub fn initialize_params() -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "maestro",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// tools/list
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One tool as the server advertises it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolList {
    pub tools: Vec<ToolInfo>,
}

impl ToolInfo {
    /// Convert the wire form into the immutable descriptor the catalog holds.
    pub fn into_descriptor(self, server: &str) -> ToolDescriptor {
        ToolDescriptor {
            server: server.to_string(),
            name: self.name,
            description: self.description,
            schema: ToolSchema::from_input_schema(&self.input_schema),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// tools/call
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the `tools/call` request parameters.
pub fn call_params(tool: &str, arguments: Value) -> Value {
    serde_json::json!({ "name": tool, "arguments": arguments })
}

/// One content item of a `tools/call` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
}

/// The `tools/call` result payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallOutcome {
    pub content: Vec<CallContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl CallOutcome {
    /// Join all text content items.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The result as a JSON value.
    ///
    /// Servers answer with text items; when that text is itself valid JSON
    /// (a number from `add`, an object from a DB query) we keep the typed
    /// value so later tasks can consume it without re-parsing.
    pub fn into_value(self) -> Value {
        let text = self.text();
        match serde_json::from_str::<Value>(text.trim()) {
            Ok(value) => value,
            Err(_) => Value::String(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_shape() {
        let req = RpcRequest::new(7, "tools/list", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":7"));
        assert!(!json.contains("params"));
    }

    #[test]
    fn notification_has_no_id() {
        let json = serde_json::to_string(&RpcNotification::new("notifications/initialized")).unwrap();
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn response_into_result() {
        let ok: RpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":{"x":1}}"#).unwrap();
        assert_eq!(ok.into_result().unwrap()["x"], 1);

        let err: RpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32602,"message":"bad params"}}"#,
        )
        .unwrap();
        let e = err.into_result().unwrap_err();
        assert_eq!(e.kind(), CallErrorKind::InvalidParams);
    }

    #[test]
    fn error_code_kinds() {
        let unknown = RpcErrorObject { code: -32601, message: String::new(), data: None };
        assert_eq!(unknown.kind(), CallErrorKind::UnknownTool);
        let other = RpcErrorObject { code: -32000, message: String::new(), data: None };
        assert_eq!(other.kind(), CallErrorKind::ToolError);
    }

    #[test]
    fn tool_info_to_descriptor() {
        let raw = r#"{
            "name": "add",
            "description": "Add two numbers",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "a": { "type": "number" },
                    "b": { "type": "number" }
                },
                "required": ["a", "b"]
            }
        }"#;
        let info: ToolInfo = serde_json::from_str(raw).unwrap();
        let desc = info.into_descriptor("calculator");
        assert_eq!(desc.server, "calculator");
        assert_eq!(desc.name, "add");
        assert!(desc.schema.is_required("b"));
    }

    #[test]
    fn tool_info_defaults() {
        let info: ToolInfo = serde_json::from_str(r#"{ "name": "ping" }"#).unwrap();
        assert_eq!(info.description, "");
        assert_eq!(info.input_schema["type"], "object");
    }

    #[test]
    fn outcome_numeric_text_becomes_number() {
        let outcome = CallOutcome {
            content: vec![CallContent { content_type: "text".into(), text: "300".into() }],
            is_error: false,
        };
        assert_eq!(outcome.into_value(), serde_json::json!(300));
    }

    #[test]
    fn outcome_plain_text_stays_string() {
        let outcome = CallOutcome {
            content: vec![CallContent {
                content_type: "text".into(),
                text: "sunny in Tokyo".into(),
            }],
            is_error: false,
        };
        assert_eq!(outcome.into_value(), serde_json::json!("sunny in Tokyo"));
    }

    #[test]
    fn outcome_joins_multiple_text_items() {
        let outcome = CallOutcome {
            content: vec![
                CallContent { content_type: "text".into(), text: "line1".into() },
                CallContent { content_type: "image".into(), text: String::new() },
                CallContent { content_type: "text".into(), text: "line2".into() },
            ],
            is_error: false,
        };
        assert_eq!(outcome.text(), "line1\nline2");
    }

    #[test]
    fn call_params_shape() {
        let params = call_params("add", serde_json::json!({"a": 1}));
        assert_eq!(params["name"], "add");
        assert_eq!(params["arguments"]["a"], 1);
    }
}
