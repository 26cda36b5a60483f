//! Tool descriptors.
//!
//! One descriptor per discovered tool, populated once at handshake from the
//! server's `tools/list` answer and immutable afterwards.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single declared parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParamSpec {
    /// JSON-Schema type name (`"number"`, `"string"`, `"object"`, ...).
    pub kind: String,
    #[serde(default)]
    pub description: String,
}

/// The input schema of one tool: declared parameters plus which are required.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ToolSchema {
    /// Parameter name → spec, ordered for deterministic prompt rendering.
    pub properties: BTreeMap<String, ParamSpec>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl ToolSchema {
    /// Parse the JSON-Schema subset MCP servers return as `inputSchema`
    /// (`type: object`, `properties`, `required`).
    pub fn from_input_schema(schema: &Value) -> Self {
        let mut properties = BTreeMap::new();
        if let Some(props) = schema.get("properties").and_then(Value::as_object) {
            for (name, spec) in props {
                properties.insert(
                    name.clone(),
                    ParamSpec {
                        kind: spec
                            .get("type")
                            .and_then(Value::as_str)
                            .unwrap_or("any")
                            .to_string(),
                        description: spec
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    },
                );
            }
        }
        let required = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self { properties, required }
    }

    pub fn declares(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }

    pub fn param_type(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(|p| p.kind.as_str())
    }

    /// Required parameters absent from `params`.
    pub fn missing_required<'a>(
        &'a self,
        params: &serde_json::Map<String, Value>,
    ) -> Vec<&'a str> {
        self.required
            .iter()
            .filter(|name| !params.contains_key(name.as_str()))
            .map(String::as_str)
            .collect()
    }
}

/// A discovered tool and the server that owns it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub server: String,
    pub name: String,
    pub description: String,
    pub schema: ToolSchema,
}

impl ToolDescriptor {
    /// Render as `server.tool(param: type[, required]) - description`,
    /// the shape the planner prompt uses.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .schema
            .properties
            .iter()
            .map(|(name, spec)| {
                if self.schema.is_required(name) {
                    format!("{name}: {}, required", spec.kind)
                } else {
                    format!("{name}: {}", spec.kind)
                }
            })
            .collect();
        format!(
            "{}.{}({}) - {}",
            self.server,
            self.name,
            params.join("; "),
            self.description
        )
    }
}
