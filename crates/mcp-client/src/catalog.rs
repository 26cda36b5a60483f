//! The tool catalog: one lookup table across every connected server.
//!
//! Populated once during handshake and read-only afterwards. Feeds the
//! planner prompt and validates parameters locally so obviously bad calls
//! never cost a server round-trip.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use maestro_domain::error::CallError;
use maestro_domain::tool::ToolDescriptor;

#[derive(Debug, Default)]
pub struct ToolCatalog {
    /// tool name → descriptor. BTreeMap keeps prompt rendering deterministic.
    tools: BTreeMap<String, ToolDescriptor>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one server's discovered tools.
    ///
    /// On a name collision the first-registered server wins. Registration
    /// order follows configuration order, so the outcome is deterministic.
    pub fn register(&mut self, descriptors: Vec<ToolDescriptor>) {
        for desc in descriptors {
            if let Some(existing) = self.tools.get(&desc.name) {
                tracing::warn!(
                    tool = %desc.name,
                    kept = %existing.server,
                    ignored = %desc.server,
                    "duplicate tool name, keeping first registration"
                );
                continue;
            }
            self.tools.insert(desc.name.clone(), desc);
        }
    }

    pub fn resolve(&self, tool: &str) -> Option<&ToolDescriptor> {
        self.tools.get(tool)
    }

    pub fn server_for(&self, tool: &str) -> Option<&str> {
        self.tools.get(tool).map(|d| d.server.as_str())
    }

    pub fn contains(&self, tool: &str) -> bool {
        self.tools.contains_key(tool)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// All descriptors in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values()
    }

    /// Check `params` against the declared schema.
    ///
    /// Unknown keys are dropped with a warning; a missing required key is an
    /// `invalid_params` error without any server round-trip. Placeholder
    /// values pass through untouched; they are resolved later.
    pub fn validate_params(
        &self,
        tool: &str,
        params: Map<String, Value>,
    ) -> Result<Map<String, Value>, CallError> {
        let desc = self
            .resolve(tool)
            .ok_or_else(|| CallError::unknown_tool(tool))?;

        let mut filtered = Map::new();
        for (key, value) in params {
            if desc.schema.declares(&key) {
                filtered.insert(key, value);
            } else {
                tracing::warn!(tool, param = %key, "dropping undeclared parameter");
            }
        }

        let missing = desc.schema.missing_required(&filtered);
        if !missing.is_empty() {
            return Err(CallError::invalid_params(format!(
                "missing required parameter(s): {}",
                missing.join(", ")
            )));
        }
        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_domain::tool::ToolSchema;

    fn descriptor(server: &str, name: &str) -> ToolDescriptor {
        ToolDescriptor {
            server: server.into(),
            name: name.into(),
            description: format!("{name} tool"),
            schema: ToolSchema::from_input_schema(&serde_json::json!({
                "type": "object",
                "properties": {
                    "a": { "type": "number" },
                    "b": { "type": "number" }
                },
                "required": ["a", "b"]
            })),
        }
    }

    #[test]
    fn first_registration_wins() {
        let mut catalog = ToolCatalog::new();
        catalog.register(vec![descriptor("calculator", "add")]);
        catalog.register(vec![descriptor("math2", "add")]);
        assert_eq!(catalog.server_for("add"), Some("calculator"));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn resolve_unknown_tool() {
        let catalog = ToolCatalog::new();
        assert!(catalog.resolve("nope").is_none());
        let err = catalog.validate_params("nope", Map::new()).unwrap_err();
        assert_eq!(err.kind, maestro_domain::error::CallErrorKind::UnknownTool);
    }

    #[test]
    fn unknown_keys_dropped() {
        let mut catalog = ToolCatalog::new();
        catalog.register(vec![descriptor("calculator", "add")]);
        let mut params = Map::new();
        params.insert("a".into(), serde_json::json!(1));
        params.insert("b".into(), serde_json::json!(2));
        params.insert("description".into(), serde_json::json!("leak"));
        let filtered = catalog.validate_params("add", params).unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(!filtered.contains_key("description"));
    }

    #[test]
    fn missing_required_is_invalid_params() {
        let mut catalog = ToolCatalog::new();
        catalog.register(vec![descriptor("calculator", "add")]);
        let mut params = Map::new();
        params.insert("a".into(), serde_json::json!(1));
        let err = catalog.validate_params("add", params).unwrap_err();
        assert_eq!(err.kind, maestro_domain::error::CallErrorKind::InvalidParams);
        assert!(err.message.contains("b"));
    }

    #[test]
    fn iteration_is_name_ordered() {
        let mut catalog = ToolCatalog::new();
        catalog.register(vec![
            descriptor("s", "multiply"),
            descriptor("s", "add"),
            descriptor("s", "divide"),
        ]);
        let names: Vec<&str> = catalog.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["add", "divide", "multiply"]);
    }
}
