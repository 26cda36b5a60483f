//! Parsing LLM output into plans.
//!
//! Models wrap JSON in markdown fences, prepend prose, and occasionally
//! emit a bare task where a plan was asked for. The parsers here are
//! tolerant about packaging and strict about shape: a plan must be a JSON
//! object with a `tasks` array.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use maestro_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One task as the planner wrote it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedTask {
    pub tool: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub description: String,
    /// Explicit dependency list; when absent it is derived from placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
}

/// The planner's whole answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub tasks: Vec<PlannedTask>,
    /// Direct answer when no tool is needed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

/// The repair prompt's answer: a replacement task, or give up.
#[derive(Debug, Clone, PartialEq)]
pub enum RepairOutcome {
    Replacement(PlannedTask),
    Abort { reason: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parsers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn parse_plan(raw: &str) -> Result<Plan> {
    let json = extract_json(raw)
        .ok_or_else(|| Error::PlanParse("no JSON object in planner output".into()))?;
    let value: Value = serde_json::from_str(&json)
        .map_err(|e| Error::PlanParse(format!("invalid JSON: {e}")))?;

    if !value.is_object() {
        return Err(Error::PlanParse("planner output is not a JSON object".into()));
    }
    if value.get("tasks").map(Value::is_array) != Some(true) {
        return Err(Error::PlanParse("planner output has no `tasks` array".into()));
    }

    serde_json::from_value::<Plan>(value)
        .map_err(|e| Error::PlanParse(format!("malformed plan: {e}")))
}

pub fn parse_repair(raw: &str) -> Result<RepairOutcome> {
    let json = extract_json(raw)
        .ok_or_else(|| Error::PlanParse("no JSON object in repair output".into()))?;
    let value: Value = serde_json::from_str(&json)
        .map_err(|e| Error::PlanParse(format!("invalid JSON: {e}")))?;

    if value.get("abort").and_then(Value::as_bool) == Some(true) {
        let reason = value
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("no reason given")
            .to_string();
        return Ok(RepairOutcome::Abort { reason });
    }

    // Accept either a bare task or a one-task plan wrapper.
    let task_value = if value.get("tool").is_some() {
        value
    } else if let Some(first) = value
        .get("tasks")
        .and_then(Value::as_array)
        .and_then(|tasks| tasks.first())
    {
        first.clone()
    } else {
        return Err(Error::PlanParse("repair output is neither a task nor an abort".into()));
    };

    serde_json::from_value::<PlannedTask>(task_value)
        .map(RepairOutcome::Replacement)
        .map_err(|e| Error::PlanParse(format!("malformed replacement task: {e}")))
}

/// Parse the dependency-resolution answer: `{"value": ...}` or a bare JSON
/// scalar.
pub fn parse_dependency_value(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    if let Some(json) = extract_json(trimmed) {
        let value: Value = serde_json::from_str(&json)
            .map_err(|e| Error::PlanParse(format!("invalid JSON: {e}")))?;
        if let Some(inner) = value.get("value") {
            return Ok(inner.clone());
        }
        return Ok(value);
    }
    // A bare scalar: number, quoted string, or plain text.
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => Ok(value),
        Err(_) => Ok(Value::String(trimmed.to_string())),
    }
}

/// Pull the JSON document out of model output.
///
/// Handles markdown fences and surrounding prose; falls back to the
/// first-`{`-to-last-`}` span.
fn extract_json(raw: &str) -> Option<String> {
    let mut text = raw.trim();

    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            text = after[..end].trim();
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end >= start).then(|| text[start..=end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_plan() {
        let plan = parse_plan(
            r#"{"tasks": [{"tool": "add", "params": {"a": 100, "b": 200}, "description": "sum"}]}"#,
        )
        .unwrap();
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].tool, "add");
        assert_eq!(plan.tasks[0].params["a"], 100);
        assert!(plan.response.is_none());
    }

    #[test]
    fn parses_fenced_plan() {
        let raw = "Here is the plan:\n```json\n{\"tasks\": []}\n```\nDone.";
        let plan = parse_plan(raw).unwrap();
        assert!(plan.tasks.is_empty());
    }

    #[test]
    fn parses_direct_response() {
        let plan =
            parse_plan(r#"{"tasks": [], "response": "Hello! How can I help?"}"#).unwrap();
        assert_eq!(plan.response.as_deref(), Some("Hello! How can I help?"));
    }

    #[test]
    fn missing_tasks_array_rejected() {
        assert!(parse_plan(r#"{"response": "hi"}"#).is_err());
        assert!(parse_plan(r#"{"tasks": "not an array"}"#).is_err());
        assert!(parse_plan("[1, 2, 3]").is_err());
        assert!(parse_plan("total garbage").is_err());
    }

    #[test]
    fn task_defaults_applied() {
        let plan = parse_plan(r#"{"tasks": [{"tool": "ping"}]}"#).unwrap();
        assert!(plan.tasks[0].params.is_empty());
        assert_eq!(plan.tasks[0].description, "");
        assert!(plan.tasks[0].depends_on.is_none());
    }

    #[test]
    fn plan_roundtrip_after_normalization() {
        let plan = parse_plan(
            r#"{"tasks": [{"tool": "add", "params": {"a": 1, "b": 2}, "description": "x"}]}"#,
        )
        .unwrap();
        let rendered = serde_json::to_string(&plan).unwrap();
        let reparsed = parse_plan(&rendered).unwrap();
        assert_eq!(reparsed, plan);
    }

    #[test]
    fn repair_replacement() {
        let out = parse_repair(r#"{"tool": "add", "params": {"a": 1, "b": 2}}"#).unwrap();
        match out {
            RepairOutcome::Replacement(task) => {
                assert_eq!(task.tool, "add");
                assert_eq!(task.params["b"], 2);
            }
            RepairOutcome::Abort { .. } => panic!("expected replacement"),
        }
    }

    #[test]
    fn repair_wrapped_in_plan() {
        let out = parse_repair(r#"{"tasks": [{"tool": "multiply", "params": {}}]}"#).unwrap();
        assert!(matches!(out, RepairOutcome::Replacement(t) if t.tool == "multiply"));
    }

    #[test]
    fn repair_abort() {
        let out = parse_repair(r#"{"abort": true, "reason": "tool does not exist"}"#).unwrap();
        assert_eq!(out, RepairOutcome::Abort { reason: "tool does not exist".into() });
    }

    #[test]
    fn dependency_value_shapes() {
        assert_eq!(parse_dependency_value(r#"{"value": 300}"#).unwrap(), 300);
        assert_eq!(parse_dependency_value("42").unwrap(), 42);
        assert_eq!(parse_dependency_value(r#""Tokyo""#).unwrap(), "Tokyo");
        assert_eq!(parse_dependency_value("Tokyo").unwrap(), "Tokyo");
    }
}
