//! End-to-end dialogue scenarios against a mock LLM and a scripted router.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tempfile::TempDir;

use maestro_agent::Agent;
use maestro_domain::config::Config;
use maestro_domain::error::CallError;
use maestro_domain::task::TaskStatus;
use maestro_domain::tool::{ToolDescriptor, ToolSchema};
use maestro_llm::MockLlmClient;
use maestro_mcp::{ToolCatalog, ToolRouter};
use maestro_state::StateStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Test harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ScriptedRouter {
    catalog: ToolCatalog,
    answers: Mutex<VecDeque<Result<Value, CallError>>>,
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl ScriptedRouter {
    fn new(answers: Vec<Result<Value, CallError>>) -> Self {
        let mut catalog = ToolCatalog::new();
        catalog.register(vec![
            tool("calculator", "add", &[("a", "number"), ("b", "number")]),
            tool("calculator", "multiply", &[("a", "number"), ("b", "number")]),
            tool("python", "execute_python", &[("code", "string")]),
        ]);
        Self {
            catalog,
            answers: Mutex::new(answers.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.calls.lock().clone()
    }
}

fn tool(server: &str, name: &str, params: &[(&str, &str)]) -> ToolDescriptor {
    let mut properties = serde_json::Map::new();
    for (param, kind) in params {
        properties.insert(param.to_string(), serde_json::json!({ "type": kind }));
    }
    let required: Vec<&str> = params.iter().map(|(p, _)| *p).collect();
    ToolDescriptor {
        server: server.into(),
        name: name.into(),
        description: format!("{name} tool"),
        schema: ToolSchema::from_input_schema(&serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })),
    }
}

#[async_trait::async_trait]
impl ToolRouter for ScriptedRouter {
    fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    async fn call_tool(
        &self,
        tool: &str,
        params: Map<String, Value>,
        _timeout: Duration,
    ) -> Result<Value, CallError> {
        self.calls.lock().push((tool.to_string(), params));
        self.answers.lock().pop_front().unwrap_or(Ok(Value::Null))
    }
}

fn agent(
    dir: &TempDir,
    router: Arc<ScriptedRouter>,
    llm: MockLlmClient,
) -> Agent {
    let mut config = Config::default();
    config.llm.provider = "mock".into();
    config.agent.interpret_results = false;
    config.agent.state_dir = dir.path().to_path_buf();
    let store = StateStore::initialize(dir.path(), None).unwrap();
    Agent::new(config, store, router, Arc::new(llm))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn simple_arithmetic() {
    let dir = TempDir::new().unwrap();
    let router = Arc::new(ScriptedRouter::new(vec![Ok(serde_json::json!(300))]));
    let llm = MockLlmClient::new().on(
        "Add 100 and 200",
        r#"{"tasks": [{"tool": "add", "params": {"a": 100, "b": 200}, "description": "add the numbers"}]}"#,
    );
    let mut agent = agent(&dir, router.clone(), llm);

    let answer = agent.process_request("Add 100 and 200.").await.unwrap();
    assert!(answer.contains("300"), "got: {answer}");

    let calls = router.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "add");
    assert_eq!(calls[0].1["a"], 100);
    assert_eq!(calls[0].1["b"], 200);

    let done = &agent.store().completed_tasks()[0];
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.result, Some(serde_json::json!(300)));
}

#[tokio::test]
async fn chained_computation() {
    let dir = TempDir::new().unwrap();
    let router = Arc::new(ScriptedRouter::new(vec![
        Ok(serde_json::json!(300)),
        Ok(serde_json::json!(600)),
    ]));
    let llm = MockLlmClient::new().on(
        "then multiply by 2",
        r#"{"tasks": [
            {"tool": "add", "params": {"a": 100, "b": 200}, "description": "add"},
            {"tool": "multiply", "params": {"a": "{{previous_result}}", "b": 2}, "description": "double it"}
        ]}"#,
    );
    let mut agent = agent(&dir, router.clone(), llm);

    let answer = agent
        .process_request("Add 100 and 200, then multiply by 2.")
        .await
        .unwrap();
    assert!(answer.contains("600"), "got: {answer}");

    let calls = router.calls();
    // The placeholder resolved to the typed number 300, the declared
    // schema type of `a`.
    assert_eq!(calls[1].1["a"], serde_json::json!(300));
}

#[tokio::test]
async fn description_leak_is_filtered() {
    let dir = TempDir::new().unwrap();
    let router = Arc::new(ScriptedRouter::new(vec![Ok(serde_json::json!("1"))]));
    let llm = MockLlmClient::new().on(
        "run the snippet",
        r#"{"tasks":[{"tool":"execute_python","params":{"code":"print(1)","description":"run code"},"description":"x"}]}"#,
    );
    let mut agent = agent(&dir, router.clone(), llm);

    agent.process_request("run the snippet please").await.unwrap();

    let done = &agent.store().completed_tasks()[0];
    let expected: Map<String, Value> =
        [("code".to_string(), serde_json::json!("print(1)"))].into_iter().collect();
    assert_eq!(done.params, expected);
    assert_eq!(router.calls()[0].1, expected);
}

#[tokio::test]
async fn clarification_round_trip() {
    let dir = TempDir::new().unwrap();
    let router = Arc::new(ScriptedRouter::new(vec![Ok(serde_json::json!(52))]));
    let llm = MockLlmClient::new().on(
        "Add my age to 10",
        r#"{"tasks": [
            {"tool": "CLARIFICATION", "params": {"question": "What is your age?"}, "description": "ask for age"},
            {"tool": "add", "params": {"a": "{{previous_result}}", "b": 10}, "description": "add 10"}
        ]}"#,
    );
    let mut agent = agent(&dir, router.clone(), llm);

    let question = agent.process_request("Add my age to 10.").await.unwrap();
    assert!(question.contains("age"), "got: {question}");
    assert!(agent.is_awaiting());
    assert!(router.calls().is_empty());

    // The next line is the answer, not a new request.
    let answer = agent.process_request("42").await.unwrap();
    assert!(answer.contains("52"), "got: {answer}");
    assert!(!agent.is_awaiting());

    let calls = router.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1["a"], serde_json::json!(42));
}

#[tokio::test]
async fn repair_loop_completes_on_second_attempt() {
    let dir = TempDir::new().unwrap();
    let router = Arc::new(ScriptedRouter::new(vec![
        Err(CallError::invalid_params("b missing")),
        Ok(serde_json::json!(3)),
    ]));
    let llm = MockLlmClient::new()
        .on(
            "Add one and two",
            r#"{"tasks": [{"tool": "add", "params": {"a": 1}, "description": "add"}]}"#,
        )
        .on(
            "b missing",
            r#"{"tool": "add", "params": {"a": 1, "b": 2}, "description": "add"}"#,
        );
    let mut agent = agent(&dir, router.clone(), llm);

    let answer = agent.process_request("Add one and two").await.unwrap();
    assert!(answer.contains("3"), "got: {answer}");

    let done = &agent.store().completed_tasks()[0];
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.attempts, 2);
    assert_eq!(done.result, Some(serde_json::json!(3)));
}

#[tokio::test]
async fn surrogate_in_tool_output_never_reaches_the_log() {
    let dir = TempDir::new().unwrap();
    let router = Arc::new(ScriptedRouter::new(vec![Ok(Value::String(
        r"result with \uD800 inside".to_string(),
    ))]));
    let llm = MockLlmClient::new().on(
        "garbled",
        r#"{"tasks": [{"tool": "execute_python", "params": {"code": "x"}, "description": "run"}]}"#,
    );
    let mut agent = agent(&dir, router.clone(), llm);

    let answer = agent.process_request("give me the garbled output").await.unwrap();
    assert!(answer.contains("result with"), "got: {answer}");

    // The conversation log is surrogate-free: the lone escape became `?`.
    let window = agent.store().conversation_window(10);
    let assistant = window.iter().rfind(|e| e.role == "assistant").unwrap();
    assert!(assistant.content.contains('?'));
    assert!(!assistant.content.contains("\\uD800"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn-level behaviors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn greeting_gets_a_direct_response() {
    let dir = TempDir::new().unwrap();
    let router = Arc::new(ScriptedRouter::new(vec![]));
    let llm = MockLlmClient::new().on(
        "Hello",
        r#"{"tasks": [], "response": "Hi there! What can I do for you?"}"#,
    );
    let mut agent = agent(&dir, router.clone(), llm);

    let answer = agent.process_request("Hello!").await.unwrap();
    assert_eq!(answer, "Hi there! What can I do for you?");
    assert!(router.calls().is_empty());
    assert!(!agent.last_turn_failed());
}

#[tokio::test]
async fn unparseable_plans_get_one_retry_then_apology() {
    let dir = TempDir::new().unwrap();
    let router = Arc::new(ScriptedRouter::new(vec![]));
    // Both the first attempt and the stricter retry return garbage.
    let llm = MockLlmClient::new().with_fallback("I refuse to emit JSON");
    let mut agent = agent(&dir, router.clone(), llm);

    let answer = agent.process_request("do something").await.unwrap();
    assert!(answer.contains("rephrase"), "got: {answer}");
    assert!(agent.last_turn_failed());
    assert_eq!(agent.store().pending_tasks().len(), 0);
}

#[tokio::test]
async fn failed_tool_is_reported_by_name_and_kind() {
    let dir = TempDir::new().unwrap();
    let router = Arc::new(ScriptedRouter::new(vec![Err(CallError::decode_error(64))]));
    let llm = MockLlmClient::new().on(
        "broken",
        r#"{"tasks": [{"tool": "execute_python", "params": {"code": "x"}, "description": "run"}]}"#,
    );
    let mut agent = agent(&dir, router.clone(), llm);

    let answer = agent.process_request("run the broken tool").await.unwrap();
    assert!(answer.contains("execute_python"), "got: {answer}");
    assert!(answer.contains("decode_error"), "got: {answer}");
    assert!(agent.last_turn_failed());
}

#[tokio::test]
async fn declared_name_lands_in_session_memory() {
    let dir = TempDir::new().unwrap();
    let router = Arc::new(ScriptedRouter::new(vec![]));
    let llm = MockLlmClient::new().on(
        "name",
        r#"{"tasks": [], "response": "Nice to meet you, Satoshi!"}"#,
    );
    let mut agent = agent(&dir, router.clone(), llm);

    agent.process_request("Hi, my name is Satoshi").await.unwrap();
    assert_eq!(agent.store().memory()["user_name"], "Satoshi");
}

#[tokio::test]
async fn skip_cancels_the_pending_question() {
    let dir = TempDir::new().unwrap();
    let router = Arc::new(ScriptedRouter::new(vec![]));
    let llm = MockLlmClient::new().on(
        "my age",
        r#"{"tasks": [
            {"tool": "CLARIFICATION", "params": {"question": "What is your age?"}, "description": "ask"},
            {"tool": "add", "params": {"a": "{{previous_result}}", "b": 10}, "description": "add"}
        ]}"#,
    );
    let mut agent = agent(&dir, router.clone(), llm);

    agent.process_request("Add my age to 10").await.unwrap();
    assert!(agent.is_awaiting());

    let message = agent.skip_clarification().unwrap();
    assert!(message.contains("2"), "both tasks skipped: {message}");
    assert!(!agent.is_awaiting());
    assert!(agent.store().pending_tasks().is_empty());
    assert!(router.calls().is_empty());

    let statuses: Vec<TaskStatus> = agent
        .store()
        .completed_tasks()
        .iter()
        .map(|t| t.status)
        .collect();
    assert_eq!(statuses, vec![TaskStatus::Skipped, TaskStatus::Skipped]);
}
