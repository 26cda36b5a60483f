//! The session orchestrator, the public entry point of the runtime.
//!
//! `process_request` glues the pieces together: memory extraction, the
//! planner call, task materialization, the executor loop, and the
//! clarification hand-off. The orchestrator is assembled from parts
//! (config, store, router, LLM client); there is no subclass hierarchy to
//! swap behavior; build it with different parts instead.

use std::sync::Arc;

use serde_json::Value;

use maestro_domain::config::Config;
use maestro_domain::error::Result;
use maestro_domain::task::{Task, TaskStatus};
use maestro_llm::{ChatMessage, CompletionOptions, LlmClient};
use maestro_mcp::ToolRouter;
use maestro_state::StateStore;

use crate::executor::{Executor, RunOutcome};
use crate::plan;
use crate::prompts::{self, PromptContext};
use crate::tasks::TaskManager;
use crate::{clarify, memory};

const PLAN_APOLOGY: &str =
    "I could not turn that request into a valid plan. Could you rephrase it?";

pub struct Agent {
    config: Config,
    store: StateStore,
    router: Arc<dyn ToolRouter>,
    llm: Arc<dyn LlmClient>,
    tasks: TaskManager,
    executor: Executor,
    custom_instructions: Option<String>,
    /// The request a suspended plan belongs to, for interpretation after
    /// the clarification resumes.
    current_request: Option<String>,
    last_turn_failed: bool,
}

impl Agent {
    pub fn new(
        config: Config,
        store: StateStore,
        router: Arc<dyn ToolRouter>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        let custom_instructions = config
            .agent
            .custom_instructions_path
            .as_ref()
            .and_then(|path| match std::fs::read_to_string(path) {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot read custom instructions");
                    None
                }
            });

        let tasks = TaskManager::new(&store);
        let executor = Executor::new(&config.agent);
        Self {
            config,
            store,
            router,
            llm,
            tasks,
            executor,
            custom_instructions,
            current_request: None,
            last_turn_failed: false,
        }
    }

    // ── The main entry point ───────────────────────────────────────

    /// One dialogue turn: user text in, assistant text out.
    ///
    /// While a task is `awaiting_user`, the input is always the pending
    /// clarification's answer, never a new request. Skip first to start
    /// fresh.
    pub async fn process_request(&mut self, user_text: &str) -> Result<String> {
        let input = user_text.trim();
        self.last_turn_failed = false;

        for (key, value) in memory::extract_facts(input) {
            tracing::debug!(key = %key, "remembering user-declared fact");
            self.store.remember(&key, Value::String(value))?;
        }

        self.store.append_conversation("user", input)?;
        self.store.record_request()?;

        let response = if clarify::awaiting_task(&self.store).is_some() {
            clarify::resolve(&mut self.store, input)?;
            let completed_before = self.store.completed_tasks().len();
            let outcome = self
                .executor
                .run(&mut self.store, self.router.as_ref(), self.llm.as_ref())
                .await?;
            let request = self.current_request.clone().unwrap_or_else(|| input.to_string());
            self.finish_turn(outcome, &request, completed_before).await?
        } else {
            self.plan_and_run(input).await?
        };

        self.store.append_conversation("assistant", &response)?;
        Ok(response)
    }

    async fn plan_and_run(&mut self, request: &str) -> Result<String> {
        self.current_request = Some(request.to_string());

        let raw = {
            let messages = self.planner_messages(request);
            self.llm
                .complete(&messages, &CompletionOptions::default())
                .await?
        };

        let plan = match plan::parse_plan(&raw) {
            Ok(plan) => plan,
            Err(first) => {
                tracing::warn!(error = %first, "plan did not parse, re-prompting once");
                let retry = {
                    let messages = self.plan_retry(request, &raw);
                    self.llm
                        .complete(&messages, &CompletionOptions::default())
                        .await?
                };
                match plan::parse_plan(&retry) {
                    Ok(plan) => plan,
                    Err(second) => {
                        tracing::warn!(error = %second, "second plan also unusable");
                        self.last_turn_failed = true;
                        return Ok(PLAN_APOLOGY.to_string());
                    }
                }
            }
        };

        if plan.tasks.is_empty() {
            // No tool needed: the planner answered directly.
            return Ok(plan
                .response
                .unwrap_or_else(|| "There was nothing to do for that request.".to_string()));
        }

        let created = self
            .tasks
            .materialize(&plan, &mut self.store, self.router.catalog())?;
        tracing::info!(count = created.len(), "plan materialized");

        let completed_before = self.store.completed_tasks().len();
        let outcome = self
            .executor
            .run(&mut self.store, self.router.as_ref(), self.llm.as_ref())
            .await?;
        self.finish_turn(outcome, request, completed_before).await
    }

    /// Turn an executor outcome into the assistant's text for this turn.
    async fn finish_turn(
        &mut self,
        outcome: RunOutcome,
        request: &str,
        completed_before: usize,
    ) -> Result<String> {
        if let RunOutcome::AwaitingUser(question) = outcome {
            return Ok(question);
        }

        let finished: Vec<Task> = self.store.completed_tasks()[completed_before..].to_vec();
        let failures: Vec<&Task> = finished
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .collect();

        if !failures.is_empty() {
            self.last_turn_failed = true;
            let lines: Vec<String> = failures
                .iter()
                .map(|t| {
                    let kind = t
                        .error
                        .as_ref()
                        .map(|e| e.kind.to_string())
                        .unwrap_or_else(|| "error".into());
                    format!("Tool '{}' failed ({kind}).", t.tool)
                })
                .collect();
            return Ok(lines.join("\n"));
        }

        let completions: Vec<Task> = finished
            .into_iter()
            .filter(|t| t.status == TaskStatus::Completed && !t.is_clarification())
            .collect();
        let Some(last) = completions.last() else {
            return Ok("Done.".to_string());
        };
        let raw_text = result_text(last.result.as_ref());

        if !self.config.agent.interpret_results {
            return Ok(raw_text);
        }

        let messages = prompts::interpretation_messages(request, &completions);
        match self
            .llm
            .complete(&messages, &CompletionOptions::default())
            .await
        {
            Ok(sentence) => Ok(sentence.trim().to_string()),
            Err(e) => {
                tracing::warn!(error = %e, "interpretation failed, returning raw result");
                Ok(raw_text)
            }
        }
    }

    // ── Prompt helpers ─────────────────────────────────────────────

    fn planner_messages(&self, request: &str) -> Vec<ChatMessage> {
        let ctx = self.prompt_context();
        prompts::planner_messages(&ctx, request)
    }

    fn plan_retry(&self, request: &str, bad_output: &str) -> Vec<ChatMessage> {
        let ctx = self.prompt_context();
        prompts::plan_retry_messages(&ctx, request, bad_output)
    }

    fn prompt_context(&self) -> PromptContext<'_> {
        // The window excludes the just-appended user line; the request is
        // passed to the template separately.
        let window = self
            .store
            .conversation_window(self.config.agent.max_context_entries + 1);
        let context = &window[..window.len().saturating_sub(1)];
        PromptContext {
            catalog: self.router.catalog(),
            conversation: context,
            memory: self.store.memory(),
            custom_instructions: self.custom_instructions.as_deref(),
        }
    }

    // ── Commands ───────────────────────────────────────────────────

    pub fn is_awaiting(&self) -> bool {
        clarify::awaiting_task(&self.store).is_some()
    }

    /// The question currently waiting on the user, if any.
    pub fn pending_question(&self) -> Option<String> {
        clarify::awaiting_task(&self.store)
            .and_then(|t| t.question().map(str::to_string))
    }

    /// Skip the awaiting clarification (REPL Esc).
    pub fn skip_clarification(&mut self) -> Result<String> {
        let skipped = clarify::skip(&mut self.store)?;
        Ok(format!("Skipped {} task(s).", skipped.len()))
    }

    /// Whether the last processed turn ended in a failure.
    pub fn last_turn_failed(&self) -> bool {
        self.last_turn_failed
    }

    pub fn stats(&self) -> String {
        let session = self.store.session();
        format!(
            "session: {}\nstatus: {:?}\nrequests: {}\ntasks completed: {}\n{}",
            session.session_id,
            session.status,
            session.requests,
            session.tasks_completed,
            TaskManager::summary(&self.store),
        )
    }

    pub fn report(&self) -> String {
        let mut lines = vec![format!("session {}", self.store.session().session_id)];
        for task in self.store.completed_tasks().iter().chain(self.store.pending_tasks()) {
            let mut line = format!(
                "[{}] {} - {} (attempts: {})",
                task.task_id, task.tool, task.status, task.attempts
            );
            if let Some(error) = &task.error {
                line.push_str(&format!(": {error}"));
            }
            lines.push(line);
        }
        if lines.len() == 1 {
            lines.push("no tasks yet".into());
        }
        lines.join("\n")
    }

    pub fn reset(&mut self) -> Result<()> {
        self.current_request = None;
        self.store.reset()
    }

    pub fn pause(&mut self) -> Result<()> {
        self.store.pause_all()
    }

    /// Archive the session. Tool-server shutdown is the connection
    /// manager's job and stays with whoever owns it.
    pub fn close(&mut self) -> Result<()> {
        self.store.archive()?;
        Ok(())
    }

    pub fn session_id(&self) -> &str {
        &self.store.session().session_id
    }

    /// Read access to the underlying state (for inspection and tests).
    pub fn store(&self) -> &StateStore {
        &self.store
    }
}

fn result_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "(no result)".to_string(),
    }
}
