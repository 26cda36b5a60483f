//! The dispatch loop.
//!
//! Single-flight over the pending queue: pop, resolve placeholders, call
//! the tool, record the result. Error kinds drive the recovery policy:
//!
//! | kind             | policy                                          |
//! |------------------|-------------------------------------------------|
//! | unknown_tool     | ask for a replacement task, at most once        |
//! | invalid_params   | LLM repair, retry up to `max_attempts`          |
//! | tool_error       | LLM repair with the payload, retry up to max    |
//! | timeout          | one retry with doubled deadline, then fail      |
//! | transport_closed | one retry (the manager respawns), then fail     |
//! | decode_error     | fail immediately                                |
//!
//! A terminal failure skips every task depending on the failed one;
//! independent tasks keep executing.

use std::time::Duration;

use serde_json::{Map, Value};

use maestro_domain::config::AgentConfig;
use maestro_domain::error::{CallError, CallErrorKind, Result};
use maestro_domain::task::{
    Task, TaskStatus, DEPENDENCY_PREFIX, PREVIOUS_RESULT_PLACEHOLDER,
};
use maestro_llm::{CompletionOptions, LlmClient};
use maestro_mcp::ToolRouter;
use maestro_state::StateStore;

use crate::plan::{self, RepairOutcome};
use crate::tasks::{self, TaskManager};
use crate::{clarify, prompts};

/// How one drain of the queue ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Queue drained; per-task failures, if any, are recorded on the tasks.
    Finished,
    /// Suspended on a clarification; the payload is the question.
    AwaitingUser(String),
}

pub struct Executor {
    max_attempts: u32,
    timeout: Duration,
}

impl Executor {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            timeout: Duration::from_secs(config.tool_timeout_seconds),
        }
    }

    /// Drain the queue.
    pub async fn run(
        &self,
        store: &mut StateStore,
        router: &dyn ToolRouter,
        llm: &dyn LlmClient,
    ) -> Result<RunOutcome> {
        while let Some(task) = TaskManager::next_executable(store) {
            if task.is_clarification() {
                let question = clarify::suspend(store, &task.task_id)?;
                return Ok(RunOutcome::AwaitingUser(question));
            }

            let mut running = store.mark_running(&task.task_id)?;
            running.params = self.resolve_placeholders(running.params, store, llm).await;
            tracing::info!(
                task_id = %running.task_id,
                tool = %running.tool,
                attempt = running.attempts,
                "executing task"
            );

            match router
                .call_tool(&running.tool, running.params.clone(), self.timeout)
                .await
            {
                Ok(value) => {
                    tracing::info!(task_id = %running.task_id, "task completed");
                    store.complete(&running.task_id, value)?;
                }
                Err(error) => {
                    tracing::warn!(
                        task_id = %running.task_id,
                        kind = %error.kind,
                        message = %error.message,
                        "task errored"
                    );
                    self.recover(store, router, llm, running, error).await?;
                }
            }
        }
        Ok(RunOutcome::Finished)
    }

    // ── Error recovery ─────────────────────────────────────────────

    async fn recover(
        &self,
        store: &mut StateStore,
        router: &dyn ToolRouter,
        llm: &dyn LlmClient,
        task: Task,
        error: CallError,
    ) -> Result<()> {
        match error.kind {
            CallErrorKind::Timeout => {
                // One more chance with double the deadline.
                let retry = router
                    .call_tool(&task.tool, task.params.clone(), self.timeout * 2)
                    .await;
                match retry {
                    Ok(value) => {
                        store.complete(&task.task_id, value)?;
                        Ok(())
                    }
                    Err(second) => self.fail_task(store, &task.task_id, second),
                }
            }
            CallErrorKind::TransportClosed => {
                // The connection manager respawns a dead server on the next
                // call; give it exactly that one chance.
                let retry = router
                    .call_tool(&task.tool, task.params.clone(), self.timeout)
                    .await;
                match retry {
                    Ok(value) => {
                        store.complete(&task.task_id, value)?;
                        Ok(())
                    }
                    Err(second) => self.fail_task(store, &task.task_id, second),
                }
            }
            CallErrorKind::DecodeError => self.fail_task(store, &task.task_id, error),
            CallErrorKind::UnknownTool => {
                if task.attempts >= 2 {
                    // The replacement also named a bad tool; stop here.
                    return self.fail_task(store, &task.task_id, error);
                }
                self.repair_and_requeue(store, router, llm, task, error).await
            }
            CallErrorKind::InvalidParams | CallErrorKind::ToolError => {
                if task.attempts >= self.max_attempts {
                    return self.fail_task(store, &task.task_id, error);
                }
                self.repair_and_requeue(store, router, llm, task, error).await
            }
        }
    }

    /// Ask the repair template for a corrected task and put it back at the
    /// head of the queue. An abort (or unusable repair for a task out of
    /// chances) fails the task instead.
    async fn repair_and_requeue(
        &self,
        store: &mut StateStore,
        router: &dyn ToolRouter,
        llm: &dyn LlmClient,
        task: Task,
        error: CallError,
    ) -> Result<()> {
        let completed = completed_only(store);
        let messages = prompts::repair_messages(&task, &error, &completed, router.catalog());

        let repair = match llm.complete(&messages, &CompletionOptions::default()).await {
            Ok(raw) => plan::parse_repair(&raw),
            Err(e) => Err(e),
        };

        match repair {
            Ok(RepairOutcome::Replacement(planned)) => {
                let mut replacement = Task::new(
                    task.task_id.clone(),
                    &planned.tool,
                    tasks::filter_params(&planned, router.catalog()),
                    if planned.description.is_empty() {
                        task.description.clone()
                    } else {
                        planned.description.clone()
                    },
                );
                replacement.attempts = task.attempts;
                replacement.depends_on = task.depends_on.clone();
                tracing::info!(
                    task_id = %task.task_id,
                    tool = %replacement.tool,
                    "repaired task requeued"
                );
                store.requeue_front(replacement)
            }
            Ok(RepairOutcome::Abort { reason }) => {
                tracing::warn!(task_id = %task.task_id, reason = %reason, "repair aborted");
                self.fail_task(store, &task.task_id, error)
            }
            Err(e) => {
                // Unusable repair output: retry the task as-is while
                // attempts remain.
                tracing::warn!(task_id = %task.task_id, error = %e, "repair output unusable");
                if task.attempts >= self.max_attempts || error.kind == CallErrorKind::UnknownTool {
                    return self.fail_task(store, &task.task_id, error);
                }
                let mut unchanged = task;
                unchanged.status = TaskStatus::Pending;
                store.requeue_front(unchanged)
            }
        }
    }

    fn fail_task(&self, store: &mut StateStore, task_id: &str, error: CallError) -> Result<()> {
        tracing::warn!(task_id, kind = %error.kind, "task failed terminally");
        store.fail(task_id, error)?;
        let skipped = tasks::skip_dependents(store, task_id)?;
        if !skipped.is_empty() {
            tracing::warn!(count = skipped.len(), "dependent tasks skipped");
        }
        Ok(())
    }

    // ── Placeholder resolution ─────────────────────────────────────

    async fn resolve_placeholders(
        &self,
        params: Map<String, Value>,
        store: &StateStore,
        llm: &dyn LlmClient,
    ) -> Map<String, Value> {
        let last_result = store
            .completed_tasks()
            .iter()
            .rev()
            .find(|t| t.status == TaskStatus::Completed)
            .and_then(|t| t.result.clone());

        let mut resolved = Map::new();
        for (key, value) in params {
            let value = match value {
                Value::String(s) => self.resolve_string(s, &last_result, store, llm).await,
                other => other,
            };
            resolved.insert(key, value);
        }
        resolved
    }

    async fn resolve_string(
        &self,
        raw: String,
        last_result: &Option<Value>,
        store: &StateStore,
        llm: &dyn LlmClient,
    ) -> Value {
        // The whole value is the placeholder: substitute the typed result
        // so numbers stay numbers.
        if raw == PREVIOUS_RESULT_PLACEHOLDER {
            return match last_result {
                Some(value) => value.clone(),
                None => Value::String(raw),
            };
        }

        if let Some(pointer) = raw.strip_prefix(DEPENDENCY_PREFIX) {
            let completed = completed_only(store);
            let messages = prompts::dependency_messages(pointer.trim(), &completed);
            match llm.complete(&messages, &CompletionOptions::default()).await {
                Ok(answer) => match plan::parse_dependency_value(&answer) {
                    Ok(value) => return value,
                    Err(e) => {
                        tracing::warn!(error = %e, "dependency answer unusable, keeping pointer");
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "dependency resolution failed, keeping pointer");
                }
            }
            return Value::String(raw);
        }

        if raw.contains(PREVIOUS_RESULT_PLACEHOLDER) {
            let text = match last_result {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => return Value::String(raw),
            };
            return Value::String(raw.replace(PREVIOUS_RESULT_PLACEHOLDER, &text));
        }

        Value::String(raw)
    }
}

fn completed_only(store: &StateStore) -> Vec<Task> {
    store
        .completed_tasks()
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .cloned()
        .collect()
}
