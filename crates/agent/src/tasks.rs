//! Materializing planner output into tracked tasks.
//!
//! The task manager is a passive layer over the state store: it turns plan
//! JSON into typed [`Task`]s, applies the ingestion filters, and answers
//! queue questions. The execution engine owns the loop.

use serde_json::{Map, Value};

use maestro_domain::error::Result;
use maestro_domain::task::{Task, TaskStatus, CLARIFICATION_TOOL};
use maestro_mcp::ToolCatalog;
use maestro_state::StateStore;

use crate::plan::{Plan, PlannedTask};

pub struct TaskManager {
    counter: u64,
}

impl TaskManager {
    /// Seed the id counter past anything already tracked in the store, so
    /// resumed sessions keep minting unique ids.
    pub fn new(store: &StateStore) -> Self {
        let highest = store
            .pending_tasks()
            .iter()
            .chain(store.completed_tasks())
            .filter_map(|t| t.task_id.strip_prefix("task_"))
            .filter_map(|suffix| suffix.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Self { counter: highest }
    }

    fn next_id(&mut self) -> String {
        self.counter += 1;
        format!("task_{:03}", self.counter)
    }

    // ── Plan ingestion ─────────────────────────────────────────────

    /// Turn a parsed plan into pending tasks.
    ///
    /// Filters applied per task:
    /// - `description` never survives inside `params` (a recurring model
    ///   bug leaks it there);
    /// - params not declared in the tool's schema are dropped, except for
    ///   `CLARIFICATION`, whose params are free-form;
    /// - a `CLARIFICATION` task always ends up with a `question` param;
    /// - `depends_on` falls back to "all earlier tasks in this plan" when
    ///   placeholders are present and the planner gave no explicit list.
    pub fn materialize(
        &mut self,
        plan: &Plan,
        store: &mut StateStore,
        catalog: &ToolCatalog,
    ) -> Result<Vec<Task>> {
        let mut created = Vec::new();
        let mut earlier_ids: Vec<String> = Vec::new();

        for planned in &plan.tasks {
            let task_id = self.next_id();
            let params = filter_params(planned, catalog);
            let mut task = Task::new(&task_id, &planned.tool, params, &planned.description);

            if task.is_clarification() && task.question().is_none() {
                let question = if planned.description.is_empty() {
                    "Could you provide the missing detail?".to_string()
                } else {
                    planned.description.clone()
                };
                task.params.insert("question".into(), Value::String(question));
            }

            task.depends_on = match &planned.depends_on {
                Some(explicit) => explicit.clone(),
                None if task.has_placeholder() => earlier_ids.clone(),
                None => Vec::new(),
            };

            earlier_ids.push(task_id);
            store.add_pending(task.clone())?;
            created.push(task);
        }
        Ok(created)
    }

    // ── Queue questions ────────────────────────────────────────────

    pub fn pending_count(store: &StateStore) -> usize {
        store.pending_tasks().len()
    }

    pub fn has_clarification(store: &StateStore) -> bool {
        store.pending_tasks().iter().any(Task::is_clarification)
    }

    /// The head of the queue, unless any task is waiting on the user.
    /// An `awaiting_user` task blocks everything behind it.
    pub fn next_executable(store: &StateStore) -> Option<Task> {
        if store
            .pending_tasks()
            .iter()
            .any(|t| t.status == TaskStatus::AwaitingUser)
        {
            return None;
        }
        store.pending_tasks().first().cloned()
    }

    pub fn summary(store: &StateStore) -> TaskSummary {
        let mut summary = TaskSummary::default();
        for task in store.pending_tasks().iter().chain(store.completed_tasks()) {
            match task.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::Running => summary.running += 1,
                TaskStatus::AwaitingUser => summary.awaiting_user += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Skipped => summary.skipped += 1,
            }
            summary.retries += task.attempts.saturating_sub(1);
        }
        summary
    }
}

pub(crate) fn filter_params(planned: &PlannedTask, catalog: &ToolCatalog) -> Map<String, Value> {
    let mut params = Map::new();
    let descriptor = catalog.resolve(&planned.tool);

    for (key, value) in &planned.params {
        if key == "description" {
            tracing::warn!(tool = %planned.tool, "dropping leaked `description` param");
            continue;
        }
        if planned.tool != CLARIFICATION_TOOL {
            if let Some(desc) = descriptor {
                if !desc.schema.declares(key) {
                    tracing::warn!(tool = %planned.tool, param = %key, "dropping undeclared param");
                    continue;
                }
            }
        }
        params.insert(key.clone(), value.clone());
    }
    params
}

/// Skip every pending task that depends, transitively, on `root_id`.
/// Returns the skipped ids in queue order.
pub fn skip_dependents(store: &mut StateStore, root_id: &str) -> Result<Vec<String>> {
    let mut affected = vec![root_id.to_string()];
    let mut skipped = Vec::new();
    loop {
        let next = store
            .pending_tasks()
            .iter()
            .find(|t| t.depends_on.iter().any(|dep| affected.contains(dep)))
            .map(|t| t.task_id.clone());
        match next {
            Some(id) => {
                store.skip(&id)?;
                affected.push(id.clone());
                skipped.push(id);
            }
            None => break,
        }
    }
    Ok(skipped)
}

/// Counts for the `stats` command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    pub pending: usize,
    pub running: usize,
    pub awaiting_user: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub retries: u32,
}

impl std::fmt::Display for TaskSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pending: {}, awaiting user: {}, completed: {}, failed: {}, skipped: {}, retries: {}",
            self.pending + self.running,
            self.awaiting_user,
            self.completed,
            self.failed,
            self.skipped,
            self.retries,
        )
    }
}
