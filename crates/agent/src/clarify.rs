//! The clarification protocol.
//!
//! `CLARIFICATION` is a pseudo-tool whose execution is "ask the user". The
//! engine suspends the queue, the orchestrator returns the question as the
//! turn's output, and the next user line resolves the task. The awaiting
//! status is persisted, so a restarted process resumes into the same
//! waiting state.

use serde_json::Value;

use maestro_domain::error::{Error, Result};
use maestro_domain::task::{Task, TaskStatus};
use maestro_state::StateStore;

/// The task currently waiting on the user, if any.
pub fn awaiting_task(store: &StateStore) -> Option<&Task> {
    store
        .pending_tasks()
        .iter()
        .find(|t| t.status == TaskStatus::AwaitingUser)
}

/// Suspend the queue on a clarification task and return its question.
pub fn suspend(store: &mut StateStore, task_id: &str) -> Result<String> {
    let task = store.mark_awaiting(task_id)?;
    let question = task
        .question()
        .unwrap_or("Could you provide the missing detail?")
        .to_string();
    tracing::info!(task_id, "waiting for the user");
    Ok(question)
}

/// Record the user's reply as the awaiting task's result.
///
/// A reply that reads as a JSON scalar keeps its type ("42" stays a
/// number), so downstream placeholder substitution matches numeric
/// parameter schemas.
pub fn resolve(store: &mut StateStore, answer: &str) -> Result<Task> {
    let task_id = awaiting_task(store)
        .map(|t| t.task_id.clone())
        .ok_or_else(|| Error::Internal("no task is awaiting the user".into()))?;
    tracing::info!(task_id = %task_id, "clarification answered");
    let value = match serde_json::from_str::<Value>(answer.trim()) {
        Ok(scalar @ (Value::Number(_) | Value::Bool(_))) => scalar,
        _ => Value::String(answer.to_string()),
    };
    store.complete(&task_id, value)
}

/// Skip the awaiting task and every pending task that depends on it,
/// transitively. Returns the skipped ids.
pub fn skip(store: &mut StateStore) -> Result<Vec<String>> {
    let task_id = awaiting_task(store)
        .map(|t| t.task_id.clone())
        .ok_or_else(|| Error::Internal("no task is awaiting the user".into()))?;

    store.skip(&task_id)?;
    let mut skipped = vec![task_id.clone()];
    // Anything depending on a skipped task can never run.
    skipped.extend(crate::tasks::skip_dependents(store, &task_id)?);

    tracing::info!(count = skipped.len(), "clarification skipped");
    Ok(skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_domain::task::CLARIFICATION_TOOL;
    use serde_json::Map;
    use tempfile::TempDir;

    fn clarification(id: &str, question: &str) -> Task {
        let mut task = Task::new(id, CLARIFICATION_TOOL, Map::new(), "");
        task.params
            .insert("question".into(), serde_json::json!(question));
        task
    }

    #[test]
    fn suspend_returns_question() {
        let dir = TempDir::new().unwrap();
        let mut store = StateStore::initialize(dir.path(), None).unwrap();
        store.add_pending(clarification("task_001", "How old are you?")).unwrap();

        let question = suspend(&mut store, "task_001").unwrap();
        assert_eq!(question, "How old are you?");
        assert_eq!(awaiting_task(&store).unwrap().task_id, "task_001");
    }

    #[test]
    fn resolve_keeps_numeric_answers_numeric() {
        let dir = TempDir::new().unwrap();
        let mut store = StateStore::initialize(dir.path(), None).unwrap();
        store.add_pending(clarification("task_001", "age?")).unwrap();
        suspend(&mut store, "task_001").unwrap();

        let task = resolve(&mut store, "42").unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(serde_json::json!(42)));
        assert!(awaiting_task(&store).is_none());
    }

    #[test]
    fn resolve_stores_text_answers_as_strings() {
        let dir = TempDir::new().unwrap();
        let mut store = StateStore::initialize(dir.path(), None).unwrap();
        store.add_pending(clarification("task_001", "which city?")).unwrap();
        suspend(&mut store, "task_001").unwrap();

        let task = resolve(&mut store, "Tokyo").unwrap();
        assert_eq!(task.result, Some(serde_json::json!("Tokyo")));
    }

    #[test]
    fn resolve_without_awaiting_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut store = StateStore::initialize(dir.path(), None).unwrap();
        assert!(resolve(&mut store, "42").is_err());
    }

    #[test]
    fn skip_cascades_to_dependents() {
        let dir = TempDir::new().unwrap();
        let mut store = StateStore::initialize(dir.path(), None).unwrap();
        store.add_pending(clarification("task_001", "age?")).unwrap();

        let mut child = Task::new("task_002", "add", Map::new(), "");
        child.depends_on = vec!["task_001".into()];
        store.add_pending(child).unwrap();

        let mut grandchild = Task::new("task_003", "add", Map::new(), "");
        grandchild.depends_on = vec!["task_002".into()];
        store.add_pending(grandchild).unwrap();

        let mut unrelated = Task::new("task_004", "add", Map::new(), "");
        unrelated.params.insert("a".into(), serde_json::json!(1));
        store.add_pending(unrelated).unwrap();

        suspend(&mut store, "task_001").unwrap();
        let skipped = skip(&mut store).unwrap();
        assert_eq!(skipped, vec!["task_001", "task_002", "task_003"]);

        assert_eq!(store.pending_tasks().len(), 1);
        assert_eq!(store.pending_tasks()[0].task_id, "task_004");
        let statuses: Vec<TaskStatus> =
            store.completed_tasks().iter().map(|t| t.status).collect();
        assert!(statuses.iter().all(|s| *s == TaskStatus::Skipped));
    }
}
