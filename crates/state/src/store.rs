//! The state store.
//!
//! Layout under the state directory:
//!
//! ```text
//! session.json          session record
//! conversation.txt      one JSON entry per line
//! tasks/pending.json    ordered pending queue
//! tasks/completed.json  ordered finished tasks
//! tasks/current.txt     id of the running task (empty when idle)
//! history/<id>.json     archived sessions
//! ```
//!
//! Every transition is written to disk before the caller reaches its next
//! suspension point, so a killed process resumes exactly where it stopped.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use maestro_domain::error::{CallError, Error, Result};
use maestro_domain::task::{Task, TaskStatus};
use maestro_domain::text::safe_text;

use crate::records::{ConversationEntry, SessionState, SessionStatus};

/// Compaction threshold for `conversation.txt`.
const MAX_CONVERSATION_BYTES: usize = 10 * 1024 * 1024;

pub struct StateStore {
    dir: PathBuf,
    session: SessionState,
    conversation: Vec<ConversationEntry>,
    pending: Vec<Task>,
    completed: Vec<Task>,
    current: Option<String>,
    next_seq: u64,
}

/// Snapshot written to `history/<id>.json` on close.
#[derive(Serialize, Deserialize)]
struct SessionArchive {
    session: SessionState,
    conversation: Vec<ConversationEntry>,
    pending: Vec<Task>,
    completed: Vec<Task>,
}

impl StateStore {
    // ── Initialization ─────────────────────────────────────────────

    /// Open or create the store under `dir`.
    ///
    /// With no `session_id`, resumes whatever session is live in the
    /// directory, or starts a fresh one. With a `session_id`, resumes the
    /// live session if the id matches, restores it from `history/`
    /// otherwise, and errors when the id is unknown.
    pub fn initialize(dir: &Path, session_id: Option<&str>) -> Result<Self> {
        std::fs::create_dir_all(dir.join("tasks"))?;
        std::fs::create_dir_all(dir.join("history"))?;

        let live = read_json_opt::<SessionState>(&dir.join("session.json"))?;

        let mut store = match (live, session_id) {
            // A closed session is only reopened when asked for by id.
            (Some(session), None) if session.status != SessionStatus::Closed => {
                Self::load_live(dir, session)?
            }
            (Some(session), Some(requested)) if session.session_id == requested => {
                Self::load_live(dir, session)?
            }
            (_, Some(requested)) => {
                let archive_path = dir.join("history").join(format!("{requested}.json"));
                let archive = read_json_opt::<SessionArchive>(&archive_path)?.ok_or_else(|| {
                    Error::Internal(format!("unknown session '{requested}'"))
                })?;
                Self::from_archive(dir, archive)?
            }
            (_, None) => Self::fresh(dir, SessionState::fresh_id()),
        };

        store.session.status = SessionStatus::Active;
        store.session.last_activity = Utc::now();
        store.persist_all()?;
        tracing::info!(
            session_id = %store.session.session_id,
            pending = store.pending.len(),
            completed = store.completed.len(),
            "state store ready"
        );
        Ok(store)
    }

    fn fresh(dir: &Path, session_id: String) -> Self {
        Self {
            dir: dir.to_path_buf(),
            session: SessionState::new(session_id),
            conversation: Vec::new(),
            pending: Vec::new(),
            completed: Vec::new(),
            current: None,
            next_seq: 1,
        }
    }

    fn load_live(dir: &Path, session: SessionState) -> Result<Self> {
        let conversation = read_conversation(&dir.join("conversation.txt"))?;
        let pending = read_json_opt::<Vec<Task>>(&dir.join("tasks").join("pending.json"))?
            .unwrap_or_default();
        let completed = read_json_opt::<Vec<Task>>(&dir.join("tasks").join("completed.json"))?
            .unwrap_or_default();
        let current = match std::fs::read_to_string(dir.join("tasks").join("current.txt")) {
            Ok(raw) => {
                let trimmed = raw.trim().to_string();
                (!trimmed.is_empty()).then_some(trimmed)
            }
            Err(_) => None,
        };
        let next_seq = conversation.last().map(|e| e.seq + 1).unwrap_or(1);
        Ok(Self {
            dir: dir.to_path_buf(),
            session,
            conversation,
            pending,
            completed,
            current,
            next_seq,
        })
    }

    fn from_archive(dir: &Path, archive: SessionArchive) -> Result<Self> {
        let next_seq = archive.conversation.last().map(|e| e.seq + 1).unwrap_or(1);
        Ok(Self {
            dir: dir.to_path_buf(),
            session: archive.session,
            conversation: archive.conversation,
            pending: archive.pending,
            completed: archive.completed,
            current: None,
            next_seq,
        })
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn pending_tasks(&self) -> &[Task] {
        &self.pending
    }

    pub fn completed_tasks(&self) -> &[Task] {
        &self.completed
    }

    pub fn current_task_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// The most recent `n` conversation entries, oldest first.
    pub fn conversation_window(&self, n: usize) -> &[ConversationEntry] {
        let start = self.conversation.len().saturating_sub(n);
        &self.conversation[start..]
    }

    pub fn conversation_len(&self) -> usize {
        self.conversation.len()
    }

    pub fn memory(&self) -> &serde_json::Map<String, Value> {
        &self.session.memory
    }

    // ── Conversation ───────────────────────────────────────────────

    /// Append one conversation entry. Text is scrubbed before it touches
    /// disk; returns the assigned sequence number.
    pub fn append_conversation(&mut self, role: &str, text: &str) -> Result<u64> {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.conversation.push(ConversationEntry {
            role: role.to_string(),
            content: safe_text(text),
            seq,
            timestamp: Utc::now(),
            summary: false,
        });
        self.compact_if_oversized();
        self.save_conversation()?;
        self.touch()?;
        Ok(seq)
    }

    /// Collapse the oldest quarter into one summary entry when the log
    /// would exceed [`MAX_CONVERSATION_BYTES`].
    fn compact_if_oversized(&mut self) {
        let size: usize = self
            .conversation
            .iter()
            .map(|e| e.content.len() + 96)
            .sum();
        if size <= MAX_CONVERSATION_BYTES || self.conversation.len() < 4 {
            return;
        }

        let cut = self.conversation.len() / 4;
        let oldest: Vec<ConversationEntry> = self.conversation.drain(..cut).collect();
        let mut digest = String::new();
        for entry in &oldest {
            let head: String = entry.content.chars().take(120).collect();
            digest.push_str(&format!("[{}] {head}\n", entry.role));
        }
        let summary = ConversationEntry {
            role: "system".into(),
            content: format!("Summary of {cut} earlier entries:\n{digest}"),
            seq: oldest.first().map(|e| e.seq).unwrap_or(0),
            timestamp: Utc::now(),
            summary: true,
        };
        self.conversation.insert(0, summary);
        tracing::info!(compacted = cut, "conversation log compacted");
    }

    // ── Session bookkeeping ────────────────────────────────────────

    pub fn record_request(&mut self) -> Result<()> {
        self.session.requests += 1;
        self.touch()
    }

    /// Stash a user-declared fact in session memory.
    pub fn remember(&mut self, key: &str, value: Value) -> Result<()> {
        self.session.memory.insert(key.to_string(), value);
        self.touch()
    }

    fn touch(&mut self) -> Result<()> {
        self.session.last_activity = Utc::now();
        self.save_session()
    }

    // ── Task queue ─────────────────────────────────────────────────

    pub fn add_pending(&mut self, task: Task) -> Result<()> {
        tracing::debug!(task_id = %task.task_id, tool = %task.tool, "task added");
        self.pending.push(task);
        self.save_pending()
    }

    /// Put a (repaired or replacement) task back at the head of the queue.
    pub fn requeue_front(&mut self, task: Task) -> Result<()> {
        self.pending.retain(|t| t.task_id != task.task_id);
        self.pending.insert(0, task);
        if self.current.is_some() {
            self.current = None;
            self.save_current()?;
        }
        self.save_pending()
    }

    /// Transition a pending task to `running`.
    ///
    /// At most one task runs per session; a second `mark_running` while
    /// another task holds the slot is an internal error.
    pub fn mark_running(&mut self, task_id: &str) -> Result<Task> {
        if let Some(other) = &self.current {
            if other != task_id {
                return Err(Error::Internal(format!(
                    "task '{other}' is already running"
                )));
            }
        }
        let task = self.pending_mut(task_id)?;
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        task.attempts += 1;
        let snapshot = task.clone();
        self.current = Some(task_id.to_string());
        self.save_pending()?;
        self.save_current()?;
        Ok(snapshot)
    }

    /// Transition a pending task to `awaiting_user`; it stays in the
    /// pending queue (blocking it) so a restart resumes into the same
    /// awaiting state.
    pub fn mark_awaiting(&mut self, task_id: &str) -> Result<Task> {
        let task = self.pending_mut(task_id)?;
        task.status = TaskStatus::AwaitingUser;
        let snapshot = task.clone();
        if self.current.as_deref() == Some(task_id) {
            self.current = None;
            self.save_current()?;
        }
        self.save_pending()?;
        Ok(snapshot)
    }

    pub fn complete(&mut self, task_id: &str, result: Value) -> Result<Task> {
        self.session.tasks_completed += 1;
        self.finish(task_id, TaskStatus::Completed, Some(result), None)
    }

    pub fn fail(&mut self, task_id: &str, error: CallError) -> Result<Task> {
        self.finish(task_id, TaskStatus::Failed, None, Some(error))
    }

    pub fn skip(&mut self, task_id: &str) -> Result<Task> {
        self.finish(task_id, TaskStatus::Skipped, None, None)
    }

    fn finish(
        &mut self,
        task_id: &str,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<CallError>,
    ) -> Result<Task> {
        let idx = self
            .pending
            .iter()
            .position(|t| t.task_id == task_id)
            .ok_or_else(|| Error::Internal(format!("no pending task '{task_id}'")))?;
        let mut task = self.pending.remove(idx);
        task.status = status;
        task.finished_at = Some(Utc::now());
        task.result = result;
        task.error = error;
        self.completed.push(task.clone());
        if self.current.as_deref() == Some(task_id) {
            self.current = None;
            self.save_current()?;
        }
        self.save_pending()?;
        self.save_completed()?;
        self.save_session()?;
        Ok(task)
    }

    fn pending_mut(&mut self, task_id: &str) -> Result<&mut Task> {
        self.pending
            .iter_mut()
            .find(|t| t.task_id == task_id)
            .ok_or_else(|| Error::Internal(format!("no pending task '{task_id}'")))
    }

    // ── Pause / resume / reset / archive ───────────────────────────

    /// Freeze the session: the running task (if any) goes back to
    /// `pending`; awaiting tasks keep their status on disk.
    pub fn pause_all(&mut self) -> Result<()> {
        for task in &mut self.pending {
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Pending;
                task.started_at = None;
            }
        }
        self.current = None;
        self.session.status = SessionStatus::Paused;
        self.save_pending()?;
        self.save_current()?;
        self.save_session()
    }

    pub fn resume_paused(&mut self) -> Result<()> {
        self.session.status = SessionStatus::Active;
        self.save_session()
    }

    /// Drop queues and conversation, keep the session identity.
    pub fn reset(&mut self) -> Result<()> {
        self.pending.clear();
        self.completed.clear();
        self.conversation.clear();
        self.current = None;
        self.next_seq = 1;
        self.persist_all()
    }

    /// Snapshot the session into `history/<id>.json` and mark it closed.
    pub fn archive(&mut self) -> Result<PathBuf> {
        self.session.status = SessionStatus::Closed;
        let archive = SessionArchive {
            session: self.session.clone(),
            conversation: self.conversation.clone(),
            pending: self.pending.clone(),
            completed: self.completed.clone(),
        };
        let path = self
            .dir
            .join("history")
            .join(format!("{}.json", self.session.session_id));
        write_atomic(&path, &serde_json::to_string_pretty(&archive)?)?;
        self.save_session()?;
        tracing::info!(path = %path.display(), "session archived");
        Ok(path)
    }

    // ── Persistence ────────────────────────────────────────────────

    fn persist_all(&self) -> Result<()> {
        self.save_session()?;
        self.save_conversation()?;
        self.save_pending()?;
        self.save_completed()?;
        self.save_current()
    }

    fn save_session(&self) -> Result<()> {
        write_atomic(
            &self.dir.join("session.json"),
            &serde_json::to_string_pretty(&self.session)?,
        )
    }

    fn save_conversation(&self) -> Result<()> {
        let mut buf = String::new();
        for entry in &self.conversation {
            buf.push_str(&serde_json::to_string(entry)?);
            buf.push('\n');
        }
        write_atomic(&self.dir.join("conversation.txt"), &buf)
    }

    fn save_pending(&self) -> Result<()> {
        write_atomic(
            &self.dir.join("tasks").join("pending.json"),
            &serde_json::to_string_pretty(&self.pending)?,
        )
    }

    fn save_completed(&self) -> Result<()> {
        write_atomic(
            &self.dir.join("tasks").join("completed.json"),
            &serde_json::to_string_pretty(&self.completed)?,
        )
    }

    fn save_current(&self) -> Result<()> {
        write_atomic(
            &self.dir.join("tasks").join("current.txt"),
            self.current.as_deref().unwrap_or(""),
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Write-temp + rename in the target directory so readers never observe a
/// partial file.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Read and parse a JSON file; absent files are `None` (fresh session).
fn read_json_opt<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&raw)?))
}

fn read_conversation(path: &Path) -> Result<Vec<ConversationEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ConversationEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed conversation line");
            }
        }
    }
    Ok(entries)
}
