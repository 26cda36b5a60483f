//! Stdio transport to one tool-server child process.
//!
//! Each JSON-RPC message is a single newline-delimited line on the child's
//! stdin/stdout. Lines are read as raw bytes and decoded through the
//! surrogate scrubber before any JSON parsing: subprocess output on some
//! host encodings carries lone surrogates that would otherwise kill the
//! decoder.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use maestro_domain::config::ServerConfig;
use maestro_domain::text::decode_lossy;

use crate::protocol::{RpcNotification, RpcRequest, RpcResponse};

/// Non-JSON stdout lines tolerated before declaring the server broken.
const MAX_NOISE_LINES: usize = 1000;

/// Grace period between closing stdin and killing the process.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON encoding: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tool server process has exited")]
    ProcessExited,

    #[error("no response within {seconds}s")]
    Timeout { seconds: u64 },

    #[error("undecodable response ({raw_len} bytes)")]
    Decode { raw_len: usize },
}

/// One child process, stdio piped.
///
/// The `call_lock` serializes whole request/response cycles: a session
/// addresses each server with at most one in-flight request, and the lock
/// keeps a late caller from reading an earlier caller's response.
pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Child>,
    call_lock: Mutex<()>,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl StdioTransport {
    /// Spawn the configured command with piped stdio.
    pub fn spawn(config: &ServerConfig) -> Result<Self, TransportError> {
        let mut cmd = tokio::process::Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null());
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take().ok_or_else(broken_pipe)?;
        let stdout = child.stdout.take().ok_or_else(broken_pipe)?;

        tracing::debug!(server = %config.name, command = %config.command, "spawned tool server");

        Ok(Self {
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
            call_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Send a request and wait for its response, bounded by `deadline`.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        deadline: Duration,
    ) -> Result<RpcResponse, TransportError> {
        let _cycle = self.call_lock.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = serde_json::to_string(&RpcRequest::new(id, method, params))?;
        tracing::debug!(id, method, "-> request");
        self.write_line(&line).await?;

        let answer = tokio::time::timeout(deadline, self.read_response(id)).await;
        match answer {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(id, method, seconds = deadline.as_secs(), "request timed out");
                Err(TransportError::Timeout { seconds: deadline.as_secs() })
            }
        }
    }

    /// Fire-and-forget notification.
    pub async fn notify(&self, method: &str) -> Result<(), TransportError> {
        let line = serde_json::to_string(&RpcNotification::new(method))?;
        tracing::debug!(method, "-> notification");
        self.write_line(&line).await
    }

    /// Close stdin, wait for a graceful exit, kill after the grace period.
    pub async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.shutdown().await {
                tracing::debug!(error = %e, "closing tool server stdin");
            }
        }
        let mut child = self.child.lock().await;
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(?status, "tool server exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "waiting for tool server exit");
            }
            Err(_) => {
                tracing::warn!("tool server did not exit in time, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "killing tool server");
                }
            }
        }
    }

    // ── Internals ──────────────────────────────────────────────────

    async fn write_line(&self, line: &str) -> Result<(), TransportError> {
        if !self.is_alive() {
            return Err(TransportError::ProcessExited);
        }
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Read lines until the response matching `id` shows up.
    ///
    /// Notifications and stray log lines in between are skipped; a response
    /// line that will not parse as JSON-RPC at all is a decode failure and
    /// we report only its length.
    async fn read_response(&self, id: u64) -> Result<RpcResponse, TransportError> {
        let mut stdout = self.stdout.lock().await;
        let mut noise = 0usize;
        loop {
            let mut buf = Vec::new();
            let n = stdout.read_until(b'\n', &mut buf).await?;
            if n == 0 {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::ProcessExited);
            }

            let line = decode_lossy(&buf);
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !trimmed.starts_with('{') {
                noise += 1;
                if noise >= MAX_NOISE_LINES {
                    self.alive.store(false, Ordering::SeqCst);
                    return Err(TransportError::Decode { raw_len: buf.len() });
                }
                tracing::debug!(line = %trimmed, "skipping non-JSON stdout line");
                continue;
            }

            match serde_json::from_str::<RpcResponse>(trimmed) {
                Ok(resp) if resp.id == id => return Ok(resp),
                Ok(resp) => {
                    tracing::debug!(expected = id, got = resp.id, "response for another id, skipping");
                }
                Err(_) => {
                    // A JSON object that is not a response: usually a
                    // server-side notification. Skip it; if it does not
                    // even parse as JSON, count it as a decode failure.
                    if serde_json::from_str::<Value>(trimmed).is_err() {
                        return Err(TransportError::Decode { raw_len: buf.len() });
                    }
                    tracing::debug!("skipping non-response message");
                }
            }
        }
    }
}

fn broken_pipe() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "failed to capture child stdio")
}
