//! MCP client: talk to tool-server child processes over stdio.
//!
//! The [`ConnectionManager`] owns every configured server process, the
//! [`ToolCatalog`] maps tool names to the server that exposes them, and the
//! [`ToolRouter`] trait is the seam the execution engine calls through,
//! so tests can swap in a scripted router without spawning anything.

pub mod catalog;
pub mod manager;
pub mod protocol;
pub mod transport;

use std::time::Duration;

use serde_json::{Map, Value};

use maestro_domain::error::CallError;

pub use catalog::ToolCatalog;
pub use manager::ConnectionManager;

/// The call surface the execution engine depends on.
#[async_trait::async_trait]
pub trait ToolRouter: Send + Sync {
    /// The aggregated tool catalog (read-only after initialization).
    fn catalog(&self) -> &ToolCatalog;

    /// Invoke `tool` with `params`, bounded by `timeout`.
    async fn call_tool(
        &self,
        tool: &str,
        params: Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value, CallError>;
}
