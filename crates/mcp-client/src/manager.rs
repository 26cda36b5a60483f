//! The connection manager: every configured tool server, spawned and ready.
//!
//! Startup is strict: a server that fails to spawn or handshake aborts the
//! whole runtime (a configured tool fleet with holes in it would produce
//! plans that cannot run). After startup, a dead server only fails the
//! calls that need it, and the next call attempts one respawn.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::Mutex;

use maestro_domain::config::{ConnectionConfig, ServerConfig};
use maestro_domain::error::{CallError, CallErrorKind, Error, Result};
use maestro_domain::text::sanitize_value;
use maestro_domain::tool::ToolDescriptor;

use crate::catalog::ToolCatalog;
use crate::protocol::{self, CallOutcome, ToolList};
use crate::transport::{StdioTransport, TransportError};
use crate::ToolRouter;

/// Deadline for each handshake request.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

struct ServerSlot {
    config: ServerConfig,
    transport: Mutex<StdioTransport>,
}

pub struct ConnectionManager {
    servers: HashMap<String, ServerSlot>,
    catalog: ToolCatalog,
}

impl ConnectionManager {
    /// An empty manager for configurations with no tool servers.
    pub fn empty() -> Self {
        Self {
            servers: HashMap::new(),
            catalog: ToolCatalog::new(),
        }
    }

    /// Spawn and handshake every configured server.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let mut servers = HashMap::new();
        let mut catalog = ToolCatalog::new();

        for server_config in &config.servers {
            tracing::info!(
                server = %server_config.name,
                command = %server_config.command,
                "connecting tool server"
            );
            let transport = StdioTransport::spawn(server_config).map_err(|e| {
                Error::Connection(format!("spawning '{}': {e}", server_config.name))
            })?;
            let tools = handshake(&transport, &server_config.name).await?;
            tracing::info!(
                server = %server_config.name,
                tools = tools.len(),
                "tool server ready"
            );
            catalog.register(tools);
            servers.insert(
                server_config.name.clone(),
                ServerSlot {
                    config: server_config.clone(),
                    transport: Mutex::new(transport),
                },
            );
        }

        Ok(Self { servers, catalog })
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn tool_count(&self) -> usize {
        self.catalog.len()
    }

    /// Gracefully shut down all servers concurrently.
    pub async fn close(&self) {
        let shutdowns = self.servers.values().map(|slot| async {
            let transport = slot.transport.lock().await;
            transport.shutdown().await;
        });
        futures_util::future::join_all(shutdowns).await;
        tracing::info!(servers = self.servers.len(), "all tool servers closed");
    }

    async fn dispatch(
        &self,
        server_name: &str,
        tool: &str,
        arguments: Value,
        timeout: Duration,
    ) -> std::result::Result<Value, CallError> {
        let slot = self
            .servers
            .get(server_name)
            .ok_or_else(|| CallError::transport_closed(server_name))?;

        let transport = slot.transport.lock().await;

        // A server that died on an earlier call gets one respawn here; the
        // retry decision itself belongs to the execution engine.
        if !transport.is_alive() {
            drop(transport);
            self.respawn(slot).await?;
            return self.dispatch_once(slot, tool, arguments, timeout).await;
        }
        drop(transport);
        self.dispatch_once(slot, tool, arguments, timeout).await
    }

    async fn dispatch_once(
        &self,
        slot: &ServerSlot,
        tool: &str,
        arguments: Value,
        timeout: Duration,
    ) -> std::result::Result<Value, CallError> {
        let transport = slot.transport.lock().await;
        let response = transport
            .request("tools/call", Some(protocol::call_params(tool, arguments)), timeout)
            .await
            .map_err(|e| call_error_from_transport(e, &slot.config.name))?;

        let payload = response
            .into_result()
            .map_err(|e| CallError::new(e.kind(), e.to_string()))?;

        let raw_len = payload.to_string().len();
        let outcome: CallOutcome = serde_json::from_value(payload)
            .map_err(|_| CallError::decode_error(raw_len))?;

        if outcome.is_error {
            return Err(CallError::tool_error(outcome.text()));
        }
        Ok(outcome.into_value())
    }

    async fn respawn(&self, slot: &ServerSlot) -> std::result::Result<(), CallError> {
        tracing::warn!(server = %slot.config.name, "tool server is down, attempting respawn");
        let fresh = StdioTransport::spawn(&slot.config)
            .map_err(|_| CallError::transport_closed(&slot.config.name))?;
        handshake(&fresh, &slot.config.name)
            .await
            .map_err(|_| CallError::transport_closed(&slot.config.name))?;
        let mut transport = slot.transport.lock().await;
        *transport = fresh;
        tracing::info!(server = %slot.config.name, "tool server respawned");
        Ok(())
    }
}

#[async_trait::async_trait]
impl ToolRouter for ConnectionManager {
    fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    async fn call_tool(
        &self,
        tool: &str,
        params: Map<String, Value>,
        timeout: Duration,
    ) -> std::result::Result<Value, CallError> {
        let server_name = self
            .catalog
            .server_for(tool)
            .ok_or_else(|| CallError::unknown_tool(tool))?
            .to_string();

        // Scrub every string crossing the process boundary, then filter
        // against the declared schema.
        let mut arguments = Value::Object(params);
        sanitize_value(&mut arguments);
        let params = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let filtered = self.catalog.validate_params(tool, params)?;

        self.dispatch(&server_name, tool, Value::Object(filtered), timeout)
            .await
    }
}

/// Perform the three-step MCP handshake and return the discovered tools.
async fn handshake(transport: &StdioTransport, server: &str) -> Result<Vec<ToolDescriptor>> {
    let response = transport
        .request("initialize", Some(protocol::initialize_params()), HANDSHAKE_TIMEOUT)
        .await
        .map_err(|e| Error::Handshake(format!("'{server}' initialize: {e}")))?;
    response
        .into_result()
        .map_err(|e| Error::Handshake(format!("'{server}' initialize: {e}")))?;

    transport
        .notify("notifications/initialized")
        .await
        .map_err(|e| Error::Handshake(format!("'{server}' initialized notification: {e}")))?;

    let response = transport
        .request("tools/list", None, HANDSHAKE_TIMEOUT)
        .await
        .map_err(|e| Error::Handshake(format!("'{server}' tools/list: {e}")))?;
    let payload = response
        .into_result()
        .map_err(|e| Error::Handshake(format!("'{server}' tools/list: {e}")))?;

    let list: ToolList = serde_json::from_value(payload)
        .map_err(|e| Error::Handshake(format!("'{server}' tools/list payload: {e}")))?;

    Ok(list
        .tools
        .into_iter()
        .map(|info| info.into_descriptor(server))
        .collect())
}

fn call_error_from_transport(err: TransportError, server: &str) -> CallError {
    match err {
        TransportError::Timeout { seconds } => CallError::timeout(seconds),
        TransportError::Decode { raw_len } => CallError::decode_error(raw_len),
        TransportError::ProcessExited | TransportError::Io(_) => {
            CallError::transport_closed(server)
        }
        TransportError::Json(e) => {
            CallError::new(CallErrorKind::ToolError, format!("request encoding: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_map_to_call_kinds() {
        let timeout = call_error_from_transport(TransportError::Timeout { seconds: 30 }, "s");
        assert_eq!(timeout.kind, CallErrorKind::Timeout);

        let decode = call_error_from_transport(TransportError::Decode { raw_len: 9 }, "s");
        assert_eq!(decode.kind, CallErrorKind::DecodeError);
        assert!(decode.message.contains('9'));

        let exited = call_error_from_transport(TransportError::ProcessExited, "calc");
        assert_eq!(exited.kind, CallErrorKind::TransportClosed);
        assert!(exited.message.contains("calc"));
    }

    #[test]
    fn empty_manager_has_no_tools() {
        let manager = ConnectionManager::empty();
        assert_eq!(manager.server_count(), 0);
        assert_eq!(manager.tool_count(), 0);
        assert!(manager.catalog().is_empty());
    }
}
