//! LLM client for Maestro.
//!
//! One trait, two implementations: an HTTP client for any
//! chat-completions-shaped endpoint, and a deterministic mock for offline
//! demos and tests.

mod client;
mod mock;

pub use client::{ChatMessage, CompletionOptions, HttpLlmClient, LlmClient};
pub use mock::MockLlmClient;

use std::sync::Arc;

use maestro_domain::config::LlmConfig;
use maestro_domain::error::Result;

/// Build the client the config asks for.
pub fn build_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    if config.provider == "mock" {
        Ok(Arc::new(MockLlmClient::new()))
    } else {
        Ok(Arc::new(HttpLlmClient::from_config(config)?))
    }
}
