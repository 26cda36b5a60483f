//! Deterministic mock client for offline demos and tests.
//!
//! Two lookup layers: an ordered script queue that always wins (for repair
//! flows where the same prompt must get different answers), then canned
//! responses keyed by substring match against the rendered prompt.

use std::collections::VecDeque;

use parking_lot::Mutex;

use maestro_domain::error::Result;

use crate::client::{ChatMessage, CompletionOptions, LlmClient};

pub struct MockLlmClient {
    rules: Vec<(String, String)>,
    script: Mutex<VecDeque<String>>,
    fallback: String,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            script: Mutex::new(VecDeque::new()),
            fallback: r#"{"tasks": [], "response": "I have no tool for that (mock mode)."}"#
                .to_string(),
        }
    }

    /// Respond with `response` whenever `needle` appears in the prompt.
    /// Rules match in registration order.
    pub fn on(mut self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push((needle.into(), response.into()));
        self
    }

    /// Queue a response consumed before any rule matching.
    pub fn push_script(self, response: impl Into<String>) -> Self {
        self.script.lock().push_back(response.into());
        self
    }

    pub fn with_fallback(mut self, response: impl Into<String>) -> Self {
        self.fallback = response.into();
        self
    }
}

#[async_trait::async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<String> {
        if let Some(scripted) = self.script.lock().pop_front() {
            return Ok(scripted);
        }

        let prompt: String = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        for (needle, response) in &self.rules {
            if prompt.contains(needle.as_str()) {
                return Ok(response.clone());
            }
        }
        Ok(self.fallback.clone())
    }
}
