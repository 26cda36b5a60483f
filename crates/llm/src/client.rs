//! The HTTP LLM client.
//!
//! Speaks the `chat/completions` wire shape. Model families differ in
//! sampling parameters: reasoning models (detected by name prefix) take
//! `max_completion_tokens` + `reasoning_effort` and pin temperature to 1.0,
//! classic models take `max_tokens` and whatever temperature the caller
//! asked for.

use serde_json::Value;

use maestro_domain::config::LlmConfig;
use maestro_domain::error::{Error, Result};
use maestro_domain::text::safe_text;

/// Model-name prefixes that select the reasoning parameter family.
const REASONING_PREFIXES: &[&str] = &["gpt-5", "o1", "o3", "o4"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".into(), content: content.into() }
    }
}

/// Per-call overrides on top of the configured defaults.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The one call the rest of the runtime makes: messages in, text out.
/// Responses are consumed whole; there is no streaming surface.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HttpLlmClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        if config.api_key.is_none() {
            return Err(Error::Config(
                "LLM_API_KEY is required for a non-mock provider".into(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Llm(format!("building HTTP client: {e}")))?;
        Ok(Self { config: config.clone(), http })
    }
}

#[async_trait::async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String> {
        let body = chat_body(&self.config, messages, options);
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let api_key = self.config.api_key.as_deref().unwrap_or_default();

        tracing::debug!(model = %self.config.model, "LLM request");
        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Llm(format!("request failed: {e}")))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| Error::Llm(format!("unreadable response: {e}")))?;

        if !status.is_success() {
            let detail = payload["error"]["message"].as_str().unwrap_or("unknown error");
            return Err(Error::Llm(format!("provider returned {status}: {detail}")));
        }

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| Error::Llm("response has no message content".into()))?;
        Ok(content.to_string())
    }
}

/// Build the request body, switching parameter families by model name.
pub(crate) fn chat_body(
    config: &LlmConfig,
    messages: &[ChatMessage],
    options: &CompletionOptions,
) -> Value {
    let rendered: Vec<Value> = messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": m.role,
                "content": safe_text(&m.content),
            })
        })
        .collect();

    let mut body = serde_json::json!({
        "model": config.model,
        "messages": rendered,
    });

    let max_tokens = options.max_tokens.unwrap_or(config.max_tokens);
    if is_reasoning_model(&config.model) {
        body["max_completion_tokens"] = serde_json::json!(max_tokens);
        body["reasoning_effort"] = serde_json::json!(config.reasoning_effort.as_str());
        // Reasoning models reject any other sampling temperature.
        body["temperature"] = serde_json::json!(1.0);
    } else {
        body["max_tokens"] = serde_json::json!(max_tokens);
        body["temperature"] =
            serde_json::json!(options.temperature.unwrap_or(config.temperature));
    }
    body
}

pub(crate) fn is_reasoning_model(model: &str) -> bool {
    REASONING_PREFIXES.iter().any(|p| model.starts_with(p))
}
