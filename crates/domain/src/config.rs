//! Configuration for the Maestro runtime.
//!
//! One TOML document with four sections: `connection`, `llm`, `agent`, `ui`.
//! Every recognized option is declared here; unknown keys are rejected at
//! load time rather than silently ignored.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub ui: UiConfig,
}

impl Config {
    /// Load the config from `path`, or from `$MAESTRO_CONFIG`, or from
    /// `config.toml` in the working directory.
    ///
    /// A missing *default* path yields `Config::default()` so the mock
    /// provider works out of the box; a missing *explicit* path is an error.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match std::env::var("MAESTRO_CONFIG") {
                Ok(p) => (PathBuf::from(p), true),
                Err(_) => (PathBuf::from("config.toml"), false),
            },
        };

        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            toml::from_str::<Config>(&raw)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
        } else if explicit {
            return Err(Error::Config(format!("config file not found: {}", path.display())));
        } else {
            tracing::debug!("no config.toml found, using defaults");
            Config::default()
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Fold recognized environment variables into the config.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            if !key.is_empty() {
                self.llm.api_key = Some(key);
            }
        }
        if let Ok(raw) = std::env::var("SURROGATE_POLICY") {
            match raw.parse::<SurrogatePolicy>() {
                Ok(policy) => self.agent.surrogate_policy = policy,
                Err(_) => {
                    tracing::warn!(value = %raw, "unrecognized SURROGATE_POLICY, keeping default");
                }
            }
        }
    }

    /// Reject configurations the runtime cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.llm.provider != "mock" && self.llm.api_key.is_none() {
            return Err(Error::Config(
                "LLM_API_KEY is required unless llm.provider = \"mock\"".into(),
            ));
        }
        if self.agent.max_attempts == 0 {
            return Err(Error::Config("agent.max_attempts must be at least 1".into()));
        }
        if self.agent.tool_timeout_seconds == 0 {
            return Err(Error::Config("agent.tool_timeout_seconds must be at least 1".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for server in &self.connection.servers {
            if !seen.insert(server.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate server name '{}' in connection.servers",
                    server.name
                )));
            }
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool-server connections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

/// One tool-server child process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    /// `"openai"` for any chat-completions endpoint, `"mock"` for offline runs.
    #[serde(default = "d_provider")]
    pub provider: String,
    #[serde(default = "d_model")]
    pub model: String,
    #[serde(default = "d_base_url")]
    pub base_url: String,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    /// Only sent for reasoning-family models.
    #[serde(default)]
    pub reasoning_effort: ReasoningEffort,
    /// Populated from `LLM_API_KEY`; never serialized back out.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: d_provider(),
            model: d_model(),
            base_url: d_base_url(),
            temperature: d_temperature(),
            max_tokens: d_max_tokens(),
            reasoning_effort: ReasoningEffort::default(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    #[default]
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent behavior
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Maximum attempts per task before it transitions to `failed`.
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
    /// Per-call deadline for tool servers, in seconds.
    #[serde(default = "d_tool_timeout")]
    pub tool_timeout_seconds: u64,
    /// How many recent conversation entries feed the planning prompt.
    #[serde(default = "d_max_context")]
    pub max_context_entries: usize,
    /// Optional AGENT.md-style instruction file injected into the planner.
    #[serde(default)]
    pub custom_instructions_path: Option<PathBuf>,
    /// When `true`, a final LLM call turns raw results into a sentence.
    #[serde(default = "d_true")]
    pub interpret_results: bool,
    /// Where session state lives on disk.
    #[serde(default = "d_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub surrogate_policy: SurrogatePolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_attempts: d_max_attempts(),
            tool_timeout_seconds: d_tool_timeout(),
            max_context_entries: d_max_context(),
            custom_instructions_path: None,
            interpret_results: d_true(),
            state_dir: d_state_dir(),
            surrogate_policy: SurrogatePolicy::default(),
        }
    }
}

/// What to do with an unpaired surrogate when text crosses a boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SurrogatePolicy {
    /// Replace with `?`.
    #[default]
    Replace,
    /// Drop silently.
    Ignore,
    /// Keep the `\uXXXX` escape sequence visible.
    Escape,
}

impl std::str::FromStr for SurrogatePolicy {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "ignore" => Ok(Self::Ignore),
            "escape" => Ok(Self::Escape),
            _ => Err(()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// UI
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct UiConfig {
    #[serde(default)]
    pub mode: UiMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UiMode {
    #[default]
    Plain,
    Quiet,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Default helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_provider() -> String {
    "openai".into()
}
fn d_model() -> String {
    "gpt-4o-mini".into()
}
fn d_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_temperature() -> f32 {
    0.2
}
fn d_max_tokens() -> u32 {
    4096
}
fn d_max_attempts() -> u32 {
    3
}
fn d_tool_timeout() -> u64 {
    30
}
fn d_max_context() -> usize {
    10
}
fn d_true() -> bool {
    true
}
fn d_state_dir() -> PathBuf {
    PathBuf::from("./.maestro")
}
