//! Configuration management for Compass
//!
//! Handles loading the TOML configuration file, applying environment
//! overrides and validating that the service can start.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::registry::ConflictPolicy;

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "compass.toml";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Inference backend settings
    #[serde(default)]
    pub model: ModelConfig,
    /// Remote tool hosts, queried in this order
    #[serde(default = "default_tool_hosts")]
    pub tool_hosts: Vec<ToolHostConfig>,
    /// Orchestration loop settings
    #[serde(default)]
    pub agent: AgentConfig,
    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            tool_hosts: default_tool_hosts(),
            agent: AgentConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `COMPASS_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides using an arbitrary variable lookup
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(model) = lookup("COMPASS_MODEL") {
            self.model.model = model;
        }
        if let Some(base_url) = lookup("COMPASS_BASE_URL") {
            self.model.base_url = Some(base_url);
        }
        if let Some(url) = lookup("COMPASS_MCP_URL") {
            self.tool_hosts = vec![ToolHostConfig::new(DEFAULT_HOST_NAME, url)];
        }
        if let Some(host) = lookup("COMPASS_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("COMPASS_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid COMPASS_PORT"),
            }
        }
        if self.model.api_key.is_none() {
            if let Some(key) = lookup(&self.model.api_key_env) {
                self.model.api_key = Some(key);
            }
        }
    }

    /// Hosts that take part in discovery
    pub fn enabled_hosts(&self) -> impl Iterator<Item = &ToolHostConfig> {
        self.tool_hosts.iter().filter(|h| h.enabled)
    }

    /// Check that the service can start with this configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.resolve_api_key().is_none() {
            return Err(ConfigError::MissingCredential {
                env: self.model.api_key_env.clone(),
            });
        }
        if self.model.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model.model must not be empty".into()));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "agent.max_iterations must be at least 1".into(),
            ));
        }
        let mut names = std::collections::HashSet::new();
        for host in &self.tool_hosts {
            if !names.insert(host.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "tool host name '{}' is used more than once",
                    host.name
                )));
            }
            if host.url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "tool host '{}' has an empty url",
                    host.name
                )));
            }
        }
        Ok(())
    }
}

/// Inference backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// genai adapter kind: "openai", "anthropic", "gemini", ...
    pub provider: String,
    /// Model to use
    pub model: String,
    /// Base URL for an OpenAI-compatible endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// API key (can be loaded from env)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Environment variable name for API key
    pub api_key_env: String,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub system_prompt: String,
    /// Per-attempt timeout
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "minimax/minimax-m2".to_string(),
            base_url: Some("https://openrouter.ai/api/v1".to_string()),
            api_key: None,
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            temperature: 0.7,
            max_tokens: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            timeout_secs: 120,
        }
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant for geographic questions. \
Use the available tools to look up coordinates and routes, and answer with the concrete \
values they return.";

impl ModelConfig {
    /// Get the API key, checking the environment variable if not set directly
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub const DEFAULT_HOST_NAME: &str = "local-sse-server";

fn default_tool_hosts() -> Vec<ToolHostConfig> {
    vec![ToolHostConfig::new(DEFAULT_HOST_NAME, "http://localhost:8000/sse")]
}

/// One remote MCP tool host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolHostConfig {
    pub name: String,
    /// SSE endpoint URL
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Connect and request timeout
    #[serde(default = "default_host_timeout")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_host_timeout() -> u64 {
    30
}

impl ToolHostConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            enabled: true,
            timeout_secs: default_host_timeout(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Orchestration loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Model calls allowed per user turn
    pub max_iterations: usize,
    pub tool_timeout_secs: u64,
    /// Drop oldest whole turns once a session holds more messages than this
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retained_messages: Option<usize>,
    pub conflict_policy: ConflictPolicy,
    pub retry: RetryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            tool_timeout_secs: 60,
            max_retained_messages: None,
            conflict_policy: ConflictPolicy::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// Backoff settings for transient model failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8000,
        }
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
        }
    }
}
