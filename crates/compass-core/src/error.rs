//! Error types for Compass Core

use thiserror::Error;

/// Result type alias using Compass Error
pub type Result<T> = std::result::Result<T, Error>;

/// Compass error types, aggregated for startup paths
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Model error: {0}")]
    Model(#[from] ModelCallError),

    #[error("Turn failed: {0}")]
    Turn(#[from] TurnError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors. All of them stop the process at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No API key configured; set {env} or model.api_key")]
    MissingCredential { env: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Every configured tool host failed during discovery
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("All {} tool hosts failed: {}", .0.len(), format_warnings(.0))]
    AllHostsFailed(Vec<PartialDiscoveryWarning>),
}

fn format_warnings(warnings: &[PartialDiscoveryWarning]) -> String {
    warnings
        .iter()
        .map(|w| format!("{}: {}", w.host, w.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// One host that failed while others succeeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialDiscoveryWarning {
    pub host: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelErrorKind {
    /// Transport failure, timeout, rate limit or 5xx. Worth retrying.
    Transient,
    /// Auth, malformed request or malformed provider response.
    Permanent,
}

/// Failure talking to the inference backend
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ModelCallError {
    pub kind: ModelErrorKind,
    pub message: String,
}

impl ModelCallError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ModelErrorKind::Transient
    }

    /// Classify an HTTP status from the provider
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            408 | 429 | 500..=599 => Self::transient(message),
            _ => Self::permanent(message),
        }
    }
}

/// Tool-specific errors. These become tool-result messages and never
/// abort a turn.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Tool timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Conversation store integrity violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionStoreError {
    #[error("Tool result {call_id} does not answer an outstanding tool call")]
    UnmatchedToolResult { call_id: String },
}

/// Reasons a chat turn can fail
#[derive(Error, Debug)]
pub enum TurnError {
    #[error("Exceeded the limit of {0} model calls in one turn")]
    LoopLimitExceeded(usize),

    #[error("Model call failed: {0}")]
    Model(#[from] ModelCallError),

    #[error("Conversation store error: {0}")]
    Store(#[from] SessionStoreError),

    #[error("Agent is not ready")]
    NotReady,
}
