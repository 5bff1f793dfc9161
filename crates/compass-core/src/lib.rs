//! Compass Core - tool-augmented conversational agent
//!
//! This crate provides the pieces behind the Compass chat service:
//! - Tool discovery from MCP hosts into an atomically swapped registry
//! - Per-session conversation history
//! - A model client abstraction with retries
//! - The orchestrator that alternates model calls and tool execution

pub mod config;
pub mod error;
pub mod host;
pub mod invoker;
pub mod message;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod schema;
pub mod service;
pub mod store;

pub use config::{AgentConfig, Config, ModelConfig, RetryConfig, ServerConfig, ToolHostConfig};
pub use error::{
    ConfigError, DiscoveryError, Error, ModelCallError, ModelErrorKind, PartialDiscoveryWarning,
    Result, SessionStoreError, ToolError, TurnError,
};
pub use host::{HostError, HostTool, McpToolHost, ToolHost};
pub use invoker::ToolInvoker;
pub use message::{
    Message, MessageBody, SessionId, ToolFailureKind, ToolInvocationRequest, ToolInvocationResult,
    DEFAULT_SESSION_ID,
};
pub use orchestrator::{Orchestrator, TurnOutcome, TurnState, DEFAULT_MAX_ITERATIONS};
pub use provider::{GenAiModelClient, ModelClient, ModelReply, RetryPolicy, RetryingModelClient};
pub use registry::{ConflictPolicy, DiscoveryReport, RegistrySnapshot, ToolRegistry, ToolSpec};
pub use schema::{ParamKind, ParameterSchema, ParameterSpec};
pub use service::{AgentService, HealthStatus};
pub use store::{ConversationStore, SessionGuard};
