//! Compass MCP - Model Context Protocol client
//!
//! This crate provides the client side of MCP for talking to remote tool
//! hosts: JSON-RPC framing, the HTTP/SSE transport, and a typed client for
//! the `initialize`, `tools/list` and `tools/call` methods.

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::{ClientInfo, ContentItem, McpClient, ServerInfo, ToolCallResult};
pub use transport::{SseTransport, Transport};

use serde::{Deserialize, Serialize};

/// MCP protocol version
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Tool definition in MCP format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: serde_json::Value,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// Server capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged", default)]
    pub list_changed: bool,
}

/// MCP errors
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Server error ({code}): {message}")]
    Server { code: i64, message: String },
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Connection closed")]
    Closed,
}
