//! Remote tool hosts
//!
//! A [`ToolHost`] is one remote process serving tools. The registry asks
//! each host for its tool list; the invoker calls tools through the host
//! that advertised them.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use compass_mcp::{ClientInfo, McpClient, McpError, McpTool, SseTransport};

use crate::config::ToolHostConfig;

/// Tool description as advertised by a host
pub type HostTool = McpTool;

#[derive(Error, Debug, Clone)]
pub enum HostError {
    #[error("host unavailable: {0}")]
    Unavailable(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// The tool ran and reported failure
    #[error("{0}")]
    ToolFailed(String),
}

impl From<McpError> for HostError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::Transport(_) | McpError::Timeout(_) | McpError::Closed => {
                HostError::Unavailable(err.to_string())
            }
            McpError::Protocol(_) | McpError::Server { .. } => HostError::Protocol(err.to_string()),
        }
    }
}

#[async_trait]
pub trait ToolHost: Send + Sync {
    fn name(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<HostTool>, HostError>;

    /// Call a tool by its name on this host and return its text output
    async fn call_tool(&self, tool: &str, arguments: Map<String, Value>) -> Result<String, HostError>;
}

/// A tool host reached over MCP's SSE transport.
///
/// Connects lazily and reconnects after the stream is lost.
pub struct McpToolHost {
    config: ToolHostConfig,
    client: Mutex<Option<Arc<McpClient<SseTransport>>>>,
}

impl McpToolHost {
    pub fn new(config: ToolHostConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    async fn client(&self) -> Result<Arc<McpClient<SseTransport>>, McpError> {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        debug!(host = %self.config.name, url = %self.config.url, "Connecting to tool host");
        let transport = SseTransport::connect(&self.config.url, self.config.timeout()).await?;
        let mut client = McpClient::new(transport);
        let server = client
            .initialize(ClientInfo::new(
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
            ))
            .await?;
        info!(
            host = %self.config.name,
            server = %server.name,
            version = %server.version,
            "Connected to tool host"
        );

        let client = Arc::new(client);
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Forget a broken connection so the next call reconnects
    async fn on_error(&self, err: &McpError) {
        if matches!(err, McpError::Transport(_) | McpError::Closed) {
            warn!(host = %self.config.name, "Dropping tool host connection: {}", err);
            *self.client.lock().await = None;
        }
    }
}

#[async_trait]
impl ToolHost for McpToolHost {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn list_tools(&self) -> Result<Vec<HostTool>, HostError> {
        let client = self.client().await?;
        match client.list_tools().await {
            Ok(tools) => Ok(tools),
            Err(e) => {
                self.on_error(&e).await;
                Err(e.into())
            }
        }
    }

    async fn call_tool(&self, tool: &str, arguments: Map<String, Value>) -> Result<String, HostError> {
        let client = self.client().await?;
        let result = match client.call_tool(tool, Value::Object(arguments)).await {
            Ok(result) => result,
            Err(e) => {
                self.on_error(&e).await;
                return Err(e.into());
            }
        };

        let text = result.text();
        if result.is_error {
            let message = if text.is_empty() {
                format!("tool '{}' reported an error", tool)
            } else {
                text
            };
            return Err(HostError::ToolFailed(message));
        }
        Ok(text)
    }
}
