//! MCP Client implementation

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::protocol::{methods, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::transport::Transport;
use crate::{McpError, McpTool, ServerCapabilities, PROTOCOL_VERSION};

/// MCP Client for connecting to MCP servers.
///
/// Requests go straight to the transport without a client-side lock, so
/// several `call_tool` invocations may be in flight at the same time.
pub struct McpClient<T: Transport> {
    transport: Arc<T>,
    request_id: AtomicI64,
    server_capabilities: Option<ServerCapabilities>,
}

impl<T: Transport> McpClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            request_id: AtomicI64::new(1),
            server_capabilities: None,
        }
    }

    fn next_id(&self) -> RequestId {
        RequestId::Number(self.request_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn server_capabilities(&self) -> Option<&ServerCapabilities> {
        self.server_capabilities.as_ref()
    }

    /// Initialize the connection
    pub async fn initialize(&mut self, client_info: ClientInfo) -> Result<ServerInfo, McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": client_info.name,
                "version": client_info.version
            }
        });

        let request = JsonRpcRequest::new(self.next_id(), methods::INITIALIZE).with_params(params);
        let result = self.send_request(request).await?;

        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::Protocol(e.to_string()))?;
        self.server_capabilities = Some(init.capabilities);

        self.transport
            .notify(JsonRpcNotification::new(methods::INITIALIZED))
            .await?;

        debug!(
            server = %init.server_info.name,
            protocol = %init.protocol_version,
            "MCP session initialized"
        );

        Ok(ServerInfo {
            name: init.server_info.name,
            version: init.server_info.version,
        })
    }

    /// List available tools
    pub async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        let request = JsonRpcRequest::new(self.next_id(), methods::TOOLS_LIST)
            .with_params(serde_json::json!({}));
        let result = self.send_request(request).await?;

        let tools_result: ToolsListResult =
            serde_json::from_value(result).map_err(|e| McpError::Protocol(e.to_string()))?;
        Ok(tools_result.tools)
    }

    /// Call a tool
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, McpError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments
        });

        let request = JsonRpcRequest::new(self.next_id(), methods::TOOLS_CALL).with_params(params);
        let result = self.send_request(request).await?;

        serde_json::from_value(result).map_err(|e| McpError::Protocol(e.to_string()))
    }

    pub async fn close(&self) -> Result<(), McpError> {
        self.transport.close().await
    }

    async fn send_request(&self, request: JsonRpcRequest) -> Result<serde_json::Value, McpError> {
        let method = request.method.clone();
        let response: JsonRpcResponse = self.transport.request(request).await?;

        if let Some(error) = response.error {
            debug!(method = %method, code = error.code, "MCP server returned error");
            return Err(McpError::Server {
                code: error.code,
                message: error.message,
            });
        }

        response
            .result
            .ok_or_else(|| McpError::Protocol(format!("Empty response to {}", method)))
    }
}

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl ClientInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, serde::Deserialize)]
struct InitializeResult {
    #[serde(rename = "protocolVersion", default)]
    protocol_version: String,
    #[serde(default)]
    capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    server_info: ServerInfoInner,
}

#[derive(Debug, serde::Deserialize)]
struct ServerInfoInner {
    name: String,
    #[serde(default)]
    version: String,
}

#[derive(Debug, serde::Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<McpTool>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolCallResult {
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Concatenate the text content items, newline separated.
    /// Non-text items are rendered as a placeholder naming their type.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|item| match &item.text {
                Some(text) => text.clone(),
                None => format!("[{} content]", item.content_type),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}
