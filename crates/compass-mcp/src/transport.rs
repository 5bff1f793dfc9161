//! MCP Transport layer implementations

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::protocol::{parse_response, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::McpError;

/// Transport trait for MCP communication.
///
/// Implementations must allow several requests to be in flight at once;
/// responses are matched to requests by id.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the matching response
    async fn request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError>;
    /// Send a notification (no response expected)
    async fn notify(&self, notification: JsonRpcNotification) -> Result<(), McpError>;
    async fn close(&self) -> Result<(), McpError>;
}

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>>;

/// Removes a pending entry when the waiting request is finished or dropped.
struct PendingGuard {
    pending: PendingMap,
    id: RequestId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// SSE transport for HTTP-based communication.
///
/// Opens a long-lived `GET` event stream; the server announces the URL to
/// post messages to in an `endpoint` event, and answers each posted request
/// with a `message` event on the stream.
pub struct SseTransport {
    sse_url: Url,
    endpoint: Url,
    client: reqwest::Client,
    pending: PendingMap,
    request_timeout: Duration,
    /// Set once the event stream has ended or the transport was closed
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl SseTransport {
    /// Connect to an SSE endpoint and wait for the message endpoint announcement
    pub async fn connect(url: &str, request_timeout: Duration) -> Result<Self, McpError> {
        let sse_url = Url::parse(url)
            .map_err(|e| McpError::Transport(format!("Invalid SSE URL '{}': {}", url, e)))?;
        let client = reqwest::Client::new();

        let response = tokio::time::timeout(
            request_timeout,
            client
                .get(sse_url.clone())
                .header(ACCEPT, "text/event-stream")
                .send(),
        )
        .await
        .map_err(|_| McpError::Timeout(request_timeout))?
        .map_err(|e| McpError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(McpError::Transport(format!(
                "SSE connection to {} failed with status {}",
                sse_url,
                response.status()
            )));
        }

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let reader = tokio::spawn(read_events(
            response,
            sse_url.clone(),
            endpoint_tx,
            pending.clone(),
            closed.clone(),
        ));

        let endpoint = match tokio::time::timeout(request_timeout, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                reader.abort();
                return Err(McpError::Closed);
            }
            Err(_) => {
                reader.abort();
                return Err(McpError::Timeout(request_timeout));
            }
        };

        info!(sse_url = %sse_url, endpoint = %endpoint, "SSE transport connected");

        Ok(Self {
            sse_url,
            endpoint,
            client,
            pending,
            request_timeout,
            closed,
            reader,
        })
    }

    pub fn sse_url(&self) -> &Url {
        &self.sse_url
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// True once the event stream is gone; every later call fails with `Closed`
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), McpError> {
        if self.is_closed() {
            Err(McpError::Closed)
        } else {
            Ok(())
        }
    }

    /// POST a message to the endpoint.
    ///
    /// Some servers answer inline with a JSON body instead of over the
    /// stream; such a response is returned directly.
    async fn post(&self, message: &impl Serialize) -> Result<Option<JsonRpcResponse>, McpError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(message)
            .send()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Transport(format!(
                "POST {} failed with status {}: {}",
                self.endpoint, status, body
            )));
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/json"))
            .unwrap_or(false);

        if !is_json {
            return Ok(None);
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| McpError::Protocol(e.to_string()))?;
        Ok(parse_response(value))
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        let (tx, rx) = oneshot::channel();
        let id = request.id.clone();
        self.pending.lock().insert(id.clone(), tx);
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            id,
        };
        // Checked after registering: the reader sets the flag before it
        // drops pending senders, so no request can be left waiting
        self.ensure_open()?;

        if let Some(inline) = self.post(&request).await? {
            return Ok(inline);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(McpError::Closed),
            Err(_) => Err(McpError::Timeout(self.request_timeout)),
        }
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<(), McpError> {
        self.ensure_open()?;
        self.post(&notification).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), McpError> {
        self.closed.store(true, Ordering::Release);
        self.reader.abort();
        self.pending.lock().clear();
        Ok(())
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Read the event stream, routing responses to their waiting requests
async fn read_events(
    response: reqwest::Response,
    base: Url,
    endpoint_tx: oneshot::Sender<Url>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
) {
    let mut stream = response.bytes_stream().eventsource();
    let mut endpoint_tx = Some(endpoint_tx);

    while let Some(event) = stream.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!(url = %base, "SSE stream error: {}", e);
                break;
            }
        };

        match event.event.as_str() {
            "endpoint" => match base.join(event.data.trim()) {
                Ok(url) => {
                    if let Some(tx) = endpoint_tx.take() {
                        let _ = tx.send(url);
                    }
                }
                Err(e) => warn!(data = %event.data, "Invalid endpoint event: {}", e),
            },
            "message" | "" => {
                let value: Value = match serde_json::from_str(&event.data) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("Discarding malformed SSE message: {}", e);
                        continue;
                    }
                };
                let Some(response) = parse_response(value) else {
                    debug!("Ignoring server-initiated message");
                    continue;
                };
                let waiter = pending.lock().remove(&response.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!(id = %response.id, "No pending request for response"),
                }
            }
            other => debug!(event = other, "Ignoring SSE event"),
        }
    }

    info!(url = %base, "SSE stream closed");
    closed.store(true, Ordering::Release);
    // Dropping the senders wakes every waiter with a closed-channel error
    pending.lock().clear();
}
