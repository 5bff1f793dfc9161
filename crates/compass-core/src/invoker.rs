//! Tool Invoker
//!
//! Runs one model-requested tool call against the host that owns it. Every
//! failure is turned into a [`ToolInvocationResult::Failure`] so it can be
//! reported back to the model; nothing here aborts a turn.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ToolError;
use crate::host::HostError;
use crate::message::{ToolInvocationRequest, ToolInvocationResult};
use crate::registry::RegistrySnapshot;

#[derive(Debug, Clone)]
pub struct ToolInvoker {
    timeout: Duration,
}

impl ToolInvoker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Invoke a tool. Never retried.
    pub async fn invoke(
        &self,
        snapshot: &RegistrySnapshot,
        request: &ToolInvocationRequest,
    ) -> ToolInvocationResult {
        match self.try_invoke(snapshot, request).await {
            Ok(output) => {
                debug!(tool = %request.name, call_id = %request.call_id, "Tool succeeded");
                ToolInvocationResult::success(output)
            }
            Err(e) => {
                warn!(tool = %request.name, call_id = %request.call_id, "Tool failed: {}", e);
                e.into()
            }
        }
    }

    async fn try_invoke(
        &self,
        snapshot: &RegistrySnapshot,
        request: &ToolInvocationRequest,
    ) -> Result<String, ToolError> {
        let spec = snapshot
            .get(&request.name)
            .ok_or_else(|| ToolError::NotFound(request.name.clone()))?;
        let host = snapshot
            .host_for(&request.name)
            .ok_or_else(|| ToolError::NotFound(request.name.clone()))?;

        spec.parameters
            .validate(&request.arguments)
            .map_err(ToolError::InvalidArguments)?;

        let call = host.call_tool(&spec.remote_name, request.arguments.clone());
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(HostError::ToolFailed(message))) => Err(ToolError::Execution(message)),
            Ok(Err(e)) => Err(ToolError::Execution(format!(
                "tool '{}' on host '{}' failed: {}",
                spec.remote_name, spec.host, e
            ))),
            Err(_) => Err(ToolError::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostTool, ToolHost};
    use crate::message::ToolFailureKind;
    use crate::registry::ToolRegistry;
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::sync::Arc;

    struct GeoHost;

    #[async_trait]
    impl ToolHost for GeoHost {
        fn name(&self) -> &str {
            "geo"
        }

        async fn list_tools(&self) -> Result<Vec<HostTool>, HostError> {
            Ok(vec![
                HostTool {
                    name: "get_coordinates".into(),
                    description: "Geocode".into(),
                    input_schema: json!({
                        "type": "object",
                        "properties": {"address": {"type": "string"}},
                        "required": ["address"]
                    }),
                },
                HostTool {
                    name: "slow".into(),
                    description: String::new(),
                    input_schema: json!({"type": "object"}),
                },
                HostTool {
                    name: "broken".into(),
                    description: String::new(),
                    input_schema: json!({"type": "object"}),
                },
            ])
        }

        async fn call_tool(&self, tool: &str, args: Map<String, Value>) -> Result<String, HostError> {
            match tool {
                "get_coordinates" => Ok(format!("[30.3, 59.9] for {}", args["address"])),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok("late".into())
                }
                _ => Err(HostError::ToolFailed("geocoder quota exceeded".into())),
            }
        }
    }

    async fn snapshot() -> Arc<RegistrySnapshot> {
        let registry = ToolRegistry::default();
        let host: Arc<dyn ToolHost> = Arc::new(GeoHost);
        registry.discover(vec![host]).await.unwrap();
        registry.snapshot()
    }

    fn failure_kind(result: &ToolInvocationResult) -> Option<ToolFailureKind> {
        match result {
            ToolInvocationResult::Failure { kind, .. } => Some(*kind),
            ToolInvocationResult::Success { .. } => None,
        }
    }

    #[tokio::test]
    async fn invokes_owning_host() {
        let invoker = ToolInvoker::new(Duration::from_secs(1));
        let req = ToolInvocationRequest::new("c1", "get_coordinates", json!({"address": "Nevsky"}));
        let result = invoker.invoke(&*snapshot().await, &req).await;
        assert_eq!(result.content_for_model(), "[30.3, 59.9] for \"Nevsky\"");
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let invoker = ToolInvoker::new(Duration::from_secs(1));
        let req = ToolInvocationRequest::new("c1", "teleport", json!({}));
        let result = invoker.invoke(&*snapshot().await, &req).await;
        assert_eq!(failure_kind(&result), Some(ToolFailureKind::NotFound));
    }

    #[tokio::test]
    async fn bad_arguments_are_rejected_before_calling() {
        let invoker = ToolInvoker::new(Duration::from_secs(1));
        let req = ToolInvocationRequest::new("c1", "get_coordinates", json!({"address": 42}));
        let result = invoker.invoke(&*snapshot().await, &req).await;
        assert_eq!(failure_kind(&result), Some(ToolFailureKind::InvalidArguments));
    }

    #[tokio::test]
    async fn host_error_is_execution_failure() {
        let invoker = ToolInvoker::new(Duration::from_secs(1));
        let req = ToolInvocationRequest::new("c1", "broken", json!({}));
        let result = invoker.invoke(&*snapshot().await, &req).await;
        assert_eq!(failure_kind(&result), Some(ToolFailureKind::Execution));
        assert!(result.content_for_model().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let invoker = ToolInvoker::new(Duration::from_millis(50));
        let req = ToolInvocationRequest::new("c1", "slow", json!({}));
        let result = invoker.invoke(&*snapshot().await, &req).await;
        assert_eq!(failure_kind(&result), Some(ToolFailureKind::Timeout));
    }
}
