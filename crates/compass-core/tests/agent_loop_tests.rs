//! Agent loop integration tests
//!
//! Drives the agent service end to end with a rule-based model and
//! in-process tool hosts.

use async_trait::async_trait;
use compass_core::{
    AgentService, Config, HostError, HostTool, Message, MessageBody, ModelCallError, ModelClient,
    ModelReply, ToolHost, ToolInvocationRequest, ToolSpec, TurnError,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Asks for coordinates when the user says "where", answers from the last
/// tool result, and echoes otherwise
struct RuleModel {
    delay: Duration,
    seen: Mutex<Vec<usize>>,
}

impl RuleModel {
    fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ModelClient for RuleModel {
    fn model(&self) -> &str {
        "rule-model"
    }

    async fn complete(
        &self,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelReply, ModelCallError> {
        self.seen.lock().push(history.len());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let last = history
            .last()
            .ok_or_else(|| ModelCallError::permanent("empty history"))?;
        match &last.body {
            MessageBody::User { content } if content.contains("where") => {
                if !tools.iter().any(|t| t.name == "get_coordinates") {
                    return Ok(ModelReply::Text("I have no geocoder".into()));
                }
                Ok(ModelReply::ToolCalls {
                    content: String::new(),
                    calls: vec![ToolInvocationRequest::new(
                        format!("call_{}", history.len()),
                        "get_coordinates",
                        json!({"address": content.trim_start_matches("where is ")}),
                    )],
                })
            }
            MessageBody::ToolResult { .. } => {
                Ok(ModelReply::Text(format!("Coordinates: {}", last.text())))
            }
            _ => Ok(ModelReply::Text(format!("echo: {}", last.text()))),
        }
    }
}

struct GeoHost {
    fail: bool,
}

#[async_trait]
impl ToolHost for GeoHost {
    fn name(&self) -> &str {
        "geo"
    }

    async fn list_tools(&self) -> Result<Vec<HostTool>, HostError> {
        Ok(vec![HostTool {
            name: "get_coordinates".into(),
            description: "Geocode an address".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"address": {"type": "string"}},
                "required": ["address"]
            }),
        }])
    }

    async fn call_tool(&self, _tool: &str, args: Map<String, Value>) -> Result<String, HostError> {
        if self.fail {
            return Err(HostError::ToolFailed("geocoder is down".into()));
        }
        let address = args.get("address").and_then(Value::as_str).unwrap_or_default();
        Ok(format!("[37.6173, 55.7558] ({})", address))
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.model.api_key = Some("sk-test".into());
    config
}

async fn ready_service(model: Arc<dyn ModelClient>, fail_tools: bool) -> AgentService {
    let service = AgentService::new(test_config());
    let host: Arc<dyn ToolHost> = Arc::new(GeoHost { fail: fail_tools });
    service
        .initialize_with(model, vec![host])
        .await
        .expect("initialize");
    service
}

mod readiness_tests {
    use super::*;

    #[tokio::test]
    async fn test_chat_before_initialize_is_not_ready() {
        let service = AgentService::new(test_config());
        assert!(!service.is_ready());
        assert!(!service.health().agent_ready);

        let err = service.chat(None, "hi").await.unwrap_err();
        assert!(matches!(err, TurnError::NotReady));
    }

    #[tokio::test]
    async fn test_clear_allowed_before_initialize() {
        let service = AgentService::new(test_config());
        service.clear_history("anything").await;
        assert_eq!(service.health().status, "ok");
    }

    #[tokio::test]
    async fn test_initialize_marks_ready() {
        let service = ready_service(RuleModel::new(), false).await;
        assert!(service.is_ready());
        assert_eq!(service.registry().snapshot().names(), vec!["get_coordinates"]);
    }

    #[tokio::test]
    async fn test_refresh_tools_swaps_snapshot() {
        let service = ready_service(RuleModel::new(), false).await;
        let before = service.registry().snapshot();

        let report = service.refresh_tools().await.unwrap();
        assert_eq!(report.tool_count, 1);
        assert!(!Arc::ptr_eq(&before, &service.registry().snapshot()));
    }

    #[tokio::test]
    async fn test_initialize_without_hosts_is_text_only() {
        let service = AgentService::new(test_config());
        let report = service
            .initialize_with(RuleModel::new(), Vec::new())
            .await
            .unwrap();
        assert_eq!(report.tool_count, 0);

        let outcome = service.chat(None, "where is Red Square").await.unwrap();
        assert_eq!(outcome.response, "I have no geocoder");
    }
}

mod turn_tests {
    use super::*;

    #[tokio::test]
    async fn test_geocoding_turn() {
        let service = ready_service(RuleModel::new(), false).await;

        let outcome = service
            .chat(Some("s1"), "where is Red Square")
            .await
            .unwrap();
        assert!(outcome.response.contains("37.6173"));
        assert!(outcome.response.contains("55.7558"));
        assert_eq!(outcome.session_id, "s1");
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.tool_calls, 1);

        let history = service.store().get("s1").await;
        assert_eq!(history.len(), 4);
        assert!(history[0].is_user());
        assert_eq!(history[1].tool_calls().len(), 1);
        assert!(matches!(history[2].body, MessageBody::ToolResult { .. }));
        assert_eq!(history[3].text(), outcome.response);
    }

    #[tokio::test]
    async fn test_failing_tool_still_completes_turn() {
        let service = ready_service(RuleModel::new(), true).await;

        let outcome = service.chat(None, "where is Red Square").await.unwrap();
        assert!(outcome.response.contains("Error: Execution failed: geocoder is down"));
        assert_eq!(service.store().get("default").await.len(), 4);
    }

    #[tokio::test]
    async fn test_missing_session_uses_default() {
        let service = ready_service(RuleModel::new(), false).await;
        let outcome = service.chat(None, "hello").await.unwrap();
        assert_eq!(outcome.session_id, "default");
        assert_eq!(outcome.response, "echo: hello");
    }

    #[tokio::test]
    async fn test_history_grows_two_per_plain_turn() {
        let service = ready_service(RuleModel::new(), false).await;
        for n in 1..=5 {
            service.chat(Some("s"), &format!("message {}", n)).await.unwrap();
            assert_eq!(service.store().get("s").await.len(), 2 * n);
        }
    }

    #[tokio::test]
    async fn test_sequential_turns_see_prior_history() {
        let model = RuleModel::new();
        let service = ready_service(model.clone(), false).await;

        service.chat(Some("s"), "first").await.unwrap();
        service.chat(Some("s"), "second").await.unwrap();
        assert_eq!(*model.seen.lock(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_clear_resets_session() {
        let service = ready_service(RuleModel::new(), false).await;
        service.chat(Some("s"), "hello").await.unwrap();
        service.chat(Some("other"), "hello").await.unwrap();

        service.clear_history("s").await;
        service.clear_history("s").await;

        assert!(service.store().get("s").await.is_empty());
        assert_eq!(service.store().get("other").await.len(), 2);
    }
}

mod concurrency_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_session_turns_are_serialized() {
        let model = RuleModel::with_delay(Duration::from_millis(50));
        let service = Arc::new(ready_service(model.clone(), false).await);

        let a = {
            let service = service.clone();
            tokio::spawn(async move { service.chat(Some("s"), "one").await })
        };
        let b = {
            let service = service.clone();
            tokio::spawn(async move { service.chat(Some("s"), "two").await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        // Whichever ran second saw the first turn complete
        assert_eq!(*model.seen.lock(), vec![1, 3]);
        let history = service.store().get("s").await;
        assert_eq!(history.len(), 4);
        assert!(history[0].is_user());
        assert!(!history[1].is_user());
        assert!(history[2].is_user());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sessions_are_isolated() {
        let service = Arc::new(ready_service(RuleModel::new(), false).await);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move {
                    let session = format!("s{}", i);
                    service.chat(Some(&session), &format!("hi {}", i)).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for i in 0..8 {
            let history = service.store().get(&format!("s{}", i)).await;
            assert_eq!(history.len(), 2);
            assert_eq!(history[1].text(), format!("echo: hi {}", i));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_other_sessions_not_blocked_by_slow_turn() {
        let slow = RuleModel::with_delay(Duration::from_millis(300));
        let service = Arc::new(ready_service(slow, false).await);

        let guard = service.store().lock("busy").await;
        let started = std::time::Instant::now();
        service.chat(Some("free"), "hello").await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(guard);
    }
}
