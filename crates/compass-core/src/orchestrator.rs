//! Tool-calling loop
//!
//! One user turn moves through these states:
//!
//! ```text
//! AwaitingInput -> ModelCall -> Done
//!                     |  ^
//!                     v  |
//!                   ToolExec
//! ```
//!
//! The session stays locked for the whole turn, so a second request on the
//! same session sees the complete result of the first.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{ToolError, TurnError};
use crate::invoker::ToolInvoker;
use crate::message::{Message, ToolInvocationRequest, ToolInvocationResult};
use crate::provider::{ModelClient, ModelReply};
use crate::registry::{RegistrySnapshot, ToolRegistry};
use crate::store::{ConversationStore, SessionGuard};

/// Model calls allowed per user turn unless configured otherwise
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    AwaitingInput,
    ModelCall,
    ToolExec,
    Done,
    Error,
}

/// Result of a completed turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub response: String,
    pub session_id: String,
    /// Model calls made
    pub iterations: usize,
    /// Tool invocations executed
    pub tool_calls: usize,
}

pub struct Orchestrator {
    model: Arc<dyn ModelClient>,
    registry: Arc<ToolRegistry>,
    store: Arc<ConversationStore>,
    invoker: ToolInvoker,
    max_iterations: usize,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn ModelClient>,
        registry: Arc<ToolRegistry>,
        store: Arc<ConversationStore>,
    ) -> Self {
        Self {
            model,
            registry,
            store,
            invoker: ToolInvoker::new(Duration::from_secs(60)),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.invoker = ToolInvoker::new(timeout);
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// Run one user turn to completion.
    ///
    /// Messages appended before a failure stay in the history.
    pub async fn chat(&self, session_id: &str, message: &str) -> Result<TurnOutcome, TurnError> {
        let mut session = self.store.lock(session_id).await;
        debug!(session_id, state = ?TurnState::AwaitingInput, "Turn started");

        session.append(vec![Message::user(message)])?;
        let result = self.run_loop(&mut session).await;
        session.apply_retention();

        match &result {
            Ok(outcome) => info!(
                session_id,
                iterations = outcome.iterations,
                tool_calls = outcome.tool_calls,
                state = ?TurnState::Done,
                "Turn completed"
            ),
            Err(e) => warn!(session_id, state = ?TurnState::Error, "Turn failed: {}", e),
        }
        result
    }

    async fn run_loop(&self, session: &mut SessionGuard) -> Result<TurnOutcome, TurnError> {
        let mut iterations = 0;
        let mut tool_calls = 0;

        loop {
            if iterations >= self.max_iterations {
                error!(
                    session_id = %session.session_id(),
                    max_iterations = self.max_iterations,
                    "Loop limit exceeded"
                );
                return Err(TurnError::LoopLimitExceeded(self.max_iterations));
            }
            iterations += 1;

            let snapshot = self.registry.snapshot();
            debug!(
                session_id = %session.session_id(),
                iteration = iterations,
                state = ?TurnState::ModelCall,
                "Calling model"
            );
            let reply = self.model.complete(session.messages(), snapshot.tools()).await?;

            let (content, calls) = match reply {
                ModelReply::ToolCalls { content, calls } if !calls.is_empty() => (content, calls),
                ModelReply::ToolCalls { content, .. } | ModelReply::Text(content) => {
                    session.append(vec![Message::assistant(content.clone())])?;
                    return Ok(TurnOutcome {
                        response: content,
                        session_id: session.session_id().to_string(),
                        iterations,
                        tool_calls,
                    });
                }
            };

            debug!(
                session_id = %session.session_id(),
                iteration = iterations,
                state = ?TurnState::ToolExec,
                tools = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                "Executing tool calls"
            );
            session.append(vec![Message::assistant_with_tool_calls(content, calls.clone())])?;

            let results = self.execute_tools(snapshot, &calls).await;
            tool_calls += calls.len();

            let batch = calls
                .iter()
                .zip(results)
                .map(|(call, outcome)| Message::tool_result(&call.call_id, &call.name, outcome))
                .collect();
            session.append(batch)?;
        }
    }

    /// Run all calls concurrently; results come back in request order
    async fn execute_tools(
        &self,
        snapshot: Arc<RegistrySnapshot>,
        calls: &[ToolInvocationRequest],
    ) -> Vec<ToolInvocationResult> {
        let mut join_set = JoinSet::new();
        for (index, call) in calls.iter().enumerate() {
            let invoker = self.invoker.clone();
            let snapshot = snapshot.clone();
            let call = call.clone();
            join_set.spawn(async move { (index, invoker.invoke(&snapshot, &call).await) });
        }

        let mut results: Vec<Option<ToolInvocationResult>> = vec![None; calls.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => error!("Tool task failed: {:?}", e),
            }
        }

        results
            .into_iter()
            .zip(calls)
            .map(|(result, call)| {
                result.unwrap_or_else(|| {
                    ToolError::Execution(format!("tool '{}' stopped unexpectedly", call.name))
                        .into()
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelCallError;
    use crate::host::{HostError, HostTool, ToolHost};
    use crate::message::MessageBody;
    use crate::registry::ToolSpec;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Map, Value};
    use std::collections::VecDeque;

    /// Replays canned replies and records the history length it was shown
    struct Scripted {
        replies: Mutex<VecDeque<Result<ModelReply, ModelCallError>>>,
        seen: Mutex<Vec<usize>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<ModelReply, ModelCallError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ModelClient for Scripted {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            history: &[Message],
            _tools: &[ToolSpec],
        ) -> Result<ModelReply, ModelCallError> {
            self.seen.lock().push(history.len());
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(ModelReply::Text("out of script".into())))
        }
    }

    /// Always asks for another tool call
    struct Looping;

    #[async_trait]
    impl ModelClient for Looping {
        fn model(&self) -> &str {
            "looping"
        }

        async fn complete(&self, history: &[Message], _: &[ToolSpec]) -> Result<ModelReply, ModelCallError> {
            let id = format!("c{}", history.len());
            Ok(calls(&[(id.as_str(), "echo")]))
        }
    }

    struct EchoHost;

    #[async_trait]
    impl ToolHost for EchoHost {
        fn name(&self) -> &str {
            "echo-host"
        }

        async fn list_tools(&self) -> Result<Vec<HostTool>, HostError> {
            Ok(["echo", "slow_echo"]
                .iter()
                .map(|name| HostTool {
                    name: name.to_string(),
                    description: String::new(),
                    input_schema: json!({"type": "object"}),
                })
                .collect())
        }

        async fn call_tool(&self, tool: &str, args: Map<String, Value>) -> Result<String, HostError> {
            if tool == "slow_echo" {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Ok(format!("{}:{}", tool, Value::Object(args)))
        }
    }

    fn calls(specs: &[(&str, &str)]) -> ModelReply {
        ModelReply::ToolCalls {
            content: String::new(),
            calls: specs
                .iter()
                .map(|(id, name)| ToolInvocationRequest::new(*id, *name, json!({})))
                .collect(),
        }
    }

    async fn orchestrator(model: Arc<dyn ModelClient>) -> Orchestrator {
        let registry = Arc::new(ToolRegistry::default());
        let host: Arc<dyn ToolHost> = Arc::new(EchoHost);
        registry.discover(vec![host]).await.unwrap();
        Orchestrator::new(model, registry, Arc::new(ConversationStore::new()))
    }

    #[tokio::test]
    async fn text_reply_ends_turn() {
        let model = Scripted::new(vec![Ok(ModelReply::Text("hello".into()))]);
        let orch = orchestrator(model.clone()).await;

        let outcome = orch.chat("s", "hi").await.unwrap();
        assert_eq!(outcome.response, "hello");
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.tool_calls, 0);
        assert_eq!(orch.store().get("s").await.len(), 2);
        assert_eq!(*model.seen.lock(), vec![1]);
    }

    #[tokio::test]
    async fn tool_results_follow_request_order() {
        let model = Scripted::new(vec![
            Ok(calls(&[("a", "slow_echo"), ("b", "echo")])),
            Ok(ModelReply::Text("done".into())),
        ]);
        let orch = orchestrator(model.clone()).await;

        let outcome = orch.chat("s", "go").await.unwrap();
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.tool_calls, 2);

        let history = orch.store().get("s").await;
        assert_eq!(history.len(), 5);
        let ids: Vec<_> = history
            .iter()
            .filter_map(|m| match &m.body {
                MessageBody::ToolResult { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        // Second model call saw user + request + both results
        assert_eq!(*model.seen.lock(), vec![1, 4]);
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_to_model() {
        let model = Scripted::new(vec![
            Ok(calls(&[("x", "teleport")])),
            Ok(ModelReply::Text("sorry".into())),
        ]);
        let orch = orchestrator(model).await;

        let outcome = orch.chat("s", "go").await.unwrap();
        assert_eq!(outcome.response, "sorry");
        let history = orch.store().get("s").await;
        assert!(history[2].text().starts_with("Error: Tool not found"));
    }

    #[tokio::test]
    async fn loop_limit_keeps_partial_history() {
        let orch = orchestrator(Arc::new(Looping)).await.with_max_iterations(3);

        let err = orch.chat("s", "spin").await.unwrap_err();
        assert!(matches!(err, TurnError::LoopLimitExceeded(3)));
        // user + 3 x (request + result)
        assert_eq!(orch.store().get("s").await.len(), 7);
    }

    #[tokio::test]
    async fn model_failure_aborts_turn() {
        let model = Scripted::new(vec![Err(ModelCallError::permanent("unauthorized"))]);
        let orch = orchestrator(model).await;

        let err = orch.chat("s", "hi").await.unwrap_err();
        assert!(matches!(err, TurnError::Model(_)));
        assert_eq!(orch.store().get("s").await.len(), 1);
    }

    #[tokio::test]
    async fn empty_tool_call_list_is_a_final_answer() {
        let model = Scripted::new(vec![Ok(ModelReply::ToolCalls {
            content: "nothing to run".into(),
            calls: Vec::new(),
        })]);
        let orch = orchestrator(model).await;

        let outcome = orch.chat("s", "hi").await.unwrap();
        assert_eq!(outcome.response, "nothing to run");
        assert_eq!(outcome.iterations, 1);
    }
}
