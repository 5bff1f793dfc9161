//! Conversation message types
//!
//! A session's history is an ordered list of [`Message`]s. Assistant
//! messages that request tools are always followed by one
//! [`MessageBody::ToolResult`] per request, in request order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ToolError;

/// Unique identifier for a session
pub type SessionId = String;

/// Session used when a client does not name one
pub const DEFAULT_SESSION_ID: &str = "default";

/// A message in a session's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub body: MessageBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum MessageBody {
    User {
        content: String,
    },
    /// Final answer when `tool_calls` is empty, tool-call request otherwise
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolInvocationRequest>,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        outcome: ToolInvocationResult,
    },
}

impl Message {
    fn new(body: MessageBody) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            body,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageBody::User {
            content: content.into(),
        })
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageBody::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        })
    }

    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolInvocationRequest>,
    ) -> Self {
        Self::new(MessageBody::Assistant {
            content: content.into(),
            tool_calls,
        })
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        outcome: ToolInvocationResult,
    ) -> Self {
        Self::new(MessageBody::ToolResult {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            outcome,
        })
    }

    pub fn is_user(&self) -> bool {
        matches!(self.body, MessageBody::User { .. })
    }

    /// Tool calls requested by this message (empty unless assistant)
    pub fn tool_calls(&self) -> &[ToolInvocationRequest] {
        match &self.body {
            MessageBody::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    /// Text content, or the model-facing rendering of a tool result
    pub fn text(&self) -> String {
        match &self.body {
            MessageBody::User { content } | MessageBody::Assistant { content, .. } => {
                content.clone()
            }
            MessageBody::ToolResult { outcome, .. } => outcome.content_for_model(),
        }
    }
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationRequest {
    pub call_id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolInvocationRequest {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    NotFound,
    InvalidArguments,
    Execution,
    Timeout,
}

/// Outcome of one tool invocation. Always present, never pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolInvocationResult {
    Success { output: String },
    Failure { kind: ToolFailureKind, message: String },
}

impl ToolInvocationResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self::Success {
            output: output.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Text handed back to the model as the tool response
    pub fn content_for_model(&self) -> String {
        match self {
            Self::Success { output } => output.clone(),
            Self::Failure { message, .. } => format!("Error: {}", message),
        }
    }
}

impl From<ToolError> for ToolInvocationResult {
    fn from(err: ToolError) -> Self {
        let kind = match &err {
            ToolError::NotFound(_) => ToolFailureKind::NotFound,
            ToolError::InvalidArguments(_) => ToolFailureKind::InvalidArguments,
            ToolError::Execution(_) => ToolFailureKind::Execution,
            ToolError::Timeout(_) => ToolFailureKind::Timeout,
        };
        Self::Failure {
            kind,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_serializes_with_role_tag() {
        let msg = Message::assistant_with_tool_calls(
            "",
            vec![ToolInvocationRequest::new(
                "call_1",
                "get_coordinates",
                json!({"address": "Red Square"}),
            )],
        );
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["tool_calls"][0]["name"], "get_coordinates");
        assert!(value["id"].is_string());

        let parsed: Message = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn final_answer_omits_tool_calls() {
        let value = serde_json::to_value(Message::assistant("done")).unwrap();
        assert!(value.get("tool_calls").is_none());
    }

    #[test]
    fn non_object_arguments_become_empty() {
        let req = ToolInvocationRequest::new("c", "t", json!("oops"));
        assert!(req.arguments.is_empty());
    }

    #[test]
    fn tool_error_maps_to_failure_kind() {
        let result: ToolInvocationResult = ToolError::Timeout(std::time::Duration::from_secs(5)).into();
        match &result {
            ToolInvocationResult::Failure { kind, .. } => {
                assert_eq!(*kind, ToolFailureKind::Timeout)
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(result.content_for_model().starts_with("Error: Tool timed out"));
    }

    #[test]
    fn text_renders_tool_results() {
        let msg = Message::tool_result("c1", "echo", ToolInvocationResult::success("hi"));
        assert_eq!(msg.text(), "hi");
        assert!(!msg.is_user());
        assert!(msg.tool_calls().is_empty());
    }
}
