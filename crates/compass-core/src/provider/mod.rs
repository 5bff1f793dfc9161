//! Model client abstraction
//!
//! The orchestrator talks to the inference backend through the
//! [`ModelClient`] trait. [`GenAiModelClient`] reaches real providers via
//! the genai framework; [`RetryingModelClient`] wraps any client with
//! bounded retries for transient failures.

mod genai_client;
mod logging;
mod retry;

pub use genai_client::{adapter_kind, GenAiModelClient};
pub use logging::{log_model_interaction, LogConfig, LOG_FILE_ENV};
pub use retry::{RetryPolicy, RetryingModelClient};

use async_trait::async_trait;

use crate::error::ModelCallError;
use crate::message::{Message, ToolInvocationRequest};
use crate::registry::ToolSpec;

/// What the model produced for one request
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    /// Final answer
    Text(String),
    /// The model wants tools run before it answers
    ToolCalls {
        content: String,
        calls: Vec<ToolInvocationRequest>,
    },
}

impl ModelReply {
    pub fn has_tool_calls(&self) -> bool {
        matches!(self, Self::ToolCalls { calls, .. } if !calls.is_empty())
    }
}

/// Stateless adapter to an inference backend
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Model identifier, for logging
    fn model(&self) -> &str;

    async fn complete(
        &self,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelReply, ModelCallError>;
}

#[async_trait]
impl<M: ModelClient + ?Sized> ModelClient for std::sync::Arc<M> {
    fn model(&self) -> &str {
        (**self).model()
    }

    async fn complete(
        &self,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelReply, ModelCallError> {
        (**self).complete(history, tools).await
    }
}
