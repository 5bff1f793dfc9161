use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::{ModelClient, ModelReply};
use crate::config::RetryConfig;
use crate::error::ModelCallError;
use crate::message::Message;
use crate::registry::ToolSpec;

/// Backoff settings for [`RetryingModelClient`]
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Bound on each individual attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default(), Duration::from_secs(120))
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig, attempt_timeout: Duration) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            attempt_timeout,
        }
    }

    /// Exponential backoff: base * 2^attempt, capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Retries transient model failures with bounded exponential backoff.
///
/// Permanent failures are returned on the first occurrence. A timed out
/// attempt counts as transient.
pub struct RetryingModelClient<M: ModelClient> {
    inner: M,
    policy: RetryPolicy,
}

impl<M: ModelClient> RetryingModelClient<M> {
    pub fn new(inner: M, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }
}

#[async_trait]
impl<M: ModelClient> ModelClient for RetryingModelClient<M> {
    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn complete(
        &self,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelReply, ModelCallError> {
        let mut attempt = 0;
        loop {
            let result = tokio::time::timeout(
                self.policy.attempt_timeout,
                self.inner.complete(history, tools),
            )
            .await
            .unwrap_or_else(|_| {
                Err(ModelCallError::transient(format!(
                    "model call timed out after {:?}",
                    self.policy.attempt_timeout
                )))
            });

            match result {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_transient() && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay_for(attempt);
                    attempt += 1;
                    warn!(
                        model = %self.inner.model(),
                        attempt,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Transient model error, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
