//! Agent service
//!
//! Owns configuration-driven startup: credential check, tool discovery and
//! model client construction. Until that has finished the service reports
//! itself as not ready and refuses chat turns.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{DiscoveryError, Result, TurnError};
use crate::host::{McpToolHost, ToolHost};
use crate::message::DEFAULT_SESSION_ID;
use crate::orchestrator::{Orchestrator, TurnOutcome};
use crate::provider::{GenAiModelClient, ModelClient, RetryPolicy, RetryingModelClient};
use crate::registry::{DiscoveryReport, ToolRegistry};
use crate::store::ConversationStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub agent_ready: bool,
}

pub struct AgentService {
    config: Config,
    store: Arc<ConversationStore>,
    registry: Arc<ToolRegistry>,
    orchestrator: OnceCell<Orchestrator>,
}

impl AgentService {
    pub fn new(config: Config) -> Self {
        let store = Arc::new(ConversationStore::with_retention(
            config.agent.max_retained_messages,
        ));
        let registry = Arc::new(ToolRegistry::new(config.agent.conflict_policy));
        Self {
            config,
            store,
            registry,
            orchestrator: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Validate configuration, discover tools from the configured MCP hosts
    /// and build the genai model client.
    pub async fn initialize(&self) -> Result<DiscoveryReport> {
        self.config.validate()?;

        let hosts: Vec<Arc<dyn ToolHost>> = self
            .config
            .enabled_hosts()
            .map(|host| Arc::new(McpToolHost::new(host.clone())) as Arc<dyn ToolHost>)
            .collect();

        let model = GenAiModelClient::from_config(&self.config.model)?;
        let policy = RetryPolicy::from_config(&self.config.agent.retry, self.config.model.timeout());
        let model: Arc<dyn ModelClient> = Arc::new(RetryingModelClient::new(model, policy));

        self.initialize_with(model, hosts).await
    }

    /// Finish startup with an explicit model client and host list
    pub async fn initialize_with(
        &self,
        model: Arc<dyn ModelClient>,
        hosts: Vec<Arc<dyn ToolHost>>,
    ) -> Result<DiscoveryReport> {
        let report = self.registry.discover(hosts).await?;
        for warning in &report.warnings {
            warn!(host = %warning.host, "Tool host unavailable: {}", warning.reason);
        }

        let orchestrator = Orchestrator::new(model.clone(), self.registry.clone(), self.store.clone())
            .with_max_iterations(self.config.agent.max_iterations)
            .with_tool_timeout(self.config.agent.tool_timeout());

        if self.orchestrator.set(orchestrator).is_err() {
            warn!("Agent service initialized more than once; keeping the first orchestrator");
        }

        info!(
            model = %model.model(),
            tools = report.tool_count,
            "Agent ready"
        );
        Ok(report)
    }

    pub fn is_ready(&self) -> bool {
        self.orchestrator.initialized()
    }

    /// Run one chat turn; a missing session id means the default session
    pub async fn chat(
        &self,
        session_id: Option<&str>,
        message: &str,
    ) -> std::result::Result<TurnOutcome, TurnError> {
        let orchestrator = self.orchestrator.get().ok_or(TurnError::NotReady)?;
        let session_id = session_id.unwrap_or(DEFAULT_SESSION_ID);
        orchestrator.chat(session_id, message).await
    }

    /// Clear a session's history. Idempotent; allowed before the agent is ready.
    pub async fn clear_history(&self, session_id: &str) {
        self.store.clear(session_id).await;
        info!(session_id, "History cleared");
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "ok",
            agent_ready: self.is_ready(),
        }
    }

    /// Re-run discovery against the configured hosts
    pub async fn refresh_tools(&self) -> std::result::Result<DiscoveryReport, DiscoveryError> {
        let report = self.registry.refresh().await?;
        info!(tools = report.tool_count, "Tool registry refreshed");
        Ok(report)
    }
}
