//! Tool Registry
//!
//! Discovers tool schemas from the configured hosts and publishes them as
//! an immutable [`RegistrySnapshot`]. A new discovery replaces the whole
//! snapshot in one swap; readers holding the previous `Arc` are unaffected.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{DiscoveryError, PartialDiscoveryWarning};
use crate::host::{HostTool, ToolHost};
use crate::schema::ParameterSchema;

/// How to resolve two hosts advertising the same tool name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The host later in configuration order wins
    #[default]
    LastWins,
    /// Every tool is exposed as `<host>__<tool>`
    Namespace,
}

/// A callable tool, immutable after discovery
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Name exposed to the model, unique within a snapshot
    pub name: String,
    pub description: String,
    /// Owning host
    pub host: String,
    /// Name on the owning host
    pub remote_name: String,
    pub parameters: ParameterSchema,
    /// Raw JSON schema forwarded to the model
    pub input_schema: Value,
}

impl ToolSpec {
    fn from_host_tool(host: &str, tool: HostTool, policy: ConflictPolicy) -> Self {
        let name = match policy {
            ConflictPolicy::LastWins => tool.name.clone(),
            ConflictPolicy::Namespace => namespaced_name(host, &tool.name),
        };
        Self {
            name,
            description: tool.description,
            host: host.to_string(),
            remote_name: tool.name,
            parameters: ParameterSchema::from_json_schema(&tool.input_schema),
            input_schema: tool.input_schema,
        }
    }
}

/// `<host>__<tool>` with dashes replaced by underscores
pub fn namespaced_name(host: &str, tool: &str) -> String {
    format!("{}__{}", host.replace('-', "_"), tool.replace('-', "_"))
}

/// The tools known after one successful discovery
#[derive(Default)]
pub struct RegistrySnapshot {
    tools: Vec<ToolSpec>,
    index: HashMap<String, usize>,
    hosts: HashMap<String, Arc<dyn ToolHost>>,
}

impl RegistrySnapshot {
    /// Tools in host order, then host-reported order
    pub fn tools(&self) -> &[ToolSpec] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// Handle to the host that owns the named tool
    pub fn host_for(&self, name: &str) -> Option<Arc<dyn ToolHost>> {
        let spec = self.get(name)?;
        self.hosts.get(&spec.host).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for RegistrySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrySnapshot")
            .field("tools", &self.names())
            .finish()
    }
}

/// Result of a discovery run that produced a usable snapshot
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub tool_count: usize,
    pub warnings: Vec<PartialDiscoveryWarning>,
}

pub struct ToolRegistry {
    policy: ConflictPolicy,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    hosts: RwLock<Vec<Arc<dyn ToolHost>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(ConflictPolicy::default())
    }
}

impl ToolRegistry {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            snapshot: RwLock::new(Arc::new(RegistrySnapshot::default())),
            hosts: RwLock::new(Vec::new()),
        }
    }

    /// The most recent successful discovery
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.read().clone()
    }

    /// Query every host concurrently and publish the merged tool list.
    ///
    /// Fails only when hosts are configured and every one of them failed;
    /// the previous snapshot and host list stay in place in that case.
    pub async fn discover(
        &self,
        hosts: Vec<Arc<dyn ToolHost>>,
    ) -> Result<DiscoveryReport, DiscoveryError> {
        if hosts.is_empty() {
            warn!("No tool hosts configured; running in text-only mode");
            self.hosts.write().clear();
            *self.snapshot.write() = Arc::new(RegistrySnapshot::default());
            return Ok(DiscoveryReport::default());
        }

        let results = futures::future::join_all(hosts.iter().map(|host| {
            let host = host.clone();
            async move {
                let tools = host.list_tools().await;
                (host, tools)
            }
        }))
        .await;

        let mut warnings = Vec::new();
        let mut discovered: Vec<(Arc<dyn ToolHost>, Vec<HostTool>)> = Vec::new();
        for (host, result) in results {
            match result {
                Ok(tools) => {
                    info!(host = %host.name(), tools = tools.len(), "Discovered tools");
                    discovered.push((host, tools));
                }
                Err(e) => {
                    warn!(host = %host.name(), "Tool discovery failed: {}", e);
                    warnings.push(PartialDiscoveryWarning {
                        host: host.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if discovered.is_empty() {
            return Err(DiscoveryError::AllHostsFailed(warnings));
        }

        let snapshot = self.build_snapshot(discovered);
        if snapshot.is_empty() {
            warn!("Tool hosts advertised no tools; running in text-only mode");
        }

        let report = DiscoveryReport {
            tool_count: snapshot.len(),
            warnings,
        };
        *self.hosts.write() = hosts;
        *self.snapshot.write() = Arc::new(snapshot);
        Ok(report)
    }

    /// Re-run discovery against the hosts of the last discovery
    pub async fn refresh(&self) -> Result<DiscoveryReport, DiscoveryError> {
        let hosts = self.hosts.read().clone();
        self.discover(hosts).await
    }

    fn build_snapshot(&self, discovered: Vec<(Arc<dyn ToolHost>, Vec<HostTool>)>) -> RegistrySnapshot {
        let mut hosts = HashMap::new();
        let mut specs = Vec::new();
        for (host, tools) in discovered {
            let host_name = host.name().to_string();
            specs.extend(
                tools
                    .into_iter()
                    .map(|tool| ToolSpec::from_host_tool(&host_name, tool, self.policy)),
            );
            hosts.insert(host_name, host);
        }

        // Keep the last occurrence of each name, preserving overall order
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(specs.len());
        for spec in specs.into_iter().rev() {
            if seen.insert(spec.name.clone()) {
                kept.push(spec);
            } else {
                warn!(
                    tool = %spec.name,
                    host = %spec.host,
                    "Duplicate tool name; a later host takes precedence"
                );
            }
        }
        kept.reverse();

        let index = kept
            .iter()
            .enumerate()
            .map(|(i, spec)| (spec.name.clone(), i))
            .collect();

        RegistrySnapshot {
            tools: kept,
            index,
            hosts,
        }
    }
}
