use serde::{Deserialize, Serialize};
use std::time::Duration;
use toolmesh_core::{ConnectionEvent, ToolmeshError, ToolmeshResult};
use toolmesh_supervisor::ConnectionSupervisor;
use toolmesh_transport::call_tool;
use tracing::{debug, info, warn};

/// Completion polling for long-running calls in sequential chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSettings {
    /// Calls made before giving up on completion.
    pub completion_poll_attempts: u32,
    /// Pause between completion polls.
    pub completion_poll_interval_ms: u64,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            completion_poll_attempts: 60,
            completion_poll_interval_ms: 1_000,
        }
    }
}

impl ChainSettings {
    /// Pause between completion polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.completion_poll_interval_ms)
    }
}

/// Routes tool calls to connected servers with one failover.
#[derive(Clone)]
pub struct ToolRouter {
    pub(crate) supervisor: ConnectionSupervisor,
    pub(crate) settings: ChainSettings,
}

impl ToolRouter {
    /// Router over the servers `supervisor` manages.
    pub fn new(supervisor: ConnectionSupervisor, settings: ChainSettings) -> Self {
        Self {
            supervisor,
            settings,
        }
    }

    /// The supervisor whose status table drives routing.
    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    /// First connected server, in status-table order.
    // Every connected server is assumed to expose every tool.
    pub fn select_best_server(&self, tool: &str) -> Option<String> {
        let chosen = self
            .supervisor
            .get_connection_statuses()
            .into_iter()
            .find(|s| s.is_connected())
            .map(|s| s.name);
        debug!(tool, server = ?chosen, "Selected server");
        chosen
    }

    /// First connected server other than `exclude`.
    pub fn select_failover_server(&self, tool: &str, exclude: &str) -> Option<String> {
        let chosen = self
            .supervisor
            .get_connection_statuses()
            .into_iter()
            .find(|s| s.is_connected() && s.name != exclude)
            .map(|s| s.name);
        debug!(tool, exclude, server = ?chosen, "Selected failover server");
        chosen
    }

    /// Call `tool` on the best server. On failure, retry once on another
    /// connected server; without one, the original error is returned.
    pub async fn execute_tool(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> ToolmeshResult<serde_json::Value> {
        let primary = self
            .select_best_server(tool)
            .ok_or_else(|| ToolmeshError::NoAvailableServer(tool.to_string()))?;

        let err = match self.call_on(&primary, tool, arguments.clone()).await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };
        warn!(tool, server = %primary, error = %err, "Tool call failed");

        let Some(backup) = self.select_failover_server(tool, &primary) else {
            return Err(err);
        };

        info!(tool, from = %primary, to = %backup, "Failing over");
        self.supervisor.events().emit(ConnectionEvent::Failover {
            tool: tool.to_string(),
            from: primary,
            to: backup.clone(),
        });
        self.call_on(&backup, tool, arguments).await
    }

    async fn call_on(
        &self,
        server: &str,
        tool: &str,
        arguments: serde_json::Value,
    ) -> ToolmeshResult<serde_json::Value> {
        let transport = self
            .supervisor
            .transport(server)
            .ok_or_else(|| ToolmeshError::NotConnected(format!("no transport for '{server}'")))?;
        call_tool(transport.as_ref(), tool, arguments).await
    }
}
