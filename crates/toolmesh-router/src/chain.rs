//! Tool chain execution.

use crate::router::ToolRouter;
use futures_util::future::join_all;
use toolmesh_core::{
    ChainMode, ChainStepResult, StepOutcome, ToolCallSpec, ToolChain, ToolmeshError,
    ToolmeshResult,
};
use tracing::{debug, info, warn};

/// Whether a tool result reports that its work is done. Results without a
/// progress marker count as complete.
pub fn is_complete(result: &serde_json::Value) -> bool {
    if result.get("completed").and_then(serde_json::Value::as_bool) == Some(false) {
        return false;
    }
    !matches!(
        result.get("status").and_then(serde_json::Value::as_str),
        Some("pending" | "running" | "in_progress")
    )
}

impl ToolRouter {
    /// Run every call of `chain` and report one result per call, in input
    /// order.
    ///
    /// Sequential chains stop at the first failure and mark the remaining
    /// calls skipped. Parallel chains run every call; a failure only affects
    /// its own entry.
    pub async fn execute_tool_chain(&self, chain: &ToolChain) -> Vec<ChainStepResult> {
        info!(calls = chain.calls.len(), mode = ?chain.mode, "Executing tool chain");
        match chain.mode {
            ChainMode::Sequential => self.run_sequential(&chain.calls).await,
            ChainMode::Parallel => self.run_parallel(&chain.calls).await,
        }
    }

    async fn run_sequential(&self, calls: &[ToolCallSpec]) -> Vec<ChainStepResult> {
        let mut results = Vec::with_capacity(calls.len());
        let mut failed = false;

        for (index, call) in calls.iter().enumerate() {
            if failed {
                results.push(step(index, call, StepOutcome::Skipped));
                continue;
            }

            let outcome = if call.wait_for_completion {
                self.run_until_complete(call).await
            } else {
                self.execute_tool(&call.tool_name, call.arguments.clone())
                    .await
            };

            if let Err(e) = &outcome {
                warn!(index, tool = %call.tool_name, error = %e, "Chain step failed, skipping the rest");
                failed = true;
            }
            results.push(step(index, call, outcome.into()));
        }

        results
    }

    async fn run_parallel(&self, calls: &[ToolCallSpec]) -> Vec<ChainStepResult> {
        let runs = calls.iter().enumerate().map(|(index, call)| async move {
            let outcome = self
                .execute_tool(&call.tool_name, call.arguments.clone())
                .await;
            step(index, call, outcome.into())
        });
        join_all(runs).await
    }

    /// Re-issue `call` until its result reports completion.
    async fn run_until_complete(&self, call: &ToolCallSpec) -> ToolmeshResult<serde_json::Value> {
        let attempts = self.settings.completion_poll_attempts.max(1);

        for attempt in 1..=attempts {
            let result = self
                .execute_tool(&call.tool_name, call.arguments.clone())
                .await?;
            if is_complete(&result) {
                return Ok(result);
            }
            debug!(tool = %call.tool_name, attempt, "Tool still running");
            if attempt < attempts {
                tokio::time::sleep(self.settings.poll_interval()).await;
            }
        }

        Err(ToolmeshError::Timeout(format!(
            "tool '{}' did not complete after {attempts} polls",
            call.tool_name
        )))
    }
}

fn step(index: usize, call: &ToolCallSpec, outcome: StepOutcome) -> ChainStepResult {
    ChainStepResult {
        index,
        tool_name: call.tool_name.clone(),
        outcome,
    }
}
