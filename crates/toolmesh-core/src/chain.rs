use crate::error::ToolmeshResult;
use serde::{Deserialize, Serialize};

fn empty_arguments() -> serde_json::Value {
    serde_json::json!({})
}

/// One tool invocation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallSpec {
    /// Tool to invoke.
    pub tool_name: String,
    /// Opaque key/value arguments.
    #[serde(default = "empty_arguments")]
    pub arguments: serde_json::Value,
    /// Poll until the result reports completion before moving on
    /// (sequential chains only).
    #[serde(default)]
    pub wait_for_completion: bool,
}

impl ToolCallSpec {
    /// A call that does not wait for completion.
    pub fn new(tool_name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            wait_for_completion: false,
        }
    }

    /// Mark this call as long-running.
    pub fn wait_for_completion(mut self) -> Self {
        self.wait_for_completion = true;
        self
    }
}

/// How a [`ToolChain`] is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainMode {
    /// One at a time, in list order.
    #[default]
    Sequential,
    /// All at once.
    Parallel,
}

/// Ordered batch of tool calls executed as one operation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolChain {
    /// Calls in input order.
    pub calls: Vec<ToolCallSpec>,
    /// Execution mode.
    #[serde(default)]
    pub mode: ChainMode,
}

/// What happened to one step of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StepOutcome {
    /// The call returned a result.
    Completed {
        /// Result payload.
        result: serde_json::Value,
    },
    /// The call failed (after failover).
    Failed {
        /// Error message.
        error: String,
    },
    /// Not attempted because an earlier sequential step failed.
    Skipped,
}

impl From<ToolmeshResult<serde_json::Value>> for StepOutcome {
    fn from(result: ToolmeshResult<serde_json::Value>) -> Self {
        match result {
            Ok(result) => Self::Completed { result },
            Err(e) => Self::Failed {
                error: e.to_string(),
            },
        }
    }
}

/// Result of one step, keyed by its input position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStepResult {
    /// Position of the call in the chain.
    pub index: usize,
    /// Tool that was called.
    pub tool_name: String,
    /// Outcome of the call.
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

impl ChainStepResult {
    /// Whether this step carries an error.
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, StepOutcome::Failed { .. })
    }

    /// The result value, if the step completed.
    pub fn result(&self) -> Option<&serde_json::Value> {
        match &self.outcome {
            StepOutcome::Completed { result } => Some(result),
            _ => None,
        }
    }
}
