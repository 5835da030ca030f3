//! Workflow run state and step outcomes shared by the engine and its callers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a single workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Reserved for callers that cancel a run from outside the engine.
    Cancelled,
}

impl WorkflowStatus {
    /// Whether moving from `self` to `next` keeps the lifecycle moving forward.
    ///
    /// Re-entering the current state is accepted as a no-op.
    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        if self == next {
            return true;
        }
        match self {
            Pending => matches!(next, Running | Failed | Cancelled),
            Running => matches!(next, Completed | Failed | Cancelled),
            Completed | Failed | Cancelled => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled)
    }
}

/// Planner and execution details attached to a step result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepMetadata {
    pub confidence: f64,
    pub reasoning: String,
    /// Attempts beyond the first.
    pub retry_count: u32,
    /// The step was skipped by its failure strategy after failing.
    #[serde(default)]
    pub skipped: bool,
    /// Original tool when a fallback tool produced this result.
    #[serde(default)]
    pub fallback_from: Option<String>,
}

/// Where a step failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// The provider channel could not be reached or broke.
    Connection,
    ToolNotFound,
    InvalidArguments,
    /// The provider ran the tool and reported an error.
    Invocation,
    /// No answer within the step timeout.
    Timeout,
}

/// Classifiable side of a failed step.
///
/// `detail` is the provider's own message, without the tool name, so failure
/// analysis never matches against tool names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub cause: FailureCause,
    pub detail: String,
}

impl StepFailure {
    pub fn new(cause: FailureCause, detail: impl Into<String>) -> Self {
        Self {
            cause,
            detail: detail.into(),
        }
    }
}

/// Outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    /// Index of the step in the plan.
    pub step_index: usize,
    /// Full name of the tool that was invoked.
    pub tool: String,
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    /// Display text of the failure.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
    pub execution_time_ms: u64,
    pub metadata: StepMetadata,
}

impl StepResult {
    pub fn succeeded(step_index: usize, tool: impl Into<String>, result: Value, execution_time_ms: u64, metadata: StepMetadata) -> Self {
        Self {
            step_index,
            tool: tool.into(),
            success: true,
            result: Some(result),
            error: None,
            failure: None,
            execution_time_ms,
            metadata,
        }
    }

    /// A failure whose message came straight from the provider.
    pub fn failed(
        step_index: usize,
        tool: impl Into<String>,
        error: impl Into<String>,
        execution_time_ms: u64,
        metadata: StepMetadata,
    ) -> Self {
        let error = error.into();
        Self {
            step_index,
            tool: tool.into(),
            success: false,
            result: None,
            failure: Some(StepFailure::new(FailureCause::Invocation, error.clone())),
            error: Some(error),
            execution_time_ms,
            metadata,
        }
    }

    /// Replace the classifiable part of a failed result.
    pub fn with_failure(mut self, failure: StepFailure) -> Self {
        self.failure = Some(failure);
        self
    }
}

/// Counts and timing for a run, as reported by the workflow context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub total_steps: usize,
    pub executed_steps: usize,
    pub successes: usize,
    pub failures: usize,
    pub elapsed_ms: u64,
}

/// Metadata of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    pub steps: usize,
    pub successes: usize,
    pub failures: usize,
    pub elapsed_ms: u64,
    pub recovery_attempts: u32,
    pub status: WorkflowStatus,
}

/// Structured result returned for every run, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
    pub success: bool,
    pub message: String,
    /// Distinct tools invoked, in first-use order.
    pub tools_used: Vec<String>,
    /// Step results, including partial results of a failed run.
    pub results: Vec<StepResult>,
    pub metadata: WorkflowMetadata,
}
