//! Shared data model for the Fleet orchestrator.
//!
//! These types cross the boundary between the provider connection layer
//! (`fleet-mcp`) and the workflow engine (`fleet-engine`), so they stay free of
//! transport and runtime dependencies.

pub mod routing;
pub mod tool;
pub mod workflow;

pub use routing::RoutingDecision;
pub use tool::{ContentItem, TOOL_NAME_SEPARATOR, ToolDescriptor, ToolKey, ToolNameError, ToolOutput, validate_provider_id};
pub use workflow::{FailureCause, StepFailure, StepMetadata, StepResult, WorkflowMetadata, WorkflowResult, WorkflowStatus, WorkflowSummary};
