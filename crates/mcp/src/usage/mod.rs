//! In-memory usage tracking for workflow sessions and tool executions.

mod ring_buffer;
mod tracker;

pub use ring_buffer::RingBuffer;
pub use tracker::{ExecutionGuard, ExecutionRecord, SessionRecord, ToolUsage, UsageStats, UsageTracker};
