//! Session and execution log shared by the connection manager and the engine.
//!
//! A session spans one workflow run; executions are individual provider calls
//! and become children of the session named by their tracking id. Finished
//! sessions move into a bounded history, so memory stays flat no matter how
//! long the process runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};
use uuid::Uuid;

use super::RingBuffer;

/// Completed sessions retained in history.
pub const DEFAULT_SESSION_HISTORY: usize = 50;
/// Executions retained when they were not tied to a session.
const DEFAULT_UNTRACKED_HISTORY: usize = 500;
const MAX_SUMMARY_CHARS: usize = 200;

/// A single provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub session_id: Option<String>,
    pub tool: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub success: bool,
    pub summary: String,
}

/// One workflow run and the executions it issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub request: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub success: bool,
    pub summary: String,
    pub executions: Vec<ExecutionRecord>,
}

/// Per-tool call counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUsage {
    pub calls: u64,
    pub failures: u64,
    pub total_ms: u64,
}

/// Aggregate view over everything the tracker retains.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_sessions: usize,
    pub successful_sessions: usize,
    pub active_sessions: usize,
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub average_execution_ms: u64,
    pub tools: BTreeMap<String, ToolUsage>,
}

#[derive(Debug)]
struct TrackerState {
    active_sessions: HashMap<String, SessionRecord>,
    open_executions: HashMap<String, ExecutionRecord>,
    history: RingBuffer<SessionRecord>,
    untracked: RingBuffer<ExecutionRecord>,
}

/// Process-wide usage log. Construct once at bootstrap and share via `Arc`.
#[derive(Debug)]
pub struct UsageTracker {
    state: Mutex<TrackerState>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::with_history(DEFAULT_SESSION_HISTORY)
    }

    /// Tracker retaining at most `max_sessions` finished sessions.
    pub fn with_history(max_sessions: usize) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                active_sessions: HashMap::new(),
                open_executions: HashMap::new(),
                history: RingBuffer::new(max_sessions),
                untracked: RingBuffer::new(DEFAULT_UNTRACKED_HISTORY),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a session for a workflow run and return its id.
    pub fn start_session(&self, request: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let record = SessionRecord {
            id: id.clone(),
            request: request.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            success: false,
            summary: String::new(),
            executions: Vec::new(),
        };
        self.lock().active_sessions.insert(id.clone(), record);
        debug!(session = %id, "usage session started");
        id
    }

    /// Close a session and move it into the bounded history.
    pub fn end_session(&self, session_id: &str, success: bool, summary: &str) {
        let mut state = self.lock();
        let Some(mut record) = state.active_sessions.remove(session_id) else {
            warn!(session = %session_id, "end_session for unknown session");
            return;
        };
        record.finished_at = Some(Utc::now());
        record.success = success;
        record.summary = truncate_summary(summary);
        state.history.push(record);
        debug!(session = %session_id, success, "usage session ended");
    }

    /// Record the start of a provider call.
    ///
    /// `tracking_id` attaches the execution to an active session; unknown or
    /// absent ids leave it untracked.
    pub fn start_execution(&self, tool: &str, tracking_id: Option<&str>) -> String {
        let id = Uuid::new_v4().to_string();
        let record = ExecutionRecord {
            id: id.clone(),
            session_id: tracking_id.map(str::to_string),
            tool: tool.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: 0,
            success: false,
            summary: String::new(),
        };
        self.lock().open_executions.insert(id.clone(), record);
        id
    }

    /// Record the end of a provider call.
    pub fn end_execution(&self, execution_id: &str, success: bool, summary: &str) {
        let mut state = self.lock();
        let Some(mut record) = state.open_executions.remove(execution_id) else {
            warn!(execution = %execution_id, "end_execution for unknown execution");
            return;
        };
        let finished_at = Utc::now();
        record.duration_ms = (finished_at - record.started_at).num_milliseconds().max(0) as u64;
        record.finished_at = Some(finished_at);
        record.success = success;
        record.summary = truncate_summary(summary);

        let session = record
            .session_id
            .as_deref()
            .and_then(|session_id| state.active_sessions.get_mut(session_id));
        match session {
            Some(session) => session.executions.push(record),
            None => state.untracked.push(record),
        }
    }

    /// Start an execution that is closed as failed if dropped unfinished.
    pub fn track(&self, tool: &str, tracking_id: Option<&str>) -> ExecutionGuard<'_> {
        ExecutionGuard {
            tracker: self,
            execution_id: self.start_execution(tool, tracking_id),
            finished: false,
        }
    }

    /// Up to `count` most recent finished sessions, oldest first.
    pub fn recent_sessions(&self, count: usize) -> Vec<SessionRecord> {
        self.lock().history.get_recent(count)
    }

    /// Aggregate statistics over retained sessions and executions.
    ///
    /// Read-only: repeated calls without intervening activity return equal values.
    pub fn get_stats(&self) -> UsageStats {
        let state = self.lock();
        let mut stats = UsageStats {
            total_sessions: state.history.len(),
            successful_sessions: state.history.iter().filter(|session| session.success).count(),
            active_sessions: state.active_sessions.len(),
            ..Default::default()
        };

        let finished = state
            .history
            .iter()
            .chain(state.active_sessions.values())
            .flat_map(|session| session.executions.iter())
            .chain(state.untracked.iter());

        let mut total_ms = 0u64;
        for execution in finished {
            stats.total_executions += 1;
            total_ms += execution.duration_ms;
            let usage = stats.tools.entry(execution.tool.clone()).or_default();
            usage.calls += 1;
            usage.total_ms += execution.duration_ms;
            if execution.success {
                stats.successful_executions += 1;
            } else {
                stats.failed_executions += 1;
                usage.failures += 1;
            }
        }
        if stats.total_executions > 0 {
            stats.average_execution_ms = total_ms / stats.total_executions;
        }
        stats
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Open execution that records a failure on drop unless finished.
///
/// Dropping happens when the surrounding call future is abandoned, for example
/// when a step timeout wins the race.
#[derive(Debug)]
pub struct ExecutionGuard<'a> {
    tracker: &'a UsageTracker,
    execution_id: String,
    finished: bool,
}

impl ExecutionGuard<'_> {
    pub fn id(&self) -> &str {
        &self.execution_id
    }

    pub fn finish(mut self, success: bool, summary: &str) {
        self.finished = true;
        self.tracker.end_execution(&self.execution_id, success, summary);
    }
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.tracker
                .end_execution(&self.execution_id, false, "abandoned before completion (timed out or cancelled)");
        }
    }
}

fn truncate_summary(summary: &str) -> String {
    if summary.chars().count() <= MAX_SUMMARY_CHARS {
        return summary.to_string();
    }
    let mut truncated: String = summary.chars().take(MAX_SUMMARY_CHARS).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executions_attach_to_their_session() {
        let tracker = UsageTracker::new();
        let session = tracker.start_session("list the files here");

        let execution = tracker.start_execution("filesystem__list_directory", Some(&session));
        tracker.end_execution(&execution, true, "3 entries");
        tracker.end_session(&session, true, "done");

        let sessions = tracker.recent_sessions(5);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].executions.len(), 1);
        assert_eq!(sessions[0].executions[0].tool, "filesystem__list_directory");
        assert!(sessions[0].success);
    }

    #[test]
    fn stats_are_idempotent() {
        let tracker = UsageTracker::new();
        let session = tracker.start_session("req");
        let ok = tracker.start_execution("fs__read", Some(&session));
        tracker.end_execution(&ok, true, "");
        let failed = tracker.start_execution("fs__read", None);
        tracker.end_execution(&failed, false, "boom");
        tracker.end_session(&session, false, "");

        let first = tracker.get_stats();
        let second = tracker.get_stats();
        assert_eq!(first, second);
        assert_eq!(first.total_executions, 2);
        assert_eq!(first.failed_executions, 1);
        assert_eq!(first.tools["fs__read"].calls, 2);
        assert_eq!(first.tools["fs__read"].failures, 1);
        assert_eq!(first.total_sessions, 1);
        assert_eq!(first.successful_sessions, 0);
    }

    #[test]
    fn history_is_bounded() {
        let tracker = UsageTracker::with_history(3);
        for index in 0..5 {
            let session = tracker.start_session(&format!("request {index}"));
            tracker.end_session(&session, true, "");
        }
        let sessions = tracker.recent_sessions(10);
        assert_eq!(sessions.len(), 3);
        assert_eq!(sessions[0].request, "request 2");
        assert_eq!(tracker.get_stats().total_sessions, 3);
    }

    #[test]
    fn dropped_guard_records_failure() {
        let tracker = UsageTracker::new();
        {
            let _guard = tracker.track("slow__tool", None);
        }
        let stats = tracker.get_stats();
        assert_eq!(stats.total_executions, 1);
        assert_eq!(stats.failed_executions, 1);

        let guard = tracker.track("slow__tool", None);
        guard.finish(true, "ok");
        assert_eq!(tracker.get_stats().successful_executions, 1);
    }

    #[test]
    fn long_summaries_are_truncated() {
        let summary = truncate_summary(&"x".repeat(500));
        assert_eq!(summary.chars().count(), MAX_SUMMARY_CHARS + 1);
    }
}
