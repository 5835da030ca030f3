//! Mutable record of one in-flight workflow run.

use std::{collections::BTreeMap, time::Instant};

use fleet_types::{RoutingDecision, StepResult, WorkflowStatus, WorkflowSummary};
use serde_json::{Map, Value};
use tracing::warn;

/// State owned by a single workflow run.
///
/// Results form an append-only log; the only rewrite is truncation when a
/// recovery plan restarts from an earlier step.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    original_request: String,
    planned_steps: Vec<RoutingDecision>,
    results: Vec<StepResult>,
    /// Effective variables: `assigned` overlaid by `extracted` in step order.
    variables: Map<String, Value>,
    assigned: Map<String, Value>,
    /// Variables extracted from each recorded step, keyed by step index.
    extracted: BTreeMap<usize, Map<String, Value>>,
    started_at: Instant,
    status: WorkflowStatus,
}

impl WorkflowContext {
    /// A pending context for `request` with the validated plan.
    pub fn create(request: impl Into<String>, steps: Vec<RoutingDecision>) -> Self {
        Self {
            original_request: request.into(),
            planned_steps: steps,
            results: Vec::new(),
            variables: Map::new(),
            assigned: Map::new(),
            extracted: BTreeMap::new(),
            started_at: Instant::now(),
            status: WorkflowStatus::Pending,
        }
    }

    pub fn original_request(&self) -> &str {
        &self.original_request
    }

    pub fn planned_steps(&self) -> &[RoutingDecision] {
        &self.planned_steps
    }

    pub fn results(&self) -> &[StepResult] {
        &self.results
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    /// Move to `next` if the lifecycle allows it; returns whether it did.
    pub fn set_status(&mut self, next: WorkflowStatus) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(from = ?self.status, to = ?next, "ignoring backwards status transition");
            return false;
        }
        self.status = next;
        true
    }

    pub fn append_result(&mut self, result: StepResult) {
        self.results.push(result);
    }

    /// Drop results from `len` onward so execution can resume at that step.
    ///
    /// Variables extracted from the dropped results go with them.
    pub fn truncate_results(&mut self, len: usize) {
        self.results.truncate(len);
        self.extracted.retain(|step_index, _| *step_index < len);
        self.rebuild_variables();
    }

    /// Swap in a rewritten plan and clear all results and extracted variables.
    pub fn replace_steps(&mut self, steps: Vec<RoutingDecision>) {
        self.planned_steps = steps;
        self.results.clear();
        self.extracted.clear();
        self.rebuild_variables();
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.assigned.insert(name.clone(), value.clone());
        self.variables.insert(name, value);
    }

    /// Merge variables extracted from the result of `step_index`.
    pub fn record_variables(&mut self, step_index: usize, variables: Map<String, Value>) {
        for (name, value) in &variables {
            self.variables.insert(name.clone(), value.clone());
        }
        self.extracted.entry(step_index).or_default().extend(variables);
    }

    fn rebuild_variables(&mut self) {
        let mut variables = self.assigned.clone();
        for extracted in self.extracted.values() {
            for (name, value) in extracted {
                variables.insert(name.clone(), value.clone());
            }
        }
        self.variables = variables;
    }

    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn is_complete(&self) -> bool {
        self.results.len() >= self.planned_steps.len()
    }

    /// Failed status, or any result that failed without being skipped.
    pub fn has_failed(&self) -> bool {
        self.status == WorkflowStatus::Failed
            || self
                .results
                .iter()
                .any(|result| !result.success && !result.metadata.skipped)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    pub fn summarize(&self) -> WorkflowSummary {
        let successes = self.results.iter().filter(|result| result.success).count();
        WorkflowSummary {
            total_steps: self.planned_steps.len(),
            executed_steps: self.results.len(),
            successes,
            failures: self.results.len() - successes,
            elapsed_ms: self.elapsed_ms(),
        }
    }

    /// Lookup table for `{{name}}` templates.
    ///
    /// Each successful result before `upto` (all results when `None`) is exposed
    /// as `step_<i>_result` and `<tool>_result`; variables are merged last and
    /// win on collision.
    pub fn prior_step_outputs(&self, upto: Option<usize>) -> Map<String, Value> {
        let mut lookup = Map::new();
        for result in &self.results {
            if upto.is_some_and(|limit| result.step_index >= limit) || !result.success {
                continue;
            }
            let value = result.result.clone().unwrap_or(Value::Null);
            lookup.insert(format!("step_{}_result", result.step_index), value.clone());
            lookup.insert(format!("{}_result", result.tool), value);
        }
        for (name, value) in &self.variables {
            lookup.insert(name.clone(), value.clone());
        }
        lookup
    }
}
