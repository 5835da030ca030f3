//! Single-step execution: templating, timeout race, bounded retries, and the
//! per-step failure strategy.

use std::time::Instant;

use fleet_mcp::ProviderError;
use fleet_types::{FailureCause, RoutingDecision, StepFailure, StepMetadata, StepResult};
use serde_json::{Map, Value};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::failure::StepAction;

use super::{StepExecutor, template::enrich_parameters};

/// A finished step and whether the batch should stop after it.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub result: StepResult,
    pub halt: bool,
}

impl StepExecutor {
    /// Run one decision with the timeout and retry budget from the settings.
    ///
    /// Attempts are bounded by `retry_attempts + 1`. Errors that cannot change
    /// between attempts (unknown tool, invalid arguments) end the loop early.
    pub async fn execute_step(&self, index: usize, decision: &RoutingDecision, lookup: &Map<String, Value>, tracking_id: Option<&str>) -> StepResult {
        let arguments = enrich_parameters(&decision.parameters, lookup);
        let step_timeout = self.settings.step_timeout();
        let max_retries = self.settings.retry_attempts;
        let started = Instant::now();
        let mut attempt: u32 = 0;

        let outcome = loop {
            let call = self.gateway.call(&decision.selected_tool, &arguments, tracking_id);
            let error = match timeout(step_timeout, call).await {
                Ok(Ok(output)) => break Ok(output.to_value()),
                Ok(Err(error)) => error,
                Err(_) => ProviderError::timeout(&decision.selected_tool, self.settings.step_timeout_ms),
            };

            if attempt >= max_retries || !error.is_retryable_kind() {
                break Err(error);
            }
            attempt += 1;
            warn!(
                step_index = index,
                tool = %decision.selected_tool,
                attempt,
                error = %error,
                "step failed; retrying"
            );
            let delay = self.settings.retry_delay();
            if !delay.is_zero() {
                sleep(delay).await;
            }
        };

        let metadata = StepMetadata {
            confidence: decision.confidence,
            reasoning: decision.reasoning.clone(),
            retry_count: attempt,
            ..Default::default()
        };
        let elapsed = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(value) => {
                debug!(step_index = index, tool = %decision.selected_tool, elapsed_ms = elapsed, "step succeeded");
                StepResult::succeeded(index, &decision.selected_tool, value, elapsed, metadata)
            }
            Err(error) => {
                warn!(step_index = index, tool = %decision.selected_tool, error = %error, "step failed");
                StepResult::failed(index, &decision.selected_tool, error.to_string(), elapsed, metadata).with_failure(error.to_step_failure())
            }
        }
    }

    /// Run one decision and apply the configured failure strategy to a failure.
    pub async fn run_with_policy(&self, index: usize, decision: &RoutingDecision, lookup: &Map<String, Value>, tracking_id: Option<&str>) -> StepOutcome {
        let strategy = self.settings.step_strategy();
        let continue_on_failure = self.settings.continue_on_failure;
        let mut current = decision.clone();
        let mut fallback_from: Option<String> = None;
        let mut strategy_retries: u32 = 0;
        let mut prior_attempts: u32 = 0;

        loop {
            let mut result = self.execute_step(index, &current, lookup, tracking_id).await;
            result.metadata.retry_count += prior_attempts;
            result.metadata.fallback_from = fallback_from.clone();
            if result.success {
                return StepOutcome { result, halt: false };
            }

            let failure = result
                .failure
                .clone()
                .unwrap_or_else(|| StepFailure::new(FailureCause::Invocation, result.error.clone().unwrap_or_default()));
            let action = if fallback_from.is_some() {
                // A substitute gets no further substitution.
                if continue_on_failure { StepAction::Continue } else { StepAction::Stop }
            } else {
                self.failures
                    .on_step_failure(strategy, &current, &failure, strategy_retries, continue_on_failure)
            };

            match action {
                StepAction::Retry => {
                    strategy_retries += 1;
                    prior_attempts = result.metadata.retry_count + 1;
                    debug!(step_index = index, tool = %current.selected_tool, "retry strategy re-dispatching step");
                }
                StepAction::Fallback(substitute) => {
                    debug!(step_index = index, from = %current.selected_tool, to = %substitute.selected_tool, "falling back to substitute tool");
                    fallback_from = Some(current.selected_tool.clone());
                    prior_attempts = 0;
                    current = substitute;
                }
                StepAction::Skip => {
                    result.metadata.skipped = true;
                    return StepOutcome { result, halt: false };
                }
                StepAction::Continue => return StepOutcome { result, halt: false },
                StepAction::Stop => return StepOutcome { result, halt: true },
            }
        }
    }
}
