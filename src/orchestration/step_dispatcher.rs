//! # Step Dispatcher
//!
//! Resolves and invokes the handler for one claimed instance and produces
//! the bookkeeping for it. Never panics or errors outward: every miss and
//! every handler failure becomes a [`DispatchOutcome`].
//!
//! Order of checks:
//! 1. terminal instances are left alone
//! 2. attempts ceiling (handler not invoked, attempts unchanged)
//! 3. stored state must parse
//! 4. registry lookup (unknown process / no handler for state)
//! 5. handler call with panic containment
//! 6. result normalization: undeclared states are coerced to `FAILED`, and
//!    `RetryWithBackoff` processes turn a handler `FAILED` into a scheduled retry

use crate::constants::diagnostics::{
    HANDLER_PANICKED, INVALID_STATE_RETURNED, NO_HANDLER_FOR_STATE, UNKNOWN_PROCESS,
    UNPARSEABLE_STATE,
};
use crate::models::WorkflowInstance;
use crate::orchestration::backoff::BackoffCalculator;
use crate::orchestration::step_handler::{ActionContext, StepContext};
use crate::orchestration::types::{DispatchOutcome, StepResult};
use crate::registry::{FailurePolicy, Lookup, ProcessDefinition, ProcessRegistry};
use crate::state_machine::WorkflowState;
use crate::store::UnitOfWork;
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

pub struct StepDispatcher {
    registry: Arc<ProcessRegistry>,
    action_context: Arc<ActionContext>,
    max_attempts: u32,
    backoff: BackoffCalculator,
}

impl StepDispatcher {
    pub fn new(
        registry: Arc<ProcessRegistry>,
        action_context: Arc<ActionContext>,
        max_attempts: u32,
        backoff: BackoffCalculator,
    ) -> Self {
        Self {
            registry,
            action_context,
            max_attempts,
            backoff,
        }
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Attempts ceiling for a process, falling back to the global one.
    pub fn max_attempts_for(&self, process_name: &str) -> u32 {
        self.registry
            .process(process_name)
            .and_then(ProcessDefinition::max_attempts)
            .unwrap_or(self.max_attempts)
    }

    #[instrument(skip(self, instance, unit_of_work), fields(
        instance_id = instance.id,
        process_name = %instance.process_name,
        state = %instance.state,
        attempts = instance.attempts_count
    ))]
    pub async fn run_step(
        &self,
        instance: &WorkflowInstance,
        unit_of_work: &mut dyn UnitOfWork,
    ) -> DispatchOutcome {
        let parsed = instance.workflow_state();
        if matches!(&parsed, Ok(state) if state.is_terminal()) {
            return DispatchOutcome::Noop;
        }

        let max_attempts = self.max_attempts_for(&instance.process_name);
        if instance.attempts_count >= 0 && instance.attempts_count as u32 >= max_attempts {
            warn!(max_attempts, "Attempts ceiling reached, failing without invoking handler");
            return short_circuit(StepResult::max_attempts_exceeded());
        }

        let current = match parsed {
            Ok(WorkflowState::Step(token)) => token,
            Ok(_) => return DispatchOutcome::Noop,
            Err(e) => {
                warn!(error = %e, "Stored state cannot be parsed");
                return short_circuit(StepResult::failed(format!(
                    "{UNPARSEABLE_STATE}: process={} state={}",
                    instance.process_name, instance.state
                )));
            }
        };

        let (definition, handler) = match self.registry.lookup(&instance.process_name, &current) {
            Lookup::Found {
                definition,
                handler,
            } => (definition, handler),
            Lookup::UnknownProcess => {
                warn!("No process definition registered");
                return short_circuit(StepResult::failed(format!(
                    "{UNKNOWN_PROCESS}: process={} state={}",
                    instance.process_name, instance.state
                )));
            }
            Lookup::UnknownState { .. } => {
                warn!("No handler for state");
                return short_circuit(StepResult::failed(format!(
                    "{NO_HANDLER_FOR_STATE}: process={} state={}",
                    instance.process_name, instance.state
                )));
            }
        };

        let outcome = {
            let mut ctx = StepContext::new(&self.action_context, unit_of_work);
            AssertUnwindSafe(handler.handle(instance, &mut ctx))
                .catch_unwind()
                .await
        };

        match outcome {
            Ok(Ok(result)) => DispatchOutcome::Step {
                result: self.normalize(definition, instance, result),
                handler_invoked: true,
            },
            Ok(Err(handler_error)) => {
                warn!(error = %handler_error, "Handler returned an error");
                DispatchOutcome::Aborted {
                    result: StepResult::failed(handler_error.to_string()),
                }
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, "Handler panicked");
                DispatchOutcome::Aborted {
                    result: StepResult::failed(format!("{HANDLER_PANICKED}: {message}")),
                }
            }
        }
    }

    fn normalize(
        &self,
        definition: &ProcessDefinition,
        instance: &WorkflowInstance,
        result: StepResult,
    ) -> StepResult {
        if !definition.declares(&result.new_state) {
            warn!(returned = %result.new_state, "Handler returned an undeclared state");
            return StepResult::failed(INVALID_STATE_RETURNED)
                .with_attempts_increment(result.attempts_increment);
        }

        if result.new_state == WorkflowState::Failed
            && definition.failure_policy() == FailurePolicy::RetryWithBackoff
        {
            return self.schedule_retry(instance, result);
        }

        result
    }

    /// Keep the instance in its state and push `next_run_at` out.
    fn schedule_retry(&self, instance: &WorkflowInstance, result: StepResult) -> StepResult {
        let current = match instance.workflow_state() {
            Ok(state) => state,
            Err(_) => return result,
        };
        let attempts_after = (instance.attempts_count.max(0) as u32)
            .saturating_add(result.attempts_increment);
        let next_run_at = result
            .next_run_at
            .unwrap_or_else(|| self.backoff.next_run_at(Utc::now(), attempts_after));

        debug!(
            attempts_after,
            next_run_at = %next_run_at,
            "Scheduling retry for failed step"
        );

        StepResult {
            new_state: current,
            next_run_at: Some(next_run_at),
            payload: None,
            ..result
        }
    }
}

fn short_circuit(result: StepResult) -> DispatchOutcome {
    DispatchOutcome::Step {
        result,
        handler_invoked: false,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
