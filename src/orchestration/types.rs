//! # Orchestration Types
//!
//! Step results produced by handlers and the dispatcher, plus the per-cycle and
//! running statistics reported by the orchestration loop.

use crate::constants::defaults::ATTEMPTS_INCREMENT;
use crate::constants::diagnostics::MAX_ATTEMPTS_EXCEEDED;
use crate::models::{InstanceId, InstanceUpdate};
use crate::state_machine::{StateToken, WorkflowState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one step. Transient; only its effects are persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub new_state: WorkflowState,
    pub last_error: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub attempts_increment: u32,
    /// Free-form data for the caller's domain, e.g. a created order id
    pub payload: Option<serde_json::Value>,
}

impl StepResult {
    pub fn completed() -> Self {
        Self::transition(WorkflowState::Completed)
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            last_error: Some(error.into()),
            ..Self::transition(WorkflowState::Failed)
        }
    }

    /// Move to another declared state of the same process.
    pub fn advance(state: StateToken) -> Self {
        Self::transition(WorkflowState::Step(state))
    }

    pub fn transition(new_state: WorkflowState) -> Self {
        Self {
            new_state,
            last_error: None,
            next_run_at: None,
            attempts_increment: ATTEMPTS_INCREMENT,
            payload: None,
        }
    }

    /// Engine short-circuit: the handler is not invoked and attempts stay put.
    pub fn max_attempts_exceeded() -> Self {
        Self {
            attempts_increment: 0,
            ..Self::failed(MAX_ATTEMPTS_EXCEEDED)
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_next_run_at(mut self, next_run_at: DateTime<Utc>) -> Self {
        self.next_run_at = Some(next_run_at);
        self
    }

    pub fn with_attempts_increment(mut self, increment: u32) -> Self {
        self.attempts_increment = increment;
        self
    }

    pub fn to_update(&self) -> InstanceUpdate {
        InstanceUpdate {
            state: self.new_state.clone(),
            last_error: self.last_error.clone(),
            next_run_at: self.next_run_at,
            attempts_increment: self.attempts_increment,
            payload: self.payload.clone(),
        }
    }
}

/// What the dispatcher decided for one claimed instance.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Bookkeeping to apply in the same unit of work as the handler's writes.
    /// `handler_invoked` is false for engine short-circuits.
    Step {
        result: StepResult,
        handler_invoked: bool,
    },
    /// The handler returned an error or panicked. Its writes must be discarded
    /// and `result` applied in a fresh unit of work.
    Aborted { result: StepResult },
    /// Nothing to do (the instance is already terminal).
    Noop,
}

/// Classification of a processed instance for cycle statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcomeKind {
    Completed,
    Failed,
    /// Moved to another declared state
    Advanced,
    /// Stayed in its state with a scheduled `next_run_at`
    Retried,
    /// Claimed elsewhere, no longer due, or already terminal
    Skipped,
}

impl StepOutcomeKind {
    pub fn classify(previous_state: &str, result: &StepResult) -> Self {
        match &result.new_state {
            WorkflowState::Completed => Self::Completed,
            WorkflowState::Failed => Self::Failed,
            WorkflowState::Step(token) if token.as_str() == previous_state => Self::Retried,
            WorkflowState::Step(_) => Self::Advanced,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceOutcome {
    pub instance_id: InstanceId,
    pub kind: StepOutcomeKind,
    pub state: Option<String>,
    pub last_error: Option<String>,
}

impl InstanceOutcome {
    pub fn skipped(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            kind: StepOutcomeKind::Skipped,
            state: None,
            last_error: None,
        }
    }

    pub fn applied(instance_id: InstanceId, previous_state: &str, result: &StepResult) -> Self {
        Self {
            instance_id,
            kind: StepOutcomeKind::classify(previous_state, result),
            state: Some(result.new_state.to_string()),
            last_error: result.last_error.clone(),
        }
    }
}

/// Result of a single orchestration cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationCycleResult {
    pub polled: usize,
    pub completed: usize,
    pub failed: usize,
    pub advanced: usize,
    pub retried: usize,
    pub skipped: usize,
    /// Units of work that hit a storage error and were rolled back
    pub errored: usize,
    pub duration_ms: u64,
}

impl OrchestrationCycleResult {
    pub fn record(&mut self, kind: StepOutcomeKind) {
        match kind {
            StepOutcomeKind::Completed => self.completed += 1,
            StepOutcomeKind::Failed => self.failed += 1,
            StepOutcomeKind::Advanced => self.advanced += 1,
            StepOutcomeKind::Retried => self.retried += 1,
            StepOutcomeKind::Skipped => self.skipped += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.completed + self.failed + self.advanced + self.retried
    }
}

/// Result of one stuck-instance sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    pub failed_instance_ids: Vec<InstanceId>,
    pub duration_ms: u64,
}

/// Running totals across the lifetime of an orchestration loop
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopSummary {
    pub cycles: u64,
    pub empty_cycles: u64,
    pub instances_polled: u64,
    pub completed: u64,
    pub failed: u64,
    pub advanced: u64,
    pub retried: u64,
    pub skipped: u64,
    pub errored: u64,
    pub infrastructure_errors: u64,
    pub sweeps: u64,
    pub stuck_failed: u64,
}

impl LoopSummary {
    pub fn record_cycle(&mut self, cycle: &OrchestrationCycleResult) {
        self.cycles += 1;
        if cycle.polled == 0 {
            self.empty_cycles += 1;
        }
        self.instances_polled += cycle.polled as u64;
        self.completed += cycle.completed as u64;
        self.failed += cycle.failed as u64;
        self.advanced += cycle.advanced as u64;
        self.retried += cycle.retried as u64;
        self.skipped += cycle.skipped as u64;
        self.errored += cycle.errored as u64;
    }

    pub fn record_sweep(&mut self, sweep: &SweepResult) {
        self.sweeps += 1;
        self.stuck_failed += sweep.failed_instance_ids.len() as u64;
    }
}

/// Phase of the orchestration loop's own state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopPhase {
    #[default]
    Idle,
    Polling,
    /// Submitting the batch to the worker pool
    Dispatching,
    /// Waiting for workers to apply and commit their results
    Applying,
}
