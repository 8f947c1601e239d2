//! # Instance Worker
//!
//! Processes exactly one instance per unit of work:
//!
//! ```text
//! begin -> claim -> dispatch -> apply -> commit
//!                       |
//!                       +-- handler error/panic -> rollback -> begin -> claim -> apply -> commit
//! ```
//!
//! The unit of work is created and disposed here and never leaves this task.
//! Any storage error drops it, which rolls back everything for the instance.

use crate::error::Result;
use crate::models::{InstanceId, WorkflowInstance};
use crate::orchestration::result_applier::ResultApplier;
use crate::orchestration::step_dispatcher::StepDispatcher;
use crate::orchestration::types::{DispatchOutcome, InstanceOutcome, StepResult};
use crate::store::{InstanceStore, UnitOfWork};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct InstanceWorker {
    store: Arc<dyn InstanceStore>,
    dispatcher: Arc<StepDispatcher>,
    applier: ResultApplier,
}

impl InstanceWorker {
    pub fn new(store: Arc<dyn InstanceStore>, dispatcher: Arc<StepDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            applier: ResultApplier::new(),
        }
    }

    #[instrument(skip(self))]
    pub async fn process(&self, instance_id: InstanceId) -> Result<InstanceOutcome> {
        let mut unit_of_work = self.store.begin().await?;

        let Some(instance) = unit_of_work.claim(instance_id).await? else {
            unit_of_work.rollback().await?;
            debug!("Instance not claimable, skipping");
            return Ok(InstanceOutcome::skipped(instance_id));
        };

        match self
            .dispatcher
            .run_step(&instance, unit_of_work.as_mut())
            .await
        {
            DispatchOutcome::Noop => {
                unit_of_work.rollback().await?;
                Ok(InstanceOutcome::skipped(instance_id))
            }
            DispatchOutcome::Step {
                result,
                handler_invoked,
            } => {
                self.finish(unit_of_work, &instance, &result).await?;
                info!(
                    new_state = %result.new_state,
                    handler_invoked,
                    last_error = result.last_error.as_deref(),
                    "Step applied"
                );
                Ok(InstanceOutcome::applied(instance_id, &instance.state, &result))
            }
            DispatchOutcome::Aborted { result } => {
                unit_of_work.rollback().await?;
                self.record_abort(&instance, &result).await
            }
        }
    }

    async fn finish(
        &self,
        mut unit_of_work: Box<dyn UnitOfWork>,
        instance: &WorkflowInstance,
        result: &StepResult,
    ) -> Result<()> {
        if self
            .applier
            .apply(unit_of_work.as_mut(), instance, result)
            .await?
        {
            unit_of_work.commit().await
        } else {
            unit_of_work.rollback().await
        }
    }

    /// Write failure bookkeeping after the handler's own writes were discarded.
    async fn record_abort(
        &self,
        instance: &WorkflowInstance,
        result: &StepResult,
    ) -> Result<InstanceOutcome> {
        let mut unit_of_work = self.store.begin().await?;

        match unit_of_work.claim(instance.id).await? {
            Some(current) if is_same_attempt(&current, instance) => {
                self.finish(unit_of_work, &current, result).await?;
                warn!(
                    instance_id = instance.id,
                    last_error = result.last_error.as_deref(),
                    "Handler aborted, instance failed"
                );
                Ok(InstanceOutcome::applied(instance.id, &instance.state, result))
            }
            _ => {
                unit_of_work.rollback().await?;
                debug!(
                    instance_id = instance.id,
                    "Instance changed or was re-enqueued after abort, skipping"
                );
                Ok(InstanceOutcome::skipped(instance.id))
            }
        }
    }
}

/// A re-enqueue resets attempts and bumps `updated_at`, so both must match.
fn is_same_attempt(current: &WorkflowInstance, claimed: &WorkflowInstance) -> bool {
    current.attempts_count == claimed.attempts_count && current.updated_at == claimed.updated_at
}
