//! # Result Applier
//!
//! Writes step bookkeeping (`state`, `last_error`, `next_run_at`,
//! `attempts_count += increment`, `updated_at`) through the worker's unit of
//! work. It never commits; the worker commits only after both the handler's
//! writes and this update succeeded.

use crate::error::Result;
use crate::logging::log_instance_operation;
use crate::models::WorkflowInstance;
use crate::orchestration::types::StepResult;
use crate::store::UnitOfWork;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultApplier;

impl ResultApplier {
    pub fn new() -> Self {
        Self
    }

    /// Returns `false` if the row was already terminal and nothing changed.
    #[instrument(skip(self, unit_of_work, instance, result), fields(
        instance_id = instance.id,
        new_state = %result.new_state,
        attempts_increment = result.attempts_increment
    ))]
    pub async fn apply(
        &self,
        unit_of_work: &mut dyn UnitOfWork,
        instance: &WorkflowInstance,
        result: &StepResult,
    ) -> Result<bool> {
        let applied = unit_of_work
            .apply_update(instance.id, &result.to_update())
            .await?;

        if applied {
            log_instance_operation(
                "apply_result",
                Some(instance.id),
                Some(&instance.process_name),
                result.new_state.as_str(),
                result.last_error.as_deref(),
            );
        } else {
            debug!("Instance already terminal, bookkeeping skipped");
        }

        Ok(applied)
    }
}
