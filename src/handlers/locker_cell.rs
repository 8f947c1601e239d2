//! `locker_cell`: `OPENING` -> `CLOSING` -> `COMPLETED`.
//!
//! Each step is one authority action on the `locker` entity identified by the
//! instance's `entity_id`, performed on behalf of the requesting actor.

use crate::authority::ActionRequest;
use crate::handlers::{declared_state, outcome_to_result, state_names};
use crate::models::WorkflowInstance;
use crate::orchestration::{HandlerError, StateHandler, StepContext, StepResult};
use async_trait::async_trait;
use tracing::instrument;

const LOCKER_ENTITY: &str = "locker";
const OPEN_ACTION: &str = "locker_open_locker";
const CLOSE_ACTION: &str = "locker_close_locker";

fn locker_action(instance: &WorkflowInstance, action_name: &str) -> ActionRequest {
    ActionRequest::new(
        LOCKER_ENTITY,
        instance.entity_id,
        action_name,
        instance.requested_by.actor_id,
    )
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenCellHandler;

#[async_trait]
impl StateHandler for OpenCellHandler {
    #[instrument(skip(self, instance, ctx), fields(cell_id = instance.entity_id))]
    async fn handle(
        &self,
        instance: &WorkflowInstance,
        ctx: &mut StepContext<'_>,
    ) -> Result<StepResult, HandlerError> {
        let closing = declared_state(state_names::CLOSING)?;
        let outcome = ctx
            .perform_action(&locker_action(instance, OPEN_ACTION))
            .await?;
        Ok(outcome_to_result(outcome, StepResult::advance(closing)))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CloseCellHandler;

#[async_trait]
impl StateHandler for CloseCellHandler {
    #[instrument(skip(self, instance, ctx), fields(cell_id = instance.entity_id))]
    async fn handle(
        &self,
        instance: &WorkflowInstance,
        ctx: &mut StepContext<'_>,
    ) -> Result<StepResult, HandlerError> {
        let outcome = ctx
            .perform_action(&locker_action(instance, CLOSE_ACTION))
            .await?;
        Ok(outcome_to_result(outcome, StepResult::completed()))
    }
}
