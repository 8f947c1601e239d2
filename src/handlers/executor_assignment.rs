//! `assign_executor` / `ASSIGNING`.
//!
//! The executor is always named explicitly by the instance target; there is
//! no automatic selection. Couriers are assigned to the order identified by
//! `entity_id`, drivers take the trip identified by `entity_id`.

use crate::authority::ActionRequest;
use crate::handlers::outcome_to_result;
use crate::models::WorkflowInstance;
use crate::orchestration::{HandlerError, StateHandler, StepContext, StepResult};
use async_trait::async_trait;
use serde_json::json;
use tracing::{info, instrument, warn};

pub const TARGET_REQUIRED: &str = "TARGET_REQUIRED";
pub const UNKNOWN_EXECUTOR_ROLE: &str = "UNKNOWN_EXECUTOR_ROLE";

/// Entity and authority action for an executor role.
pub fn assignment_action(role: &str) -> Option<(&'static str, &'static str)> {
    match role {
        "courier1" => Some(("order", "order_assign_courier1_to_order")),
        "courier2" => Some(("order", "order_assign_courier2_to_order")),
        "driver" => Some(("trip", "trip_vzyat_reis")),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutorAssignmentHandler;

#[async_trait]
impl StateHandler for ExecutorAssignmentHandler {
    #[instrument(skip(self, instance, ctx), fields(entity_id = instance.entity_id))]
    async fn handle(
        &self,
        instance: &WorkflowInstance,
        ctx: &mut StepContext<'_>,
    ) -> Result<StepResult, HandlerError> {
        let Some(target) = &instance.target else {
            return Ok(StepResult::failed(TARGET_REQUIRED));
        };

        let Some((entity_type, action_name)) = assignment_action(&target.role) else {
            warn!(role = %target.role, "Unknown executor role");
            return Ok(StepResult::failed(UNKNOWN_EXECUTOR_ROLE));
        };

        let request = ActionRequest::new(
            entity_type,
            instance.entity_id,
            action_name,
            target.actor_id,
        );
        let outcome = ctx.perform_action(&request).await?;

        if outcome.is_accepted() {
            info!(
                executor_id = target.actor_id,
                role = %target.role,
                entity_type,
                "Executor assigned"
            );
        }

        Ok(outcome_to_result(
            outcome,
            StepResult::completed().with_payload(json!({
                "executor_id": target.actor_id,
                "role": target.role,
            })),
        ))
    }
}
