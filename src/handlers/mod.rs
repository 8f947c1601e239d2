//! # Reference Business Handlers
//!
//! Pluggable handlers for the logistics processes the engine was built for.
//! They sit outside the core: the engine only sees them through
//! [`StateHandler`](crate::orchestration::StateHandler) and the registry.
//!
//! | process            | state                     | effect                                   |
//! |--------------------|---------------------------|------------------------------------------|
//! | `order_creation`   | `WAITING_FOR_RESERVATION` | reserve cells, create order, `COMPLETED` |
//! | `assign_executor`  | `ASSIGNING`               | route by target role to the authority    |
//! | `locker_cell`      | `OPENING` then `CLOSING`  | open then close a locker cell            |

pub mod executor_assignment;
pub mod locker_cell;
pub mod order_creation;

use crate::authority::ActionOutcome;
use crate::orchestration::{HandlerError, StepResult};
use crate::registry::{ProcessDefinition, ProcessRegistryBuilder, RegistryError};
use crate::state_machine::StateToken;
use std::sync::Arc;

pub use executor_assignment::ExecutorAssignmentHandler;
pub use locker_cell::{CloseCellHandler, OpenCellHandler};
pub use order_creation::{
    CellReservation, NewOrder, OrderCreationHandler, OrderDesk, OrderRequest,
};

pub mod process_names {
    pub const ORDER_CREATION: &str = "order_creation";
    pub const ASSIGN_EXECUTOR: &str = "assign_executor";
    pub const LOCKER_CELL: &str = "locker_cell";
}

pub mod state_names {
    pub const WAITING_FOR_RESERVATION: &str = "WAITING_FOR_RESERVATION";
    pub const ASSIGNING: &str = "ASSIGNING";
    pub const OPENING: &str = "OPENING";
    pub const CLOSING: &str = "CLOSING";
}

/// Register `order_creation`, `assign_executor` and `locker_cell`.
pub fn register_builtin_processes(
    builder: ProcessRegistryBuilder,
) -> Result<ProcessRegistryBuilder, RegistryError> {
    builder
        .register(
            ProcessDefinition::builder(process_names::ORDER_CREATION)
                .state(
                    state_names::WAITING_FOR_RESERVATION,
                    Arc::new(OrderCreationHandler::default()),
                )
                .build()?,
        )?
        .register(
            ProcessDefinition::builder(process_names::ASSIGN_EXECUTOR)
                .state(state_names::ASSIGNING, Arc::new(ExecutorAssignmentHandler))
                .build()?,
        )?
        .register(
            ProcessDefinition::builder(process_names::LOCKER_CELL)
                .state(state_names::OPENING, Arc::new(OpenCellHandler))
                .state(state_names::CLOSING, Arc::new(CloseCellHandler))
                .build()?,
        )
}

/// Accepted actions continue with `on_accept`; rejections fail with the
/// authority's own reason.
pub(crate) fn outcome_to_result(outcome: ActionOutcome, on_accept: StepResult) -> StepResult {
    match outcome {
        ActionOutcome::Accepted { .. } => on_accept,
        ActionOutcome::Rejected { reason } => StepResult::failed(reason),
    }
}

pub(crate) fn declared_state(token: &str) -> Result<StateToken, HandlerError> {
    StateToken::parse(token).map_err(|e| HandlerError::Internal(e.to_string()))
}
