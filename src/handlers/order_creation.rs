//! `order_creation` / `WAITING_FOR_RESERVATION`.
//!
//! The instance's `entity_id` is the order request id. Reservation and order
//! creation go through the deployment's [`OrderDesk`] inside the step's unit
//! of work, so a failed step releases the reserved cells with the rollback.

use crate::models::WorkflowInstance;
use crate::orchestration::{HandlerError, StateHandler, StepContext, StepResult};
use crate::store::UnitOfWork;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub const ORDER_REQUEST_NOT_FOUND: &str = "ORDER_REQUEST_NOT_FOUND";
pub const INVALID_REQUEST_STATE: &str = "INVALID_REQUEST_STATE";
pub const INVALID_REQUEST_DATA: &str = "INVALID_REQUEST_DATA";
pub const NO_FREE_CELLS: &str = "NO_FREE_CELLS";

const PENDING: &str = "PENDING";
const SELF_SERVICE: &str = "self";
const COURIER: &str = "courier";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub id: i64,
    pub status: String,
    pub client_user_id: Option<i64>,
    pub parcel_type: String,
    pub cell_size: String,
    pub sender_delivery: String,
    pub recipient_delivery: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellReservation {
    pub source_cell_id: i64,
    pub dest_cell_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub description: String,
    pub pickup_type: String,
    pub delivery_type: String,
    pub client_user_id: i64,
    pub source_cell_id: i64,
    pub dest_cell_id: i64,
}

impl NewOrder {
    pub fn from_request(
        request: &OrderRequest,
        client_user_id: i64,
        cells: CellReservation,
    ) -> Self {
        Self {
            description: format!("{} ({})", request.parcel_type, request.cell_size),
            pickup_type: delivery_mode(&request.sender_delivery).to_string(),
            delivery_type: delivery_mode(&request.recipient_delivery).to_string(),
            client_user_id,
            source_cell_id: cells.source_cell_id,
            dest_cell_id: cells.dest_cell_id,
        }
    }
}

fn delivery_mode(requested: &str) -> &'static str {
    if requested == SELF_SERVICE {
        SELF_SERVICE
    } else {
        COURIER
    }
}

/// Order repository a deployment registers in the action context as
/// `Arc<dyn OrderDesk>`. Implementations must lock the cells they reserve.
#[async_trait]
pub trait OrderDesk: Send + Sync {
    async fn load_request(
        &self,
        request_id: i64,
        unit_of_work: &mut dyn UnitOfWork,
    ) -> Result<Option<OrderRequest>, HandlerError>;

    /// Reserve one free cell of `cell_size` in each locker; `None` when either
    /// side has no free cell.
    async fn reserve_cells(
        &self,
        source_locker_id: i64,
        dest_locker_id: i64,
        cell_size: &str,
        unit_of_work: &mut dyn UnitOfWork,
    ) -> Result<Option<CellReservation>, HandlerError>;

    async fn create_order(
        &self,
        order: &NewOrder,
        unit_of_work: &mut dyn UnitOfWork,
    ) -> Result<i64, HandlerError>;
}

#[derive(Debug, Clone, Copy)]
pub struct OrderCreationHandler {
    source_locker_id: i64,
    dest_locker_id: i64,
}

impl OrderCreationHandler {
    pub fn new(source_locker_id: i64, dest_locker_id: i64) -> Self {
        Self {
            source_locker_id,
            dest_locker_id,
        }
    }
}

impl Default for OrderCreationHandler {
    fn default() -> Self {
        Self::new(1, 2)
    }
}

#[async_trait]
impl StateHandler for OrderCreationHandler {
    #[instrument(skip(self, instance, ctx), fields(request_id = instance.entity_id))]
    async fn handle(
        &self,
        instance: &WorkflowInstance,
        ctx: &mut StepContext<'_>,
    ) -> Result<StepResult, HandlerError> {
        let desk = Arc::clone(ctx.service::<Arc<dyn OrderDesk>>().ok_or_else(|| {
            HandlerError::Internal("OrderDesk service not registered".to_string())
        })?);

        let Some(request) = desk
            .load_request(instance.entity_id, ctx.unit_of_work())
            .await?
        else {
            return Ok(StepResult::failed(ORDER_REQUEST_NOT_FOUND));
        };

        if request.status != PENDING {
            debug!(status = %request.status, "Order request is not pending");
            return Ok(StepResult::failed(INVALID_REQUEST_STATE));
        }

        let Some(client_user_id) = request.client_user_id else {
            return Ok(StepResult::failed(INVALID_REQUEST_DATA));
        };

        let Some(cells) = desk
            .reserve_cells(
                self.source_locker_id,
                self.dest_locker_id,
                &request.cell_size,
                ctx.unit_of_work(),
            )
            .await?
        else {
            info!(cell_size = %request.cell_size, "No free cells");
            return Ok(StepResult::failed(NO_FREE_CELLS));
        };

        let order = NewOrder::from_request(&request, client_user_id, cells);
        let order_id = desk.create_order(&order, ctx.unit_of_work()).await?;

        info!(order_id, "Order created from request");
        Ok(StepResult::completed().with_payload(json!({ "order_id": order_id })))
    }
}
