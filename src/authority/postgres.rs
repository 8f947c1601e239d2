use super::{ActionOutcome, ActionRequest, AuthorityError, EntityAuthority};
use crate::store::{pg_transaction, UnitOfWork};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument, warn};

const SUCCESS_PREFIX: &str = "FSM action ";

/// Authority backed by the `fsm_perform_action` stored function.
#[derive(Debug, Clone)]
pub struct PgEntityAuthority {
    pool: PgPool,
}

impl PgEntityAuthority {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Map the function's text result onto an outcome.
pub fn interpret_result(
    request: &ActionRequest,
    result: Option<String>,
) -> Result<ActionOutcome, AuthorityError> {
    match result {
        Some(text) if text.starts_with(SUCCESS_PREFIX) => {
            Ok(ActionOutcome::Accepted { message: text })
        }
        Some(reason) => Ok(ActionOutcome::Rejected { reason }),
        None => Err(AuthorityError::Protocol(format!(
            "FSM {}: no result from fsm_perform_action",
            request.action_name
        ))),
    }
}

#[async_trait]
impl EntityAuthority for PgEntityAuthority {
    #[instrument(skip(self, unit_of_work), fields(
        entity_type = %request.entity_type,
        entity_id = request.entity_id,
        action = %request.action_name
    ))]
    async fn perform_action(
        &self,
        request: &ActionRequest,
        unit_of_work: &mut dyn UnitOfWork,
    ) -> Result<ActionOutcome, AuthorityError> {
        let query = sqlx::query_scalar::<_, Option<String>>(
            "SELECT fsm_perform_action($1, $2, $3, $4, $5)",
        )
        .bind(&request.entity_type)
        .bind(request.entity_id)
        .bind(&request.action_name)
        .bind(request.actor_id)
        .bind(&request.extra);

        let row = match pg_transaction(unit_of_work) {
            Some(tx) => query.fetch_optional(&mut **tx).await,
            None => query.fetch_optional(&self.pool).await,
        }
        .map_err(|e| {
            warn!(error = %e, "Entity authority call failed");
            AuthorityError::Unavailable(format!("FSM {}: {e}", request.action_name))
        })?;

        let outcome = interpret_result(request, row.flatten())?;
        debug!(accepted = outcome.is_accepted(), "Entity authority responded");
        Ok(outcome)
    }
}
