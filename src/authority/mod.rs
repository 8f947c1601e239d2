//! # Entity Authority
//!
//! Capability interface to the external transactional state machine that owns
//! business entities (orders, trips, locker cells). Handlers call it; the
//! engine never does. Transition legality and entity locking belong to the
//! authority and are not reproduced here.

pub mod postgres;

use crate::store::UnitOfWork;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use postgres::PgEntityAuthority;

/// `(entityType, entityId, action, actorId, extra)` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub entity_type: String,
    pub entity_id: i64,
    pub action_name: String,
    pub actor_id: i64,
    pub extra: Option<String>,
}

impl ActionRequest {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: i64,
        action_name: impl Into<String>,
        actor_id: i64,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
            action_name: action_name.into(),
            actor_id,
            extra: None,
        }
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionOutcome {
    Accepted { message: String },
    /// The authority refused the transition; `reason` is its own text.
    Rejected { reason: String },
}

impl ActionOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("Entity authority unavailable: {0}")]
    Unavailable(String),

    #[error("Entity authority protocol error: {0}")]
    Protocol(String),
}

#[async_trait]
pub trait EntityAuthority: Send + Sync {
    /// Ask the authority to perform one entity action. Implementations that
    /// share storage with the instance store run the call inside
    /// `unit_of_work` so its effects commit or roll back with the step.
    async fn perform_action(
        &self,
        request: &ActionRequest,
        unit_of_work: &mut dyn UnitOfWork,
    ) -> Result<ActionOutcome, AuthorityError>;
}
