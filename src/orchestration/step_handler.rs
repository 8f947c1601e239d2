//! # State Handler Contract
//!
//! A handler implements one `(process, state)` step. It receives the claimed
//! instance and a [`StepContext`] giving access to the domain services in the
//! [`ActionContext`] and to the unit of work the step runs in, and returns a
//! [`StepResult`].
//!
//! Handlers must tolerate being run again for the same instance: the engine is
//! at-least-once, and the stuck sweep never cancels in-flight work.

use crate::authority::{ActionOutcome, ActionRequest, AuthorityError, EntityAuthority};
use crate::models::WorkflowInstance;
use crate::orchestration::types::StepResult;
use crate::store::UnitOfWork;
use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure raised by a handler. The dispatcher turns any of these into a
/// terminal `FAILED` with the error text and discards the handler's writes.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{code}")]
    Business { code: String },

    #[error(transparent)]
    Authority(#[from] AuthorityError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal handler error: {0}")]
    Internal(String),
}

impl HandlerError {
    pub fn business(code: impl Into<String>) -> Self {
        Self::Business { code: code.into() }
    }
}

impl From<sqlx::Error> for HandlerError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database(error.to_string())
    }
}

impl From<crate::error::OrchestratorError> for HandlerError {
    fn from(error: crate::error::OrchestratorError) -> Self {
        Self::Database(error.to_string())
    }
}

#[async_trait]
pub trait StateHandler: Send + Sync {
    async fn handle(
        &self,
        instance: &WorkflowInstance,
        ctx: &mut StepContext<'_>,
    ) -> Result<StepResult, HandlerError>;
}

/// Domain services shared by every handler: the entity authority plus any
/// typed services a deployment registers (repositories, clients).
#[derive(Clone)]
pub struct ActionContext {
    authority: Arc<dyn EntityAuthority>,
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ActionContext {
    pub fn new(authority: Arc<dyn EntityAuthority>) -> Self {
        Self {
            authority,
            services: HashMap::new(),
        }
    }

    /// Register a service by its concrete type. Trait objects are registered
    /// as `Arc<dyn Trait>` and looked up with the same type.
    pub fn with_service<T: Send + Sync + 'static>(mut self, service: T) -> Self {
        self.services.insert(TypeId::of::<T>(), Arc::new(service));
        self
    }

    pub fn service<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|service| service.downcast_ref::<T>())
    }

    pub fn authority(&self) -> &Arc<dyn EntityAuthority> {
        &self.authority
    }
}

impl fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("services", &self.services.len())
            .finish_non_exhaustive()
    }
}

/// Per-step view handed to a handler. Borrows the worker's unit of work for
/// the duration of the call only.
pub struct StepContext<'a> {
    action: &'a ActionContext,
    unit_of_work: &'a mut dyn UnitOfWork,
}

impl<'a> StepContext<'a> {
    pub fn new(action: &'a ActionContext, unit_of_work: &'a mut dyn UnitOfWork) -> Self {
        Self {
            action,
            unit_of_work,
        }
    }

    pub fn action(&self) -> &ActionContext {
        self.action
    }

    pub fn service<T: Send + Sync + 'static>(&self) -> Option<&'a T> {
        self.action.service::<T>()
    }

    pub fn unit_of_work(&mut self) -> &mut dyn UnitOfWork {
        &mut *self.unit_of_work
    }

    /// Call the entity authority inside this step's unit of work.
    pub async fn perform_action(
        &mut self,
        request: &ActionRequest,
    ) -> Result<ActionOutcome, AuthorityError> {
        let authority = Arc::clone(self.action.authority());
        authority
            .perform_action(request, &mut *self.unit_of_work)
            .await
    }
}
