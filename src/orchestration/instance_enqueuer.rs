//! # Instance Enqueuer
//!
//! Entry point used by the API layer to start work and to read it back.
//!
//! Enqueue is an idempotent upsert on `(entity_type, entity_id, process_name)`:
//! re-enqueueing returns the existing id and starts a new logical attempt
//! (attempts reset to 0, `last_error`, `next_run_at` and payload cleared).
//!
//! Process names are not checked against the registry here. An unknown process
//! is a data condition and fails at dispatch with `UNKNOWN_PROCESS`, so that
//! the failure is recorded on the instance where callers look for it.

use crate::error::{OrchestratorError, Result};
use crate::logging::log_instance_operation;
use crate::models::{InstanceId, InstanceStatus, NewInstanceRequest, WorkflowInstance};
use crate::registry::ProcessRegistry;
use crate::state_machine::{StateToken, WorkflowState};
use crate::store::InstanceStore;
use std::sync::Arc;
use tracing::{instrument, warn};

pub struct InstanceEnqueuer {
    store: Arc<dyn InstanceStore>,
    registry: Option<Arc<ProcessRegistry>>,
}

impl InstanceEnqueuer {
    pub fn new(store: Arc<dyn InstanceStore>) -> Self {
        Self {
            store,
            registry: None,
        }
    }

    /// Attach the registry so enqueues routed nowhere are logged up front.
    pub fn with_registry(mut self, registry: Arc<ProcessRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[instrument(skip(self, request), fields(
        entity_type = %request.entity_type,
        entity_id = request.entity_id,
        process_name = %request.process_name,
        initial_state = %request.initial_state
    ))]
    pub async fn enqueue(&self, request: &NewInstanceRequest) -> Result<InstanceId> {
        let initial_state = validate_request(request)?;
        self.warn_on_unroutable(request, &initial_state);

        let id = self.store.enqueue(request).await?;

        log_instance_operation(
            "enqueue",
            Some(id),
            Some(&request.process_name),
            initial_state.as_str(),
            None,
        );
        Ok(id)
    }

    /// Read-only `{state, last_error, attempts_count, ...}` projection.
    pub async fn get_instance_status(&self, id: InstanceId) -> Result<Option<InstanceStatus>> {
        self.store.status(id).await
    }

    pub async fn find_instance(&self, id: InstanceId) -> Result<Option<WorkflowInstance>> {
        self.store.find(id).await
    }

    pub async fn find_by_natural_key(
        &self,
        entity_type: &str,
        entity_id: i64,
        process_name: &str,
    ) -> Result<Option<WorkflowInstance>> {
        self.store
            .find_by_natural_key(entity_type, entity_id, process_name)
            .await
    }

    /// Like [`Self::get_instance_status`] but a missing id is an error.
    pub async fn require_status(&self, id: InstanceId) -> Result<InstanceStatus> {
        self.get_instance_status(id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("workflow instance {id}")))
    }

    fn warn_on_unroutable(&self, request: &NewInstanceRequest, initial_state: &StateToken) {
        let Some(registry) = &self.registry else {
            return;
        };
        match registry.process(&request.process_name) {
            None => warn!("Enqueued process is not registered and will fail at dispatch"),
            Some(definition)
                if !definition.declares(&WorkflowState::Step(initial_state.clone())) =>
            {
                warn!("Initial state has no handler and will fail at dispatch")
            }
            Some(_) => {}
        }
    }
}

/// The initial state must be a non-terminal, well-formed token.
fn validate_request(request: &NewInstanceRequest) -> Result<StateToken> {
    if request.entity_type.trim().is_empty() {
        return Err(OrchestratorError::Validation(
            "entity_type must not be empty".to_string(),
        ));
    }
    if request.process_name.trim().is_empty() {
        return Err(OrchestratorError::Validation(
            "process_name must not be empty".to_string(),
        ));
    }
    StateToken::parse(&request.initial_state).map_err(|e| {
        OrchestratorError::Validation(format!(
            "initial_state '{}' is not a valid starting state: {e}",
            request.initial_state
        ))
    })
}
