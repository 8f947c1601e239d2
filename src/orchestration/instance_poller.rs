//! # Instance Poller
//!
//! Selects a bounded batch of ready instances: non-terminal, `next_run_at`
//! unset or passed, ascending id. The poll is a pure read with no locking;
//! each worker re-claims its row inside its own unit of work, so a second
//! poller seeing the same rows only causes skipped claims.

use crate::error::Result;
use crate::models::WorkflowInstance;
use crate::store::InstanceStore;
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Clone)]
pub struct InstancePoller {
    store: Arc<dyn InstanceStore>,
    batch_size: u32,
}

impl InstancePoller {
    pub fn new(store: Arc<dyn InstanceStore>, batch_size: u32) -> Self {
        Self { store, batch_size }
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    #[instrument(skip(self), fields(batch_size = self.batch_size))]
    pub async fn fetch_ready(&self) -> Result<Vec<WorkflowInstance>> {
        let instances = self.store.fetch_ready(self.batch_size).await?;
        debug!(count = instances.len(), "Fetched ready instances");
        Ok(instances)
    }
}
