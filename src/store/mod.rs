//! # Instance Store
//!
//! Storage capabilities consumed by the orchestration components.
//!
//! ## Architecture
//!
//! - [`InstanceStore`] covers pool-level operations: enqueue, status reads,
//!   the poller's ready query and the stuck sweep.
//! - [`UnitOfWork`] is one transactional scope for one instance. A worker
//!   opens it, claims the row, lets the handler write through it, applies the
//!   bookkeeping and commits or rolls back. A unit of work is owned by exactly
//!   one worker and is never shared across tasks.
//!
//! Two implementations ship with the crate:
//! - [`PgInstanceStore`] backed by sqlx/PostgreSQL (`FOR UPDATE SKIP LOCKED`)
//! - [`MemoryInstanceStore`] for tests and embedded use

pub mod memory;
pub mod postgres;

use crate::error::Result;
use crate::models::{
    InstanceId, InstanceStatus, InstanceUpdate, NewInstanceRequest, WorkflowInstance,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::any::Any;

pub use memory::{MemoryInstanceStore, MemoryUnitOfWork};
pub use postgres::{pg_transaction, PgInstanceStore, PgUnitOfWork};

#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Upsert on the natural key and return the instance id.
    async fn enqueue(&self, request: &NewInstanceRequest) -> Result<InstanceId>;

    async fn find(&self, id: InstanceId) -> Result<Option<WorkflowInstance>>;

    async fn find_by_natural_key(
        &self,
        entity_type: &str,
        entity_id: i64,
        process_name: &str,
    ) -> Result<Option<WorkflowInstance>>;

    /// Pure read: non-terminal, due instances in ascending id order.
    async fn fetch_ready(&self, limit: u32) -> Result<Vec<WorkflowInstance>>;

    /// Force-fail non-terminal instances with no activity since `cutoff`.
    async fn fail_inactive_since(
        &self,
        cutoff: DateTime<Utc>,
        last_error: &str,
    ) -> Result<Vec<InstanceId>>;

    /// Open a fresh transactional scope.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;

    async fn status(&self, id: InstanceId) -> Result<Option<InstanceStatus>> {
        Ok(self.find(id).await?.map(|instance| instance.status()))
    }
}

#[async_trait]
pub trait UnitOfWork: Send {
    /// Lock and re-read an instance that is still due. `None` means another
    /// scope owns it or it is no longer eligible; the caller must skip it.
    async fn claim(&mut self, id: InstanceId) -> Result<Option<WorkflowInstance>>;

    /// Stage the step bookkeeping. Returns `false` if the row is terminal.
    async fn apply_update(&mut self, id: InstanceId, update: &InstanceUpdate) -> Result<bool>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;

    /// Escape hatch for handlers that need the concrete transaction.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
