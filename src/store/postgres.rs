use super::{InstanceStore, UnitOfWork};
use crate::error::{OrchestratorError, Result};
use crate::models::{InstanceId, InstanceUpdate, NewInstanceRequest, WorkflowInstance};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::any::Any;
use tracing::{debug, error};

/// PostgreSQL-backed instance store.
#[derive(Debug, Clone)]
pub struct PgInstanceStore {
    pool: PgPool,
}

impl PgInstanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl InstanceStore for PgInstanceStore {
    async fn enqueue(&self, request: &NewInstanceRequest) -> Result<InstanceId> {
        Ok(WorkflowInstance::upsert(&self.pool, request).await?)
    }

    async fn find(&self, id: InstanceId) -> Result<Option<WorkflowInstance>> {
        Ok(WorkflowInstance::find_by_id(&self.pool, id).await?)
    }

    async fn find_by_natural_key(
        &self,
        entity_type: &str,
        entity_id: i64,
        process_name: &str,
    ) -> Result<Option<WorkflowInstance>> {
        Ok(
            WorkflowInstance::find_by_natural_key(&self.pool, entity_type, entity_id, process_name)
                .await?,
        )
    }

    async fn fetch_ready(&self, limit: u32) -> Result<Vec<WorkflowInstance>> {
        WorkflowInstance::fetch_ready(&self.pool, i64::from(limit))
            .await
            .map_err(|e| {
                error!("Failed to fetch ready instances: {}", e);
                OrchestratorError::Database(format!("Ready instance query failed: {e}"))
            })
    }

    async fn fail_inactive_since(
        &self,
        cutoff: DateTime<Utc>,
        last_error: &str,
    ) -> Result<Vec<InstanceId>> {
        Ok(WorkflowInstance::fail_inactive_since(&self.pool, cutoff, last_error).await?)
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await.map_err(|e| {
            OrchestratorError::Database(format!("Failed to begin transaction: {e}"))
        })?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

/// One PostgreSQL transaction scoped to one instance step.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl PgUnitOfWork {
    /// The open transaction, for handlers writing domain rows atomically with
    /// the step bookkeeping.
    pub fn transaction(&mut self) -> &mut Transaction<'static, Postgres> {
        &mut self.tx
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn claim(&mut self, id: InstanceId) -> Result<Option<WorkflowInstance>> {
        let claimed = WorkflowInstance::claim_for_step(&mut *self.tx, id).await?;
        if claimed.is_none() {
            debug!(instance_id = id, "Instance locked elsewhere or no longer due");
        }
        Ok(claimed)
    }

    async fn apply_update(&mut self, id: InstanceId, update: &InstanceUpdate) -> Result<bool> {
        Ok(WorkflowInstance::apply_update(&mut *self.tx, id, update).await?)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(|e| {
            OrchestratorError::Database(format!("Failed to commit transaction: {e}"))
        })
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(|e| {
            OrchestratorError::Database(format!("Failed to roll back transaction: {e}"))
        })
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Downcast a unit of work to its PostgreSQL transaction, if it is one.
pub fn pg_transaction(
    unit_of_work: &mut dyn UnitOfWork,
) -> Option<&mut Transaction<'static, Postgres>> {
    unit_of_work
        .as_any_mut()
        .downcast_mut::<PgUnitOfWork>()
        .map(PgUnitOfWork::transaction)
}
