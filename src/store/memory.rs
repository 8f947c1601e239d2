//! In-memory instance store.
//!
//! Mirrors the PostgreSQL semantics closely enough for the engine tests:
//! - a claim set stands in for `FOR UPDATE SKIP LOCKED`
//! - updates are staged in the unit of work and applied on commit
//! - a re-enqueue bumps the row's generation; staged updates taken under an
//!   older generation are dropped on commit, the way the upsert in PostgreSQL
//!   waits for the row lock and lands after the step
//! - the stuck sweep skips rows that a live unit of work has claimed
//!
//! Test helpers allow backdating activity and simulating an outage.
//!
//! ```rust
//! use fsm_orchestrator::models::{ActorRef, NewInstanceRequest};
//! use fsm_orchestrator::store::{InstanceStore, MemoryInstanceStore};
//!
//! # tokio_test::block_on(async {
//! let store = MemoryInstanceStore::new();
//! let operator = ActorRef::new(3, "operator");
//! let request = NewInstanceRequest::new("locker", 14, "locker_cell", "OPENING", operator);
//!
//! let id = store.enqueue(&request).await?;
//! assert_eq!(store.enqueue(&request).await?, id);
//! assert_eq!(store.fetch_ready(10).await?.len(), 1);
//! # Ok::<(), fsm_orchestrator::OrchestratorError>(())
//! # }).unwrap();
//! ```

use super::{InstanceStore, UnitOfWork};
use crate::constants::states::FAILED;
use crate::error::{OrchestratorError, Result};
use crate::models::{InstanceId, InstanceUpdate, NewInstanceRequest, WorkflowInstance};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct MemoryState {
    rows: RwLock<BTreeMap<InstanceId, WorkflowInstance>>,
    claimed: DashSet<InstanceId>,
    generations: DashMap<InstanceId, u64>,
    next_id: AtomicI64,
    unavailable: AtomicBool,
}

impl MemoryState {
    fn generation(&self, id: InstanceId) -> u64 {
        self.generations.get(&id).map(|g| *g).unwrap_or_default()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Database(
                "instance store unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryInstanceStore {
    state: Arc<MemoryState>,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored instance, ascending id.
    pub fn all(&self) -> Vec<WorkflowInstance> {
        self.state.rows.read().values().cloned().collect()
    }

    /// Move an instance's activity timestamps into the past.
    pub fn backdate(&self, id: InstanceId, by: Duration) -> bool {
        let mut rows = self.state.rows.write();
        match rows.get_mut(&id) {
            Some(row) => {
                row.created_at -= by;
                row.updated_at -= by;
                true
            }
            None => false,
        }
    }

    /// Make every subsequent operation fail with a database error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn is_claimed(&self, id: InstanceId) -> bool {
        self.state.claimed.contains(&id)
    }
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn enqueue(&self, request: &NewInstanceRequest) -> Result<InstanceId> {
        self.state.check_available()?;
        let now = Utc::now();
        let mut rows = self.state.rows.write();

        let existing = rows.values_mut().find(|row| {
            row.entity_type == request.entity_type
                && row.entity_id == request.entity_id
                && row.process_name == request.process_name
        });

        if let Some(row) = existing {
            row.state = request.initial_state.clone();
            row.attempts_count = 0;
            row.last_error = None;
            row.next_run_at = None;
            row.result_payload = None;
            row.requested_by = request.requested_by.clone();
            row.target = request.target.clone();
            row.updated_at = now;
            *self.state.generations.entry(row.id).or_default() += 1;
            return Ok(row.id);
        }

        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        rows.insert(
            id,
            WorkflowInstance {
                id,
                entity_type: request.entity_type.clone(),
                entity_id: request.entity_id,
                process_name: request.process_name.clone(),
                state: request.initial_state.clone(),
                attempts_count: 0,
                last_error: None,
                next_run_at: None,
                requested_by: request.requested_by.clone(),
                target: request.target.clone(),
                result_payload: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn find(&self, id: InstanceId) -> Result<Option<WorkflowInstance>> {
        self.state.check_available()?;
        Ok(self.state.rows.read().get(&id).cloned())
    }

    async fn find_by_natural_key(
        &self,
        entity_type: &str,
        entity_id: i64,
        process_name: &str,
    ) -> Result<Option<WorkflowInstance>> {
        self.state.check_available()?;
        Ok(self
            .state
            .rows
            .read()
            .values()
            .find(|row| {
                row.entity_type == entity_type
                    && row.entity_id == entity_id
                    && row.process_name == process_name
            })
            .cloned())
    }

    async fn fetch_ready(&self, limit: u32) -> Result<Vec<WorkflowInstance>> {
        self.state.check_available()?;
        let now = Utc::now();
        Ok(self
            .state
            .rows
            .read()
            .values()
            .filter(|row| row.is_ready(now))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn fail_inactive_since(
        &self,
        cutoff: DateTime<Utc>,
        last_error: &str,
    ) -> Result<Vec<InstanceId>> {
        self.state.check_available()?;
        let now = Utc::now();
        let mut failed = Vec::new();
        let mut rows = self.state.rows.write();

        for row in rows.values_mut() {
            if row.is_terminal() || row.last_activity_at() >= cutoff {
                continue;
            }
            // A live claim is a held row lock; the UPDATE would block on it.
            if self.state.claimed.contains(&row.id) {
                continue;
            }
            row.state = FAILED.to_string();
            row.last_error = Some(last_error.to_string());
            row.next_run_at = None;
            row.updated_at = now;
            failed.push(row.id);
        }

        Ok(failed)
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        self.state.check_available()?;
        Ok(Box::new(MemoryUnitOfWork {
            state: Arc::clone(&self.state),
            claims: Vec::new(),
            staged: Vec::new(),
        }))
    }
}

/// Unit of work over the in-memory store. Claims are released when the unit
/// of work commits, rolls back or is dropped.
#[derive(Debug)]
pub struct MemoryUnitOfWork {
    state: Arc<MemoryState>,
    /// Claimed ids with the row generation seen at claim time
    claims: Vec<(InstanceId, u64)>,
    staged: Vec<(InstanceId, InstanceUpdate)>,
}

impl MemoryUnitOfWork {
    fn release_claims(&mut self) {
        for (id, _) in self.claims.drain(..) {
            self.state.claimed.remove(&id);
        }
    }
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        self.release_claims();
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn claim(&mut self, id: InstanceId) -> Result<Option<WorkflowInstance>> {
        self.state.check_available()?;
        if self.claims.iter().any(|(claimed, _)| *claimed == id) {
            return Ok(self.state.rows.read().get(&id).cloned());
        }
        if !self.state.claimed.insert(id) {
            debug!(instance_id = id, "Instance claimed by another unit of work");
            return Ok(None);
        }

        let now = Utc::now();
        let claimed = {
            let rows = self.state.rows.read();
            rows.get(&id)
                .filter(|row| row.is_ready(now))
                .cloned()
                .map(|row| (row, self.state.generation(id)))
        };

        match claimed {
            Some((row, generation)) => {
                self.claims.push((id, generation));
                Ok(Some(row))
            }
            None => {
                self.state.claimed.remove(&id);
                Ok(None)
            }
        }
    }

    async fn apply_update(&mut self, id: InstanceId, update: &InstanceUpdate) -> Result<bool> {
        self.state.check_available()?;
        let applicable = self
            .state
            .rows
            .read()
            .get(&id)
            .is_some_and(|row| !row.is_terminal());
        if applicable {
            self.staged.push((id, update.clone()));
        }
        Ok(applicable)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.state.check_available()?;
        let now = Utc::now();
        {
            let mut rows = self.state.rows.write();
            for (id, update) in self.staged.drain(..) {
                let Some(row) = rows.get_mut(&id) else {
                    continue;
                };
                if row.is_terminal() {
                    continue;
                }
                let claimed_generation = self
                    .claims
                    .iter()
                    .find(|(claimed, _)| *claimed == id)
                    .map(|(_, generation)| *generation);
                if claimed_generation.is_some_and(|g| g != self.state.generation(id)) {
                    debug!(instance_id = id, "Instance re-enqueued during step, update dropped");
                    continue;
                }
                row.state = update.state.as_str().to_string();
                row.last_error = update.last_error.clone();
                row.next_run_at = update.next_run_at;
                row.attempts_count = update.attempts_after(row.attempts_count);
                if update.payload.is_some() {
                    row.result_payload = update.payload;
                }
                row.updated_at = now;
            }
        }
        self.release_claims();
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.staged.clear();
        self.release_claims();
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
