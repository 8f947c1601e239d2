//! # Workflow Instance Model
//!
//! Durable record tracking one run of a named process against one business
//! entity. This is the only entity the engine itself mutates.
//!
//! ## Database Schema
//!
//! Maps to the `workflow_instances` table (see `migrations/`):
//! - `id`: BIGSERIAL primary key, never reused
//! - `(entity_type, entity_id, process_name)`: natural key, enqueue upserts on it
//! - `state`: process-declared token or one of `COMPLETED` / `FAILED`
//! - `attempts_count`, `last_error`, `next_run_at`: retry bookkeeping
//! - `requested_by_*`, `target_*`: opaque actor context for handlers
//! - `result_payload`: JSONB handed back by the last successful step
//!
//! Queries use runtime-checked `sqlx::query_as` so the crate builds without a
//! live database. Every function takes a generic executor and works against
//! either the pool or an open transaction.

use crate::constants::states::{COMPLETED, FAILED};
use crate::state_machine::{InvalidStateToken, WorkflowState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};

pub type InstanceId = i64;

/// An actor (user id + role) that requested a step or must execute it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRef {
    pub actor_id: i64,
    pub role: String,
}

impl ActorRef {
    pub fn new(actor_id: i64, role: impl Into<String>) -> Self {
        Self {
            actor_id,
            role: role.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: InstanceId,
    pub entity_type: String,
    pub entity_id: i64,
    pub process_name: String,
    /// Raw persisted token; see [`WorkflowInstance::workflow_state`].
    pub state: String,
    pub attempts_count: i32,
    pub last_error: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub requested_by: ActorRef,
    pub target: Option<ActorRef>,
    pub result_payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    pub fn workflow_state(&self) -> Result<WorkflowState, InvalidStateToken> {
        self.state.parse()
    }

    pub fn is_terminal(&self) -> bool {
        self.state == COMPLETED || self.state == FAILED
    }

    /// Whether the poller may select this instance at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && self.next_run_at.map_or(true, |at| at <= now)
    }

    /// Timestamp used by the stuck-instance sweep.
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.updated_at.max(self.created_at)
    }

    pub fn status(&self) -> InstanceStatus {
        InstanceStatus {
            id: self.id,
            state: self.state.clone(),
            last_error: self.last_error.clone(),
            attempts_count: self.attempts_count,
            next_run_at: self.next_run_at,
            payload: self.result_payload.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// Enqueue request; upserts on `(entity_type, entity_id, process_name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInstanceRequest {
    pub entity_type: String,
    pub entity_id: i64,
    pub process_name: String,
    pub initial_state: String,
    pub requested_by: ActorRef,
    pub target: Option<ActorRef>,
}

impl NewInstanceRequest {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: i64,
        process_name: impl Into<String>,
        initial_state: impl Into<String>,
        requested_by: ActorRef,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
            process_name: process_name.into(),
            initial_state: initial_state.into(),
            requested_by,
            target: None,
        }
    }

    pub fn with_target(mut self, target: ActorRef) -> Self {
        self.target = Some(target);
        self
    }
}

/// Read-only status projection returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub id: InstanceId,
    pub state: String,
    pub last_error: Option<String>,
    pub attempts_count: i32,
    pub next_run_at: Option<DateTime<Utc>>,
    pub payload: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

/// Bookkeeping written by the result applier for one executed (or
/// short-circuited) step.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceUpdate {
    pub state: WorkflowState,
    pub last_error: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub attempts_increment: u32,
    pub payload: Option<serde_json::Value>,
}

impl InstanceUpdate {
    /// Increment as stored in the `INTEGER` column, clamped at `i32::MAX`.
    pub fn attempts_delta(&self) -> i32 {
        i32::try_from(self.attempts_increment).unwrap_or(i32::MAX)
    }

    /// Attempts count after applying this update, saturating instead of wrapping.
    pub fn attempts_after(&self, attempts_count: i32) -> i32 {
        attempts_count.saturating_add(self.attempts_delta())
    }
}

/// Internal struct for SQL query results
#[derive(Debug, FromRow)]
struct WorkflowInstanceRow {
    id: i64,
    entity_type: String,
    entity_id: i64,
    process_name: String,
    state: String,
    attempts_count: i32,
    last_error: Option<String>,
    next_run_at: Option<DateTime<Utc>>,
    requested_by_actor_id: i64,
    requested_by_role: String,
    target_actor_id: Option<i64>,
    target_role: Option<String>,
    result_payload: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<WorkflowInstanceRow> for WorkflowInstance {
    fn from(row: WorkflowInstanceRow) -> Self {
        let target = match (row.target_actor_id, row.target_role) {
            (Some(actor_id), Some(role)) => Some(ActorRef { actor_id, role }),
            _ => None,
        };
        Self {
            id: row.id,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            process_name: row.process_name,
            state: row.state,
            attempts_count: row.attempts_count,
            last_error: row.last_error,
            next_run_at: row.next_run_at,
            requested_by: ActorRef {
                actor_id: row.requested_by_actor_id,
                role: row.requested_by_role,
            },
            target,
            result_payload: row.result_payload,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const SELECT_COLUMNS: &str = r#"
    id, entity_type, entity_id, process_name, state, attempts_count, last_error,
    next_run_at, requested_by_actor_id, requested_by_role, target_actor_id,
    target_role, result_payload, created_at, updated_at
"#;

impl WorkflowInstance {
    /// Insert a new instance or reset the existing one on the natural key.
    pub async fn upsert<'e, E: PgExecutor<'e>>(
        executor: E,
        request: &NewInstanceRequest,
    ) -> Result<InstanceId, sqlx::Error> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO workflow_instances (
                entity_type, entity_id, process_name, state, attempts_count,
                requested_by_actor_id, requested_by_role, target_actor_id, target_role,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, 0, $5, $6, $7, $8, NOW(), NOW())
            ON CONFLICT (entity_type, entity_id, process_name) DO UPDATE SET
                state = EXCLUDED.state,
                attempts_count = 0,
                last_error = NULL,
                next_run_at = NULL,
                result_payload = NULL,
                requested_by_actor_id = EXCLUDED.requested_by_actor_id,
                requested_by_role = EXCLUDED.requested_by_role,
                target_actor_id = EXCLUDED.target_actor_id,
                target_role = EXCLUDED.target_role,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(&request.entity_type)
        .bind(request.entity_id)
        .bind(&request.process_name)
        .bind(&request.initial_state)
        .bind(request.requested_by.actor_id)
        .bind(&request.requested_by.role)
        .bind(request.target.as_ref().map(|t| t.actor_id))
        .bind(request.target.as_ref().map(|t| t.role.clone()))
        .fetch_one(executor)
        .await?;

        Ok(id)
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: InstanceId,
    ) -> Result<Option<WorkflowInstance>, sqlx::Error> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM workflow_instances WHERE id = $1");
        let row = sqlx::query_as::<_, WorkflowInstanceRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await?;

        Ok(row.map(Into::into))
    }

    pub async fn find_by_natural_key<'e, E: PgExecutor<'e>>(
        executor: E,
        entity_type: &str,
        entity_id: i64,
        process_name: &str,
    ) -> Result<Option<WorkflowInstance>, sqlx::Error> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM workflow_instances \
             WHERE entity_type = $1 AND entity_id = $2 AND process_name = $3"
        );
        let row = sqlx::query_as::<_, WorkflowInstanceRow>(&query)
            .bind(entity_type)
            .bind(entity_id)
            .bind(process_name)
            .fetch_optional(executor)
            .await?;

        Ok(row.map(Into::into))
    }

    /// Non-terminal instances whose `next_run_at` is unset or due, oldest id first.
    pub async fn fetch_ready<'e, E: PgExecutor<'e>>(
        executor: E,
        limit: i64,
    ) -> Result<Vec<WorkflowInstance>, sqlx::Error> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM workflow_instances \
             WHERE state NOT IN ('{COMPLETED}', '{FAILED}') \
               AND (next_run_at IS NULL OR next_run_at <= NOW()) \
             ORDER BY id ASC \
             LIMIT $1"
        );
        let rows = sqlx::query_as::<_, WorkflowInstanceRow>(&query)
            .bind(limit)
            .fetch_all(executor)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Re-read and row-lock an instance that is still due. Returns `None` if
    /// another session holds the lock or the row is no longer eligible.
    pub async fn claim_for_step<'e, E: PgExecutor<'e>>(
        executor: E,
        id: InstanceId,
    ) -> Result<Option<WorkflowInstance>, sqlx::Error> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM workflow_instances \
             WHERE id = $1 \
               AND state NOT IN ('{COMPLETED}', '{FAILED}') \
               AND (next_run_at IS NULL OR next_run_at <= NOW()) \
             FOR UPDATE SKIP LOCKED"
        );
        let row = sqlx::query_as::<_, WorkflowInstanceRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await?;

        Ok(row.map(Into::into))
    }

    /// Write step bookkeeping. Terminal rows are never touched; returns whether
    /// a row was updated.
    pub async fn apply_update<'e, E: PgExecutor<'e>>(
        executor: E,
        id: InstanceId,
        update: &InstanceUpdate,
    ) -> Result<bool, sqlx::Error> {
        let query = format!(
            r#"
            UPDATE workflow_instances
            SET state = $2,
                last_error = $3,
                next_run_at = $4,
                attempts_count = LEAST(attempts_count::BIGINT + $5, 2147483647)::INTEGER,
                result_payload = COALESCE($6, result_payload),
                updated_at = NOW()
            WHERE id = $1
              AND state NOT IN ('{COMPLETED}', '{FAILED}')
            "#
        );
        let result = sqlx::query(&query)
            .bind(id)
            .bind(update.state.as_str())
            .bind(&update.last_error)
            .bind(update.next_run_at)
            .bind(update.attempts_delta())
            .bind(update.payload.clone())
            .execute(executor)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Force-fail every non-terminal instance with no activity since `cutoff`.
    pub async fn fail_inactive_since<'e, E: PgExecutor<'e>>(
        executor: E,
        cutoff: DateTime<Utc>,
        last_error: &str,
    ) -> Result<Vec<InstanceId>, sqlx::Error> {
        let query = format!(
            r#"
            UPDATE workflow_instances
            SET state = '{FAILED}',
                last_error = $2,
                next_run_at = NULL,
                updated_at = NOW()
            WHERE state NOT IN ('{COMPLETED}', '{FAILED}')
              AND GREATEST(updated_at, created_at) < $1
            RETURNING id
            "#
        );
        let rows: Vec<(i64,)> = sqlx::query_as(&query)
            .bind(cutoff)
            .bind(last_error)
            .fetch_all(executor)
            .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
