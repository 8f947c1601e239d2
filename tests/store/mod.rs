//! PostgreSQL store and authority tests using SQLx native testing. Each test
//! gets its own migrated database; run with `cargo test -- --ignored` and
//! `DATABASE_URL` set.

use crate::common::request;
use fsm_orchestrator::authority::{
    ActionOutcome, ActionRequest, EntityAuthority, PgEntityAuthority,
};
use fsm_orchestrator::database::{DatabaseConnection, DatabaseMigrations};
use fsm_orchestrator::models::{ActorRef, InstanceUpdate};
use fsm_orchestrator::state_machine::WorkflowState;
use fsm_orchestrator::store::{InstanceStore, PgInstanceStore};
use serde_json::json;
use sqlx::PgPool;

fn completed_update() -> InstanceUpdate {
    InstanceUpdate {
        state: WorkflowState::Completed,
        last_error: None,
        next_run_at: None,
        attempts_increment: 1,
        payload: Some(json!({"order_id": 77})),
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_connection_health_check_and_schema(pool: PgPool) -> sqlx::Result<()> {
    assert!(DatabaseMigrations::schema_ready(&pool).await?);
    let connection = DatabaseConnection::from_pool(pool);
    assert!(connection.health_check().await?);
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_enqueue_upserts_on_natural_key(pool: PgPool) -> sqlx::Result<()> {
    let store = PgInstanceStore::new(pool);

    let first = store
        .enqueue(&request("orderRequest", 42, "order_creation", "WAITING_FOR_RESERVATION"))
        .await
        .unwrap();
    let second = store
        .enqueue(
            &request("orderRequest", 42, "order_creation", "WAITING_FOR_RESERVATION")
                .with_target(ActorRef::new(12, "courier1")),
        )
        .await
        .unwrap();
    assert_eq!(first, second);

    let instance = store.find(first).await.unwrap().unwrap();
    assert_eq!(instance.attempts_count, 0);
    assert_eq!(instance.target, Some(ActorRef::new(12, "courier1")));

    let by_key = store
        .find_by_natural_key("orderRequest", 42, "order_creation")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_key.id, first);
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_commit_applies_bookkeeping_and_hides_terminal(pool: PgPool) -> sqlx::Result<()> {
    let store = PgInstanceStore::new(pool);
    let id = store
        .enqueue(&request("orderRequest", 1, "order_creation", "WAITING_FOR_RESERVATION"))
        .await
        .unwrap();

    let ready = store.fetch_ready(10).await.unwrap();
    assert_eq!(ready.len(), 1);

    let mut uow = store.begin().await.unwrap();
    let claimed = uow.claim(id).await.unwrap();
    assert!(claimed.is_some());
    assert!(uow.apply_update(id, &completed_update()).await.unwrap());
    uow.commit().await.unwrap();

    let status = store.status(id).await.unwrap().unwrap();
    assert_eq!(status.state, "COMPLETED");
    assert_eq!(status.attempts_count, 1);
    assert_eq!(status.payload, Some(json!({"order_id": 77})));
    assert!(store.fetch_ready(10).await.unwrap().is_empty());

    // Terminal rows are never mutated by bookkeeping
    let mut uow = store.begin().await.unwrap();
    assert!(!uow.apply_update(id, &completed_update()).await.unwrap());
    uow.rollback().await.unwrap();
    assert_eq!(store.status(id).await.unwrap().unwrap().attempts_count, 1);
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_claim_skips_locked_rows(pool: PgPool) -> sqlx::Result<()> {
    let store = PgInstanceStore::new(pool);
    let id = store
        .enqueue(&request("locker", 9, "locker_cell", "OPENING"))
        .await
        .unwrap();

    let mut holder = store.begin().await.unwrap();
    assert!(holder.claim(id).await.unwrap().is_some());

    let mut contender = store.begin().await.unwrap();
    assert!(contender.claim(id).await.unwrap().is_none());
    contender.rollback().await.unwrap();

    holder.rollback().await.unwrap();
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_rollback_discards_update(pool: PgPool) -> sqlx::Result<()> {
    let store = PgInstanceStore::new(pool);
    let id = store
        .enqueue(&request("locker", 9, "locker_cell", "OPENING"))
        .await
        .unwrap();

    let mut uow = store.begin().await.unwrap();
    uow.claim(id).await.unwrap();
    uow.apply_update(id, &completed_update()).await.unwrap();
    uow.rollback().await.unwrap();

    let status = store.status(id).await.unwrap().unwrap();
    assert_eq!(status.state, "OPENING");
    assert_eq!(status.attempts_count, 0);
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_stuck_sweep_fails_inactive_rows(pool: PgPool) -> sqlx::Result<()> {
    let store = PgInstanceStore::new(pool.clone());
    let id = store
        .enqueue(&request("locker", 9, "locker_cell", "OPENING"))
        .await
        .unwrap();
    sqlx::query(
        "UPDATE workflow_instances SET created_at = NOW() - INTERVAL '2 hours', \
         updated_at = NOW() - INTERVAL '2 hours' WHERE id = $1",
    )
    .bind(id)
    .execute(&pool)
    .await?;

    let cutoff = chrono::Utc::now() - chrono::Duration::minutes(30);
    let failed = store.fail_inactive_since(cutoff, "STUCK_TIMEOUT").await.unwrap();
    assert_eq!(failed, vec![id]);

    let status = store.status(id).await.unwrap().unwrap();
    assert_eq!(status.state, "FAILED");
    assert_eq!(status.last_error.as_deref(), Some("STUCK_TIMEOUT"));

    assert!(store
        .fail_inactive_since(cutoff, "STUCK_TIMEOUT")
        .await
        .unwrap()
        .is_empty());
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_authority_call_runs_inside_unit_of_work(pool: PgPool) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        CREATE FUNCTION fsm_perform_action(
            p_entity_type TEXT, p_entity_id BIGINT, p_action TEXT, p_actor BIGINT, p_extra TEXT
        ) RETURNS TEXT AS $$
        BEGIN
            IF p_action = 'locker_open_locker' THEN
                RETURN 'FSM action ' || p_action || ' applied';
            END IF;
            RETURN 'Action ' || p_action || ' not allowed';
        END;
        $$ LANGUAGE plpgsql
        "#,
    )
    .execute(&pool)
    .await?;

    let store = PgInstanceStore::new(pool.clone());
    let authority = PgEntityAuthority::new(pool);
    let mut uow = store.begin().await.unwrap();

    let accepted = authority
        .perform_action(
            &ActionRequest::new("locker", 14, "locker_open_locker", 3),
            uow.as_mut(),
        )
        .await
        .unwrap();
    assert!(accepted.is_accepted());

    let rejected = authority
        .perform_action(
            &ActionRequest::new("locker", 14, "locker_close_locker", 3).with_extra("1234"),
            uow.as_mut(),
        )
        .await
        .unwrap();
    assert_eq!(
        rejected,
        ActionOutcome::Rejected {
            reason: "Action locker_close_locker not allowed".to_string()
        }
    );

    uow.rollback().await.unwrap();
    Ok(())
}
