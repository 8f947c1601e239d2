//! End-to-end cycles against the in-memory store: order creation, max
//! attempts, handler-chosen scheduling and the stuck sweep.

use crate::common::{
    order_desk_context, pending_request, request, test_config, CountingHandler, FakeOrderDesk,
    Harness,
};
use fsm_orchestrator::handlers::register_builtin_processes;
use fsm_orchestrator::orchestration::{StateHandler, StepResult};
use fsm_orchestrator::registry::{FailurePolicy, ProcessDefinition, ProcessRegistry};
use fsm_orchestrator::state_machine::StateToken;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn builtin_registry() -> ProcessRegistry {
    register_builtin_processes(ProcessRegistry::builder())
        .unwrap()
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_order_creation_completes_with_order_id() {
    let desk = Arc::new(
        FakeOrderDesk::new()
            .with_request(pending_request(42, "M"))
            .with_free_cells("M", 11, 21),
    );
    let harness = Harness::new(builtin_registry(), order_desk_context(Arc::clone(&desk)));

    let id = harness
        .enqueue(request("orderRequest", 42, "order_creation", "WAITING_FOR_RESERVATION"))
        .await;

    let cycle = harness
        .system
        .orchestration_loop()
        .run_single_cycle()
        .await
        .unwrap();
    assert_eq!(cycle.polled, 1);
    assert_eq!(cycle.completed, 1);

    let status = harness.status(id).await;
    assert_eq!(status.state, "COMPLETED");
    assert_eq!(status.attempts_count, 1);
    assert_eq!(status.last_error, None);
    assert_eq!(status.payload, Some(json!({"order_id": 77})));

    let orders = desk.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].1.source_cell_id, 11);
    assert_eq!(orders[0].1.dest_cell_id, 21);
}

#[tokio::test]
async fn test_order_creation_without_free_cells_fails() {
    let desk = Arc::new(FakeOrderDesk::new().with_request(pending_request(42, "XL")));
    let harness = Harness::new(builtin_registry(), order_desk_context(Arc::clone(&desk)));

    let id = harness
        .enqueue(request("orderRequest", 42, "order_creation", "WAITING_FOR_RESERVATION"))
        .await;
    harness
        .system
        .orchestration_loop()
        .run_single_cycle()
        .await
        .unwrap();

    let status = harness.status(id).await;
    assert_eq!(status.state, "FAILED");
    assert_eq!(status.attempts_count, 1);
    assert_eq!(status.last_error.as_deref(), Some("NO_FREE_CELLS"));
    assert!(desk.orders().is_empty());
}

#[tokio::test]
async fn test_order_creation_rejects_non_pending_request() {
    let mut accepted = pending_request(42, "M");
    accepted.status = "ACCEPTED".to_string();
    let desk = Arc::new(
        FakeOrderDesk::new()
            .with_request(accepted)
            .with_free_cells("M", 11, 21),
    );
    let harness = Harness::new(builtin_registry(), order_desk_context(desk));

    let id = harness
        .enqueue(request("orderRequest", 42, "order_creation", "WAITING_FOR_RESERVATION"))
        .await;
    harness
        .system
        .orchestration_loop()
        .run_single_cycle()
        .await
        .unwrap();

    let status = harness.status(id).await;
    assert_eq!(status.state, "FAILED");
    assert_eq!(status.last_error.as_deref(), Some("INVALID_REQUEST_STATE"));
}

#[tokio::test]
async fn test_always_failing_handler_stops_at_max_attempts() {
    let (handler, calls) = CountingHandler::new(StepResult::failed("ALWAYS_FAILS"));
    let registry = ProcessRegistry::builder()
        .register(
            ProcessDefinition::builder("flaky_process")
                .state("WORKING", handler)
                .failure_policy(FailurePolicy::RetryWithBackoff)
                .build()
                .unwrap(),
        )
        .unwrap()
        .build()
        .unwrap();
    let harness = Harness::new(registry, crate::common::default_context());
    let orchestration_loop = harness.system.orchestration_loop();

    let id = harness
        .enqueue(request("order", 7, "flaky_process", "WORKING"))
        .await;

    for expected_attempts in 1..=3 {
        let cycle = orchestration_loop.run_single_cycle().await.unwrap();
        assert_eq!(cycle.retried, 1);

        let instance = harness.instance(id).await;
        assert_eq!(instance.state, "WORKING");
        assert_eq!(instance.attempts_count, expected_attempts);
        assert_eq!(instance.last_error.as_deref(), Some("ALWAYS_FAILS"));
        assert!(instance.next_run_at.is_some());

        // backoff is 1ms in the test config
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let cycle = orchestration_loop.run_single_cycle().await.unwrap();
    assert_eq!(cycle.failed, 1);
    let status = harness.status(id).await;
    assert_eq!(status.state, "FAILED");
    assert_eq!(status.last_error.as_deref(), Some("MAX_ATTEMPTS_EXCEEDED"));
    assert_eq!(status.attempts_count, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let cycle = orchestration_loop.run_single_cycle().await.unwrap();
    assert_eq!(cycle.polled, 0);
    assert_eq!(harness.status(id).await.attempts_count, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_per_process_max_attempts_override() {
    let (handler, calls) = CountingHandler::new(StepResult::failed("ALWAYS_FAILS"));
    let registry = ProcessRegistry::builder()
        .register(
            ProcessDefinition::builder("one_shot")
                .state("WORKING", handler)
                .failure_policy(FailurePolicy::RetryWithBackoff)
                .max_attempts(1)
                .build()
                .unwrap(),
        )
        .unwrap()
        .build()
        .unwrap();
    let harness = Harness::new(registry, crate::common::default_context());
    let orchestration_loop = harness.system.orchestration_loop();

    let id = harness.enqueue(request("order", 8, "one_shot", "WORKING")).await;

    orchestration_loop.run_single_cycle().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    orchestration_loop.run_single_cycle().await.unwrap();

    let status = harness.status(id).await;
    assert_eq!(status.state, "FAILED");
    assert_eq!(status.last_error.as_deref(), Some("MAX_ATTEMPTS_EXCEEDED"));
    assert_eq!(status.attempts_count, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stuck_instance_swept_with_zero_attempts() {
    let (handler, calls) = CountingHandler::new(StepResult::completed());
    let registry = ProcessRegistry::builder()
        .register(
            ProcessDefinition::builder("locker_cell")
                .state("OPENING", handler)
                .build()
                .unwrap(),
        )
        .unwrap()
        .build()
        .unwrap();
    let harness = Harness::with_config(test_config(), registry, crate::common::default_context());

    let id = harness.enqueue(request("locker", 9, "locker_cell", "OPENING")).await;
    assert!(harness.store.backdate(id, chrono::Duration::minutes(45)));

    let orchestration_loop = harness.system.orchestration_loop();
    let sweep = orchestration_loop.sweep_once().await.unwrap();
    assert_eq!(sweep.failed_instance_ids, vec![id]);

    let status = harness.status(id).await;
    assert_eq!(status.state, "FAILED");
    assert_eq!(status.last_error.as_deref(), Some("STUCK_TIMEOUT"));
    assert_eq!(status.attempts_count, 0);

    let again = orchestration_loop.sweep_once().await.unwrap();
    assert!(again.failed_instance_ids.is_empty());

    let cycle = orchestration_loop.run_single_cycle().await.unwrap();
    assert_eq!(cycle.polled, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let summary = orchestration_loop.summary();
    assert_eq!(summary.sweeps, 2);
    assert_eq!(summary.stuck_failed, 1);
}

#[tokio::test]
async fn test_recent_instance_not_swept() {
    let (handler, _calls) = CountingHandler::new(StepResult::completed());
    let registry = ProcessRegistry::builder()
        .register(
            ProcessDefinition::builder("locker_cell")
                .state("OPENING", handler)
                .build()
                .unwrap(),
        )
        .unwrap()
        .build()
        .unwrap();
    let harness = Harness::new(registry, crate::common::default_context());

    let id = harness.enqueue(request("locker", 9, "locker_cell", "OPENING")).await;
    assert!(harness.store.backdate(id, chrono::Duration::minutes(5)));

    let sweep = harness
        .system
        .orchestration_loop()
        .sweep_once()
        .await
        .unwrap();
    assert!(sweep.failed_instance_ids.is_empty());
    assert_eq!(harness.status(id).await.state, "OPENING");
}

fn working_registry(handler: Arc<dyn StateHandler>) -> ProcessRegistry {
    ProcessRegistry::builder()
        .register(
            ProcessDefinition::builder("scheduled")
                .state("WORKING", handler)
                .build()
                .unwrap(),
        )
        .unwrap()
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_handler_chosen_attempts_increment_is_applied() {
    let (handler, calls) =
        CountingHandler::new(StepResult::completed().with_attempts_increment(2));
    let harness = Harness::new(working_registry(handler), crate::common::default_context());

    let id = harness.enqueue(request("order", 21, "scheduled", "WORKING")).await;
    harness
        .system
        .orchestration_loop()
        .run_single_cycle()
        .await
        .unwrap();

    let status = harness.status(id).await;
    assert_eq!(status.state, "COMPLETED");
    assert_eq!(status.attempts_count, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_handler_next_run_at_defers_polling() {
    let later = chrono::Utc::now() + chrono::Duration::hours(1);
    let working = StateToken::parse("WORKING").unwrap();
    let (handler, calls) =
        CountingHandler::new(StepResult::advance(working).with_next_run_at(later));
    let harness = Harness::new(working_registry(handler), crate::common::default_context());
    let orchestration_loop = harness.system.orchestration_loop();

    let id = harness.enqueue(request("order", 22, "scheduled", "WORKING")).await;
    let cycle = orchestration_loop.run_single_cycle().await.unwrap();
    assert_eq!(cycle.retried, 1);

    let instance = harness.instance(id).await;
    assert_eq!(instance.state, "WORKING");
    assert_eq!(instance.next_run_at, Some(later));
    assert_eq!(instance.attempts_count, 1);

    for _ in 0..3 {
        let cycle = orchestration_loop.run_single_cycle().await.unwrap();
        assert_eq!(cycle.polled, 0);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_instance_becomes_ready_once_next_run_at_passes() {
    let soon = chrono::Utc::now() + chrono::Duration::milliseconds(150);
    let working = StateToken::parse("WORKING").unwrap();
    let (handler, calls) =
        CountingHandler::new(StepResult::advance(working).with_next_run_at(soon));
    let harness = Harness::new(working_registry(handler), crate::common::default_context());
    let orchestration_loop = harness.system.orchestration_loop();

    let id = harness.enqueue(request("order", 23, "scheduled", "WORKING")).await;
    orchestration_loop.run_single_cycle().await.unwrap();
    assert_eq!(orchestration_loop.run_single_cycle().await.unwrap().polled, 0);

    tokio::time::sleep(Duration::from_millis(250)).await;
    let cycle = orchestration_loop.run_single_cycle().await.unwrap();
    assert_eq!(cycle.polled, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(harness.status(id).await.attempts_count, 2);
}
