//! Shared fakes and builders for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use fsm_orchestrator::authority::{ActionOutcome, ActionRequest, AuthorityError, EntityAuthority};
use fsm_orchestrator::config::{ConfigManager, OrchestratorConfig};
use fsm_orchestrator::handlers::{CellReservation, NewOrder, OrderDesk, OrderRequest};
use fsm_orchestrator::models::{
    ActorRef, InstanceId, InstanceStatus, NewInstanceRequest, WorkflowInstance,
};
use fsm_orchestrator::orchestration::{
    ActionContext, HandlerError, OrchestrationBootstrap, OrchestrationSystem, StateHandler,
    StepContext, StepResult,
};
use fsm_orchestrator::registry::ProcessRegistry;
use fsm_orchestrator::store::{InstanceStore, MemoryInstanceStore, UnitOfWork};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Config tuned for tests: short intervals, reconciler off unless asked for.
pub fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.orchestration.batch_size = 10;
    config.orchestration.worker_pool_size = 4;
    config.orchestration.poll_interval_ms = 10;
    config.orchestration.error_backoff_ms = 10;
    config.orchestration.max_attempts = 3;
    config.orchestration.orchestrator_id = "test-orchestrator".to_string();
    config.reconciler.enabled = false;
    config.backoff.base_delay_ms = 1;
    config.backoff.max_delay_ms = 1;
    config
}

/// In-memory engine plus the store it runs on.
pub struct Harness {
    pub store: MemoryInstanceStore,
    pub system: OrchestrationSystem,
}

impl Harness {
    pub fn new(registry: ProcessRegistry, action_context: ActionContext) -> Self {
        Self::with_config(test_config(), registry, action_context)
    }

    pub fn with_config(
        config: OrchestratorConfig,
        registry: ProcessRegistry,
        action_context: ActionContext,
    ) -> Self {
        Self::with_store(config, MemoryInstanceStore::new(), registry, action_context)
    }

    /// Build on an existing store, for handlers that need to reach it.
    pub fn with_store(
        config: OrchestratorConfig,
        store: MemoryInstanceStore,
        registry: ProcessRegistry,
        action_context: ActionContext,
    ) -> Self {
        let config_manager = ConfigManager::from_config(config, "test").unwrap();
        let system = OrchestrationBootstrap::assemble(
            config_manager,
            Arc::new(store.clone()),
            registry,
            action_context,
        );
        Self { store, system }
    }

    pub async fn enqueue(&self, request: NewInstanceRequest) -> InstanceId {
        self.system.enqueuer().enqueue(&request).await.unwrap()
    }

    pub async fn status(&self, id: InstanceId) -> InstanceStatus {
        self.system.enqueuer().require_status(id).await.unwrap()
    }

    pub async fn instance(&self, id: InstanceId) -> WorkflowInstance {
        self.store.find(id).await.unwrap().unwrap()
    }
}

pub fn request(
    entity_type: &str,
    entity_id: i64,
    process_name: &str,
    initial_state: &str,
) -> NewInstanceRequest {
    NewInstanceRequest::new(
        entity_type,
        entity_id,
        process_name,
        initial_state,
        ActorRef::new(3, "client"),
    )
}

pub fn default_context() -> ActionContext {
    ActionContext::new(Arc::new(ScriptedAuthority::new()))
}

/// Returns a fixed result and counts invocations.
pub struct CountingHandler {
    calls: Arc<AtomicUsize>,
    result: StepResult,
}

impl CountingHandler {
    pub fn new(result: StepResult) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                calls: Arc::clone(&calls),
                result,
            }),
            calls,
        )
    }
}

#[async_trait]
impl StateHandler for CountingHandler {
    async fn handle(
        &self,
        _instance: &WorkflowInstance,
        _ctx: &mut StepContext<'_>,
    ) -> Result<StepResult, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.result.clone())
    }
}

/// Always returns `Err`.
pub struct ErroringHandler;

#[async_trait]
impl StateHandler for ErroringHandler {
    async fn handle(
        &self,
        _instance: &WorkflowInstance,
        _ctx: &mut StepContext<'_>,
    ) -> Result<StepResult, HandlerError> {
        Err(HandlerError::business("RESOURCE_LOCKED"))
    }
}

/// Re-enqueues its own instance mid-step, as a concurrent API caller would,
/// then either errors or completes.
pub struct ReenqueueingHandler {
    store: MemoryInstanceStore,
    fail: bool,
}

impl ReenqueueingHandler {
    pub fn new(store: MemoryInstanceStore, fail: bool) -> Arc<Self> {
        Arc::new(Self { store, fail })
    }
}

#[async_trait]
impl StateHandler for ReenqueueingHandler {
    async fn handle(
        &self,
        instance: &WorkflowInstance,
        _ctx: &mut StepContext<'_>,
    ) -> Result<StepResult, HandlerError> {
        let request = NewInstanceRequest::new(
            instance.entity_type.clone(),
            instance.entity_id,
            instance.process_name.clone(),
            instance.state.clone(),
            instance.requested_by.clone(),
        );
        self.store.enqueue(&request).await?;

        if self.fail {
            Err(HandlerError::business("RESOURCE_LOCKED"))
        } else {
            Ok(StepResult::completed())
        }
    }
}

/// Panics on every call.
pub struct PanickingHandler;

#[async_trait]
impl StateHandler for PanickingHandler {
    async fn handle(
        &self,
        _instance: &WorkflowInstance,
        _ctx: &mut StepContext<'_>,
    ) -> Result<StepResult, HandlerError> {
        panic!("handler exploded");
    }
}

/// Sleeps, recording the highest number of concurrent calls.
pub struct SlowHandler {
    in_flight: AtomicUsize,
    peak: Arc<AtomicUsize>,
    delay: Duration,
}

impl SlowHandler {
    pub fn new(delay: Duration) -> (Arc<Self>, Arc<AtomicUsize>) {
        let peak = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                in_flight: AtomicUsize::new(0),
                peak: Arc::clone(&peak),
                delay,
            }),
            peak,
        )
    }
}

#[async_trait]
impl StateHandler for SlowHandler {
    async fn handle(
        &self,
        _instance: &WorkflowInstance,
        _ctx: &mut StepContext<'_>,
    ) -> Result<StepResult, HandlerError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(StepResult::completed())
    }
}

/// Authority that records requests and answers per action name.
#[derive(Default)]
pub struct ScriptedAuthority {
    requests: Mutex<Vec<ActionRequest>>,
    rejections: Mutex<HashMap<String, String>>,
    unavailable: Mutex<bool>,
}

impl ScriptedAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&self, action_name: &str, reason: &str) {
        self.rejections
            .lock()
            .insert(action_name.to_string(), reason.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }

    pub fn requests(&self) -> Vec<ActionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl EntityAuthority for ScriptedAuthority {
    async fn perform_action(
        &self,
        request: &ActionRequest,
        _unit_of_work: &mut dyn UnitOfWork,
    ) -> Result<ActionOutcome, AuthorityError> {
        if *self.unavailable.lock() {
            return Err(AuthorityError::Unavailable("connection reset".to_string()));
        }
        self.requests.lock().push(request.clone());

        match self.rejections.lock().get(&request.action_name) {
            Some(reason) => Ok(ActionOutcome::Rejected {
                reason: reason.clone(),
            }),
            None => Ok(ActionOutcome::Accepted {
                message: format!("FSM action {} applied", request.action_name),
            }),
        }
    }
}

/// Order desk over plain maps. Order ids start at 77.
pub struct FakeOrderDesk {
    requests: Mutex<HashMap<i64, OrderRequest>>,
    free_cells: Mutex<HashMap<String, Vec<CellReservation>>>,
    orders: Mutex<Vec<(i64, NewOrder)>>,
    next_order_id: AtomicI64,
}

impl FakeOrderDesk {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
            free_cells: Mutex::new(HashMap::new()),
            orders: Mutex::new(Vec::new()),
            next_order_id: AtomicI64::new(77),
        }
    }

    pub fn with_request(self, request: OrderRequest) -> Self {
        self.requests.lock().insert(request.id, request);
        self
    }

    pub fn with_free_cells(self, cell_size: &str, source_cell_id: i64, dest_cell_id: i64) -> Self {
        self.free_cells
            .lock()
            .entry(cell_size.to_string())
            .or_default()
            .push(CellReservation {
                source_cell_id,
                dest_cell_id,
            });
        self
    }

    pub fn orders(&self) -> Vec<(i64, NewOrder)> {
        self.orders.lock().clone()
    }
}

pub fn pending_request(id: i64, cell_size: &str) -> OrderRequest {
    OrderRequest {
        id,
        status: "PENDING".to_string(),
        client_user_id: Some(3),
        parcel_type: "documents".to_string(),
        cell_size: cell_size.to_string(),
        sender_delivery: "self".to_string(),
        recipient_delivery: "self".to_string(),
    }
}

#[async_trait]
impl OrderDesk for FakeOrderDesk {
    async fn load_request(
        &self,
        request_id: i64,
        _unit_of_work: &mut dyn UnitOfWork,
    ) -> Result<Option<OrderRequest>, HandlerError> {
        Ok(self.requests.lock().get(&request_id).cloned())
    }

    async fn reserve_cells(
        &self,
        _source_locker_id: i64,
        _dest_locker_id: i64,
        cell_size: &str,
        _unit_of_work: &mut dyn UnitOfWork,
    ) -> Result<Option<CellReservation>, HandlerError> {
        Ok(self
            .free_cells
            .lock()
            .get_mut(cell_size)
            .and_then(|cells| cells.pop()))
    }

    async fn create_order(
        &self,
        order: &NewOrder,
        _unit_of_work: &mut dyn UnitOfWork,
    ) -> Result<i64, HandlerError> {
        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        self.orders.lock().push((id, order.clone()));
        Ok(id)
    }
}

pub fn order_desk_context(desk: Arc<FakeOrderDesk>) -> ActionContext {
    let desk: Arc<dyn OrderDesk> = desk;
    default_context().with_service(desk)
}

pub fn scripted_context(authority: Arc<ScriptedAuthority>) -> ActionContext {
    ActionContext::new(authority)
}
