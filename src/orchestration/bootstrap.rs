//! # Orchestration Bootstrap
//!
//! Assembles the engine from configuration: store, registry, action context,
//! dispatcher, worker, poller, reconciler and loop.
//!
//! Two entry points:
//! - [`OrchestrationBootstrap::assemble`] wires already-built collaborators
//!   (in-memory store in tests, embedded use)
//! - [`OrchestrationBootstrap::connect_postgres`] connects the pool, runs
//!   migrations when configured and wires the PostgreSQL store and authority
//!
//! [`OrchestrationSystem::start`] spawns the loop and returns a handle whose
//! `stop` flips the shutdown channel.

use crate::authority::PgEntityAuthority;
use crate::config::ConfigManager;
use crate::database::{DatabaseConnection, DatabaseMigrations};
use crate::error::{OrchestratorError, Result};
use crate::orchestration::backoff::BackoffCalculator;
use crate::orchestration::instance_enqueuer::InstanceEnqueuer;
use crate::orchestration::instance_poller::InstancePoller;
use crate::orchestration::instance_worker::InstanceWorker;
use crate::orchestration::orchestration_loop::{OrchestrationLoop, OrchestrationLoopConfig};
use crate::orchestration::step_dispatcher::StepDispatcher;
use crate::orchestration::step_handler::ActionContext;
use crate::orchestration::stuck_reconciler::StuckReconciler;
use crate::orchestration::types::LoopSummary;
use crate::registry::ProcessRegistry;
use crate::store::{InstanceStore, PgInstanceStore};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Fully wired engine, not yet running.
pub struct OrchestrationSystem {
    config_manager: Arc<ConfigManager>,
    store: Arc<dyn InstanceStore>,
    registry: Arc<ProcessRegistry>,
    enqueuer: Arc<InstanceEnqueuer>,
    orchestration_loop: Arc<OrchestrationLoop>,
    pool: Option<PgPool>,
}

impl OrchestrationSystem {
    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }

    pub fn store(&self) -> &Arc<dyn InstanceStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn enqueuer(&self) -> &Arc<InstanceEnqueuer> {
        &self.enqueuer
    }

    pub fn orchestration_loop(&self) -> &Arc<OrchestrationLoop> {
        &self.orchestration_loop
    }

    /// Present when the system was built by [`OrchestrationBootstrap::connect_postgres`].
    pub fn database_pool(&self) -> Option<&PgPool> {
        self.pool.as_ref()
    }

    /// Spawn the loop (and its reconciler) onto the current runtime.
    pub fn start(self) -> OrchestrationSystemHandle {
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let orchestration_loop = Arc::clone(&self.orchestration_loop);
        let join_handle =
            tokio::spawn(async move { orchestration_loop.run(shutdown_receiver).await });

        info!(
            orchestrator_id = %self.orchestration_loop.config().orchestrator_id,
            environment = %self.config_manager.environment(),
            "Orchestration system started"
        );

        OrchestrationSystemHandle {
            system: self,
            shutdown_sender,
            join_handle,
        }
    }
}

/// Lifecycle handle for a running [`OrchestrationSystem`].
pub struct OrchestrationSystemHandle {
    system: OrchestrationSystem,
    shutdown_sender: watch::Sender<bool>,
    join_handle: JoinHandle<Result<LoopSummary>>,
}

impl OrchestrationSystemHandle {
    pub fn system(&self) -> &OrchestrationSystem {
        &self.system
    }

    pub fn is_running(&self) -> bool {
        !*self.shutdown_sender.borrow() && !self.join_handle.is_finished()
    }

    /// Ask the loop to stop after its in-flight batch.
    pub fn stop(&self) {
        if self.shutdown_sender.send(true).is_err() {
            warn!("Orchestration loop already exited");
        } else {
            info!("Orchestration system shutdown requested");
        }
    }

    /// Wait for the loop to exit and return its summary.
    pub async fn join(self) -> Result<LoopSummary> {
        let summary = self.join_handle.await.map_err(|e| {
            OrchestratorError::Orchestration(format!("Orchestration loop task failed: {e}"))
        })??;

        if let Some(pool) = &self.system.pool {
            pool.close().await;
        }
        Ok(summary)
    }

    /// [`Self::stop`] then [`Self::join`].
    pub async fn shutdown(self) -> Result<LoopSummary> {
        self.stop();
        self.join().await
    }
}

pub struct OrchestrationBootstrap;

impl OrchestrationBootstrap {
    /// Wire the engine around an existing store and action context.
    pub fn assemble(
        config_manager: Arc<ConfigManager>,
        store: Arc<dyn InstanceStore>,
        registry: ProcessRegistry,
        action_context: ActionContext,
    ) -> OrchestrationSystem {
        let config = config_manager.config();
        let registry = Arc::new(registry);
        let orchestrator_id = resolve_orchestrator_id(&config.orchestration.orchestrator_id);

        let dispatcher = Arc::new(StepDispatcher::new(
            Arc::clone(&registry),
            Arc::new(action_context),
            config.orchestration.max_attempts,
            BackoffCalculator::new(config.backoff.clone()),
        ));
        let worker = Arc::new(InstanceWorker::new(Arc::clone(&store), dispatcher));
        let poller = InstancePoller::new(Arc::clone(&store), config.orchestration.batch_size);
        let reconciler =
            StuckReconciler::new(Arc::clone(&store), config.reconciler.stuck_threshold());

        let orchestration_loop = Arc::new(OrchestrationLoop::new(
            OrchestrationLoopConfig::from_config(config, orchestrator_id),
            poller,
            worker,
            reconciler,
        ));
        let enqueuer = Arc::new(
            InstanceEnqueuer::new(Arc::clone(&store)).with_registry(Arc::clone(&registry)),
        );

        info!(
            processes = registry.len(),
            batch_size = config.orchestration.batch_size,
            worker_pool_size = config.orchestration.worker_pool_size,
            max_attempts = config.orchestration.max_attempts,
            "Orchestration system assembled"
        );

        OrchestrationSystem {
            config_manager,
            store,
            registry,
            enqueuer,
            orchestration_loop,
            pool: None,
        }
    }

    /// Connect to PostgreSQL and wire the sqlx-backed store and authority.
    /// `configure` registers deployment services on the action context.
    pub async fn connect_postgres<F>(
        config_manager: Arc<ConfigManager>,
        registry: ProcessRegistry,
        configure: F,
    ) -> Result<OrchestrationSystem>
    where
        F: FnOnce(ActionContext, &PgPool) -> ActionContext,
    {
        let database = &config_manager.config().database;
        let connection = DatabaseConnection::connect(database).await?;
        if !connection.health_check().await? {
            return Err(OrchestratorError::Database(
                "Database health check returned an unexpected value".to_string(),
            ));
        }
        let pool = connection.pool().clone();

        if database.run_migrations {
            DatabaseMigrations::run_all(&pool).await?;
        } else if !DatabaseMigrations::schema_ready(&pool).await? {
            warn!("workflow_instances table missing and migrations are disabled");
        }

        let store: Arc<dyn InstanceStore> = Arc::new(PgInstanceStore::new(pool.clone()));
        let authority = Arc::new(PgEntityAuthority::new(pool.clone()));
        let action_context = configure(ActionContext::new(authority), &pool);

        let mut system = Self::assemble(config_manager, store, registry, action_context);
        system.pool = Some(pool);
        Ok(system)
    }
}

fn resolve_orchestrator_id(configured: &str) -> String {
    let configured = configured.trim();
    if configured.is_empty() {
        format!("orchestrator-{}", Uuid::new_v4())
    } else {
        configured.to_string()
    }
}
