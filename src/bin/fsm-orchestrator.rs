//! # FSM Orchestrator
//!
//! Long-running orchestrator process: loads configuration, connects to
//! PostgreSQL, registers the built-in processes and runs the orchestration
//! loop until Ctrl-C.
//!
//! Configuration comes from `config/orchestrator.yaml`, the overlay for
//! `FSM_ENV` and `FSM__*` environment variables (`DATABASE_URL` overrides the
//! database url).

use anyhow::Context;
use fsm_orchestrator::config::ConfigManager;
use fsm_orchestrator::handlers::register_builtin_processes;
use fsm_orchestrator::logging::init_structured_logging;
use fsm_orchestrator::orchestration::OrchestrationBootstrap;
use fsm_orchestrator::registry::ProcessRegistry;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_manager = ConfigManager::load().context("Failed to load configuration")?;
    init_structured_logging(
        config_manager.environment(),
        &config_manager.config().logging,
    );

    info!(
        environment = %config_manager.environment(),
        config = %config_manager.debug_config(),
        "Starting fsm-orchestrator"
    );

    let registry = register_builtin_processes(ProcessRegistry::builder())
        .and_then(|builder| builder.build())
        .context("Failed to build process registry")?;

    // Deployments with an order repository register it here as `Arc<dyn OrderDesk>`.
    let system = OrchestrationBootstrap::connect_postgres(config_manager, registry, |ctx, _| ctx)
        .await
        .context("Failed to connect orchestration system")?;

    let handle = system.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received, finishing in-flight batch");

    match handle.shutdown().await {
        Ok(summary) => {
            info!(
                cycles = summary.cycles,
                completed = summary.completed,
                failed = summary.failed,
                "fsm-orchestrator stopped"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Orchestration loop exited with an error");
            Err(e.into())
        }
    }
}
