//! # Orchestration Loop
//!
//! Ties the poller, a bounded worker pool and the stuck reconciler together.
//!
//! ## Loop state machine
//!
//! ```text
//! IDLE -> POLLING -> DISPATCHING -> APPLYING -> IDLE
//!                \-> (empty batch) sleep poll_interval
//!                \-> (storage error) sleep error_backoff
//! SWEEPING runs in parallel on its own interval
//! ```
//!
//! Each batch is fully drained before the next poll. Per-instance failures are
//! contained in the worker; only a failed poll reaches the loop, which logs it
//! and backs off for a fixed delay before retrying.

use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::orchestration::instance_poller::InstancePoller;
use crate::orchestration::instance_worker::InstanceWorker;
use crate::orchestration::stuck_reconciler::StuckReconciler;
use crate::orchestration::types::{LoopPhase, LoopSummary, OrchestrationCycleResult, SweepResult};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestrationLoopConfig {
    pub orchestrator_id: String,
    pub worker_pool_size: usize,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub reconciler_enabled: bool,
    pub sweep_interval: Duration,
}

impl OrchestrationLoopConfig {
    pub fn from_config(config: &OrchestratorConfig, orchestrator_id: impl Into<String>) -> Self {
        Self {
            orchestrator_id: orchestrator_id.into(),
            worker_pool_size: config.orchestration.worker_pool_size.max(1),
            poll_interval: config.orchestration.poll_interval(),
            error_backoff: config.orchestration.error_backoff(),
            reconciler_enabled: config.reconciler.enabled,
            sweep_interval: config.reconciler.sweep_interval(),
        }
    }
}

pub struct OrchestrationLoop {
    config: OrchestrationLoopConfig,
    poller: InstancePoller,
    worker: Arc<InstanceWorker>,
    reconciler: StuckReconciler,
    phase: RwLock<LoopPhase>,
    sweeping: AtomicBool,
    summary: Mutex<LoopSummary>,
}

impl OrchestrationLoop {
    pub fn new(
        config: OrchestrationLoopConfig,
        poller: InstancePoller,
        worker: Arc<InstanceWorker>,
        reconciler: StuckReconciler,
    ) -> Self {
        Self {
            config,
            poller,
            worker,
            reconciler,
            phase: RwLock::new(LoopPhase::Idle),
            sweeping: AtomicBool::new(false),
            summary: Mutex::new(LoopSummary::default()),
        }
    }

    pub fn config(&self) -> &OrchestrationLoopConfig {
        &self.config
    }

    pub fn phase(&self) -> LoopPhase {
        *self.phase.read()
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeping.load(Ordering::SeqCst)
    }

    pub fn summary(&self) -> LoopSummary {
        self.summary.lock().clone()
    }

    fn set_phase(&self, phase: LoopPhase) {
        *self.phase.write() = phase;
    }

    /// Poll one batch and drain it through the worker pool.
    #[instrument(skip(self), fields(orchestrator_id = %self.config.orchestrator_id))]
    pub async fn run_single_cycle(&self) -> Result<OrchestrationCycleResult> {
        let started = Instant::now();

        self.set_phase(LoopPhase::Polling);
        let instances = match self.poller.fetch_ready().await {
            Ok(instances) => instances,
            Err(e) => {
                self.set_phase(LoopPhase::Idle);
                return Err(e);
            }
        };

        let mut cycle = OrchestrationCycleResult {
            polled: instances.len(),
            ..Default::default()
        };

        if !instances.is_empty() {
            self.set_phase(LoopPhase::Dispatching);
            let permits = Arc::new(Semaphore::new(self.config.worker_pool_size));
            let mut workers = JoinSet::new();

            for instance in instances {
                let permits = Arc::clone(&permits);
                let worker = Arc::clone(&self.worker);
                let instance_id = instance.id;
                workers.spawn(async move {
                    // The semaphore is never closed, so acquisition cannot fail
                    let _permit = permits.acquire_owned().await.ok();
                    (instance_id, worker.process(instance_id).await)
                });
            }

            self.set_phase(LoopPhase::Applying);
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok((_, Ok(outcome))) => cycle.record(outcome.kind),
                    Ok((instance_id, Err(e))) => {
                        cycle.errored += 1;
                        warn!(instance_id, error = %e, "Unit of work failed and was rolled back");
                    }
                    Err(join_error) => {
                        cycle.errored += 1;
                        error!(error = %join_error, "Worker task aborted");
                    }
                }
            }
        }

        cycle.duration_ms = started.elapsed().as_millis() as u64;
        self.summary.lock().record_cycle(&cycle);
        self.set_phase(LoopPhase::Idle);

        if cycle.polled > 0 {
            info!(
                polled = cycle.polled,
                completed = cycle.completed,
                failed = cycle.failed,
                advanced = cycle.advanced,
                retried = cycle.retried,
                skipped = cycle.skipped,
                errored = cycle.errored,
                duration_ms = cycle.duration_ms,
                "Orchestration cycle finished"
            );
        }

        Ok(cycle)
    }

    /// Run one stuck-instance sweep now.
    pub async fn sweep_once(&self) -> Result<SweepResult> {
        self.sweeping.store(true, Ordering::SeqCst);
        let result = self.reconciler.sweep().await;
        self.sweeping.store(false, Ordering::SeqCst);

        let sweep = result?;
        self.summary.lock().record_sweep(&sweep);
        Ok(sweep)
    }

    /// Drive polling (and the reconciler, if enabled) until `shutdown` flips
    /// to `true`. The in-flight batch always finishes first.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<LoopSummary> {
        info!(
            orchestrator_id = %self.config.orchestrator_id,
            worker_pool_size = self.config.worker_pool_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            reconciler_enabled = self.config.reconciler_enabled,
            "Starting orchestration loop"
        );

        let sweeper = self.config.reconciler_enabled.then(|| {
            let this = Arc::clone(&self);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { this.run_sweeper(shutdown).await })
        });

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.run_single_cycle().await {
                Ok(cycle) if cycle.polled == 0 => Some(self.config.poll_interval),
                Ok(cycle) if cycle.processed() == 0 && cycle.errored > 0 => {
                    Some(self.config.error_backoff)
                }
                // Everything was claimed elsewhere; avoid spinning on the same rows
                Ok(cycle) if cycle.processed() == 0 => Some(self.config.poll_interval),
                Ok(_) => None,
                Err(e) => {
                    self.summary.lock().infrastructure_errors += 1;
                    error!(
                        error = %e,
                        backoff_ms = self.config.error_backoff.as_millis() as u64,
                        "Orchestration cycle failed, backing off"
                    );
                    Some(self.config.error_backoff)
                }
            };

            if let Some(delay) = delay {
                if wait_or_shutdown(&mut shutdown, delay).await {
                    break;
                }
            }
        }

        if let Some(sweeper) = sweeper {
            if let Err(e) = sweeper.await {
                error!(error = %e, "Reconciler task panicked");
            }
        }

        let summary = self.summary();
        info!(
            cycles = summary.cycles,
            completed = summary.completed,
            failed = summary.failed,
            stuck_failed = summary.stuck_failed,
            infrastructure_errors = summary.infrastructure_errors,
            "Orchestration loop stopped"
        );
        Ok(summary)
    }

    async fn run_sweeper(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "Stuck-instance sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Reconciler stopped");
    }
}

/// Sleep for `delay` unless shutdown is signalled first. Returns `true` when
/// the loop should stop. A dropped sender counts as shutdown.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = sleep(delay) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
