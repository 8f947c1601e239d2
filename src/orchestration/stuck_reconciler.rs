//! # Stuck-Instance Reconciler
//!
//! Force-fails non-terminal instances whose last activity (`updated_at`, or
//! `created_at` for never-started ones) is older than the threshold, with
//! `last_error = STUCK_TIMEOUT`. Idempotent: swept rows are terminal and never
//! selected again. It marks records only; in-flight handler work is not
//! cancelled.

use crate::constants::diagnostics::STUCK_TIMEOUT;
use crate::error::Result;
use crate::orchestration::types::SweepResult;
use crate::store::InstanceStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

#[derive(Clone)]
pub struct StuckReconciler {
    store: Arc<dyn InstanceStore>,
    threshold: chrono::Duration,
}

impl StuckReconciler {
    pub fn new(store: Arc<dyn InstanceStore>, threshold: chrono::Duration) -> Self {
        Self { store, threshold }
    }

    pub fn threshold(&self) -> chrono::Duration {
        self.threshold
    }

    /// Sweep using the configured threshold.
    pub async fn sweep(&self) -> Result<SweepResult> {
        self.sweep_with_threshold(self.threshold).await
    }

    #[instrument(skip(self), fields(threshold_minutes = threshold.num_minutes()))]
    pub async fn sweep_with_threshold(&self, threshold: chrono::Duration) -> Result<SweepResult> {
        let started = Instant::now();
        let cutoff = Utc::now() - threshold;

        let failed_instance_ids = self
            .store
            .fail_inactive_since(cutoff, STUCK_TIMEOUT)
            .await?;

        if !failed_instance_ids.is_empty() {
            warn!(
                count = failed_instance_ids.len(),
                instance_ids = ?failed_instance_ids,
                "Force-failed stuck instances"
            );
        } else {
            info!("No stuck instances found");
        }

        Ok(SweepResult {
            failed_instance_ids,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}
