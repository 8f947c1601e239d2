//! # Structured Logging Module
//!
//! Environment-aware structured logging for the orchestrator process and for
//! operator tooling that embeds the engine.

use crate::config::{LogFormat, LoggingConfig};
use chrono::Utc;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process.
///
/// Level precedence: `RUST_LOG`, then `logging.level`, then a default derived
/// from the environment name.
pub fn init_structured_logging(environment: &str, logging: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let log_level = resolve_log_level(environment, logging);
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level.clone()));

        let console = match logging.format {
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .json()
                .with_filter(filter)
                .boxed(),
        };

        // A global subscriber may already be set by an embedding application
        if tracing_subscriber::registry().with(console).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already set, keeping it");
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            level = %log_level,
            format = ?logging.format,
            "Structured logging initialized"
        );
    });
}

fn resolve_log_level(environment: &str, logging: &LoggingConfig) -> String {
    logging
        .level
        .clone()
        .filter(|level| !level.trim().is_empty())
        .unwrap_or_else(|| default_log_level(environment).to_string())
}

/// Get log level based on environment
fn default_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for instance operations
pub fn log_instance_operation(
    operation: &str,
    instance_id: Option<i64>,
    process_name: Option<&str>,
    state: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        instance_id = instance_id,
        process_name = process_name,
        state = %state,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "INSTANCE_OPERATION"
    );
}

/// Log structured data for registry operations
pub fn log_registry_operation(
    operation: &str,
    process_name: Option<&str>,
    states: Option<usize>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        process_name = process_name,
        states = states,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "REGISTRY_OPERATION"
    );
}
