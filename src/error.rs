//! # Error Types
//!
//! Crate-level error type used by the store, the orchestration components and
//! the bootstrap path. Per-instance failures never surface here; they are
//! recorded on the instance itself as `last_error`.

use crate::config::ConfigurationError;
use crate::registry::RegistryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Orchestration error: {0}")]
    Orchestration(String),
}

impl OrchestratorError {
    /// Storage-level failures are the only errors allowed to escape the loop.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

impl From<sqlx::Error> for OrchestratorError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database(error.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for OrchestratorError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self::Database(format!("Migration failed: {error}"))
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
