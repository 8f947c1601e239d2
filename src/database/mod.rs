//! # Database Operations
//!
//! PostgreSQL connectivity for the Instance Store.
//!
//! ## Key Components
//!
//! - [`connection`] - pool construction from configuration and health checks
//! - [`migrations`] - embedded schema migrations for `workflow_instances`

pub mod connection;
pub mod migrations;

pub use connection::DatabaseConnection;
pub use migrations::DatabaseMigrations;
