#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # FSM Orchestrator
//!
//! Asynchronous workflow orchestration engine for long-running, multi-step
//! business processes driven by external entity state machines.
//!
//! ## Overview
//!
//! Each run of a named process against a business entity is a durable
//! [`WorkflowInstance`](models::WorkflowInstance). The engine polls instances
//! that are due, runs the handler registered for `(process, state)` inside a
//! single unit of work per instance, writes the bookkeeping back and commits.
//! A separate sweep force-fails instances abandoned mid-flight.
//!
//! ## Module Organization
//!
//! - [`models`] - workflow instance record, enqueue request, status projection
//! - [`state_machine`] - typed instance states
//! - [`store`] - `InstanceStore` / `UnitOfWork` with PostgreSQL and in-memory backends
//! - [`registry`] - process definitions and the `(process, state) -> handler` table
//! - [`orchestration`] - poller, dispatcher, applier, worker, reconciler and loop
//! - [`authority`] - entity-authority capability consumed by handlers
//! - [`handlers`] - reference business handlers
//! - [`config`] - layered YAML and environment configuration
//! - [`database`] - pool construction and embedded migrations
//! - [`error`] - structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fsm_orchestrator::config::ConfigManager;
//! use fsm_orchestrator::handlers::register_builtin_processes;
//! use fsm_orchestrator::models::{ActorRef, NewInstanceRequest};
//! use fsm_orchestrator::orchestration::OrchestrationBootstrap;
//! use fsm_orchestrator::registry::ProcessRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config_manager = ConfigManager::load()?;
//! let registry = register_builtin_processes(ProcessRegistry::builder())?.build()?;
//! let system =
//!     OrchestrationBootstrap::connect_postgres(config_manager, registry, |ctx, _| ctx).await?;
//!
//! let id = system
//!     .enqueuer()
//!     .enqueue(&NewInstanceRequest::new(
//!         "locker",
//!         9,
//!         "locker_cell",
//!         "OPENING",
//!         ActorRef::new(2, "operator"),
//!     ))
//!     .await?;
//!
//! let handle = system.start();
//! // ...
//! let summary = handle.shutdown().await?;
//! println!("instance {id}, {} cycles", summary.cycles);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test                      # unit + in-memory integration tests
//! cargo test -- --ignored         # PostgreSQL tests (requires DATABASE_URL)
//! ```

pub mod authority;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod state_machine;
pub mod store;

pub use authority::{ActionOutcome, ActionRequest, AuthorityError, EntityAuthority};
pub use config::{ConfigManager, OrchestratorConfig};
pub use error::{OrchestratorError, Result};
pub use models::{ActorRef, InstanceId, InstanceStatus, NewInstanceRequest, WorkflowInstance};
pub use orchestration::{
    ActionContext, HandlerError, OrchestrationBootstrap, OrchestrationLoop, StateHandler,
    StepContext, StepResult,
};
pub use registry::{FailurePolicy, ProcessDefinition, ProcessRegistry};
pub use state_machine::{StateToken, WorkflowState};
pub use store::{InstanceStore, MemoryInstanceStore, PgInstanceStore, UnitOfWork};
