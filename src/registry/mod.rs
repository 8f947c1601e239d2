//! # Process Registry
//!
//! Static table mapping `(process name, state) -> handler`, built once at
//! startup and shared read-only with the dispatcher.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fsm_orchestrator::registry::{FailurePolicy, ProcessDefinition, ProcessRegistry};
//!
//! let registry = ProcessRegistry::builder()
//!     .register(
//!         ProcessDefinition::builder("locker_cell")
//!             .state("OPENING", open_handler)
//!             .state("CLOSING", close_handler)
//!             .failure_policy(FailurePolicy::Terminal)
//!             .build()?,
//!     )?
//!     .build()?;
//! ```

pub mod process_registry;

pub use process_registry::{
    FailurePolicy, Lookup, ProcessDefinition, ProcessDefinitionBuilder, ProcessRegistry,
    ProcessRegistryBuilder, RegistryError,
};
