//! # Orchestration Engine
//!
//! Poll, dispatch and apply loop that advances workflow instances.
//!
//! ## Core Components
//!
//! - **InstancePoller**: bounded read of instances that are due
//! - **StepDispatcher**: resolves the handler for `(process, state)` and turns
//!   every outcome, including misses and crashes, into a [`StepResult`]
//! - **ResultApplier**: writes bookkeeping through the worker's unit of work
//! - **InstanceWorker**: one instance, one unit of work
//! - **StuckReconciler**: force-fails instances abandoned mid-flight
//! - **OrchestrationLoop**: ties the above together with a bounded worker pool
//! - **InstanceEnqueuer**: idempotent enqueue and status reads
//! - **OrchestrationBootstrap**: builds the whole system from configuration

pub mod backoff;
pub mod bootstrap;
pub mod instance_enqueuer;
pub mod instance_poller;
pub mod instance_worker;
pub mod orchestration_loop;
pub mod result_applier;
pub mod step_dispatcher;
pub mod step_handler;
pub mod stuck_reconciler;
pub mod types;

pub use backoff::BackoffCalculator;
pub use bootstrap::{OrchestrationBootstrap, OrchestrationSystem, OrchestrationSystemHandle};
pub use instance_enqueuer::InstanceEnqueuer;
pub use instance_poller::InstancePoller;
pub use instance_worker::InstanceWorker;
pub use orchestration_loop::{OrchestrationLoop, OrchestrationLoopConfig};
pub use result_applier::ResultApplier;
pub use step_dispatcher::StepDispatcher;
pub use step_handler::{ActionContext, HandlerError, StateHandler, StepContext};
pub use stuck_reconciler::StuckReconciler;
pub use types::{
    DispatchOutcome, InstanceOutcome, LoopPhase, LoopSummary, OrchestrationCycleResult,
    StepOutcomeKind, StepResult, SweepResult,
};
