// Workflow instance states.
//
// Processes declare their own intermediate tokens; COMPLETED and FAILED are
// shared by every process and are terminal.

pub mod states;

pub use states::{InvalidStateToken, StateToken, WorkflowState};
