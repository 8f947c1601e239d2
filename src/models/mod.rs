pub mod workflow_instance;

pub use workflow_instance::{
    ActorRef, InstanceId, InstanceStatus, InstanceUpdate, NewInstanceRequest, WorkflowInstance,
};
