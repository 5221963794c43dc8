//! # Workflow Orchestration
//!
//! Everything that advances a workflow from request to terminal state:
//!
//! - [`definition`]: the workflow graph model and its inspection
//! - [`graph`]: edge-state tracking, join synchronization, and branch
//!   deactivation
//! - [`conductor`]: the non-blocking state machine driven by task events
//! - [`service`]: store-backed orchestration glue that turns conductor
//!   decisions into task executions scheduled through the ordinary
//!   scheduling queue
//! - [`engine`]: the bus consumer feeding task completions back into the
//!   service

pub mod conductor;
pub mod definition;
pub mod engine;
pub mod graph;
pub mod service;

use thiserror::Error;
use uuid::Uuid;

use crate::models::WorkflowExecutionError;
use crate::state_machine::WorkflowStatus;

pub use conductor::{ConductorSnapshot, TaskRequest, WorkflowConductor};
pub use definition::{
    JoinSpec, TaskSpec, TaskTransition, TransitionCondition, WorkflowDefinition,
};
pub use engine::WorkflowExecutionHandler;
pub use graph::{EdgeState, GraphEngine, TaskNodeState};
pub use service::WorkflowService;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Workflow definition failed inspection with {} error(s)", errors.len())]
    InspectionFailed { errors: Vec<WorkflowExecutionError> },

    #[error("Unknown task \"{task_id}\" in workflow graph")]
    UnknownTask { task_id: String },

    #[error("Invalid workflow status transition from {from} to {to}")]
    InvalidStatusTransition {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("Workflow execution {0} not found")]
    NotFound(Uuid),

    #[error("Execution {0} is not linked to a workflow task")]
    NotWorkflowLinked(Uuid),
}
