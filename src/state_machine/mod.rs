//! State machine definitions for execution and workflow lifecycles.

pub mod states;
pub mod transitions;

pub use states::{status_groups, ExecutionStatus, WorkflowStatus};
pub use transitions::{
    resolve_transition, StateMachineError, StateMachineResult, TransitionOutcome,
};
