//! Crate-level error type aggregating subsystem errors.

use thiserror::Error;

/// Top-level error for callers that work across subsystems.
#[derive(Debug, Error)]
pub enum CapstanError {
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error(transparent)]
    Publish(#[from] crate::events::PublishError),

    #[error(transparent)]
    StateTransition(#[from] crate::state_machine::StateMachineError),

    #[error(transparent)]
    Scheduler(#[from] crate::scheduler::SchedulerError),

    #[error(transparent)]
    Policy(#[from] crate::policies::PolicyError),

    #[error(transparent)]
    Workflow(#[from] crate::workflow::WorkflowError),

    #[error(transparent)]
    Tracker(#[from] crate::results_tracker::TrackerError),

    #[error(transparent)]
    Configuration(#[from] crate::config::ConfigurationError),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, CapstanError>;
