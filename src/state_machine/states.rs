use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of an execution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Initial state when an execution is requested
    Requested,
    /// Postponed by a delay or an admission-control policy
    Delayed,
    /// Claimed by a scheduler and handed to a runner
    Scheduled,
    /// Currently being executed by a runner
    Running,
    /// Pause requested, outstanding work still draining (workflow only)
    Pausing,
    /// Paused at a safe point (workflow only)
    Paused,
    /// Resume requested, ready set being re-evaluated (workflow only)
    Resuming,
    /// Cancel requested, waiting for outstanding work to acknowledge
    Canceling,
    /// Completed successfully
    Succeeded,
    /// Completed with an error
    Failed,
    /// Exceeded its execution time budget
    TimedOut,
    /// Cancelled before or during execution
    Canceled,
    /// Given up on by the platform (owning process disappeared)
    Abandoned,
}

impl ExecutionStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Canceled | Self::Abandoned
        )
    }

    /// Check if the execution may still be handed to a runner.
    ///
    /// The scheduler loop re-checks this after policies run and again right
    /// before dispatch, since another path (e.g. a user cancel) may have
    /// raced the worker.
    pub fn is_runnable(&self) -> bool {
        matches!(self, Self::Requested | Self::Scheduled | Self::Delayed)
    }

    /// Check if the execution is in-flight from the platform's perspective.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Scheduled | Self::Running | Self::Pausing | Self::Resuming | Self::Canceling
        )
    }

    /// Check if this status represents a completion report from a runner.
    pub fn is_completion_report(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Requested => "requested",
            Self::Delayed => "delayed",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Pausing => "pausing",
            Self::Paused => "paused",
            Self::Resuming => "resuming",
            Self::Canceling => "canceling",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Canceled => "canceled",
            Self::Abandoned => "abandoned",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(Self::Requested),
            "delayed" => Ok(Self::Delayed),
            "scheduled" => Ok(Self::Scheduled),
            "running" => Ok(Self::Running),
            "pausing" => Ok(Self::Pausing),
            "paused" => Ok(Self::Paused),
            "resuming" => Ok(Self::Resuming),
            "canceling" => Ok(Self::Canceling),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "timed_out" => Ok(Self::TimedOut),
            "canceled" => Ok(Self::Canceled),
            "abandoned" => Ok(Self::Abandoned),
            _ => Err(format!("Invalid execution status: {s}")),
        }
    }
}

impl Default for ExecutionStatus {
    fn default() -> Self {
        Self::Requested
    }
}

/// Overall states of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created and inspected, no tasks scheduled yet
    Requested,
    /// Conductor is advancing the task graph
    Running,
    /// Pause requested, in-flight tasks draining
    Pausing,
    /// No new tasks are scheduled until resumed
    Paused,
    /// Resume requested, ready set being re-evaluated
    Resuming,
    /// Cancel requested, in-flight tasks draining
    Canceling,
    /// All tasks resolved after a cancel request
    Canceled,
    /// All active paths terminated successfully
    Succeeded,
    /// An unhandled task failure propagated to the workflow
    Failed,
}

impl WorkflowStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::Succeeded | Self::Failed)
    }

    /// Check if the conductor may hand out new tasks in this state.
    pub fn can_schedule_tasks(&self) -> bool {
        matches!(self, Self::Requested | Self::Running | Self::Resuming)
    }

    /// The execution status the workflow's root execution should carry.
    pub fn as_execution_status(&self) -> ExecutionStatus {
        match self {
            Self::Requested => ExecutionStatus::Requested,
            Self::Running => ExecutionStatus::Running,
            Self::Pausing => ExecutionStatus::Pausing,
            Self::Paused => ExecutionStatus::Paused,
            Self::Resuming => ExecutionStatus::Resuming,
            Self::Canceling => ExecutionStatus::Canceling,
            Self::Canceled => ExecutionStatus::Canceled,
            Self::Succeeded => ExecutionStatus::Succeeded,
            Self::Failed => ExecutionStatus::Failed,
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Requested => "requested",
            Self::Running => "running",
            Self::Pausing => "pausing",
            Self::Paused => "paused",
            Self::Resuming => "resuming",
            Self::Canceling => "canceling",
            Self::Canceled => "canceled",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

impl Default for WorkflowStatus {
    fn default() -> Self {
        Self::Requested
    }
}

/// Status groups used by filter predicates and policy counting.
pub mod status_groups {
    use super::ExecutionStatus;

    /// States an execution may be dispatched from.
    pub const RUNNABLE_STATES: &[ExecutionStatus] = &[
        ExecutionStatus::Requested,
        ExecutionStatus::Scheduled,
        ExecutionStatus::Delayed,
    ];

    /// States counted against a concurrency threshold.
    pub const CONCURRENCY_STATES: &[ExecutionStatus] =
        &[ExecutionStatus::Scheduled, ExecutionStatus::Running];

    /// Terminal states.
    pub const COMPLETED_STATES: &[ExecutionStatus] = &[
        ExecutionStatus::Succeeded,
        ExecutionStatus::Failed,
        ExecutionStatus::TimedOut,
        ExecutionStatus::Canceled,
        ExecutionStatus::Abandoned,
    ];
}
