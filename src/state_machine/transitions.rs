//! Transition rules for the execution status state machine.
//!
//! The rules are pure: they map a (current, requested) status pair to the
//! effective transition without touching storage. The single persistence
//! path in [`crate::services::executions`] applies the outcome, stamps
//! timestamps, and publishes the change.

use thiserror::Error;

use super::states::ExecutionStatus;

#[derive(Debug, Error)]
pub enum StateMachineError {
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
}

pub type StateMachineResult<T> = std::result::Result<T, StateMachineError>;

/// Effective result of a requested status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The record moves to this status (it may differ from the requested
    /// one: a completion report against `canceling` resolves to `canceled`).
    Applied(ExecutionStatus),
    /// The write is absorbed without effect: the record is already terminal
    /// or already carries the requested status.
    Unchanged,
}

/// Resolve a requested status write against the current status.
///
/// Terminal states absorb all later writes, which makes races between two
/// completion paths benign. A cancellation that is already in flight wins
/// over a late success or failure report. Transitions outside the state
/// machine are rejected.
pub fn resolve_transition(
    current: ExecutionStatus,
    requested: ExecutionStatus,
) -> StateMachineResult<TransitionOutcome> {
    if current.is_terminal() || current == requested {
        return Ok(TransitionOutcome::Unchanged);
    }

    if current == ExecutionStatus::Canceling && requested.is_completion_report() {
        return Ok(TransitionOutcome::Applied(ExecutionStatus::Canceled));
    }

    if transition_allowed(current, requested) {
        return Ok(TransitionOutcome::Applied(requested));
    }

    Err(StateMachineError::InvalidTransition {
        from: current,
        to: requested,
    })
}

fn transition_allowed(from: ExecutionStatus, to: ExecutionStatus) -> bool {
    use ExecutionStatus::*;

    let targets: &[ExecutionStatus] = match from {
        Requested => &[Delayed, Scheduled, Running, Canceling, Canceled, Failed],
        Delayed => &[Requested, Scheduled, Running, Canceling, Canceled, Failed],
        Scheduled => &[
            Running, Succeeded, Failed, TimedOut, Canceling, Canceled, Abandoned,
        ],
        Running => &[
            Succeeded, Failed, TimedOut, Pausing, Paused, Canceling, Canceled, Abandoned,
        ],
        Pausing => &[Paused, Running, Succeeded, Failed, TimedOut, Canceling, Canceled],
        // Terminal writes from paused and resuming are the platform's
        // escape hatch: the timeout enforcer resolves expired pause points
        // and the garbage collector force-fails orphans wherever they got
        // stuck.
        Paused => &[
            Resuming, Running, Canceling, Canceled, Succeeded, Failed, TimedOut,
        ],
        Resuming => &[Running, Canceling, Canceled, Succeeded, Failed, TimedOut],
        Canceling => &[Canceled],
        Succeeded | Failed | TimedOut | Canceled | Abandoned => &[],
    };

    targets.contains(&to)
}
