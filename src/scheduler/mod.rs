//! # Scheduling Queue & Scheduler Loop
//!
//! The scheduler turns "execution requested" announcements into durable
//! queue entries, then claims and dispatches them:
//!
//! - [`SchedulingQueue`]: idempotent enqueue and compare-and-swap claim
//!   over persisted entries, so horizontally-scaled schedulers never claim
//!   the same entry twice
//! - [`SchedulerEntrypoint`]: bus consumer feeding the queue; the
//!   triggering message is only acknowledged once enqueue succeeds
//! - [`SchedulerHandler`]: the poll loop that claims entries, applies
//!   admission-control policies, and hands runnable work to the runner
//!   dispatch seam, one supervised worker task per entry

pub mod entrypoint;
pub mod handler;
pub mod queue;

use thiserror::Error;
use uuid::Uuid;

pub use entrypoint::SchedulerEntrypoint;
pub use handler::SchedulerHandler;
pub use queue::SchedulingQueue;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Execution {execution_id} referenced by queue entry {queue_item_id} does not exist")]
    MissingExecution {
        execution_id: Uuid,
        queue_item_id: Uuid,
    },

    #[error("Malformed bus message on {topic}: {reason}")]
    MalformedMessage { topic: String, reason: String },
}
