//! Runner dispatch seam.
//!
//! Runners execute a single action (shell, remote, container, ...). They
//! live outside this core: the scheduler hands a claimed execution to this
//! trait and the runner later reports terminal status through the same
//! store-write-plus-publish path used everywhere else, never through a
//! return value.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::ExecutionRequest;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Runner rejected execution: {0}")]
    Rejected(String),

    #[error("Runner unreachable: {0}")]
    Unreachable(String),
}

pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

/// Asynchronous handoff to a runner implementation.
///
/// A dispatch error leaves the execution in its current state; the garbage
/// collector later detects and force-fails work whose runner never reported
/// back.
#[async_trait]
pub trait RunnerDispatch: Send + Sync {
    async fn dispatch(&self, execution: &ExecutionRequest) -> DispatchResult<()>;
}
