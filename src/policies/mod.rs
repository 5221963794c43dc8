//! # Admission-Control Policy Engine
//!
//! Policies constrain a claimed execution before it is dispatched. They are
//! pure decisions over (request, live store counts): a policy may let the
//! request proceed, re-delay it, or cancel it, but never performs the
//! dispatch itself. A policy that errors is treated as "did not apply" and
//! logged, since one buggy policy must not deadlock all executions.

pub mod concurrency;
pub mod engine;
pub mod registry;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ExecutionRequest, Policy};
use crate::store::ExecutionStore;

pub use concurrency::ConcurrencyPolicy;
pub use engine::{PolicyApplication, PolicyEngine};
pub use registry::PolicyTypeRegistry;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Policy type {0} is not available")]
    TypeUnavailable(String),

    #[error("Policy evaluation failed: {0}")]
    EvaluationFailed(String),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
}

pub type PolicyResult<T> = std::result::Result<T, PolicyError>;

/// Decision returned by a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyOutcome {
    /// The request may be dispatched.
    Proceed,
    /// Re-enqueue the request after the scheduler's reschedule delay.
    Delay,
    /// Cancel the request with an explanatory result.
    Cancel { reason: String },
}

/// A pluggable admission-control rule.
#[async_trait]
pub trait PolicyRule: Send + Sync {
    /// Evaluate the policy against a candidate execution. Live counts are
    /// derived from store queries, never from in-process counters, so the
    /// decision stays correct across multiple scheduler processes.
    async fn apply_before(
        &self,
        store: &dyn ExecutionStore,
        execution: &ExecutionRequest,
        policy: &Policy,
    ) -> PolicyResult<PolicyOutcome>;
}
