//! # Execution Record Store
//!
//! The record store is the single source of truth for the execution core:
//! every component communicates state changes by writing records here and
//! publishing a bus notification. The store itself is an external
//! collaborator: this module defines the trait the core is written
//! against, the filter predicates it queries with, and an in-memory
//! reference backend used by tests and embedded deployments.
//!
//! Scheduling-queue entries carry an optimistic-concurrency revision:
//! updating an entry against a stale revision fails with
//! [`StoreError::WriteConflict`]. The scheduler's claim operation is built
//! on that contract, which is what makes pop-not-peek correct across
//! horizontally-scaled scheduler processes.

pub mod filters;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    ExecutionRequest, Inquiry, Policy, QueryContext, ScheduleQueueEntry, TaskExecution,
    WorkflowExecution,
};

pub use filters::{ExecutionFilter, QueueEntryFilter, WorkflowExecutionFilter};
pub use memory::InMemoryStore;

/// Errors surfaced by record store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{collection} record {id} not found")]
    NotFound { collection: &'static str, id: Uuid },

    #[error("Write conflict on {collection} record {id}")]
    WriteConflict { collection: &'static str, id: Uuid },

    #[error("Record store unavailable: {0}")]
    Unavailable(String),

    #[error("Record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Transient errors are retried with backoff at the call site that
    /// detected them; everything else is surfaced to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Document-store operations the execution core relies on.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    // Execution requests
    async fn insert_execution(&self, execution: ExecutionRequest)
        -> StoreResult<ExecutionRequest>;
    async fn get_execution(&self, id: Uuid) -> StoreResult<Option<ExecutionRequest>>;
    async fn update_execution(&self, execution: &ExecutionRequest)
        -> StoreResult<ExecutionRequest>;
    async fn query_executions(&self, filter: &ExecutionFilter)
        -> StoreResult<Vec<ExecutionRequest>>;
    async fn count_executions(&self, filter: &ExecutionFilter) -> StoreResult<usize>;

    // Scheduling queue entries
    async fn insert_queue_entry(
        &self,
        entry: ScheduleQueueEntry,
    ) -> StoreResult<ScheduleQueueEntry>;
    async fn find_queue_entry_for_execution(
        &self,
        execution_id: Uuid,
    ) -> StoreResult<Option<ScheduleQueueEntry>>;
    /// Compare-and-swap update keyed on `entry.revision`.
    async fn update_queue_entry(
        &self,
        entry: &ScheduleQueueEntry,
    ) -> StoreResult<ScheduleQueueEntry>;
    async fn delete_queue_entry(&self, id: Uuid) -> StoreResult<()>;
    async fn query_queue_entries(
        &self,
        filter: &QueueEntryFilter,
    ) -> StoreResult<Vec<ScheduleQueueEntry>>;
    async fn delete_queue_entries(&self, filter: &QueueEntryFilter) -> StoreResult<usize>;

    // Workflow executions
    async fn insert_workflow_execution(
        &self,
        workflow: WorkflowExecution,
    ) -> StoreResult<WorkflowExecution>;
    async fn get_workflow_execution(&self, id: Uuid) -> StoreResult<Option<WorkflowExecution>>;
    async fn update_workflow_execution(
        &self,
        workflow: &WorkflowExecution,
    ) -> StoreResult<WorkflowExecution>;
    async fn query_workflow_executions(
        &self,
        filter: &WorkflowExecutionFilter,
    ) -> StoreResult<Vec<WorkflowExecution>>;

    // Task executions
    async fn insert_task_execution(&self, task: TaskExecution) -> StoreResult<TaskExecution>;
    async fn get_task_execution(&self, id: Uuid) -> StoreResult<Option<TaskExecution>>;
    async fn update_task_execution(&self, task: &TaskExecution) -> StoreResult<TaskExecution>;
    async fn query_task_executions_for_workflow(
        &self,
        workflow_execution_id: Uuid,
    ) -> StoreResult<Vec<TaskExecution>>;

    // Policies
    async fn insert_policy(&self, policy: Policy) -> StoreResult<Policy>;
    /// Enabled policies for an action, in registration order.
    async fn policies_for_action(&self, action: &str) -> StoreResult<Vec<Policy>>;

    // Poll query contexts
    async fn insert_query_context(&self, context: QueryContext) -> StoreResult<QueryContext>;
    async fn delete_query_context(&self, id: Uuid) -> StoreResult<()>;
    async fn list_query_contexts(&self) -> StoreResult<Vec<QueryContext>>;

    // Inquiries
    async fn insert_inquiry(&self, inquiry: Inquiry) -> StoreResult<Inquiry>;
    async fn update_inquiry(&self, inquiry: &Inquiry) -> StoreResult<Inquiry>;
    async fn query_pending_inquiries(&self) -> StoreResult<Vec<Inquiry>>;
}
