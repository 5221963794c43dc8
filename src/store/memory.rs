//! In-memory reference backend for the record store.
//!
//! Collection semantics match what the core expects from a real document
//! store: last-write-wins updates for most records, and revision
//! compare-and-swap for scheduling queue entries so concurrent claim
//! attempts resolve to exactly one winner.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{
    ExecutionFilter, ExecutionStore, QueueEntryFilter, StoreError, StoreResult,
    WorkflowExecutionFilter,
};
use crate::models::{
    ExecutionRequest, Inquiry, InquiryStatus, Policy, QueryContext, ScheduleQueueEntry,
    TaskExecution, WorkflowExecution,
};

/// Thread-safe in-memory record store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    executions: DashMap<Uuid, ExecutionRequest>,
    queue_entries: DashMap<Uuid, ScheduleQueueEntry>,
    workflow_executions: DashMap<Uuid, WorkflowExecution>,
    task_executions: DashMap<Uuid, TaskExecution>,
    // Policies keep registration order, which is the evaluation order.
    policies: RwLock<Vec<Policy>>,
    query_contexts: DashMap<Uuid, QueryContext>,
    inquiries: DashMap<Uuid, Inquiry>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn insert_execution(
        &self,
        execution: ExecutionRequest,
    ) -> StoreResult<ExecutionRequest> {
        self.executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn get_execution(&self, id: Uuid) -> StoreResult<Option<ExecutionRequest>> {
        Ok(self.executions.get(&id).map(|entry| entry.clone()))
    }

    async fn update_execution(
        &self,
        execution: &ExecutionRequest,
    ) -> StoreResult<ExecutionRequest> {
        let mut stored =
            self.executions
                .get_mut(&execution.id)
                .ok_or(StoreError::NotFound {
                    collection: "execution",
                    id: execution.id,
                })?;

        let mut updated = execution.clone();
        updated.updated_at = Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }

    async fn query_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> StoreResult<Vec<ExecutionRequest>> {
        Ok(self
            .executions
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.clone())
            .collect())
    }

    async fn count_executions(&self, filter: &ExecutionFilter) -> StoreResult<usize> {
        Ok(self
            .executions
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .count())
    }

    async fn insert_queue_entry(
        &self,
        entry: ScheduleQueueEntry,
    ) -> StoreResult<ScheduleQueueEntry> {
        self.queue_entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn find_queue_entry_for_execution(
        &self,
        execution_id: Uuid,
    ) -> StoreResult<Option<ScheduleQueueEntry>> {
        Ok(self
            .queue_entries
            .iter()
            .find(|entry| entry.execution_id == execution_id)
            .map(|entry| entry.clone()))
    }

    async fn update_queue_entry(
        &self,
        entry: &ScheduleQueueEntry,
    ) -> StoreResult<ScheduleQueueEntry> {
        // The shard lock held by get_mut makes the revision check and the
        // write one atomic step, which is the CAS contract claim depends on.
        let mut stored = self
            .queue_entries
            .get_mut(&entry.id)
            .ok_or(StoreError::NotFound {
                collection: "schedule_queue_entry",
                id: entry.id,
            })?;

        if stored.revision != entry.revision {
            return Err(StoreError::WriteConflict {
                collection: "schedule_queue_entry",
                id: entry.id,
            });
        }

        let mut updated = entry.clone();
        updated.revision = entry.revision + 1;
        updated.updated_at = Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete_queue_entry(&self, id: Uuid) -> StoreResult<()> {
        self.queue_entries.remove(&id);
        Ok(())
    }

    async fn query_queue_entries(
        &self,
        filter: &QueueEntryFilter,
    ) -> StoreResult<Vec<ScheduleQueueEntry>> {
        Ok(self
            .queue_entries
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.clone())
            .collect())
    }

    async fn delete_queue_entries(&self, filter: &QueueEntryFilter) -> StoreResult<usize> {
        let ids: Vec<Uuid> = self
            .queue_entries
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.id)
            .collect();

        for id in &ids {
            self.queue_entries.remove(id);
        }

        Ok(ids.len())
    }

    async fn insert_workflow_execution(
        &self,
        workflow: WorkflowExecution,
    ) -> StoreResult<WorkflowExecution> {
        self.workflow_executions
            .insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn get_workflow_execution(&self, id: Uuid) -> StoreResult<Option<WorkflowExecution>> {
        Ok(self.workflow_executions.get(&id).map(|entry| entry.clone()))
    }

    async fn update_workflow_execution(
        &self,
        workflow: &WorkflowExecution,
    ) -> StoreResult<WorkflowExecution> {
        let mut stored =
            self.workflow_executions
                .get_mut(&workflow.id)
                .ok_or(StoreError::NotFound {
                    collection: "workflow_execution",
                    id: workflow.id,
                })?;

        let mut updated = workflow.clone();
        updated.updated_at = Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }

    async fn query_workflow_executions(
        &self,
        filter: &WorkflowExecutionFilter,
    ) -> StoreResult<Vec<WorkflowExecution>> {
        Ok(self
            .workflow_executions
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.clone())
            .collect())
    }

    async fn insert_task_execution(&self, task: TaskExecution) -> StoreResult<TaskExecution> {
        self.task_executions.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_task_execution(&self, id: Uuid) -> StoreResult<Option<TaskExecution>> {
        Ok(self.task_executions.get(&id).map(|entry| entry.clone()))
    }

    async fn update_task_execution(&self, task: &TaskExecution) -> StoreResult<TaskExecution> {
        let mut stored = self
            .task_executions
            .get_mut(&task.id)
            .ok_or(StoreError::NotFound {
                collection: "task_execution",
                id: task.id,
            })?;

        let mut updated = task.clone();
        updated.updated_at = Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }

    async fn query_task_executions_for_workflow(
        &self,
        workflow_execution_id: Uuid,
    ) -> StoreResult<Vec<TaskExecution>> {
        Ok(self
            .task_executions
            .iter()
            .filter(|entry| entry.workflow_execution_id == workflow_execution_id)
            .map(|entry| entry.clone())
            .collect())
    }

    async fn insert_policy(&self, policy: Policy) -> StoreResult<Policy> {
        self.policies.write().push(policy.clone());
        Ok(policy)
    }

    async fn policies_for_action(&self, action: &str) -> StoreResult<Vec<Policy>> {
        Ok(self
            .policies
            .read()
            .iter()
            .filter(|policy| policy.enabled && policy.action == action)
            .cloned()
            .collect())
    }

    async fn insert_query_context(&self, context: QueryContext) -> StoreResult<QueryContext> {
        self.query_contexts.insert(context.id, context.clone());
        Ok(context)
    }

    async fn delete_query_context(&self, id: Uuid) -> StoreResult<()> {
        self.query_contexts.remove(&id);
        Ok(())
    }

    async fn list_query_contexts(&self) -> StoreResult<Vec<QueryContext>> {
        Ok(self
            .query_contexts
            .iter()
            .map(|entry| entry.clone())
            .collect())
    }

    async fn insert_inquiry(&self, inquiry: Inquiry) -> StoreResult<Inquiry> {
        self.inquiries.insert(inquiry.id, inquiry.clone());
        Ok(inquiry)
    }

    async fn update_inquiry(&self, inquiry: &Inquiry) -> StoreResult<Inquiry> {
        let mut stored = self
            .inquiries
            .get_mut(&inquiry.id)
            .ok_or(StoreError::NotFound {
                collection: "inquiry",
                id: inquiry.id,
            })?;

        *stored = inquiry.clone();
        Ok(inquiry.clone())
    }

    async fn query_pending_inquiries(&self) -> StoreResult<Vec<Inquiry>> {
        Ok(self
            .inquiries
            .iter()
            .filter(|entry| entry.status == InquiryStatus::Pending)
            .map(|entry| entry.clone())
            .collect())
    }
}
