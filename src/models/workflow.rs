//! Workflow and task execution records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::state_machine::{ExecutionStatus, WorkflowStatus};
use crate::workflow::conductor::ConductorSnapshot;

/// Structured error recorded against a workflow execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowExecutionError {
    /// Error class, e.g. `semantic`, `platform`, `task`.
    pub error_type: String,
    pub message: String,
    /// Path into the workflow definition the error refers to, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Task the error originated from, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl WorkflowExecutionError {
    pub fn semantic(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            error_type: "semantic".to_string(),
            message: message.into(),
            path: Some(path.into()),
            task_id: None,
        }
    }

    pub fn platform(message: impl Into<String>) -> Self {
        Self {
            error_type: "platform".to_string(),
            message: message.into(),
            path: None,
            task_id: None,
        }
    }

    pub fn task(message: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            error_type: "task".to_string(),
            message: message.into(),
            path: None,
            task_id: Some(task_id.into()),
        }
    }
}

/// One instantiated run of a workflow definition.
///
/// The record owns its task executions by id only; each task execution
/// carries a non-owning back-reference. The conductor snapshot holds the
/// full graph state so any engine process can refresh and advance it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    /// The root execution request representing this workflow.
    pub root_execution_id: Uuid,
    /// Name of the workflow definition this run was instantiated from.
    pub definition_name: String,
    pub status: WorkflowStatus,
    /// Serialized conductor state, refreshed before every advance.
    pub conductor: ConductorSnapshot,
    pub context: Value,
    pub task_execution_ids: Vec<Uuid>,
    pub output: Option<Value>,
    pub errors: Vec<WorkflowExecutionError>,
    /// Updated on every task state change; drives orphan detection.
    pub last_task_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowExecution {
    pub fn new(
        root_execution_id: Uuid,
        definition_name: impl Into<String>,
        conductor: ConductorSnapshot,
        context: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            root_execution_id,
            definition_name: definition_name.into(),
            status: WorkflowStatus::Requested,
            conductor,
            context,
            task_execution_ids: Vec::new(),
            output: None,
            errors: Vec::new(),
            last_task_activity: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Seconds since the last recorded task activity.
    pub fn idle_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_task_activity).num_seconds()
    }
}

/// One instance of a task node in a workflow's dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: Uuid,
    /// Node name in the workflow graph.
    pub task_id: String,
    /// Owning workflow execution (non-owning back-reference).
    pub workflow_execution_id: Uuid,
    /// Backing execution request when the task performs real work.
    pub execution_request_id: Option<Uuid>,
    pub status: ExecutionStatus,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskExecution {
    pub fn new(workflow_execution_id: Uuid, task_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_id: task_id.into(),
            workflow_execution_id,
            execution_request_id: None,
            status: ExecutionStatus::Requested,
            start_timestamp: None,
            end_timestamp: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
