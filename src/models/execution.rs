//! Execution request records and their typed context.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::state_machine::ExecutionStatus;

/// Linkage between an execution and the workflow machinery driving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowLinkage {
    /// The owning workflow execution.
    pub workflow_execution_id: Uuid,
    /// The task execution this request performs work for.
    pub task_execution_id: Uuid,
}

/// Typed execution context carried by every execution request.
///
/// The parent/child execution graph is explicit here rather than hidden in
/// an ad-hoc key/value mapping; [`ExecutionContext::validate`] is called at
/// the boundary when a request is created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// User on whose behalf the execution runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Rule that triggered the execution, when event-driven.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_rule: Option<String>,
    /// Direct parent execution, set for workflow task executions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_execution_id: Option<Uuid>,
    /// Root execution of the overall request tree.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_execution_id: Option<Uuid>,
    /// Present when this execution backs a workflow task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowLinkage>,
}

impl ExecutionContext {
    /// Validate internal consistency of the context.
    pub fn validate(&self) -> Result<(), String> {
        if self.workflow.is_some() && self.parent_execution_id.is_none() {
            return Err(
                "workflow-linked execution context requires a parent execution id".to_string(),
            );
        }

        if self.parent_execution_id.is_some() && self.root_execution_id.is_none() {
            return Err("child execution context requires a root execution id".to_string());
        }

        Ok(())
    }

    /// True when this execution performs work for a workflow task.
    pub fn is_workflow_task(&self) -> bool {
        self.workflow.is_some()
    }
}

/// One runnable unit: a single action or one workflow task instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub id: Uuid,
    /// Reference to the action definition, e.g. `core.local`.
    pub action: String,
    pub parameters: HashMap<String, Value>,
    pub context: ExecutionContext,
    pub status: ExecutionStatus,
    /// Milliseconds to postpone initial scheduling.
    pub delay_ms: u64,
    pub scheduled_start_timestamp: Option<DateTime<Utc>>,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionRequest {
    pub fn new(action: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            action: action.into(),
            parameters: HashMap::new(),
            context: ExecutionContext::default(),
            status: ExecutionStatus::Requested,
            delay_ms: 0,
            scheduled_start_timestamp: None,
            start_timestamp: None,
            end_timestamp: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_parameters(mut self, parameters: HashMap<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
