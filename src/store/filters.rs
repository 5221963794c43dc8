//! Filter predicates for record store queries.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{ExecutionRequest, ScheduleQueueEntry, WorkflowExecution};
use crate::state_machine::ExecutionStatus;

/// Predicate over execution request records.
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    /// Match a specific action reference.
    pub action: Option<String>,
    /// Match any of these statuses.
    pub statuses: Option<Vec<ExecutionStatus>>,
    /// Match executions whose parameter values equal all of these.
    pub parameter_equals: Vec<(String, Value)>,
}

impl ExecutionFilter {
    pub fn for_action(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            ..Self::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[ExecutionStatus]) -> Self {
        self.statuses = Some(statuses.to_vec());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameter_equals.push((name.into(), value));
        self
    }

    pub fn matches(&self, execution: &ExecutionRequest) -> bool {
        if let Some(action) = &self.action {
            if &execution.action != action {
                return false;
            }
        }

        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&execution.status) {
                return false;
            }
        }

        // A missing parameter compares as null so attribute-keyed policies
        // can group executions that omit the attribute.
        self.parameter_equals
            .iter()
            .all(|(name, value)| execution.parameters.get(name).unwrap_or(&Value::Null) == value)
    }
}

/// Predicate over scheduling queue entries.
#[derive(Debug, Clone, Default)]
pub struct QueueEntryFilter {
    pub execution_id: Option<Uuid>,
    /// Match entries due at or before this instant.
    pub due_before: Option<DateTime<Utc>>,
    pub handling: Option<bool>,
    /// Match entries whose last update is older than this instant. Used by
    /// the stale-claim sweep.
    pub updated_before: Option<DateTime<Utc>>,
}

impl QueueEntryFilter {
    pub fn due(now: DateTime<Utc>) -> Self {
        Self {
            due_before: Some(now),
            handling: Some(false),
            ..Self::default()
        }
    }

    pub fn for_execution(execution_id: Uuid) -> Self {
        Self {
            execution_id: Some(execution_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, entry: &ScheduleQueueEntry) -> bool {
        if let Some(execution_id) = self.execution_id {
            if entry.execution_id != execution_id {
                return false;
            }
        }

        if let Some(due_before) = self.due_before {
            if entry.scheduled_start_timestamp > due_before {
                return false;
            }
        }

        if let Some(handling) = self.handling {
            if entry.handling != handling {
                return false;
            }
        }

        if let Some(updated_before) = self.updated_before {
            if entry.updated_at >= updated_before {
                return false;
            }
        }

        true
    }
}

/// Predicate over workflow execution records.
#[derive(Debug, Clone, Default)]
pub struct WorkflowExecutionFilter {
    /// Restrict to workflows that have not reached a terminal status.
    pub non_terminal_only: bool,
    /// Match workflows whose last task activity is older than this instant.
    pub idle_since_before: Option<DateTime<Utc>>,
}

impl WorkflowExecutionFilter {
    pub fn orphan_candidates(idle_since_before: DateTime<Utc>) -> Self {
        Self {
            non_terminal_only: true,
            idle_since_before: Some(idle_since_before),
        }
    }

    pub fn matches(&self, workflow: &WorkflowExecution) -> bool {
        if self.non_terminal_only && workflow.is_terminal() {
            return false;
        }

        if let Some(idle_since_before) = self.idle_since_before {
            if workflow.last_task_activity >= idle_since_before {
                return false;
            }
        }

        true
    }
}
