//! Workflow conductor.
//!
//! The conductor is a state machine over the task dependency graph. It
//! never blocks and never touches storage: it consumes task state changes,
//! hands out the next batch of ready tasks, and derives the overall
//! workflow status. All of its state serializes into a
//! [`ConductorSnapshot`] that is persisted with the workflow execution and
//! refreshed before every advance, so any engine process can continue a
//! workflow.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::definition::WorkflowDefinition;
use super::graph::{EdgeState, GraphEngine, TaskNodeState};
use super::WorkflowError;
use crate::models::WorkflowExecutionError;
use crate::state_machine::{ExecutionStatus, WorkflowStatus};

/// Serialized conductor state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConductorSnapshot {
    pub definition: WorkflowDefinition,
    pub status: WorkflowStatus,
    pub input: Value,
    pub task_states: BTreeMap<String, TaskNodeState>,
    pub edge_states: BTreeMap<String, EdgeState>,
    pub task_results: BTreeMap<String, Value>,
    pub errors: Vec<WorkflowExecutionError>,
    pub unhandled_failure: bool,
    pub output: Option<Value>,
}

/// A task the conductor wants scheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRequest {
    pub task_id: String,
    pub action: String,
    pub input: HashMap<String, Value>,
    pub delay_ms: Option<u64>,
}

/// State machine over a workflow's task dependency graph.
#[derive(Debug)]
pub struct WorkflowConductor {
    state: ConductorSnapshot,
}

impl WorkflowConductor {
    /// Instantiate a conductor for a definition, inspecting it first.
    ///
    /// Inspection failures are returned before any state exists, so a
    /// malformed workflow fails at request time with the full error list.
    pub fn new(definition: WorkflowDefinition, input: Value) -> Result<Self, WorkflowError> {
        let errors = definition.inspect();
        if !errors.is_empty() {
            return Err(WorkflowError::InspectionFailed { errors });
        }

        let engine = GraphEngine::new(&definition);
        let (task_states, edge_states) = engine.initial_states();

        Ok(Self {
            state: ConductorSnapshot {
                definition,
                status: WorkflowStatus::Requested,
                input,
                task_states,
                edge_states,
                task_results: BTreeMap::new(),
                errors: Vec::new(),
                unhandled_failure: false,
                output: None,
            },
        })
    }

    /// Rehydrate a conductor from its persisted snapshot.
    pub fn from_snapshot(snapshot: ConductorSnapshot) -> Self {
        Self { state: snapshot }
    }

    pub fn snapshot(&self) -> &ConductorSnapshot {
        &self.state
    }

    pub fn into_snapshot(self) -> ConductorSnapshot {
        self.state
    }

    pub fn status(&self) -> WorkflowStatus {
        self.state.status
    }

    pub fn errors(&self) -> &[WorkflowExecutionError] {
        &self.state.errors
    }

    pub fn output(&self) -> Option<&Value> {
        self.state.output.as_ref()
    }

    /// True while any task execution is in flight.
    pub fn has_running_tasks(&self) -> bool {
        self.state
            .task_states
            .values()
            .any(|state| *state == TaskNodeState::Running)
    }

    fn has_ready_tasks(&self) -> bool {
        self.state
            .task_states
            .values()
            .any(|state| *state == TaskNodeState::Ready)
    }

    /// Hand out the next batch of ready tasks and mark them in flight.
    ///
    /// Empty while the workflow is paused, canceling, or terminal; a
    /// requested or resuming workflow moves to running first.
    pub fn get_next_tasks(&mut self) -> Vec<TaskRequest> {
        if matches!(
            self.state.status,
            WorkflowStatus::Requested | WorkflowStatus::Resuming
        ) {
            self.state.status = WorkflowStatus::Running;
        }

        if !self.state.status.can_schedule_tasks() {
            return Vec::new();
        }

        let ready: Vec<String> = self
            .state
            .task_states
            .iter()
            .filter(|(_, state)| **state == TaskNodeState::Ready)
            .map(|(task_id, _)| task_id.clone())
            .collect();

        let mut requests = Vec::new();
        for task_id in ready {
            let Some(spec) = self.state.definition.tasks.get(&task_id) else {
                continue;
            };

            self.state
                .task_states
                .insert(task_id.clone(), TaskNodeState::Running);

            requests.push(TaskRequest {
                task_id,
                action: spec.action.clone(),
                input: spec.input.clone(),
                delay_ms: spec.delay_ms,
            });
        }

        // A resume that surfaces nothing runnable must still settle the
        // workflow (e.g. into failure recorded while it was pausing).
        self.reconcile_status();

        requests
    }

    /// Consume a task state change and advance the graph.
    pub fn update_task_state(
        &mut self,
        task_id: &str,
        status: ExecutionStatus,
        result: Option<Value>,
    ) -> Result<(), WorkflowError> {
        if !self.state.definition.tasks.contains_key(task_id) {
            return Err(WorkflowError::UnknownTask {
                task_id: task_id.to_string(),
            });
        }

        // Late events for an already-resolved task are absorbed, matching
        // the terminal-state rules of the execution state machine.
        let current = self
            .state
            .task_states
            .get(task_id)
            .copied()
            .unwrap_or(TaskNodeState::Pending);
        if current.is_terminal() {
            self.reconcile_status();
            return Ok(());
        }

        let engine = GraphEngine::new(&self.state.definition);

        match status {
            ExecutionStatus::Running => {
                self.state
                    .task_states
                    .insert(task_id.to_string(), TaskNodeState::Running);
            }
            ExecutionStatus::Succeeded => {
                if let Some(result) = result {
                    self.state
                        .task_results
                        .insert(task_id.to_string(), result);
                }
                self.state
                    .task_states
                    .insert(task_id.to_string(), TaskNodeState::Succeeded);
                engine.resolve_completion(
                    task_id,
                    status,
                    &mut self.state.task_states,
                    &mut self.state.edge_states,
                );
            }
            ExecutionStatus::Failed | ExecutionStatus::TimedOut => {
                if let Some(result) = result.clone() {
                    self.state
                        .task_results
                        .insert(task_id.to_string(), result);
                }
                self.state
                    .task_states
                    .insert(task_id.to_string(), TaskNodeState::Failed);
                let resolution = engine.resolve_completion(
                    task_id,
                    status,
                    &mut self.state.task_states,
                    &mut self.state.edge_states,
                );

                if !resolution.handled {
                    self.state.unhandled_failure = true;
                    let message = result
                        .as_ref()
                        .and_then(|value| value.get("error"))
                        .and_then(Value::as_str)
                        .map_or_else(
                            || format!("Task \"{task_id}\" completed with status \"{status}\"."),
                            ToString::to_string,
                        );
                    self.state
                        .errors
                        .push(WorkflowExecutionError::task(message, task_id));
                }
            }
            ExecutionStatus::Canceled | ExecutionStatus::Abandoned => {
                self.state
                    .task_states
                    .insert(task_id.to_string(), TaskNodeState::Canceled);
                engine.deactivate_outgoing(
                    task_id,
                    &mut self.state.task_states,
                    &mut self.state.edge_states,
                );
            }
            // Intermediate statuses carry no graph consequence.
            _ => {}
        }

        engine.compute_ready(&mut self.state.task_states, &self.state.edge_states);
        self.reconcile_status();
        Ok(())
    }

    /// Apply an externally requested workflow status.
    ///
    /// Pause and cancel are cooperative: with tasks in flight the workflow
    /// moves to the transient `pausing`/`canceling` status and settles once
    /// the in-flight set drains.
    pub fn request_status(&mut self, requested: WorkflowStatus) -> Result<WorkflowStatus, WorkflowError> {
        let current = self.state.status;

        if current.is_terminal() {
            return Ok(current);
        }

        let next = match requested {
            WorkflowStatus::Canceling | WorkflowStatus::Canceled => {
                if self.has_running_tasks() {
                    WorkflowStatus::Canceling
                } else {
                    WorkflowStatus::Canceled
                }
            }
            WorkflowStatus::Pausing | WorkflowStatus::Paused => {
                if !matches!(current, WorkflowStatus::Running | WorkflowStatus::Resuming) {
                    return Err(WorkflowError::InvalidStatusTransition {
                        from: current,
                        to: requested,
                    });
                }
                if self.has_running_tasks() {
                    WorkflowStatus::Pausing
                } else {
                    WorkflowStatus::Paused
                }
            }
            WorkflowStatus::Resuming | WorkflowStatus::Running
                if current == WorkflowStatus::Paused =>
            {
                WorkflowStatus::Resuming
            }
            WorkflowStatus::Running if current == WorkflowStatus::Requested => {
                WorkflowStatus::Running
            }
            WorkflowStatus::Failed => WorkflowStatus::Failed,
            _ => {
                return Err(WorkflowError::InvalidStatusTransition {
                    from: current,
                    to: requested,
                });
            }
        };

        self.state.status = next;
        Ok(next)
    }

    /// Force the workflow into failure with a recorded error. Used by
    /// platform housekeeping (orphan collection, processing errors).
    pub fn force_fail(&mut self, error: WorkflowExecutionError) {
        if !self.state.status.is_terminal() {
            self.state.errors.push(error);
            self.state.status = WorkflowStatus::Failed;
        }
    }

    /// Settle the workflow status after a graph change.
    fn reconcile_status(&mut self) {
        if self.state.status.is_terminal() {
            return;
        }

        let in_flight = self.has_running_tasks();

        // A cancel in progress settles into canceled no matter what else
        // happened meanwhile.
        if self.state.status == WorkflowStatus::Canceling {
            if !in_flight {
                self.state.status = WorkflowStatus::Canceled;
            }
            return;
        }

        // Graceful fail-fast: an unhandled failure takes effect once the
        // in-flight siblings drain, including while the workflow was
        // pausing.
        if self.state.unhandled_failure && !in_flight {
            self.state.status = WorkflowStatus::Failed;
            return;
        }

        if self.state.status == WorkflowStatus::Pausing && !in_flight {
            self.state.status = WorkflowStatus::Paused;
            return;
        }

        // Quiescent with nothing ready: every active path has terminated.
        if self.state.status == WorkflowStatus::Running && !in_flight && !self.has_ready_tasks() {
            self.state.status = WorkflowStatus::Succeeded;
            self.state.output = Some(self.collect_output());
        }
    }

    fn collect_output(&self) -> Value {
        let mut output = serde_json::Map::new();

        if self.state.definition.output.is_empty() {
            for (task_id, result) in &self.state.task_results {
                output.insert(task_id.clone(), result.clone());
            }
        } else {
            for task_id in &self.state.definition.output {
                if let Some(result) = self.state.task_results.get(task_id) {
                    output.insert(task_id.clone(), result.clone());
                }
            }
        }

        Value::Object(output)
    }
}
