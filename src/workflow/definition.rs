//! Workflow definition model and inspection.
//!
//! A definition is a directed acyclic graph of named tasks. Each task names
//! the action it runs and the transitions taken when it completes; a task
//! with multiple incoming transitions and `join: all` synchronizes on every
//! predecessor that sits on an active path. Definitions are inspected
//! before any task is scheduled, producing a structured error list that
//! tooling can present precisely.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::WorkflowExecutionError;
use crate::state_machine::ExecutionStatus;

/// Condition guarding a transition out of a completed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCondition {
    /// Taken when the task succeeded.
    OnSuccess,
    /// Taken when the task failed or timed out.
    OnFailure,
    /// Taken on any terminal outcome. This is the "continue on error"
    /// marker: a failing task with an on-complete edge keeps the workflow
    /// going.
    OnComplete,
}

impl Default for TransitionCondition {
    fn default() -> Self {
        Self::OnSuccess
    }
}

impl TransitionCondition {
    pub fn matches(&self, status: ExecutionStatus) -> bool {
        match self {
            Self::OnSuccess => status == ExecutionStatus::Succeeded,
            Self::OnFailure => {
                matches!(status, ExecutionStatus::Failed | ExecutionStatus::TimedOut)
            }
            Self::OnComplete => status.is_terminal() && status != ExecutionStatus::Canceled,
        }
    }
}

/// Join behavior of a task with multiple incoming transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinSpec {
    /// Wait for every predecessor on an active path.
    All,
}

/// One outgoing transition of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTransition {
    #[serde(default)]
    pub when: TransitionCondition,
    /// Tasks this transition leads to.
    pub then: Vec<String>,
}

/// One task node in the workflow graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Action reference the task executes.
    pub action: String,
    #[serde(default)]
    pub input: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<JoinSpec>,
    /// Milliseconds to postpone scheduling of this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next: Vec<TaskTransition>,
}

/// A named workflow definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub tasks: BTreeMap<String, TaskSpec>,
    /// Tasks whose results form the workflow output. Empty collects every
    /// terminal task's result.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<String>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: BTreeMap::new(),
            output: Vec::new(),
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>, spec: TaskSpec) -> Self {
        self.tasks.insert(task_id.into(), spec);
        self
    }

    /// Task ids with no incoming transitions: the initial ready set.
    pub fn entry_tasks(&self) -> Vec<String> {
        let mut has_incoming: HashSet<&str> = HashSet::new();
        for spec in self.tasks.values() {
            for transition in &spec.next {
                for target in &transition.then {
                    has_incoming.insert(target.as_str());
                }
            }
        }

        self.tasks
            .keys()
            .filter(|task_id| !has_incoming.contains(task_id.as_str()))
            .cloned()
            .collect()
    }

    /// Predecessor task ids per task, deduplicated.
    pub fn predecessors(&self) -> HashMap<String, Vec<String>> {
        let mut predecessors: HashMap<String, Vec<String>> = HashMap::new();
        for (from, spec) in &self.tasks {
            for transition in &spec.next {
                for target in &transition.then {
                    let entry = predecessors.entry(target.clone()).or_default();
                    if !entry.contains(from) {
                        entry.push(from.clone());
                    }
                }
            }
        }
        predecessors
    }

    /// Inspect the definition and return every problem found.
    ///
    /// Inspection runs at workflow request time, before any task is
    /// scheduled; a non-empty result fails the workflow immediately.
    pub fn inspect(&self) -> Vec<WorkflowExecutionError> {
        let mut errors = Vec::new();

        if self.tasks.is_empty() {
            errors.push(WorkflowExecutionError::semantic(
                "The workflow has no tasks defined.",
                "tasks",
            ));
            return errors;
        }

        let predecessors = self.predecessors();

        for (task_id, spec) in &self.tasks {
            if spec.action.is_empty() {
                errors.push(WorkflowExecutionError::semantic(
                    format!("The task \"{task_id}\" does not reference an action."),
                    format!("tasks.{task_id}.action"),
                ));
            }

            for (index, transition) in spec.next.iter().enumerate() {
                for target in &transition.then {
                    if !self.tasks.contains_key(target) {
                        errors.push(WorkflowExecutionError::semantic(
                            format!(
                                "The transition refers to task \"{target}\" which is not defined."
                            ),
                            format!("tasks.{task_id}.next[{index}].then"),
                        ));
                    }
                }
            }

            if spec.join.is_some() {
                let incoming = predecessors.get(task_id).map_or(0, Vec::len);
                if incoming < 2 {
                    errors.push(WorkflowExecutionError::semantic(
                        format!(
                            "The task \"{task_id}\" declares a join but has {incoming} inbound \
                             transition(s)."
                        ),
                        format!("tasks.{task_id}.join"),
                    ));
                }
            }
        }

        if self.entry_tasks().is_empty() {
            errors.push(WorkflowExecutionError::semantic(
                "The workflow has no entry task without inbound transitions.",
                "tasks",
            ));
        }

        if let Some(cycle_task) = self.find_cycle() {
            errors.push(WorkflowExecutionError::semantic(
                format!("The workflow graph contains a cycle through task \"{cycle_task}\"."),
                format!("tasks.{cycle_task}"),
            ));
        }

        for task_id in &self.output {
            if !self.tasks.contains_key(task_id) {
                errors.push(WorkflowExecutionError::semantic(
                    format!("The output refers to task \"{task_id}\" which is not defined."),
                    "output",
                ));
            }
        }

        errors
    }

    /// Depth-first cycle check. Returns a task on a cycle, if any.
    fn find_cycle(&self) -> Option<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        fn visit(
            definition: &WorkflowDefinition,
            task_id: &str,
            marks: &mut HashMap<String, Mark>,
        ) -> Option<String> {
            match marks.get(task_id).copied().unwrap_or(Mark::Unvisited) {
                Mark::Done => return None,
                Mark::InProgress => return Some(task_id.to_string()),
                Mark::Unvisited => {}
            }

            marks.insert(task_id.to_string(), Mark::InProgress);

            if let Some(spec) = definition.tasks.get(task_id) {
                for transition in &spec.next {
                    for target in &transition.then {
                        if definition.tasks.contains_key(target) {
                            if let Some(cycle) = visit(definition, target, marks) {
                                return Some(cycle);
                            }
                        }
                    }
                }
            }

            marks.insert(task_id.to_string(), Mark::Done);
            None
        }

        let mut marks = HashMap::new();
        for task_id in self.tasks.keys() {
            if let Some(cycle) = visit(self, task_id, &mut marks) {
                return Some(cycle);
            }
        }
        None
    }
}
