//! Dependency graph engine.
//!
//! Tracks per-edge and per-node state as tasks complete and computes the
//! ready set. The rules that make joins correct under conditional
//! branching:
//!
//! - Completing a task resolves **all** of its outgoing edges at once: an
//!   edge whose condition matched becomes satisfied, every other edge
//!   becomes inactive. Re-evaluation overwrites, so the most recent branch
//!   decision wins.
//! - A node whose incoming edges are all inactive can never run; it is
//!   deactivated and its own outgoing edges turn inactive, recursively.
//!   This is what keeps a join from waiting on a branch that was never
//!   taken.
//! - A join-all node becomes ready when none of its incoming edges is
//!   pending and at least one is satisfied. A plain node becomes ready on
//!   its first satisfied edge.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::definition::{JoinSpec, WorkflowDefinition};
use crate::state_machine::ExecutionStatus;

/// Resolution state of one dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeState {
    /// The source task has not resolved this edge yet.
    Pending,
    /// The source task completed and the edge's condition matched.
    Satisfied,
    /// The edge can never be taken: its condition did not match, or its
    /// source is unreachable.
    Inactive,
}

/// Lifecycle state of one task node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskNodeState {
    /// Waiting on predecessors.
    Pending,
    /// Dependencies met, waiting to be handed out for scheduling.
    Ready,
    /// Handed out; a task execution is in flight.
    Running,
    Succeeded,
    Failed,
    Canceled,
    /// On a path that was never taken.
    Inactive,
}

impl TaskNodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// Key of the (from, to) edge in the serialized state map.
pub fn edge_key(from: &str, to: &str) -> String {
    format!("{from} -> {to}")
}

/// Outcome of resolving a completed task's outgoing edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionResolution {
    /// True when at least one outgoing transition's condition matched the
    /// completion status. An unmatched failure is an unhandled failure.
    pub handled: bool,
}

/// Stateless graph operations over the serialized node/edge maps.
pub struct GraphEngine<'a> {
    definition: &'a WorkflowDefinition,
}

impl<'a> GraphEngine<'a> {
    pub fn new(definition: &'a WorkflowDefinition) -> Self {
        Self { definition }
    }

    /// Fresh state maps: every node pending, every edge pending, entry
    /// tasks ready.
    pub fn initial_states(&self) -> (BTreeMap<String, TaskNodeState>, BTreeMap<String, EdgeState>) {
        let mut task_states = BTreeMap::new();
        let mut edge_states = BTreeMap::new();

        for (task_id, spec) in &self.definition.tasks {
            task_states.insert(task_id.clone(), TaskNodeState::Pending);
            for transition in &spec.next {
                for target in &transition.then {
                    edge_states.insert(edge_key(task_id, target), EdgeState::Pending);
                }
            }
        }

        for task_id in self.definition.entry_tasks() {
            task_states.insert(task_id, TaskNodeState::Ready);
        }

        (task_states, edge_states)
    }

    /// Resolve the outgoing edges of a completed task and propagate
    /// deactivation.
    pub fn resolve_completion(
        &self,
        task_id: &str,
        status: ExecutionStatus,
        task_states: &mut BTreeMap<String, TaskNodeState>,
        edge_states: &mut BTreeMap<String, EdgeState>,
    ) -> CompletionResolution {
        let Some(spec) = self.definition.tasks.get(task_id) else {
            return CompletionResolution { handled: false };
        };

        let mut handled = false;
        let mut satisfied_targets: Vec<&str> = Vec::new();

        for transition in &spec.next {
            if transition.when.matches(status) {
                handled = true;
                for target in &transition.then {
                    satisfied_targets.push(target.as_str());
                }
            }
        }

        // Resolve every outgoing edge in one step; overwriting any earlier
        // resolution keeps the most recent branch decision.
        for transition in &spec.next {
            for target in &transition.then {
                let state = if satisfied_targets.contains(&target.as_str()) {
                    EdgeState::Satisfied
                } else {
                    EdgeState::Inactive
                };
                edge_states.insert(edge_key(task_id, target), state);
            }
        }

        self.propagate_deactivation(task_states, edge_states);

        CompletionResolution { handled }
    }

    /// Deactivate every outgoing edge of a task (cancellation, or the task
    /// itself became unreachable).
    pub fn deactivate_outgoing(
        &self,
        task_id: &str,
        task_states: &mut BTreeMap<String, TaskNodeState>,
        edge_states: &mut BTreeMap<String, EdgeState>,
    ) {
        if let Some(spec) = self.definition.tasks.get(task_id) {
            for transition in &spec.next {
                for target in &transition.then {
                    edge_states.insert(edge_key(task_id, target), EdgeState::Inactive);
                }
            }
        }

        self.propagate_deactivation(task_states, edge_states);
    }

    /// Mark pending nodes whose dependencies are met as ready. Returns the
    /// newly-ready task ids.
    pub fn compute_ready(
        &self,
        task_states: &mut BTreeMap<String, TaskNodeState>,
        edge_states: &BTreeMap<String, EdgeState>,
    ) -> Vec<String> {
        let predecessors = self.definition.predecessors();
        let mut newly_ready = Vec::new();

        for (task_id, spec) in &self.definition.tasks {
            if task_states.get(task_id) != Some(&TaskNodeState::Pending) {
                continue;
            }

            let Some(incoming) = predecessors.get(task_id) else {
                continue;
            };

            let states: Vec<EdgeState> = incoming
                .iter()
                .map(|from| {
                    edge_states
                        .get(&edge_key(from, task_id))
                        .copied()
                        .unwrap_or(EdgeState::Pending)
                })
                .collect();

            let any_satisfied = states.contains(&EdgeState::Satisfied);
            let any_pending = states.contains(&EdgeState::Pending);

            let ready = match spec.join {
                // A join waits until every active-path predecessor has
                // resolved; inactive edges are excluded by not counting as
                // pending.
                Some(JoinSpec::All) => !any_pending && any_satisfied,
                None => any_satisfied,
            };

            if ready {
                task_states.insert(task_id.clone(), TaskNodeState::Ready);
                newly_ready.push(task_id.clone());
            }
        }

        newly_ready
    }

    /// Repeatedly deactivate pending nodes whose incoming edges are all
    /// inactive, cascading through their own outgoing edges.
    fn propagate_deactivation(
        &self,
        task_states: &mut BTreeMap<String, TaskNodeState>,
        edge_states: &mut BTreeMap<String, EdgeState>,
    ) {
        let predecessors = self.definition.predecessors();

        loop {
            let mut changed = false;

            for (task_id, incoming) in &predecessors {
                if task_states.get(task_id) != Some(&TaskNodeState::Pending) {
                    continue;
                }

                let all_inactive = incoming.iter().all(|from| {
                    edge_states.get(&edge_key(from, task_id)) == Some(&EdgeState::Inactive)
                });

                if all_inactive {
                    task_states.insert(task_id.clone(), TaskNodeState::Inactive);

                    if let Some(spec) = self.definition.tasks.get(task_id) {
                        for transition in &spec.next {
                            for target in &transition.then {
                                edge_states
                                    .insert(edge_key(task_id, target), EdgeState::Inactive);
                            }
                        }
                    }

                    changed = true;
                }
            }

            if !changed {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::definition::{TaskSpec, TaskTransition, TransitionCondition};

    fn transition(when: TransitionCondition, then: &[&str]) -> TaskTransition {
        TaskTransition {
            when,
            then: then.iter().map(ToString::to_string).collect(),
        }
    }

    fn task(next: Vec<TaskTransition>) -> TaskSpec {
        TaskSpec {
            action: "core.noop".to_string(),
            next,
            ..TaskSpec::default()
        }
    }

    fn join_task() -> TaskSpec {
        TaskSpec {
            action: "core.noop".to_string(),
            join: Some(JoinSpec::All),
            ..TaskSpec::default()
        }
    }

    /// entry fans out to a, b, c; all three join into j.
    fn fan_out_join() -> WorkflowDefinition {
        WorkflowDefinition::new("examples.join")
            .with_task(
                "entry",
                task(vec![transition(
                    TransitionCondition::OnSuccess,
                    &["a", "b", "c"],
                )]),
            )
            .with_task(
                "a",
                task(vec![transition(TransitionCondition::OnSuccess, &["j"])]),
            )
            .with_task(
                "b",
                task(vec![transition(TransitionCondition::OnSuccess, &["j"])]),
            )
            .with_task(
                "c",
                task(vec![transition(TransitionCondition::OnSuccess, &["j"])]),
            )
            .with_task("j", join_task())
    }

    #[test]
    fn test_initial_ready_set_is_entry_tasks() {
        let definition = fan_out_join();
        let engine = GraphEngine::new(&definition);
        let (task_states, _) = engine.initial_states();

        assert_eq!(task_states["entry"], TaskNodeState::Ready);
        assert_eq!(task_states["a"], TaskNodeState::Pending);
        assert_eq!(task_states["j"], TaskNodeState::Pending);
    }

    #[test]
    fn test_join_waits_for_all_predecessors() {
        let definition = fan_out_join();
        let engine = GraphEngine::new(&definition);
        let (mut tasks, mut edges) = engine.initial_states();

        tasks.insert("entry".to_string(), TaskNodeState::Succeeded);
        engine.resolve_completion("entry", ExecutionStatus::Succeeded, &mut tasks, &mut edges);
        let ready = engine.compute_ready(&mut tasks, &edges);
        assert_eq!(ready, vec!["a", "b", "c"]);

        for finished in ["a", "b"] {
            tasks.insert(finished.to_string(), TaskNodeState::Succeeded);
            engine.resolve_completion(
                finished,
                ExecutionStatus::Succeeded,
                &mut tasks,
                &mut edges,
            );
            assert!(engine.compute_ready(&mut tasks, &edges).is_empty());
        }

        tasks.insert("c".to_string(), TaskNodeState::Succeeded);
        engine.resolve_completion("c", ExecutionStatus::Succeeded, &mut tasks, &mut edges);
        assert_eq!(engine.compute_ready(&mut tasks, &edges), vec!["j"]);
    }

    #[test]
    fn test_join_skips_inactive_branch() {
        // entry branches: on success to a and b, on failure to c.
        // All three feed the join.
        let definition = WorkflowDefinition::new("examples.conditional_join")
            .with_task(
                "entry",
                task(vec![
                    transition(TransitionCondition::OnSuccess, &["a", "b"]),
                    transition(TransitionCondition::OnFailure, &["c"]),
                ]),
            )
            .with_task(
                "a",
                task(vec![transition(TransitionCondition::OnSuccess, &["j"])]),
            )
            .with_task(
                "b",
                task(vec![transition(TransitionCondition::OnSuccess, &["j"])]),
            )
            .with_task(
                "c",
                task(vec![transition(TransitionCondition::OnSuccess, &["j"])]),
            )
            .with_task("j", join_task());

        let engine = GraphEngine::new(&definition);
        let (mut tasks, mut edges) = engine.initial_states();

        // entry succeeds: the failure branch through c is never taken.
        tasks.insert("entry".to_string(), TaskNodeState::Succeeded);
        engine.resolve_completion("entry", ExecutionStatus::Succeeded, &mut tasks, &mut edges);

        // c is unreachable and must not block the join.
        assert_eq!(tasks["c"], TaskNodeState::Inactive);
        assert_eq!(edges[&edge_key("c", "j")], EdgeState::Inactive);

        let ready = engine.compute_ready(&mut tasks, &edges);
        assert_eq!(ready, vec!["a", "b"]);

        for finished in ["a", "b"] {
            tasks.insert(finished.to_string(), TaskNodeState::Succeeded);
            engine.resolve_completion(
                finished,
                ExecutionStatus::Succeeded,
                &mut tasks,
                &mut edges,
            );
        }

        assert_eq!(engine.compute_ready(&mut tasks, &edges), vec!["j"]);
    }

    #[test]
    fn test_unmatched_failure_reported_unhandled() {
        let definition = WorkflowDefinition::new("examples.unhandled")
            .with_task(
                "a",
                task(vec![transition(TransitionCondition::OnSuccess, &["b"])]),
            )
            .with_task("b", task(vec![]));

        let engine = GraphEngine::new(&definition);
        let (mut tasks, mut edges) = engine.initial_states();

        tasks.insert("a".to_string(), TaskNodeState::Failed);
        let resolution =
            engine.resolve_completion("a", ExecutionStatus::Failed, &mut tasks, &mut edges);

        assert!(!resolution.handled);
        assert_eq!(tasks["b"], TaskNodeState::Inactive);
    }

    #[test]
    fn test_on_complete_edge_handles_failure() {
        let definition = WorkflowDefinition::new("examples.continue_on_error")
            .with_task(
                "a",
                task(vec![transition(TransitionCondition::OnComplete, &["b"])]),
            )
            .with_task("b", task(vec![]));

        let engine = GraphEngine::new(&definition);
        let (mut tasks, mut edges) = engine.initial_states();

        tasks.insert("a".to_string(), TaskNodeState::Failed);
        let resolution =
            engine.resolve_completion("a", ExecutionStatus::Failed, &mut tasks, &mut edges);

        assert!(resolution.handled);
        assert_eq!(engine.compute_ready(&mut tasks, &edges), vec!["b"]);
    }

    #[test]
    fn test_deactivation_cascades_through_chain() {
        // entry -on-failure-> x -> y -> j; entry -on-success-> a -> j
        let definition = WorkflowDefinition::new("examples.cascade")
            .with_task(
                "entry",
                task(vec![
                    transition(TransitionCondition::OnSuccess, &["a"]),
                    transition(TransitionCondition::OnFailure, &["x"]),
                ]),
            )
            .with_task(
                "a",
                task(vec![transition(TransitionCondition::OnSuccess, &["j"])]),
            )
            .with_task(
                "x",
                task(vec![transition(TransitionCondition::OnSuccess, &["y"])]),
            )
            .with_task(
                "y",
                task(vec![transition(TransitionCondition::OnSuccess, &["j"])]),
            )
            .with_task("j", join_task());

        let engine = GraphEngine::new(&definition);
        let (mut tasks, mut edges) = engine.initial_states();

        tasks.insert("entry".to_string(), TaskNodeState::Succeeded);
        engine.resolve_completion("entry", ExecutionStatus::Succeeded, &mut tasks, &mut edges);

        // The whole untaken chain is deactivated, not just its head.
        assert_eq!(tasks["x"], TaskNodeState::Inactive);
        assert_eq!(tasks["y"], TaskNodeState::Inactive);

        assert_eq!(engine.compute_ready(&mut tasks, &edges), vec!["a"]);

        tasks.insert("a".to_string(), TaskNodeState::Succeeded);
        engine.resolve_completion("a", ExecutionStatus::Succeeded, &mut tasks, &mut edges);
        assert_eq!(engine.compute_ready(&mut tasks, &edges), vec!["j"]);
    }
}
