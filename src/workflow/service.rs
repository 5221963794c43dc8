//! Store-backed workflow orchestration.
//!
//! The service turns conductor decisions into records and scheduled work:
//! task executions are backed by ordinary execution requests submitted
//! through the scheduling queue, so workflow tasks flow through the same
//! policy and dispatch machinery as plain actions. The conductor snapshot
//! is persisted on every advance and refreshed before the next one.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::conductor::{TaskRequest, WorkflowConductor};
use super::definition::WorkflowDefinition;
use super::WorkflowError;
use crate::error::Result;
use crate::models::{
    ExecutionContext, ExecutionRequest, TaskExecution, WorkflowExecution, WorkflowExecutionError,
    WorkflowLinkage,
};
use crate::scheduler::SchedulingQueue;
use crate::services::ExecutionService;
use crate::state_machine::{ExecutionStatus, WorkflowStatus};
use crate::store::{ExecutionStore, QueueEntryFilter, WorkflowExecutionFilter};

/// Orchestrates workflow executions against the record store.
pub struct WorkflowService {
    store: Arc<dyn ExecutionStore>,
    service: ExecutionService,
    queue: Arc<SchedulingQueue>,
}

impl WorkflowService {
    pub fn new(service: ExecutionService, queue: Arc<SchedulingQueue>) -> Self {
        Self {
            store: service.store(),
            service,
            queue,
        }
    }

    /// Instantiate a workflow for its root execution and schedule the
    /// initial ready set.
    ///
    /// A definition that fails inspection fails the root execution
    /// immediately, before any task is scheduled, and surfaces the
    /// structured error list.
    pub async fn request(
        &self,
        definition: WorkflowDefinition,
        root_execution_id: Uuid,
    ) -> Result<WorkflowExecution> {
        let root = self.service.get(root_execution_id).await?;
        info!(
            execution_id = %root.id,
            workflow = %definition.name,
            "Processing execution request for workflow"
        );

        let input = serde_json::to_value(&root.parameters)
            .map_err(crate::store::StoreError::Serialization)?;

        let conductor = match WorkflowConductor::new(definition.clone(), input) {
            Ok(conductor) => conductor,
            Err(WorkflowError::InspectionFailed { errors }) => {
                self.service
                    .update_status(
                        root.id,
                        ExecutionStatus::Failed,
                        Some(json!({
                            "error": "Workflow definition failed inspection.",
                            "errors": errors.clone(),
                        })),
                        true,
                    )
                    .await?;
                return Err(WorkflowError::InspectionFailed { errors }.into());
            }
            Err(other) => return Err(other.into()),
        };

        let context = serde_json::to_value(&root.context)
            .map_err(crate::store::StoreError::Serialization)?;
        let workflow = WorkflowExecution::new(
            root.id,
            definition.name.clone(),
            conductor.into_snapshot(),
            context,
        );
        let workflow = self.store.insert_workflow_execution(workflow).await?;
        info!(workflow_execution_id = %workflow.id, "Workflow execution created");

        self.service
            .update_status(root.id, ExecutionStatus::Running, None, true)
            .await?;

        self.request_next_tasks(workflow.id).await?;
        Ok(self.get(workflow.id).await?)
    }

    pub async fn get(&self, workflow_execution_id: Uuid) -> Result<WorkflowExecution> {
        self.store
            .get_workflow_execution(workflow_execution_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(workflow_execution_id).into())
    }

    /// Ask the conductor for the next batch of ready tasks and schedule
    /// them.
    pub async fn request_next_tasks(&self, workflow_execution_id: Uuid) -> Result<()> {
        let mut workflow = self.get(workflow_execution_id).await?;
        let mut conductor = WorkflowConductor::from_snapshot(workflow.conductor.clone());

        let batch = conductor.get_next_tasks();

        if batch.is_empty() {
            info!(
                workflow_execution_id = %workflow.id,
                status = %conductor.status(),
                "No tasks identified to execute next"
            );
        }

        // Persist the conductor's view (tasks marked in flight) before any
        // execution request goes out, so a racing completion event finds
        // consistent state.
        workflow.status = conductor.status();
        workflow.conductor = conductor.snapshot().clone();
        workflow = self.store.update_workflow_execution(&workflow).await?;

        for request in &batch {
            if let Err(err) = self.request_task_execution(&mut workflow, request).await {
                error!(
                    workflow_execution_id = %workflow.id,
                    task_id = %request.task_id,
                    error = %err,
                    "Failed to request task execution"
                );
                self.fail_workflow_execution(
                    workflow.id,
                    WorkflowExecutionError::platform(format!(
                        "Failed to request execution for task \"{}\": {}",
                        request.task_id, err
                    )),
                )
                .await?;
                return Ok(());
            }
        }

        if workflow.status.is_terminal() {
            self.finalize_workflow(workflow).await?;
        } else {
            self.sync_root_status(&workflow).await?;
        }

        Ok(())
    }

    /// Create the task execution and its backing execution request, then
    /// submit it through the scheduling queue.
    async fn request_task_execution(
        &self,
        workflow: &mut WorkflowExecution,
        request: &TaskRequest,
    ) -> Result<()> {
        info!(
            workflow_execution_id = %workflow.id,
            task_id = %request.task_id,
            action = %request.action,
            "Requesting execution for task"
        );

        let mut task = TaskExecution::new(workflow.id, &request.task_id);

        let user = workflow
            .context
            .get("user")
            .and_then(Value::as_str)
            .map(ToString::to_string);

        let context = ExecutionContext {
            user,
            trigger_rule: None,
            parent_execution_id: Some(workflow.root_execution_id),
            root_execution_id: Some(workflow.root_execution_id),
            workflow: Some(WorkflowLinkage {
                workflow_execution_id: workflow.id,
                task_execution_id: task.id,
            }),
        };

        let execution = ExecutionRequest::new(&request.action)
            .with_parameters(request.input.clone())
            .with_context(context)
            .with_delay(request.delay_ms.unwrap_or(0));

        let execution = self.service.request(execution).await?;
        self.queue
            .enqueue(execution.id, execution.delay_ms)
            .await?;

        task.execution_request_id = Some(execution.id);
        let task = self.store.insert_task_execution(task).await?;

        workflow.task_execution_ids.push(task.id);
        workflow.last_task_activity = Utc::now();
        *workflow = self.store.update_workflow_execution(workflow).await?;

        Ok(())
    }

    /// Feed a status change of a task-backing execution into the conductor.
    ///
    /// Intermediate statuses only refresh activity bookkeeping; terminal
    /// statuses resolve the task and advance the graph. Events for a task
    /// that already resolved are absorbed.
    pub async fn handle_action_execution_update(
        &self,
        execution: &ExecutionRequest,
    ) -> Result<()> {
        let linkage = execution
            .context
            .workflow
            .clone()
            .ok_or(WorkflowError::NotWorkflowLinked(execution.id))?;

        let mut workflow = self.get(linkage.workflow_execution_id).await?;
        let Some(mut task) = self
            .store
            .get_task_execution(linkage.task_execution_id)
            .await?
        else {
            warn!(
                workflow_execution_id = %workflow.id,
                task_execution_id = %linkage.task_execution_id,
                "Task execution record missing, ignoring update"
            );
            return Ok(());
        };

        if task.is_terminal() {
            info!(
                workflow_execution_id = %workflow.id,
                task_id = %task.task_id,
                status = %task.status,
                "Task execution already completed, ignoring update"
            );
            return Ok(());
        }

        workflow.last_task_activity = Utc::now();

        if execution.status == ExecutionStatus::Running {
            task.status = ExecutionStatus::Running;
            task.start_timestamp = execution.start_timestamp;
            self.store.update_task_execution(&task).await?;
            self.store.update_workflow_execution(&workflow).await?;
            return Ok(());
        }

        if !execution.status.is_terminal() {
            self.store.update_workflow_execution(&workflow).await?;
            return Ok(());
        }

        info!(
            workflow_execution_id = %workflow.id,
            task_id = %task.task_id,
            status = %execution.status,
            "Task execution completed"
        );

        task.status = execution.status;
        task.result = execution.result.clone();
        task.end_timestamp = execution.end_timestamp;
        self.store.update_task_execution(&task).await?;

        let mut conductor = WorkflowConductor::from_snapshot(workflow.conductor.clone());
        conductor.update_task_state(&task.task_id, execution.status, execution.result.clone())?;

        workflow.status = conductor.status();
        workflow.conductor = conductor.snapshot().clone();
        self.store.update_workflow_execution(&workflow).await?;

        self.request_next_tasks(workflow.id).await
    }

    /// Request cooperative cancellation of a workflow.
    ///
    /// The workflow moves to `canceling` at once; every non-terminal task
    /// is asked to cancel, and the terminal `canceled` status arrives when
    /// the last of them reports back.
    pub async fn request_cancellation(&self, workflow_execution_id: Uuid) -> Result<()> {
        let mut workflow = self.get(workflow_execution_id).await?;
        info!(workflow_execution_id = %workflow.id, "Processing cancelation request for workflow");

        let mut conductor = WorkflowConductor::from_snapshot(workflow.conductor.clone());
        let status = conductor.request_status(WorkflowStatus::Canceling)?;

        workflow.status = status;
        workflow.conductor = conductor.snapshot().clone();
        let workflow = self.store.update_workflow_execution(&workflow).await?;

        // Propagate to every outstanding task. Queued work cancels
        // immediately; running work is asked to cancel and reports back.
        for task in self
            .store
            .query_task_executions_for_workflow(workflow.id)
            .await?
        {
            if task.is_terminal() {
                continue;
            }

            let Some(execution_id) = task.execution_request_id else {
                continue;
            };
            let execution = self.service.get(execution_id).await?;

            if execution.status.is_runnable() {
                self.store
                    .delete_queue_entries(&QueueEntryFilter::for_execution(execution_id))
                    .await?;
                self.service
                    .update_status(execution_id, ExecutionStatus::Canceled, None, true)
                    .await?;
            } else if !execution.status.is_terminal() {
                self.service
                    .update_status(execution_id, ExecutionStatus::Canceling, None, true)
                    .await?;
            }
        }

        if status == WorkflowStatus::Canceled {
            self.finalize_workflow(workflow).await?;
        } else {
            self.sync_root_status(&workflow).await?;
        }

        Ok(())
    }

    /// Request a non-destructive pause: in-flight tasks finish, nothing new
    /// is scheduled until resume.
    pub async fn request_pause(&self, workflow_execution_id: Uuid) -> Result<()> {
        let mut workflow = self.get(workflow_execution_id).await?;
        info!(workflow_execution_id = %workflow.id, "Processing pause request for workflow");

        let mut conductor = WorkflowConductor::from_snapshot(workflow.conductor.clone());
        let status = conductor.request_status(WorkflowStatus::Pausing)?;

        workflow.status = status;
        workflow.conductor = conductor.snapshot().clone();
        let workflow = self.store.update_workflow_execution(&workflow).await?;
        self.sync_root_status(&workflow).await?;

        Ok(())
    }

    /// Resume a paused workflow and re-evaluate its ready set.
    pub async fn request_resume(&self, workflow_execution_id: Uuid) -> Result<()> {
        let mut workflow = self.get(workflow_execution_id).await?;
        info!(workflow_execution_id = %workflow.id, "Processing resume request for workflow");

        let mut conductor = WorkflowConductor::from_snapshot(workflow.conductor.clone());
        let status = conductor.request_status(WorkflowStatus::Resuming)?;

        workflow.status = status;
        workflow.conductor = conductor.snapshot().clone();
        self.store.update_workflow_execution(&workflow).await?;

        self.request_next_tasks(workflow_execution_id).await
    }

    /// Force a workflow into failure with a recorded platform error.
    pub async fn fail_workflow_execution(
        &self,
        workflow_execution_id: Uuid,
        error: WorkflowExecutionError,
    ) -> Result<()> {
        let mut workflow = self.get(workflow_execution_id).await?;
        warn!(
            workflow_execution_id = %workflow.id,
            error = %error.message,
            "Failing workflow execution"
        );

        let mut conductor = WorkflowConductor::from_snapshot(workflow.conductor.clone());
        conductor.force_fail(error);

        workflow.status = conductor.status();
        workflow.conductor = conductor.snapshot().clone();
        let workflow = self.store.update_workflow_execution(&workflow).await?;

        self.finalize_workflow(workflow).await
    }

    /// Workflows whose root is non-terminal but idle past the threshold.
    pub async fn identify_orphaned_workflows(
        &self,
        max_idle_secs: u64,
    ) -> Result<Vec<WorkflowExecution>> {
        let cutoff = Utc::now() - chrono::Duration::seconds(max_idle_secs as i64);
        Ok(self
            .store
            .query_workflow_executions(&WorkflowExecutionFilter::orphan_candidates(cutoff))
            .await?)
    }

    /// Copy the conductor's terminal outcome onto the records and the root
    /// execution.
    async fn finalize_workflow(&self, mut workflow: WorkflowExecution) -> Result<()> {
        let conductor = WorkflowConductor::from_snapshot(workflow.conductor.clone());

        workflow.output = conductor.output().cloned();
        workflow.errors = conductor.errors().to_vec();
        let workflow = self.store.update_workflow_execution(&workflow).await?;

        let result = match workflow.status {
            WorkflowStatus::Succeeded => workflow.output.clone().map(|output| json!({"output": output})),
            WorkflowStatus::Failed => Some(json!({"errors": workflow.errors})),
            _ => None,
        };

        self.service
            .update_status(
                workflow.root_execution_id,
                workflow.status.as_execution_status(),
                result,
                true,
            )
            .await?;

        info!(
            workflow_execution_id = %workflow.id,
            status = %workflow.status,
            "Workflow execution completed"
        );

        Ok(())
    }

    /// Keep the root execution's status in step with a non-terminal
    /// workflow status.
    async fn sync_root_status(&self, workflow: &WorkflowExecution) -> Result<()> {
        let target = workflow.status.as_execution_status();
        let root = self.service.get(workflow.root_execution_id).await?;

        if root.status == target || root.status.is_terminal() {
            return Ok(());
        }

        // The root record follows whatever the conductor settled on. The
        // mirror is best-effort: a racing transition on the root (e.g. a
        // direct cancel) keeps priority.
        if let Err(error) = self
            .service
            .update_status(workflow.root_execution_id, target, None, true)
            .await
        {
            warn!(
                workflow_execution_id = %workflow.id,
                target = %target,
                error = %error,
                "Could not mirror workflow status onto root execution"
            );
        }
        Ok(())
    }
}
