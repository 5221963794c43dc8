//! Workflow engine loop.
//!
//! Consumes execution status notifications from the bus and feeds the ones
//! that belong to workflow tasks into the workflow service. Runs as its own
//! long-lived loop so the engine can scale independently of the scheduler.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::WorkflowService;
use crate::error::Result;
use crate::events::{topics, BusMessage, MessageBus};
use crate::models::WorkflowExecutionError;
use crate::services::ExecutionService;

/// Bus consumer driving workflow advancement from task completions.
pub struct WorkflowExecutionHandler {
    service: ExecutionService,
    workflows: Arc<WorkflowService>,
    bus: Arc<dyn MessageBus>,
}

impl WorkflowExecutionHandler {
    pub fn new(
        service: ExecutionService,
        workflows: Arc<WorkflowService>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            service,
            workflows,
            bus,
        }
    }

    /// Consume status notifications until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut receiver = self.bus.subscribe();
        info!("Workflow engine started");

        loop {
            tokio::select! {
                message = receiver.recv() => match message {
                    Ok(message) => {
                        if !topics::is_execution_status(&message.topic) {
                            continue;
                        }
                        self.process(&message).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Workflow engine lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Bus closed, stopping workflow engine");
                        return;
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Workflow engine shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// Handle one status notification, failing the owning workflow when
    /// processing errors out so it does not hang forever.
    async fn process(&self, message: &BusMessage) {
        match self.handle_status_message(message).await {
            Ok(()) => {}
            Err(error) => {
                error!(
                    topic = %message.topic,
                    error = %error,
                    "Error while processing task execution update"
                );

                if let Some(workflow_execution_id) = self.linked_workflow(message).await {
                    let failure = WorkflowExecutionError::platform(format!(
                        "Unknown error while processing task execution update: {error}"
                    ));
                    if let Err(fail_error) = self
                        .workflows
                        .fail_workflow_execution(workflow_execution_id, failure)
                        .await
                    {
                        error!(
                            workflow_execution_id = %workflow_execution_id,
                            error = %fail_error,
                            "Failed to fail workflow execution after processing error"
                        );
                    }
                }
            }
        }
    }

    async fn handle_status_message(&self, message: &BusMessage) -> Result<()> {
        let Some(execution_id) = parse_execution_id(message) else {
            warn!(topic = %message.topic, "Status notification without execution id");
            return Ok(());
        };

        let execution = self.service.get(execution_id).await?;

        // Only executions backing a workflow task concern the engine.
        if execution.context.workflow.is_none() {
            return Ok(());
        }

        self.workflows
            .handle_action_execution_update(&execution)
            .await
    }

    async fn linked_workflow(&self, message: &BusMessage) -> Option<Uuid> {
        let execution_id = parse_execution_id(message)?;
        let execution = self.service.get(execution_id).await.ok()?;
        execution
            .context
            .workflow
            .map(|linkage| linkage.workflow_execution_id)
    }
}

fn parse_execution_id(message: &BusMessage) -> Option<Uuid> {
    message
        .payload
        .get("execution_id")
        .and_then(|value| value.as_str())
        .and_then(|value| Uuid::parse_str(value).ok())
}
