//! Execution lifecycle service.
//!
//! All status changes flow through [`ExecutionService::update_status`]: it
//! resolves the transition against the state machine rules, stamps the
//! start/end timestamps exactly once, persists the record, and publishes
//! the per-state notification. Runners, the scheduler, the workflow engine,
//! and the results tracker all report through this one path.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{CapstanError, Result};
use crate::events::{topics, MessageBus};
use crate::models::ExecutionRequest;
use crate::state_machine::{resolve_transition, ExecutionStatus, TransitionOutcome};
use crate::store::{ExecutionStore, StoreError};

/// Store-and-bus backed execution lifecycle operations.
#[derive(Clone)]
pub struct ExecutionService {
    store: Arc<dyn ExecutionStore>,
    bus: Arc<dyn MessageBus>,
}

impl ExecutionService {
    pub fn new(store: Arc<dyn ExecutionStore>, bus: Arc<dyn MessageBus>) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> Arc<dyn ExecutionStore> {
        Arc::clone(&self.store)
    }

    pub fn bus(&self) -> Arc<dyn MessageBus> {
        Arc::clone(&self.bus)
    }

    /// Create an execution request and announce it on the bus.
    ///
    /// The announcement is what the scheduler entrypoint consumes; the
    /// record is persisted first so a redelivered announcement finds it.
    pub async fn request(&self, execution: ExecutionRequest) -> Result<ExecutionRequest> {
        execution
            .context
            .validate()
            .map_err(CapstanError::Validation)?;

        let execution = self.store.insert_execution(execution).await?;

        self.bus
            .publish(
                topics::EXECUTION_REQUESTED,
                json!({
                    "execution_id": execution.id,
                    "delay_ms": execution.delay_ms,
                }),
            )
            .await?;

        info!(
            execution_id = %execution.id,
            action = %execution.action,
            delay_ms = execution.delay_ms,
            "Execution requested"
        );

        Ok(execution)
    }

    /// Load an execution, failing with a not-found error when missing.
    pub async fn get(&self, execution_id: Uuid) -> Result<ExecutionRequest> {
        self.store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| {
                CapstanError::Store(StoreError::NotFound {
                    collection: "execution",
                    id: execution_id,
                })
            })
    }

    /// Apply a status write to an execution.
    ///
    /// Terminal states absorb later writes and an in-flight cancellation
    /// wins over a late completion report; in both cases the provided
    /// result is still recorded so diagnostics survive the race. The status
    /// notification is only published when `publish` is set, matching the
    /// scheduler's publish-after-claim ordering.
    pub async fn update_status(
        &self,
        execution_id: Uuid,
        requested: ExecutionStatus,
        result: Option<Value>,
        publish: bool,
    ) -> Result<ExecutionRequest> {
        let mut execution = self.get(execution_id).await?;
        let outcome = resolve_transition(execution.status, requested)?;

        let effective = match outcome {
            TransitionOutcome::Applied(effective) => effective,
            TransitionOutcome::Unchanged => {
                debug!(
                    execution_id = %execution_id,
                    current = %execution.status,
                    requested = %requested,
                    "Status write absorbed"
                );

                if let Some(result) = result {
                    execution.result = Some(result);
                    execution = self.store.update_execution(&execution).await?;
                }

                return Ok(execution);
            }
        };

        let now = Utc::now();
        let previous = execution.status;
        execution.status = effective;

        if effective == ExecutionStatus::Running && execution.start_timestamp.is_none() {
            execution.start_timestamp = Some(now);
        }

        if effective.is_terminal() && execution.end_timestamp.is_none() {
            execution.end_timestamp = Some(now);
        }

        if let Some(result) = result {
            execution.result = Some(result);
        }

        let execution = self.store.update_execution(&execution).await?;

        info!(
            execution_id = %execution.id,
            action = %execution.action,
            from = %previous,
            to = %effective,
            "Execution status updated"
        );

        if publish {
            self.publish_status(&execution).await?;
        }

        Ok(execution)
    }

    /// Publish the current status of an execution.
    ///
    /// Split out so the scheduler can delay the publish until after its
    /// queue bookkeeping, mirroring the publish-then-delete claim ordering.
    pub async fn publish_status(&self, execution: &ExecutionRequest) -> Result<()> {
        self.bus
            .publish(
                &topics::execution_status(execution.status),
                json!({
                    "execution_id": execution.id,
                    "status": execution.status,
                }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InProcessBus;
    use crate::store::InMemoryStore;

    fn service() -> ExecutionService {
        ExecutionService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InProcessBus::new(64)),
        )
    }

    #[tokio::test]
    async fn test_request_publishes_announcement() {
        let service = service();
        let mut receiver = service.bus().subscribe();

        let execution = service
            .request(ExecutionRequest::new("pack.deploy"))
            .await
            .unwrap();

        let message = receiver.recv().await.unwrap();
        assert_eq!(message.topic, topics::EXECUTION_REQUESTED);
        assert_eq!(
            message.payload["execution_id"],
            json!(execution.id.to_string())
        );
    }

    #[tokio::test]
    async fn test_start_and_end_timestamps_set_once() {
        let service = service();
        let execution = service
            .request(ExecutionRequest::new("pack.deploy"))
            .await
            .unwrap();

        let scheduled = service
            .update_status(execution.id, ExecutionStatus::Scheduled, None, true)
            .await
            .unwrap();
        assert!(scheduled.start_timestamp.is_none());

        let running = service
            .update_status(execution.id, ExecutionStatus::Running, None, true)
            .await
            .unwrap();
        let started_at = running.start_timestamp.unwrap();

        let done = service
            .update_status(execution.id, ExecutionStatus::Succeeded, None, true)
            .await
            .unwrap();
        assert_eq!(done.start_timestamp.unwrap(), started_at);
        let ended_at = done.end_timestamp.unwrap();

        // A late duplicate report must not move the terminal timestamps.
        let absorbed = service
            .update_status(execution.id, ExecutionStatus::Failed, None, true)
            .await
            .unwrap();
        assert_eq!(absorbed.status, ExecutionStatus::Succeeded);
        assert_eq!(absorbed.end_timestamp.unwrap(), ended_at);
    }

    #[tokio::test]
    async fn test_cancel_wins_but_result_is_recorded() {
        let service = service();
        let execution = service
            .request(ExecutionRequest::new("pack.deploy"))
            .await
            .unwrap();

        service
            .update_status(execution.id, ExecutionStatus::Scheduled, None, true)
            .await
            .unwrap();
        service
            .update_status(execution.id, ExecutionStatus::Running, None, true)
            .await
            .unwrap();
        service
            .update_status(execution.id, ExecutionStatus::Canceling, None, true)
            .await
            .unwrap();

        let final_state = service
            .update_status(
                execution.id,
                ExecutionStatus::Succeeded,
                Some(json!({"stdout": "done"})),
                true,
            )
            .await
            .unwrap();

        assert_eq!(final_state.status, ExecutionStatus::Canceled);
        assert_eq!(final_state.result.unwrap()["stdout"], json!("done"));
    }

    #[tokio::test]
    async fn test_missing_execution_is_not_found() {
        let service = service();
        let result = service
            .update_status(Uuid::new_v4(), ExecutionStatus::Scheduled, None, true)
            .await;
        assert!(matches!(
            result,
            Err(CapstanError::Store(StoreError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_invalid_context_rejected() {
        let service = service();
        let mut execution = ExecutionRequest::new("pack.deploy");
        execution.context.parent_execution_id = Some(Uuid::new_v4());

        let result = service.request(execution).await;
        assert!(matches!(result, Err(CapstanError::Validation(_))));
    }
}
