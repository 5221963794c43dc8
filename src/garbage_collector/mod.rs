//! # Garbage Collector / Timeout Enforcer
//!
//! Periodic sweeps that force-resolve work the normal paths can no longer
//! finish: workflows orphaned by a dead engine process and manual-approval
//! inquiries that outlived their time-to-live. Every forced failure writes
//! a human-readable explanation into the execution result so operators can
//! tell platform housekeeping from action failures.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::GarbageCollectorConfig;
use crate::error::Result;
use crate::models::{InquiryStatus, WorkflowExecutionError};
use crate::services::ExecutionService;
use crate::state_machine::ExecutionStatus;
use crate::store::ExecutionStore;
use crate::workflow::WorkflowService;

/// Periodic garbage collection service.
pub struct GarbageCollectorService {
    service: ExecutionService,
    store: Arc<dyn ExecutionStore>,
    workflows: Arc<WorkflowService>,
    config: GarbageCollectorConfig,
}

impl GarbageCollectorService {
    pub fn new(
        service: ExecutionService,
        workflows: Arc<WorkflowService>,
        config: GarbageCollectorConfig,
    ) -> Self {
        Self {
            store: service.store(),
            service,
            workflows,
            config,
        }
    }

    /// Run collection passes until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        // A short random delay before the first pass prevents a thundering
        // herd when a fleet of collectors restarts at the same time.
        if self.config.startup_jitter_max_ms > 0 {
            let jitter = rand::thread_rng().gen_range(0..self.config.startup_jitter_max_ms);
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }

        info!("Garbage collector started");

        loop {
            self.perform_garbage_collection().await;

            info!(
                interval_secs = self.config.collection_interval_secs,
                "Sleeping before next garbage collection pass"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.config.collection_interval()) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Garbage collector shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// One full pass over every enabled sweep type.
    pub async fn perform_garbage_collection(&self) {
        info!("Performing garbage collection");

        if self.config.orphan_sweep_enabled() {
            if let Err(error) = self.purge_orphaned_workflow_executions().await {
                error!(error = %error, "Failed to purge orphaned workflow executions");
            }
            tokio::time::sleep(Duration::from_millis(self.config.sleep_delay_ms)).await;
        } else {
            debug!("Skipping orphaned workflow sweep since it's not configured");
        }

        if self.config.inquiry_sweep_enabled() {
            if let Err(error) = self.timeout_inquiries().await {
                error!(error = %error, "Failed to time out inquiries");
            }
        } else {
            debug!("Skipping inquiry sweep since it's not configured");
        }
    }

    /// Force-fail workflows with no task activity past the idle threshold.
    pub async fn purge_orphaned_workflow_executions(&self) -> Result<usize> {
        let max_idle = self.config.workflow_execution_max_idle_secs;
        let orphans = self.workflows.identify_orphaned_workflows(max_idle).await?;
        let count = orphans.len();

        for workflow in orphans {
            info!(
                workflow_execution_id = %workflow.id,
                idle_secs = workflow.idle_seconds(Utc::now()),
                "Force-failing orphaned workflow execution"
            );

            let outcome = self
                .workflows
                .fail_workflow_execution(
                    workflow.id,
                    WorkflowExecutionError::platform(format!(
                        "The workflow execution is marked as orphaned: no task activity for \
                         more than {max_idle} seconds. The process owning it most likely \
                         exited; the execution is failed by the garbage collector."
                    )),
                )
                .await;

            if let Err(error) = outcome {
                error!(
                    workflow_execution_id = %workflow.id,
                    error = %error,
                    "Failed to force-fail orphaned workflow"
                );
            }
        }

        Ok(count)
    }

    /// Time out pending inquiries past their TTL and resume their owning
    /// workflows so they can take the failure branch.
    pub async fn timeout_inquiries(&self) -> Result<usize> {
        let now = Utc::now();
        let pending = self.store.query_pending_inquiries().await?;
        let mut expired = 0;

        for mut inquiry in pending {
            if !inquiry.is_expired(now, self.config.inquiry_ttl_minutes) {
                continue;
            }
            expired += 1;

            info!(
                inquiry_id = %inquiry.id,
                workflow_execution_id = %inquiry.workflow_execution_id,
                "Marking expired inquiry as timed out"
            );

            inquiry.status = InquiryStatus::TimedOut;
            self.store.update_inquiry(&inquiry).await?;

            let outcome = self
                .service
                .update_status(
                    inquiry.execution_id,
                    ExecutionStatus::TimedOut,
                    Some(json!({
                        "error": "The inquiry was not answered within its time to live and \
                                  has been timed out by the garbage collector.",
                    })),
                    true,
                )
                .await;

            if let Err(error) = outcome {
                error!(
                    inquiry_id = %inquiry.id,
                    error = %error,
                    "Failed to time out inquiry execution"
                );
                continue;
            }

            // Resuming lets the paused workflow observe the timed-out step
            // and propagate its failure branch.
            if let Err(error) = self
                .workflows
                .request_resume(inquiry.workflow_execution_id)
                .await
            {
                error!(
                    inquiry_id = %inquiry.id,
                    workflow_execution_id = %inquiry.workflow_execution_id,
                    error = %error,
                    "Failed to resume workflow after inquiry timeout"
                );
            }
        }

        Ok(expired)
    }
}
