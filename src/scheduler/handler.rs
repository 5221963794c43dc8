//! The scheduler loop.
//!
//! One coordinating loop claims due queue entries and spawns a worker task
//! per entry, so a slow runner handoff for one execution never blocks
//! evaluation of the next. Workers are tracked in a `JoinSet` and drained
//! on shutdown. A sibling sweep loop releases claims left behind by
//! scheduler processes that died mid-handling.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::{SchedulerError, SchedulingQueue};
use crate::config::SchedulerConfig;
use crate::error::{CapstanError, Result};
use crate::models::ScheduleQueueEntry;
use crate::policies::PolicyEngine;
use crate::runner::RunnerDispatch;
use crate::services::ExecutionService;
use crate::state_machine::ExecutionStatus;
use crate::store::StoreError;

/// Claims queue entries, applies policies, and dispatches runnable work.
pub struct SchedulerHandler {
    queue: Arc<SchedulingQueue>,
    service: ExecutionService,
    policy_engine: Arc<PolicyEngine>,
    dispatcher: Arc<dyn RunnerDispatch>,
    config: SchedulerConfig,
}

impl SchedulerHandler {
    pub fn new(
        queue: Arc<SchedulingQueue>,
        service: ExecutionService,
        policy_engine: Arc<PolicyEngine>,
        dispatcher: Arc<dyn RunnerDispatch>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            queue,
            service,
            policy_engine,
            dispatcher,
            config,
        }
    }

    /// Run the poll loop until the shutdown signal flips, then drain
    /// in-flight workers.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("Scheduler handler started");
        let mut workers: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {
                    // Reap finished workers, then block only when the pool
                    // is saturated.
                    while workers.try_join_next().is_some() {}
                    while workers.len() >= self.config.pool_size {
                        workers.join_next().await;
                    }

                    if let Err(error) = self.process(&mut workers).await {
                        error!(error = %error, "Scheduler poll iteration failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(in_flight = workers.len(), "Draining scheduler workers");
        while workers.join_next().await.is_some() {}
        info!("Scheduler handler stopped");
    }

    /// Run the stale-claim sweep until the shutdown signal flips.
    pub async fn run_claim_sweep(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("Scheduler claim sweep started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.claim_sweep_interval()) => {
                    match self
                        .queue
                        .reset_stale_claims(self.config.stale_claim_threshold_ms)
                        .await
                    {
                        Ok(0) => {}
                        Ok(released) => {
                            info!(released = released, "Released stale queue claims");
                        }
                        Err(error) => {
                            error!(error = %error, "Stale claim sweep failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Scheduler claim sweep stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Claim at most one due entry and hand it to a worker.
    async fn process(self: &Arc<Self>, workers: &mut JoinSet<()>) -> Result<()> {
        let Some(entry) = self.queue.pop_next_ready().await? else {
            return Ok(());
        };

        let handler = Arc::clone(self);
        workers.spawn(async move {
            let execution_id = entry.execution_id;
            if let Err(error) = handler.handle_execution(entry).await {
                error!(
                    execution_id = %execution_id,
                    error = %error,
                    "Failed to handle claimed queue entry"
                );
            }
        });

        Ok(())
    }

    /// Process one claimed entry end to end.
    pub async fn handle_execution(&self, entry: ScheduleQueueEntry) -> Result<()> {
        let execution = match self.service.get(entry.execution_id).await {
            Ok(execution) => execution,
            Err(CapstanError::Store(StoreError::NotFound { .. })) => {
                error!(
                    execution_id = %entry.execution_id,
                    queue_item_id = %entry.id,
                    "Execution referenced by queue entry not found, dropping entry"
                );
                self.queue.delete(&entry).await?;
                return Err(SchedulerError::MissingExecution {
                    execution_id: entry.execution_id,
                    queue_item_id: entry.id,
                }
                .into());
            }
            Err(other) => return Err(other),
        };

        debug!(
            execution_id = %execution.id,
            status = %execution.status,
            "Applying pre-run policies"
        );

        let application = self.policy_engine.apply_pre_run_policies(execution).await?;

        if application.delayed {
            info!(
                execution_id = %application.execution.id,
                "Execution delayed by policy, rescheduling queue entry"
            );
            return self
                .queue
                .release_delayed(entry, self.config.policy_reschedule_delay_ms)
                .await;
        }

        let execution = application.execution;

        // A policy or a racing user request may have made the execution
        // non-runnable; the entry has served its purpose either way.
        if !execution.status.is_runnable() {
            info!(
                execution_id = %execution.id,
                status = %execution.status,
                "Ignoring execution after policies, removing queue entry"
            );
            return self.queue.delete(&entry).await;
        }

        self.update_to_scheduled(execution.id, entry).await
    }

    /// Transition a runnable execution to `scheduled` and dispatch it.
    async fn update_to_scheduled(
        &self,
        execution_id: uuid::Uuid,
        entry: ScheduleQueueEntry,
    ) -> Result<()> {
        // Publish is withheld here and done explicitly below so the queue
        // entry is only deleted after the status change is announced;
        // otherwise a fast completion could race the scheduled publish.
        let execution = self
            .service
            .update_status(execution_id, ExecutionStatus::Scheduled, None, false)
            .await?;

        self.service.publish_status(&execution).await?;
        self.queue.delete(&entry).await?;

        // Re-check right before the handoff: a cancel may have won the race
        // after the scheduled write.
        let current = self.service.get(execution_id).await?;
        if current.status != ExecutionStatus::Scheduled {
            info!(
                execution_id = %execution_id,
                status = %current.status,
                "Skipping dispatch, status changed after scheduling"
            );
            return Ok(());
        }

        if let Err(error) = self.dispatcher.dispatch(&current).await {
            // The execution stays scheduled; the garbage collector detects
            // work whose runner never reported back.
            error!(
                execution_id = %execution_id,
                error = %error,
                "Runner dispatch failed"
            );
        }

        Ok(())
    }
}
