//! Querier plugin seam and the per-querier polling loop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ResultsTrackerConfig;
use crate::models::QueryContext;
use crate::services::ExecutionService;
use crate::state_machine::ExecutionStatus;
use crate::store::ExecutionStore;

#[derive(Debug, Error)]
pub enum QuerierError {
    /// Worth retrying with backoff (engine briefly unreachable).
    #[error("Transient query failure: {0}")]
    Transient(String),

    /// Retrying cannot help (unknown execution, malformed context).
    #[error("Permanent query failure: {0}")]
    Permanent(String),
}

pub type QuerierResult<T> = std::result::Result<T, QuerierError>;

/// Poller for one external workflow engine type.
#[async_trait]
pub trait Querier: Send + Sync {
    /// Ask the external engine for the current status and output of one
    /// execution.
    async fn query(&self, external_id: &str, context: &Value)
        -> QuerierResult<(ExecutionStatus, Value)>;
}

/// One tracked poll with its retry bookkeeping.
struct TrackedQuery {
    context: QueryContext,
    next_poll_at: Instant,
    /// Set when the current transient-failure streak started.
    retry_started: Option<Instant>,
    backoff_ms: u64,
}

/// Owns the polling loop for one querier.
pub struct QuerierHandle {
    name: String,
    querier: Arc<dyn Querier>,
    service: ExecutionService,
    store: Arc<dyn ExecutionStore>,
    config: ResultsTrackerConfig,
    pending: Mutex<VecDeque<TrackedQuery>>,
}

impl QuerierHandle {
    pub fn new(
        name: impl Into<String>,
        querier: Arc<dyn Querier>,
        service: ExecutionService,
        config: ResultsTrackerConfig,
    ) -> Self {
        Self {
            name: name.into(),
            store: service.store(),
            querier,
            service,
            config,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Add query contexts to this querier's poll set.
    pub fn add_queries(&self, contexts: Vec<QueryContext>) {
        let mut pending = self.pending.lock();
        for context in contexts {
            debug!(
                querier = %self.name,
                execution_id = %context.execution_id,
                "Adding query context to querier"
            );
            pending.push_back(TrackedQuery {
                context,
                next_poll_at: Instant::now(),
                retry_started: None,
                backoff_ms: self.config.retry_initial_backoff_ms,
            });
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Poll until the shutdown signal flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(querier = %self.name, "Querier polling loop started");

        loop {
            let sleep_ms = if self.pending_count() == 0 {
                self.config.empty_queue_sleep_ms
            } else {
                self.config.query_interval_ms
            };

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {
                    self.poll_due().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(querier = %self.name, "Querier polling loop stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Process every due query once. Returns how many were polled.
    pub async fn poll_due(&self) -> usize {
        let now = Instant::now();
        let due: Vec<TrackedQuery> = {
            let mut pending = self.pending.lock();
            let mut due = Vec::new();
            let mut rest = VecDeque::new();
            while let Some(tracked) = pending.pop_front() {
                if tracked.next_poll_at <= now {
                    due.push(tracked);
                } else {
                    rest.push_back(tracked);
                }
            }
            *pending = rest;
            due
        };

        let mut polled = 0;
        for tracked in due {
            polled += 1;
            self.query_and_save_results(tracked).await;
        }
        polled
    }

    /// Fire one poll and route its outcome.
    async fn query_and_save_results(&self, mut tracked: TrackedQuery) {
        let context = &tracked.context;
        debug!(
            querier = %self.name,
            execution_id = %context.execution_id,
            external_id = %context.external_id,
            "Querying external engine for results"
        );

        match self
            .querier
            .query(&context.external_id, &context.context)
            .await
        {
            Ok((status, output)) => {
                if let Err(error) = self.record_poll_result(context, status, output).await {
                    error!(
                        querier = %self.name,
                        execution_id = %context.execution_id,
                        error = %error,
                        "Failed to record poll result, dropping query"
                    );
                    self.delete_state_object(context).await;
                    return;
                }

                if status.is_terminal() {
                    self.delete_state_object(context).await;
                } else {
                    // Still running: poll again after the regular interval,
                    // with the failure streak cleared.
                    tracked.retry_started = None;
                    tracked.backoff_ms = self.config.retry_initial_backoff_ms;
                    tracked.next_poll_at =
                        Instant::now() + Duration::from_millis(self.config.query_interval_ms);
                    self.pending.lock().push_back(tracked);
                }
            }
            Err(QuerierError::Permanent(reason)) => {
                warn!(
                    querier = %self.name,
                    execution_id = %context.execution_id,
                    reason = %reason,
                    "Permanent query failure, failing execution"
                );
                self.abandon_poll(
                    context,
                    format!("Querying for results failed permanently: {reason}"),
                )
                .await;
            }
            Err(QuerierError::Transient(reason)) => {
                let retry_started = *tracked.retry_started.get_or_insert_with(Instant::now);
                let elapsed_ms = retry_started.elapsed().as_millis() as u64;

                if elapsed_ms >= self.config.retry_max_elapsed_ms {
                    warn!(
                        querier = %self.name,
                        execution_id = %context.execution_id,
                        elapsed_ms = elapsed_ms,
                        "Retry budget exhausted, abandoning poll"
                    );
                    self.abandon_poll(
                        context,
                        format!(
                            "Giving up polling for results after retrying for {elapsed_ms}ms: \
                             {reason}"
                        ),
                    )
                    .await;
                    return;
                }

                debug!(
                    querier = %self.name,
                    execution_id = %context.execution_id,
                    backoff_ms = tracked.backoff_ms,
                    reason = %reason,
                    "Transient query failure, backing off"
                );

                tracked.next_poll_at = Instant::now() + Duration::from_millis(tracked.backoff_ms);
                tracked.backoff_ms =
                    (tracked.backoff_ms * 2).min(self.config.retry_max_backoff_ms);
                self.pending.lock().push_back(tracked);
            }
        }
    }

    /// Write a successful poll's status and output onto the execution.
    /// A canceled execution keeps its status; the output is still recorded.
    async fn record_poll_result(
        &self,
        context: &QueryContext,
        status: ExecutionStatus,
        output: Value,
    ) -> crate::error::Result<()> {
        self.service
            .update_status(context.execution_id, status, Some(output), true)
            .await?;
        Ok(())
    }

    /// Force-fail the execution with a polling diagnostic and drop the
    /// persisted query state.
    async fn abandon_poll(&self, context: &QueryContext, diagnostic: String) {
        let result = self
            .service
            .update_status(
                context.execution_id,
                ExecutionStatus::Failed,
                Some(json!({"error": diagnostic, "querier": self.name})),
                true,
            )
            .await;

        if let Err(error) = result {
            error!(
                querier = %self.name,
                execution_id = %context.execution_id,
                error = %error,
                "Failed to mark execution failed after polling timeout"
            );
        }

        self.delete_state_object(context).await;
    }

    async fn delete_state_object(&self, context: &QueryContext) {
        debug!(
            querier = %self.name,
            execution_id = %context.execution_id,
            "Clearing persisted query state"
        );
        if let Err(error) = self.store.delete_query_context(context.id).await {
            error!(
                querier = %self.name,
                query_context_id = %context.id,
                error = %error,
                "Failed clearing query state object"
            );
        }
    }
}
