//! Bus consumer turning "execution requested" announcements into queue
//! entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::SchedulerError;
use crate::config::SchedulerConfig;
use crate::error::{CapstanError, Result};
use crate::events::{topics, BusMessage, MessageBus};
use crate::scheduler::SchedulingQueue;

/// Consumes `execution.requested` and feeds the scheduling queue.
///
/// The bus delivers at least once. Enqueue is idempotent, so redeliveries
/// are harmless, and a message is only acknowledged once its enqueue
/// succeeded: transient store failures are retried in place, keeping the
/// delivery outstanding instead of dropping the execution.
pub struct SchedulerEntrypoint {
    queue: Arc<SchedulingQueue>,
    bus: Arc<dyn MessageBus>,
    config: SchedulerConfig,
}

impl SchedulerEntrypoint {
    pub fn new(queue: Arc<SchedulingQueue>, bus: Arc<dyn MessageBus>, config: SchedulerConfig) -> Self {
        Self { queue, bus, config }
    }

    /// Consume announcements until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut receiver = self.bus.subscribe();
        info!("Scheduler entrypoint started");

        loop {
            tokio::select! {
                message = receiver.recv() => match message {
                    Ok(message) => {
                        if message.topic != topics::EXECUTION_REQUESTED {
                            continue;
                        }
                        if let Err(error) = self.handle_message(&message).await {
                            error!(error = %error, "Failed to process execution request");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Lost announcements are redelivered by the producer
                        // side of an at-least-once bus; a lagging in-process
                        // subscriber can only log the gap.
                        warn!(skipped = skipped, "Entrypoint lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Bus closed, stopping scheduler entrypoint");
                        return;
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Scheduler entrypoint shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// Parse one announcement and enqueue it, retrying transient failures.
    pub async fn handle_message(&self, message: &BusMessage) -> Result<()> {
        let (execution_id, delay_ms) = parse_request(message)?;

        let mut attempt = 0;
        loop {
            match self.queue.enqueue(execution_id, delay_ms).await {
                Ok(entry) => {
                    debug!(
                        execution_id = %execution_id,
                        queue_item_id = %entry.id,
                        "Execution request accepted into scheduling queue"
                    );
                    return Ok(());
                }
                Err(CapstanError::Store(store_error)) if store_error.is_transient() => {
                    attempt += 1;
                    if attempt >= self.config.retry_max_attempt {
                        return Err(CapstanError::Store(store_error));
                    }
                    warn!(
                        execution_id = %execution_id,
                        attempt = attempt,
                        error = %store_error,
                        "Record store unavailable, retrying enqueue"
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.retry_wait_ms)).await;
                }
                Err(other) => return Err(other),
            }
        }
    }
}

fn parse_request(message: &BusMessage) -> Result<(Uuid, u64)> {
    let execution_id = message
        .payload
        .get("execution_id")
        .and_then(|value| value.as_str())
        .and_then(|value| Uuid::parse_str(value).ok())
        .ok_or_else(|| {
            CapstanError::Scheduler(SchedulerError::MalformedMessage {
                topic: message.topic.clone(),
                reason: "missing or invalid execution_id".to_string(),
            })
        })?;

    let delay_ms = message
        .payload
        .get("delay_ms")
        .and_then(|value| value.as_u64())
        .unwrap_or(0);

    Ok((execution_id, delay_ms))
}
