//! Durable, time-aware queue of not-yet-dispatched executions.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::events::{topics, MessageBus};
use crate::models::ScheduleQueueEntry;
use crate::services::ExecutionService;
use crate::state_machine::ExecutionStatus;
use crate::store::{ExecutionStore, QueueEntryFilter, StoreError};

/// Store-backed scheduling queue.
///
/// Entries are claimed, not peeked: `pop_next_ready` flips the entry's
/// `handling` flag through a revision compare-and-swap, so exactly one
/// scheduler process wins a given entry no matter how many poll
/// concurrently.
pub struct SchedulingQueue {
    store: Arc<dyn ExecutionStore>,
    service: ExecutionService,
    bus: Arc<dyn MessageBus>,
}

impl SchedulingQueue {
    pub fn new(service: ExecutionService) -> Self {
        Self {
            store: service.store(),
            bus: service.bus(),
            service,
        }
    }

    /// Add an execution to the queue, idempotently.
    ///
    /// A redelivered "requested" announcement finds the existing entry and
    /// returns it instead of creating a duplicate. A positive delay first
    /// moves the execution to `delayed` and stamps its scheduled start.
    pub async fn enqueue(&self, execution_id: Uuid, delay_ms: u64) -> Result<ScheduleQueueEntry> {
        if let Some(existing) = self
            .store
            .find_queue_entry_for_execution(execution_id)
            .await?
        {
            debug!(
                execution_id = %execution_id,
                queue_item_id = %existing.id,
                "Duplicate enqueue ignored, returning existing entry"
            );
            return Ok(existing);
        }

        let entry = ScheduleQueueEntry::new(execution_id, delay_ms);

        if delay_ms > 0 {
            let mut execution = self.service.get(execution_id).await?;
            execution.scheduled_start_timestamp = Some(entry.scheduled_start_timestamp);
            self.store.update_execution(&execution).await?;

            self.service
                .update_status(execution_id, ExecutionStatus::Delayed, None, true)
                .await?;
        }

        let entry = self.store.insert_queue_entry(entry).await?;

        self.bus
            .publish(
                topics::EXECUTION_SCHEDULING_WORK,
                json!({
                    "queue_item_id": entry.id,
                    "execution_id": execution_id,
                    "scheduled_start_timestamp": entry.scheduled_start_timestamp,
                }),
            )
            .await?;

        info!(
            execution_id = %execution_id,
            queue_item_id = %entry.id,
            delay_ms = delay_ms,
            "Execution enqueued for scheduling"
        );

        Ok(entry)
    }

    /// Claim the oldest due entry, or none.
    ///
    /// Ordering is best-effort earliest-scheduled-first with the original
    /// enqueue time as tie-break; FIFO is not guaranteed for entries that
    /// were re-scheduled by a policy delay. A claim lost to a concurrent
    /// scheduler returns `None` and the next poll tries again.
    pub async fn pop_next_ready(&self) -> Result<Option<ScheduleQueueEntry>> {
        let mut due = self
            .store
            .query_queue_entries(&QueueEntryFilter::due(Utc::now()))
            .await?;

        due.sort_by_key(|entry| (entry.scheduled_start_timestamp, entry.original_start_timestamp));

        let Some(mut candidate) = due.into_iter().next() else {
            return Ok(None);
        };

        candidate.handling = true;

        match self.store.update_queue_entry(&candidate).await {
            Ok(claimed) => {
                info!(
                    execution_id = %claimed.execution_id,
                    queue_item_id = %claimed.id,
                    "Retrieved item from scheduling queue"
                );
                Ok(Some(claimed))
            }
            Err(StoreError::WriteConflict { .. }) => {
                debug!(
                    execution_id = %candidate.execution_id,
                    queue_item_id = %candidate.id,
                    "Queue item already claimed by another scheduler"
                );
                Ok(None)
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Release a claimed entry back into the queue after a policy delay.
    pub async fn release_delayed(
        &self,
        mut entry: ScheduleQueueEntry,
        reschedule_delay_ms: u64,
    ) -> Result<()> {
        entry.handling = false;
        entry.scheduled_start_timestamp =
            Utc::now() + chrono::Duration::milliseconds(reschedule_delay_ms as i64);

        match self.store.update_queue_entry(&entry).await {
            Ok(_) => Ok(()),
            Err(StoreError::WriteConflict { .. }) => {
                warn!(
                    execution_id = %entry.execution_id,
                    queue_item_id = %entry.id,
                    "Write conflict on rescheduling queue entry"
                );
                Ok(())
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Remove an entry from the queue.
    pub async fn delete(&self, entry: &ScheduleQueueEntry) -> Result<()> {
        self.store.delete_queue_entry(entry.id).await?;
        Ok(())
    }

    /// Release claims that have been held longer than the threshold.
    ///
    /// A claimed entry should be processed within seconds; one stuck in
    /// `handling` for longer indicates the claiming scheduler died, so the
    /// claim is released for another process to pick up.
    pub async fn reset_stale_claims(&self, stale_threshold_ms: u64) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::milliseconds(stale_threshold_ms as i64);
        let stale = self
            .store
            .query_queue_entries(&QueueEntryFilter {
                handling: Some(true),
                updated_before: Some(cutoff),
                ..QueueEntryFilter::default()
            })
            .await?;

        let mut released = 0;
        for mut entry in stale {
            entry.handling = false;

            match self.store.update_queue_entry(&entry).await {
                Ok(_) => {
                    info!(
                        execution_id = %entry.execution_id,
                        queue_item_id = %entry.id,
                        "Released claim on orphaned queue entry"
                    );
                    released += 1;
                }
                Err(StoreError::WriteConflict { .. }) => {
                    info!(
                        execution_id = %entry.execution_id,
                        queue_item_id = %entry.id,
                        "Queue entry updated while releasing stale claim"
                    );
                }
                Err(other) => return Err(other.into()),
            }
        }

        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InProcessBus;
    use crate::models::ExecutionRequest;
    use crate::store::InMemoryStore;

    async fn queue_with_execution() -> (SchedulingQueue, Uuid) {
        let service = ExecutionService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InProcessBus::new(64)),
        );
        let execution = service
            .request(ExecutionRequest::new("pack.deploy"))
            .await
            .unwrap();
        (SchedulingQueue::new(service), execution.id)
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let (queue, execution_id) = queue_with_execution().await;

        let first = queue.enqueue(execution_id, 0).await.unwrap();
        let second = queue.enqueue(execution_id, 0).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_enqueue_with_delay_marks_execution_delayed() {
        let (queue, execution_id) = queue_with_execution().await;

        let entry = queue.enqueue(execution_id, 5_000).await.unwrap();
        assert!(entry.scheduled_start_timestamp > Utc::now());

        let execution = queue.service.get(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Delayed);
        assert!(execution.scheduled_start_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_pop_skips_future_entries() {
        let (queue, execution_id) = queue_with_execution().await;
        queue.enqueue(execution_id, 60_000).await.unwrap();

        assert!(queue.pop_next_ready().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pop_claims_and_second_pop_finds_nothing() {
        let (queue, execution_id) = queue_with_execution().await;
        queue.enqueue(execution_id, 0).await.unwrap();

        let claimed = queue.pop_next_ready().await.unwrap().unwrap();
        assert!(claimed.handling);
        assert!(queue.pop_next_ready().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_claims_are_released() {
        let (queue, execution_id) = queue_with_execution().await;
        queue.enqueue(execution_id, 0).await.unwrap();
        queue.pop_next_ready().await.unwrap().unwrap();

        // Claim is fresh, nothing to release yet.
        assert_eq!(queue.reset_stale_claims(60_000).await.unwrap(), 0);

        // With a zero threshold the fresh claim is already stale.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(queue.reset_stale_claims(0).await.unwrap(), 1);

        assert!(queue.pop_next_ready().await.unwrap().is_some());
    }
}
