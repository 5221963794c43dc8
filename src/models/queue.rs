//! Scheduling queue entry records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted "this execution wants to run" marker.
///
/// Entries reference their execution request; they never own it. An entry
/// exists only between enqueue and the scheduler's claim-and-dispatch, and
/// at most one entry exists per execution id at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleQueueEntry {
    pub id: Uuid,
    /// Referenced execution request.
    pub execution_id: Uuid,
    /// Earliest time the entry becomes claimable.
    pub scheduled_start_timestamp: DateTime<Utc>,
    /// First time the execution entered the queue. Used as the FIFO
    /// tie-break so policy-delayed entries keep their original ordering
    /// hint.
    pub original_start_timestamp: DateTime<Utc>,
    /// Delay the entry was enqueued with, in milliseconds.
    pub delay_ms: u64,
    /// Claim marker. Set to true by exactly one scheduler process through a
    /// compare-and-swap update; a stale claim is released by the sweep when
    /// the owning process dies mid-handling.
    pub handling: bool,
    /// Optimistic concurrency revision. Incremented by the store on every
    /// successful update; an update against an older revision fails with a
    /// write conflict.
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleQueueEntry {
    pub fn new(execution_id: Uuid, delay_ms: u64) -> Self {
        let now = Utc::now();
        let scheduled_start = now + chrono::Duration::milliseconds(delay_ms as i64);
        Self {
            id: Uuid::new_v4(),
            execution_id,
            scheduled_start_timestamp: scheduled_start,
            original_start_timestamp: now,
            delay_ms,
            handling: false,
            revision: 0,
            updated_at: now,
        }
    }

    /// True when the entry is claimable at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.handling && self.scheduled_start_timestamp <= now
    }
}
