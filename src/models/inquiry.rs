//! Manual-approval pause points.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Resolution state of an inquiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InquiryStatus {
    /// Waiting for a response.
    Pending,
    /// A response arrived before the TTL elapsed.
    Answered,
    /// Force-resolved by the timeout enforcer.
    TimedOut,
}

/// A workflow pause point awaiting manual approval, subject to a
/// time-to-live enforced by the garbage collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inquiry {
    pub id: Uuid,
    /// Workflow execution paused on this inquiry.
    pub workflow_execution_id: Uuid,
    /// Execution request representing the inquiry step.
    pub execution_id: Uuid,
    /// Time-to-live in minutes. Zero means the collector's configured
    /// default applies.
    pub ttl_minutes: u64,
    pub status: InquiryStatus,
    pub created_at: DateTime<Utc>,
}

impl Inquiry {
    pub fn new(workflow_execution_id: Uuid, execution_id: Uuid, ttl_minutes: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_execution_id,
            execution_id,
            ttl_minutes,
            status: InquiryStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// True when the inquiry is pending and older than its TTL, using
    /// `default_ttl_minutes` when the inquiry does not carry its own.
    pub fn is_expired(&self, now: DateTime<Utc>, default_ttl_minutes: u64) -> bool {
        if self.status != InquiryStatus::Pending {
            return false;
        }

        let ttl = if self.ttl_minutes > 0 {
            self.ttl_minutes
        } else {
            default_ttl_minutes
        };

        now - self.created_at > chrono::Duration::minutes(ttl as i64)
    }
}
