//! # Message Bus
//!
//! Publish/subscribe transport for lifecycle notifications. Components
//! communicate state changes by writing records to the store and publishing
//! on named topics; consumers must tolerate at-least-once delivery.

pub mod publisher;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;

pub use publisher::InProcessBus;

/// Topic names produced and consumed by the execution core.
pub mod topics {
    use crate::state_machine::ExecutionStatus;

    /// A caller requested an execution. Consumed by the scheduler
    /// entrypoint.
    pub const EXECUTION_REQUESTED: &str = "execution.requested";

    /// Internal handoff carrying scheduling queue entry creation/update
    /// events.
    pub const EXECUTION_SCHEDULING_WORK: &str = "execution.scheduling.work";

    /// An externally-executed workflow needs its completion polled.
    /// Consumed by the results tracker.
    pub const EXECUTION_POLLING_REQUESTED: &str = "execution.polling.requested";

    /// Prefix of per-state status notifications.
    pub const EXECUTION_STATUS_PREFIX: &str = "execution.status.";

    /// Topic a status transition is published on.
    pub fn execution_status(status: ExecutionStatus) -> String {
        format!("{EXECUTION_STATUS_PREFIX}{status}")
    }

    /// True when `topic` is a status notification.
    pub fn is_execution_status(topic: &str) -> bool {
        topic.starts_with(EXECUTION_STATUS_PREFIX)
    }
}

/// A message published on the bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
}

/// Error types for event publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Message bus is closed")]
    ChannelClosed,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Publish/subscribe transport seam.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload on the given topic.
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), PublishError>;

    /// Subscribe to all topics. Consumers filter by topic name.
    fn subscribe(&self) -> broadcast::Receiver<BusMessage>;
}
