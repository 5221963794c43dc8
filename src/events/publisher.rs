//! In-process message bus backed by a broadcast channel.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{BusMessage, MessageBus, PublishError};

/// High-throughput in-process bus for lifecycle notifications.
#[derive(Debug, Clone)]
pub struct InProcessBus {
    sender: broadcast::Sender<BusMessage>,
}

impl InProcessBus {
    /// Create a new bus with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl MessageBus for InProcessBus {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), PublishError> {
        let message = BusMessage {
            topic: topic.to_string(),
            payload,
            published_at: Utc::now(),
        };

        // A send error only means there are no subscribers right now; the
        // publish still counts.
        let _ = self.sender.send(message);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }
}
