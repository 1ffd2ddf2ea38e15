//! Lifecycle event stream: the channel by which engines signal progress so
//! downstream observers (or a chained engine scheduler) can react.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// A single lifecycle event.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    pub event_type: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl LifecycleEvent {
    #[must_use]
    pub fn new(event_type: impl Into<String>, session_id: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Sink receiving lifecycle events. Publishing is fire-and-forget; a sink
/// must never fail the operation that emitted the event.
pub trait LifecycleSink: Send + Sync {
    fn publish(&self, event: LifecycleEvent);
}

/// In-process lifecycle stream backed by a tokio broadcast channel.
pub struct BroadcastLifecycleStream {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl BroadcastLifecycleStream {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastLifecycleStream {
    fn default() -> Self {
        Self::new(256)
    }
}

impl LifecycleSink for BroadcastLifecycleStream {
    fn publish(&self, event: LifecycleEvent) {
        // No receivers is not an error
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let stream = BroadcastLifecycleStream::default();
        let mut rx = stream.subscribe();

        stream.publish(LifecycleEvent::new(
            "promotion_end",
            "s1",
            json!({"facts_promoted": 3}),
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "promotion_end");
        assert_eq!(event.data["facts_promoted"], 3);
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let stream = BroadcastLifecycleStream::default();
        stream.publish(LifecycleEvent::new("noop", "s1", json!({})));
    }
}
