//! Pub/sub broker: decoupled communication between components.
//!
//! Stores publish message events while a turn streams, the agent loop
//! publishes its terminal events. Subscribers filter for what they care about.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// What happened to the published payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PubSubEventKind {
    Created,
    Updated,
    Deleted,
}

/// A published event.
#[derive(Debug, Clone)]
pub struct PubSubEvent<T> {
    pub kind: PubSubEventKind,
    pub payload: T,
}

/// A broadcast-based broker for events of type `T`.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Slow
/// subscribers lag and lose the oldest events; publishers never block.
pub struct Broker<T> {
    sender: broadcast::Sender<Arc<PubSubEvent<T>>>,
}

impl<T: Send + Sync + 'static> Broker<T> {
    /// Create a new broker with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers. Returns how many received it.
    pub fn publish(&self, kind: PubSubEventKind, payload: T) -> usize {
        match self.sender.send(Arc::new(PubSubEvent { kind, payload })) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!(?kind, "No subscribers, event dropped");
                0
            }
        }
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PubSubEvent<T>>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Send + Sync + 'static> Default for Broker<T> {
    fn default() -> Self {
        Self::new(256)
    }
}

impl<T> std::fmt::Debug for Broker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broker_publish_subscribe() {
        let broker: Broker<String> = Broker::new(16);
        let mut rx = broker.subscribe();

        assert_eq!(broker.publish(PubSubEventKind::Created, "hello".to_string()), 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, PubSubEventKind::Created);
        assert_eq!(event.payload, "hello");
    }

    #[test]
    fn broker_no_subscribers_doesnt_panic() {
        let broker: Broker<u32> = Broker::default();
        assert_eq!(broker.publish(PubSubEventKind::Updated, 7), 0);
        assert_eq!(broker.subscriber_count(), 0);

        // Dropping the last subscriber goes back to dropping events
        let rx = broker.subscribe();
        assert_eq!(broker.publish(PubSubEventKind::Updated, 8), 1);
        drop(rx);
        assert_eq!(broker.publish(PubSubEventKind::Deleted, 9), 0);
    }
}
