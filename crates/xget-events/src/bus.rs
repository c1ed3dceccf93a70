#![forbid(unsafe_code)]

use tokio::sync::broadcast;

use crate::XgetEvent;

/// Broadcast bus for fetch lifecycle events.
///
/// Every component holds a cloned `EventBus` and publishes directly.
/// `publish()` is a sync call, safe from both async tasks and sync code.
/// With no subscribers, events are silently dropped; slow subscribers
/// observe `RecvError::Lagged` instead of blocking publishers.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<XgetEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to all subscribers.
    pub fn publish<E: Into<XgetEvent>>(&self, event: E) {
        let _ = self.tx.send(event.into());
    }

    /// Subscribe to all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<XgetEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish(XgetEvent::End);
    }

    #[tokio::test]
    async fn publish_and_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(XgetEvent::Loaded {
            total_size: Some(1024),
            start: 0,
            chunkable: true,
            chunks: 4,
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            XgetEvent::Loaded {
                total_size: Some(1024),
                chunks: 4,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.publish(XgetEvent::End);
        assert_eq!(rx1.recv().await.unwrap(), XgetEvent::End);
        assert_eq!(rx2.recv().await.unwrap(), XgetEvent::End);
    }

    #[tokio::test]
    async fn lagged_subscriber_gets_error() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for _ in 0..10 {
            bus.publish(XgetEvent::StoreReady);
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }

    #[test]
    fn clone_shares_channel() {
        let bus1 = EventBus::new(16);
        let bus2 = bus1.clone();
        let mut rx = bus1.subscribe();
        bus2.publish(XgetEvent::End);
        assert!(rx.try_recv().is_ok());
    }
}
