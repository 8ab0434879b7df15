//! Lifecycle event bus.
//!
//! Per-deployment broadcast channels carrying `LifecycleEvent`s to live
//! observers (status viewers, log streamers). Delivery is fire-and-forget:
//! subscribers not connected at publish time miss the event — durable
//! history lives in the persisted log store, not here.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::broadcast;
use tracing::debug;

use flotilla_state::LifecycleEvent;

/// Buffered events per channel before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 64;

/// In-process pub/sub over per-deployment channels.
pub struct EventBus {
    channels: RwLock<HashMap<String, broadcast::Sender<LifecycleEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to a deployment's channel, creating it if needed.
    pub fn subscribe(&self, deployment_id: &str) -> broadcast::Receiver<LifecycleEvent> {
        // The map stays usable even if a writer panicked mid-update.
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(deployment_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish an event to its deployment's channel.
    ///
    /// Returns how many subscribers received it. With no channel or no
    /// live subscribers the event is simply dropped.
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        let delivered = match channels.get(&event.deployment_id) {
            Some(sender) => sender.send(event.clone()).unwrap_or(0),
            None => 0,
        };
        debug!(
            deployment_id = %event.deployment_id,
            event_type = %event.event_type,
            delivered,
            "lifecycle event published"
        );
        delivered
    }

    /// Drop a deployment's channel. Called by deployment teardown flows
    /// once no more lifecycle events will be produced for it.
    pub fn remove(&self, deployment_id: &str) {
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        channels.remove(deployment_id);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("d1");

        let delivered = bus.publish(LifecycleEvent::now("d1", "waking", "warming up"));
        assert_eq!(delivered, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "waking");
        assert_eq!(event.deployment_id, "d1");
    }

    #[tokio::test]
    async fn channels_are_isolated_per_deployment() {
        let bus = EventBus::new();
        let mut rx_other = bus.subscribe("other");

        bus.publish(LifecycleEvent::now("d1", "waking", "msg"));
        assert!(rx_other.try_recv().is_err());
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(LifecycleEvent::now("d1", "waking", "msg")), 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_all_receive() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe("d1");
        let mut rx2 = bus.subscribe("d1");

        assert_eq!(bus.publish(LifecycleEvent::now("d1", "sleeping", "idle")), 2);
        assert_eq!(rx1.recv().await.unwrap().event_type, "sleeping");
        assert_eq!(rx2.recv().await.unwrap().event_type, "sleeping");
    }

    #[test]
    fn bus_survives_poisoned_lock() {
        let bus = EventBus::new();
        drop(bus.subscribe("d1"));

        std::thread::scope(|s| {
            let _ = s
                .spawn(|| {
                    let _guard = bus.channels.write().unwrap();
                    panic!("poison the lock");
                })
                .join();
        });

        // No live subscribers, so delivery is zero, but no panic either.
        assert_eq!(bus.publish(LifecycleEvent::now("d1", "waking", "msg")), 0);
        drop(bus.subscribe("d2"));
        bus.remove("d1");
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        bus.publish(LifecycleEvent::now("d1", "waking", "msg"));
        let mut rx = bus.subscribe("d1");
        assert!(rx.try_recv().is_err());
    }
}
