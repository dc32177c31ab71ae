//! Lifecycle event fan-out
//!
//! Observers subscribe to an [`EventBus`] and receive every event of the
//! kinds they asked for on their own unbounded channel. Closed receivers are
//! pruned on the next publish.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tensor_core::{AllocationPlan, FailureReason};
use tensor_hardware::HardwareInventory;
use tokio::sync::mpsc;
use tracing::debug;

/// Event kinds observers can filter on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Started,
    Stopped,
    HardwareUpdated,
    AllocationUpdated,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Started,
        EventKind::Stopped,
        EventKind::HardwareUpdated,
        EventKind::AllocationUpdated,
        EventKind::Error,
    ];
}

/// Something that happened to an engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EngineEvent {
    Started {
        pid: u32,
        model: String,
    },
    Stopped {
        #[serde(rename = "exitCode")]
        exit_code: Option<i32>,
    },
    HardwareUpdated {
        inventory: HardwareInventory,
    },
    AllocationUpdated {
        plan: AllocationPlan,
    },
    Error {
        message: String,
        reason: Option<FailureReason>,
    },
}

impl EngineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::Started { .. } => EventKind::Started,
            EngineEvent::Stopped { .. } => EventKind::Stopped,
            EngineEvent::HardwareUpdated { .. } => EventKind::HardwareUpdated,
            EngineEvent::AllocationUpdated { .. } => EventKind::AllocationUpdated,
            EngineEvent::Error { .. } => EventKind::Error,
        }
    }
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    kinds: Vec<EventKind>,
    tx: mpsc::UnboundedSender<EngineEvent>,
}

/// Explicit observer list
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event
    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<EngineEvent>) {
        self.subscribe_to(&EventKind::ALL)
    }

    /// Receive only events of the given kinds
    pub fn subscribe_to(
        &self,
        kinds: &[EventKind],
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscribers.lock().push(Subscriber {
            id,
            kinds: kinds.to_vec(),
            tx,
        });
        (id, rx)
    }

    /// Returns false if the subscription was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    pub fn publish(&self, event: EngineEvent) {
        let kind = event.kind();
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| {
            if !s.kinds.contains(&kind) {
                return !s.tx.is_closed();
            }
            s.tx.send(event.clone()).is_ok()
        });
        debug!("Published {:?} to {} subscribers", kind, subscribers.len());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::new();
        let (_, mut a) = bus.subscribe();
        let (_, mut b) = bus.subscribe();

        bus.publish(EngineEvent::Started {
            pid: 42,
            model: "llama-7b".into(),
        });

        assert_eq!(a.recv().await.unwrap().kind(), EventKind::Started);
        assert_eq!(b.recv().await.unwrap().kind(), EventKind::Started);
    }

    #[tokio::test]
    async fn test_kind_filter() {
        let bus = EventBus::new();
        let (_, mut errors) = bus.subscribe_to(&[EventKind::Error]);

        bus.publish(EngineEvent::Stopped { exit_code: Some(0) });
        bus.publish(EngineEvent::Error {
            message: "boom".into(),
            reason: None,
        });

        let event = errors.recv().await.unwrap();
        assert_eq!(event.kind(), EventKind::Error);
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe_and_prune() {
        let bus = EventBus::new();
        let (id, _rx) = bus.subscribe();
        let (_, dropped) = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));

        drop(dropped);
        bus.publish(EngineEvent::Stopped { exit_code: None });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(EngineEvent::Stopped { exit_code: Some(0) }).unwrap();
        assert_eq!(json["event"], "stopped");
        assert_eq!(json["exitCode"], 0);
    }
}
