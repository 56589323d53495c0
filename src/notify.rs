use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed calendar events, one channel per consultant.
/// Wire subscribers stream these to push slot-list refreshes to clients.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a consultant's calendar. Creates the channel if needed.
    pub fn subscribe(&self, consultant_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(consultant_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a committed event. No-op if nobody is listening.
    pub fn send(&self, consultant_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&consultant_id) {
            let _ = sender.send(event.clone());
        }
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let cid = Ulid::new();
        let mut rx = hub.subscribe(cid);

        let event = Event::ConsultantRegistered {
            id: cid,
            name: Some("Dr. Mensah".into()),
        };
        hub.send(cid, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let cid = Ulid::new();
        // No subscriber — should not panic
        hub.send(cid, &Event::ConsultantRegistered { id: cid, name: None });
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let hub = NotifyHub::new();
        let a = Ulid::new();
        let b = Ulid::new();
        let mut rx_a = hub.subscribe(a);

        hub.send(b, &Event::ConsultantRegistered { id: b, name: None });
        assert!(rx_a.try_recv().is_err());
    }
}
