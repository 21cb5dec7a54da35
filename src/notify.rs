use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for booking-engine events, keyed by topic id.
///
/// Mutations publish on every involved room id (availability watchers) and
/// on the booking id (booking watchers). Subscribing to a room id yields
/// every event that changes that room's occupancy.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a topic. Creates the channel if needed.
    pub fn subscribe(&self, topic: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish to a topic. Silently drops the event when nobody listens.
    pub fn send(&self, topic: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&topic) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel, dropping its sender. Used when a booking is
    /// deleted or reaches a terminal status; attached receivers drain any
    /// buffered events and then see the channel as closed.
    pub fn remove(&self, topic: &Ulid) {
        self.channels.remove(topic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_topic_events() {
        let hub = NotifyHub::new();
        let booking_id = Ulid::new();
        let mut rx = hub.subscribe(booking_id);

        let event = Event::BookingDeleted { id: booking_id };
        hub.send(booking_id, &event);
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn publishing_to_an_empty_topic_is_fine() {
        let hub = NotifyHub::new();
        let booking_id = Ulid::new();
        hub.send(booking_id, &Event::BookingDeleted { id: booking_id });
    }
}
