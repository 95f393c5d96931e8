use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, Topic};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for live change notifications per topic.
pub struct NotifyHub {
    channels: DashMap<Topic, broadcast::Sender<Event>>,
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

    /// Subscribe to a topic. Creates the channel if needed.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an event on every topic it concerns. No-op for topics nobody listens to.
    pub fn publish(&self, event: &Event) {
        for topic in event.topics() {
            self.send(topic, event);
        }
    }

    fn send(&self, topic: Topic, event: &Event) {
        let Some(sender) = self.channels.get(&topic) else {
            return;
        };
        if sender.send(event.clone()).is_err() {
            // Every receiver is gone; drop the channel so the map doesn't grow per day.
            drop(sender);
            self.channels
                .remove_if(&topic, |_, s| s.receiver_count() == 0);
        }
    }

    pub fn topic_count(&self) -> usize {
        self.channels.len()
    }
}
