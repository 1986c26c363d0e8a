//! Topic subscriber sets
//!
//! The hub only tracks which outbound queues belong to a topic. Subscription
//! callbacks are fired by the connection after the hub has been updated, so
//! no map guard is held while user code runs.
//!
//! Queues are bounded. A subscriber whose queue is full misses the message
//! and is not counted as a delivery; it stays subscribed.

use dashmap::DashMap;
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::types::Message;
use crate::websocket::Outbound;

pub(crate) struct TopicHub {
    topics: DashMap<String, HashMap<String, mpsc::Sender<Outbound>>>,
}

impl TopicHub {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
        }
    }

    /// Add a subscriber. Returns `(old_count, new_count)`.
    pub fn subscribe(
        &self,
        topic: &str,
        id: &str,
        tx: mpsc::Sender<Outbound>,
    ) -> (usize, usize) {
        let mut entry = self.topics.entry(topic.to_string()).or_default();
        let old = entry.len();
        entry.insert(id.to_string(), tx);
        (old, entry.len())
    }

    /// Remove a subscriber. Returns `(old_count, new_count)`.
    pub fn unsubscribe(&self, topic: &str, id: &str) -> (usize, usize) {
        let counts = match self.topics.get_mut(topic) {
            Some(mut subscribers) => {
                let old = subscribers.len();
                subscribers.remove(id);
                (old, subscribers.len())
            }
            None => (0, 0),
        };

        if counts.1 == 0 {
            self.topics.remove_if(topic, |_, subscribers| subscribers.is_empty());
        }
        counts
    }

    /// Queue `message` for every subscriber except `exclude`.
    /// Returns the number of queues that accepted it.
    pub fn publish(&self, topic: &str, message: &Message, exclude: Option<&str>) -> usize {
        let Some(subscribers) = self.topics.get(topic) else {
            return 0;
        };

        subscribers
            .iter()
            .filter(|(id, _)| Some(id.as_str()) != exclude)
            .filter(|(_, tx)| tx.try_send(Outbound::Message(message.clone())).is_ok())
            .count()
    }

    pub fn count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|s| s.len()).unwrap_or(0)
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_track_subscribe_and_unsubscribe() {
        let hub = TopicHub::new();
        let (tx, _rx) = mpsc::channel(8);

        assert_eq!(hub.subscribe("alert", "a", tx.clone()), (0, 1));
        assert_eq!(hub.subscribe("alert", "b", tx.clone()), (1, 2));
        assert_eq!(hub.count("alert"), 2);

        assert_eq!(hub.unsubscribe("alert", "a"), (2, 1));
        assert_eq!(hub.unsubscribe("alert", "b"), (1, 0));
        assert_eq!(hub.count("alert"), 0);
        assert_eq!(hub.topic_count(), 0);
    }

    #[test]
    fn test_unsubscribe_unknown_topic() {
        let hub = TopicHub::new();
        assert_eq!(hub.unsubscribe("nothing", "a"), (0, 0));
    }

    #[test]
    fn test_publish_skips_excluded_subscriber() {
        let hub = TopicHub::new();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        hub.subscribe("news", "a", tx_a);
        hub.subscribe("news", "b", tx_b);

        let delivered = hub.publish("news", &Message::text("hello"), Some("a"));
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_err());
        match rx_b.try_recv() {
            Ok(Outbound::Message(m)) => assert_eq!(m.as_text(), Some("hello")),
            _ => panic!("expected a queued message"),
        }
    }

    #[test]
    fn test_publish_skips_full_queue() {
        let hub = TopicHub::new();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        hub.subscribe("ticks", "slow", slow_tx);
        hub.subscribe("ticks", "fast", fast_tx);

        assert_eq!(hub.publish("ticks", &Message::text("1"), None), 2);
        assert_eq!(hub.publish("ticks", &Message::text("2"), None), 1);
        assert_eq!(hub.count("ticks"), 2);

        match slow_rx.try_recv() {
            Ok(Outbound::Message(m)) => assert_eq!(m.as_text(), Some("1")),
            _ => panic!("expected the first message"),
        }
        assert!(slow_rx.try_recv().is_err());
        assert!(fast_rx.try_recv().is_ok());
        assert!(fast_rx.try_recv().is_ok());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = TopicHub::new();
        assert_eq!(hub.publish("empty", &Message::text("x"), None), 0);
    }
}
