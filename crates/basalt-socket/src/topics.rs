//! Topic publishing

use basalt_transport::{Message, SocketApp};
use std::sync::Arc;
use tracing::debug;

/// Publish and count by topic, delegating to the transport's hub
pub struct TopicBroadcaster<A: SocketApp> {
    app: Arc<A>,
}

impl<A: SocketApp> Clone for TopicBroadcaster<A> {
    fn clone(&self) -> Self {
        Self {
            app: Arc::clone(&self.app),
        }
    }
}

impl<A: SocketApp> TopicBroadcaster<A> {
    pub fn new(app: Arc<A>) -> Self {
        Self { app }
    }

    /// Fan `message` out to the current subscribers of `topic`.
    /// Best effort; returns how many connections it was queued for.
    pub fn publish(&self, topic: &str, message: impl Into<Message>) -> usize {
        let delivered = self.app.publish(topic, message.into());
        debug!("Published to {} ({} subscribers)", topic, delivered);
        delivered
    }

    /// Live subscriber count
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.app.num_subscribers(topic)
    }
}
