//! Transport trait definitions
//!
//! The server core never touches sockets directly. It registers a
//! [`SocketHandler`] per route through [`SocketApp::ws`] and reacts to the
//! callbacks the transport delivers, using the [`Socket`],
//! [`UpgradeRequest`] and [`UpgradeResponse`] handles it is given.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{ListenSocket, Message, UserData};

/// Read access to an inbound HTTP upgrade request
pub trait UpgradeRequest {
    /// Request path, without the query string
    fn path(&self) -> &str;

    /// Header value by case-insensitive name
    fn header(&self, name: &str) -> Option<&str>;

    /// Peer address, when known
    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// Deferred work run inside [`UpgradeResponse::cork`]
pub type CorkFn = Box<dyn FnOnce(&dyn UpgradeResponse) + Send>;

/// A pending upgrade response.
///
/// Writes to one response must be serialized; `upgrade` is only valid from
/// within a `cork` section.
pub trait UpgradeResponse: Send + Sync {
    /// Run `f` inside the exclusive write section for this response
    fn cork(&self, f: CorkFn);

    /// Register a callback fired if the peer goes away before completion.
    /// Fired at most once; fired immediately if the attempt is already aborted.
    fn on_aborted(&self, f: Box<dyn FnOnce() + Send>);

    /// Answer with a bodyless HTTP error response
    fn reject(&self, status: u16, reason: &str, headers: &[(&str, &str)]);

    /// Complete the handshake
    fn upgrade(&self, user_data: UserData, key: &str, protocol: Option<&str>, extensions: &str);

    /// Drop the pending attempt without answering
    fn close(&self);
}

/// An established connection
pub trait Socket: Send + Sync {
    /// Unique connection id
    fn id(&self) -> &str;

    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Data attached during the upgrade
    fn user_data(&self) -> &UserData;

    /// Queue a message for this connection. Fails with `Backpressure` when
    /// the outbound queue is full; the message is dropped.
    fn send(&self, message: Message) -> Result<()>;

    /// Returns false if already subscribed
    fn subscribe(&self, topic: &str) -> bool;

    /// Returns false if not subscribed
    fn unsubscribe(&self, topic: &str) -> bool;

    fn is_subscribed(&self, topic: &str) -> bool;

    fn topics(&self) -> Vec<String>;

    /// Publish to every subscriber of `topic` except this connection.
    /// Returns the number of recipients.
    fn publish(&self, topic: &str, message: Message) -> usize;

    /// Graceful close with a close frame
    fn end(&self, code: u16, reason: &str);

    /// Terminate immediately (reported as abnormal closure)
    fn close(&self);
}

/// Callbacks a transport delivers for one route
pub trait SocketHandler: Send + Sync {
    fn upgrade(&self, request: &dyn UpgradeRequest, response: Arc<dyn UpgradeResponse>);

    fn open(&self, ws: &dyn Socket);

    fn message(&self, ws: &dyn Socket, message: &Message);

    fn close(&self, ws: &dyn Socket, code: u16, reason: &[u8]);

    fn subscription(&self, ws: &dyn Socket, topic: &str, new_count: usize, old_count: usize);
}

/// A route as handed to the transport, with resolved limits
#[derive(Clone)]
pub struct RouteBehavior {
    pub handler: Arc<dyn SocketHandler>,
    /// Maximum inbound payload in bytes
    pub max_payload_length: usize,
    /// Seconds without inbound traffic before the connection is dropped (0 = off)
    pub idle_timeout: u64,
    /// Minutes before the connection is ended (0 = off)
    pub max_lifetime: u64,
}

impl std::fmt::Debug for RouteBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteBehavior")
            .field("max_payload_length", &self.max_payload_length)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_lifetime", &self.max_lifetime)
            .finish()
    }
}

/// A WebSocket application: route registry, listener and topic hub
#[async_trait]
pub trait SocketApp: Send + Sync + 'static {
    /// Register a behavior for an exact upgrade path
    fn ws(&self, pattern: &str, behavior: RouteBehavior);

    /// Bind and start accepting connections
    async fn listen(&self, addr: &str) -> Result<ListenSocket>;

    /// Publish to every subscriber of `topic`. Returns the number of recipients.
    fn publish(&self, topic: &str, message: Message) -> usize;

    /// Live subscriber count for `topic`
    fn num_subscribers(&self, topic: &str) -> usize;
}
