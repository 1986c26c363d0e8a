//! Lifecycle hooks and per-route behaviors
//!
//! A [`Behavior`] is the configuration of one route: optional lifecycle
//! hooks, the message pipeline (pre-handlers then handler) and limit
//! overrides. [`Hooks`] holds the server-wide layer, injected when the
//! server is constructed. Every hook is independently optional.

use basalt_transport::{Message, Socket, UserData};
use std::fmt;
use std::sync::Arc;

use crate::handshake::HandshakeRequest;

/// Produces user data for an upgrade. `None` contributes nothing.
pub type UpgradeHook = Arc<dyn Fn(&HandshakeRequest) -> Option<UserData> + Send + Sync>;

/// Fired once a connection is open
pub type ConnectHook = Arc<dyn Fn(&dyn Socket) + Send + Sync>;

/// Fired once a connection is closed, with close code and reason payload
pub type DisconnectHook = Arc<dyn Fn(&dyn Socket, u16, &[u8]) + Send + Sync>;

/// Received hooks, pre-handlers and handlers
pub type MessageHook = Arc<dyn Fn(&dyn Socket, &Message) + Send + Sync>;

/// Fired when a connection joins or leaves a topic, with `(topic, new_count, old_count)`
pub type SubscriptionHook = Arc<dyn Fn(&dyn Socket, &str, usize, usize) + Send + Sync>;

/// One layer of lifecycle hooks
#[derive(Clone, Default)]
pub struct Hooks {
    pub(crate) upgrade: Option<UpgradeHook>,
    pub(crate) connect: Option<ConnectHook>,
    pub(crate) disconnect: Option<DisconnectHook>,
    pub(crate) received: Option<MessageHook>,
    pub(crate) subscription: Option<SubscriptionHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_upgrade<F>(mut self, f: F) -> Self
    where
        F: Fn(&HandshakeRequest) -> Option<UserData> + Send + Sync + 'static,
    {
        self.upgrade = Some(Arc::new(f));
        self
    }

    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn Socket) + Send + Sync + 'static,
    {
        self.connect = Some(Arc::new(f));
        self
    }

    pub fn on_disconnect<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn Socket, u16, &[u8]) + Send + Sync + 'static,
    {
        self.disconnect = Some(Arc::new(f));
        self
    }

    pub fn on_received<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn Socket, &Message) + Send + Sync + 'static,
    {
        self.received = Some(Arc::new(f));
        self
    }

    pub fn on_subscription<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn Socket, &str, usize, usize) + Send + Sync + 'static,
    {
        self.subscription = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("upgrade", &self.upgrade.is_some())
            .field("connect", &self.connect.is_some())
            .field("disconnect", &self.disconnect.is_some())
            .field("received", &self.received.is_some())
            .field("subscription", &self.subscription.is_some())
            .finish()
    }
}

/// Configuration of a single route.
///
/// Overrides left unset inherit the server-wide option, then the built-in
/// fallback (see [`crate::config::Limits`]).
///
/// ```
/// use basalt_socket::Behavior;
/// use basalt_transport::Socket;
///
/// let echo = Behavior::new()
///     .max_payload_length(1024)
///     .handler(|ws, msg| {
///         let _ = ws.send(msg.clone());
///     });
/// ```
#[derive(Clone, Default)]
pub struct Behavior {
    pub(crate) hooks: Hooks,
    pub(crate) pre_handlers: Vec<MessageHook>,
    pub(crate) handler: Option<MessageHook>,
    pub(crate) protocol: Option<String>,
    pub(crate) max_payload_length: Option<usize>,
    pub(crate) idle_timeout: Option<u64>,
    pub(crate) handshake_timeout_ms: Option<u64>,
    pub(crate) max_lifetime: Option<u64>,
}

impl Behavior {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route upgrade hook; its entries win over the server-wide hook's
    pub fn on_upgrade<F>(mut self, f: F) -> Self
    where
        F: Fn(&HandshakeRequest) -> Option<UserData> + Send + Sync + 'static,
    {
        self.hooks = self.hooks.on_upgrade(f);
        self
    }

    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn Socket) + Send + Sync + 'static,
    {
        self.hooks = self.hooks.on_connect(f);
        self
    }

    pub fn on_disconnect<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn Socket, u16, &[u8]) + Send + Sync + 'static,
    {
        self.hooks = self.hooks.on_disconnect(f);
        self
    }

    pub fn on_received<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn Socket, &Message) + Send + Sync + 'static,
    {
        self.hooks = self.hooks.on_received(f);
        self
    }

    pub fn on_subscription<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn Socket, &str, usize, usize) + Send + Sync + 'static,
    {
        self.hooks = self.hooks.on_subscription(f);
        self
    }

    /// Append a pre-handler; pre-handlers run in the order they were added
    pub fn pre_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn Socket, &Message) + Send + Sync + 'static,
    {
        self.pre_handlers.push(Arc::new(f));
        self
    }

    /// Primary message handler, run after every pre-handler
    pub fn handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn Socket, &Message) + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(f));
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Maximum inbound payload in bytes
    pub fn max_payload_length(mut self, bytes: usize) -> Self {
        self.max_payload_length = Some(bytes);
        self
    }

    /// Idle timeout in seconds
    pub fn idle_timeout(mut self, secs: u64) -> Self {
        self.idle_timeout = Some(secs);
        self
    }

    pub fn handshake_timeout_ms(mut self, ms: u64) -> Self {
        self.handshake_timeout_ms = Some(ms);
        self
    }

    /// Maximum connection lifetime in minutes
    pub fn max_lifetime(mut self, minutes: u64) -> Self {
        self.max_lifetime = Some(minutes);
        self
    }

    pub fn pre_handler_count(&self) -> usize {
        self.pre_handlers.len()
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behavior")
            .field("hooks", &self.hooks)
            .field("pre_handlers", &self.pre_handlers.len())
            .field("handler", &self.handler.is_some())
            .field("protocol", &self.protocol)
            .field("max_payload_length", &self.max_payload_length)
            .field("idle_timeout", &self.idle_timeout)
            .field("handshake_timeout_ms", &self.handshake_timeout_ms)
            .field("max_lifetime", &self.max_lifetime)
            .finish()
    }
}
