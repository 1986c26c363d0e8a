//! Basalt Socket Server
//!
//! A multi-route WebSocket server core:
//!
//! - [`Router`]: named behaviors built before mounting
//! - [`SocketServer::mount`]: installs a router's events under a path prefix
//! - Handshake policy: origin allow-list, handshake deadline, upgrade hooks
//! - Lifecycle hooks fired server-wide first, then per route
//! - Topic publish and subscriber counts
//!
//! The transport is pluggable through [`basalt_transport::SocketApp`]; the
//! default is the tokio-tungstenite backed [`WebSocketApp`].

pub mod behavior;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handshake;
pub mod router;
pub mod routes;
pub mod server;
pub mod topics;

pub use behavior::{
    Behavior, ConnectHook, DisconnectHook, Hooks, MessageHook, SubscriptionHook, UpgradeHook,
};
pub use config::{
    Limits, ListenOptions, ServerOptions, DEFAULT_HANDSHAKE_TIMEOUT_MS, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_MAX_LIFETIME, DEFAULT_MAX_PAYLOAD_LENGTH,
};
pub use error::{Result, SocketError};
pub use handshake::{
    Handshake, HandshakeMediator, HandshakeRequest, HandshakeState, ERROR_HEADER,
    ORIGIN_NOT_ALLOWED,
};
pub use router::Router;
pub use routes::RouteTable;
pub use server::SocketServer;
pub use topics::TopicBroadcaster;

pub use basalt_transport::{close_code, Message, Socket, UserData, WebSocketApp};
