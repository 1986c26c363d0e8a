//! Basalt Transport Layer
//!
//! Transport seam for the Basalt socket server:
//! - [`SocketApp`]: route registry, listener and topic hub
//! - [`SocketHandler`]: per-route callbacks the transport delivers
//! - [`Socket`], [`UpgradeRequest`], [`UpgradeResponse`]: handles passed to those callbacks
//!
//! The `websocket` feature (default) provides [`WebSocketApp`], built on
//! tokio-tungstenite.

pub mod error;
pub mod traits;
pub mod types;

#[cfg(feature = "websocket")]
mod hub;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use error::{Result, TransportError};
pub use traits::{
    CorkFn, RouteBehavior, Socket, SocketApp, SocketHandler, UpgradeRequest, UpgradeResponse,
};
pub use types::{close_code, ListenSocket, Message, UserData};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketApp, WebSocketConfig};
