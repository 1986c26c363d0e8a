//! Value types shared by the transport and the server core

use bytes::Bytes;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tokio::sync::oneshot;

/// Close codes used by the transport (RFC 6455 section 7.4.1)
pub mod close_code {
    /// Normal closure
    pub const NORMAL: u16 = 1000;
    /// Endpoint is going away (server shutdown, lifetime expired)
    pub const GOING_AWAY: u16 = 1001;
    /// Connection dropped without a close frame
    pub const ABNORMAL: u16 = 1006;
    /// Inbound payload exceeded the route's limit
    pub const MESSAGE_TOO_BIG: u16 = 1009;
}

/// A WebSocket message payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub data: Bytes,
    pub binary: bool,
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            data: Bytes::from(text.into()),
            binary: false,
        }
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            binary: true,
        }
    }

    /// UTF-8 view of the payload, if it is valid UTF-8
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::text(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::text(text)
    }
}

/// Per-connection data produced during the upgrade and attached to the socket.
///
/// An ordered string map. Merging is shallow: entries of the merged-in map
/// replace existing entries with the same key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserData {
    entries: BTreeMap<String, String>,
}

impl UserData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Copy every entry of `other` over `self`
    pub fn merge(&mut self, other: UserData) {
        self.entries.extend(other.entries);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for UserData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Handle to a bound listener.
///
/// Dropping the handle stops the listener as well.
#[derive(Debug)]
pub struct ListenSocket {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ListenSocket {
    /// Create a handle; the accept loop should stop once the returned
    /// receiver resolves (or its sender is dropped).
    pub fn new(local_addr: SocketAddr) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                local_addr,
                shutdown: Some(tx),
            },
            rx,
        )
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting new connections
    pub fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_data_merge_prefers_incoming() {
        let mut base = UserData::new().with("role", "guest").with("lang", "fr");
        base.merge(UserData::new().with("role", "admin"));

        assert_eq!(base.get("role"), Some("admin"));
        assert_eq!(base.get("lang"), Some("fr"));
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn test_message_text() {
        let msg = Message::text("alert");
        assert!(!msg.binary);
        assert_eq!(msg.as_text(), Some("alert"));

        let bin = Message::binary(vec![0xff, 0xfe]);
        assert!(bin.binary);
        assert_eq!(bin.as_text(), None);
        assert_eq!(bin.len(), 2);
    }

    #[tokio::test]
    async fn test_listen_socket_close_signals_shutdown() {
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let (socket, rx) = ListenSocket::new(addr);
        assert_eq!(socket.port(), 4000);
        socket.close();
        assert!(rx.await.is_ok());
    }
}
