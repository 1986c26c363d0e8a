//! Server configuration
//!
//! Server-wide options and their per-route resolution.

use serde::Deserialize;

use crate::behavior::Behavior;

/// Fallback maximum inbound payload (bytes)
pub const DEFAULT_MAX_PAYLOAD_LENGTH: usize = 16 * 1024;

/// Fallback handshake deadline (milliseconds)
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Fallback idle timeout (seconds)
pub const DEFAULT_IDLE_TIMEOUT: u64 = 120;

/// Fallback connection lifetime (minutes, 0 = unlimited)
pub const DEFAULT_MAX_LIFETIME: u64 = 0;

/// Server-wide options. Each field can be overridden per route.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Subprotocol to select when the route sets none
    pub protocol: Option<String>,
    /// Maximum inbound payload (bytes)
    pub max_payload_length: Option<usize>,
    /// Idle timeout (seconds)
    pub idle_timeout: Option<u64>,
    /// Handshake deadline (milliseconds)
    pub handshake_timeout_ms: Option<u64>,
    /// Maximum connection lifetime (minutes)
    pub max_lifetime: Option<u64>,
    /// Allowed origins, exact match. Empty allows every origin.
    pub origins: Vec<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            protocol: None,
            max_payload_length: Some(DEFAULT_MAX_PAYLOAD_LENGTH),
            idle_timeout: None,
            handshake_timeout_ms: Some(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            max_lifetime: None,
            origins: Vec::new(),
        }
    }
}

impl ServerOptions {
    pub fn origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.origins = origins.into_iter().map(Into::into).collect();
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Handshake deadline used when a route sets none
    pub fn handshake_timeout(&self) -> u64 {
        self.handshake_timeout_ms.unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT_MS)
    }
}

/// Effective settings of one route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Route or server protocol; `None` defers to the client's offer
    pub protocol: Option<String>,
    pub max_payload_length: usize,
    pub idle_timeout: u64,
    pub handshake_timeout_ms: u64,
    pub max_lifetime: u64,
}

impl Limits {
    /// Route override, then server option, then fallback
    pub fn resolve(behavior: &Behavior, options: &ServerOptions) -> Self {
        Self {
            protocol: behavior
                .protocol
                .clone()
                .or_else(|| options.protocol.clone()),
            max_payload_length: behavior
                .max_payload_length
                .or(options.max_payload_length)
                .unwrap_or(DEFAULT_MAX_PAYLOAD_LENGTH),
            idle_timeout: behavior
                .idle_timeout
                .or(options.idle_timeout)
                .unwrap_or(DEFAULT_IDLE_TIMEOUT),
            handshake_timeout_ms: behavior
                .handshake_timeout_ms
                .unwrap_or_else(|| options.handshake_timeout()),
            max_lifetime: behavior
                .max_lifetime
                .or(options.max_lifetime)
                .unwrap_or(DEFAULT_MAX_LIFETIME),
        }
    }
}

/// Where to listen
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ListenOptions {
    pub host: String,
    /// 0 requests an ephemeral port
    pub port: u16,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
        }
    }
}

impl ListenOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// All interfaces on `port`
    pub fn port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}
