//! Common test helpers and utilities for Basalt tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps)
//! - A test server with RAII cleanup and a thin WebSocket test client
//! - In-memory doubles of the transport seam (`MockRequest`, `MockResponse`, `MockSocket`)
//! - An ordered event log for verifying hook order

use basalt_socket::{ListenOptions, SocketServer};
use basalt_transport::{
    close_code, CorkFn, Message, Socket, UpgradeRequest, UpgradeResponse, UserData,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{
    self, client::IntoClientRequest, http::HeaderValue, Message as WsMessage,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicU32, target: u32, max_wait: Duration) -> bool {
    wait_for(
        || async { counter.load(Ordering::SeqCst) >= target },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

// ============================================================================
// Event Log - ordered record shared by hooks
// ============================================================================

#[derive(Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<String>>>,
    count: Arc<AtomicU32>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.lock().iter().any(|e| e == entry)
    }

    /// Wait until at least `n` entries were pushed
    pub async fn wait_for_len(&self, n: u32, max_wait: Duration) -> bool {
        wait_for_count(&self.count, n, max_wait).await
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
        self.count.store(0, Ordering::SeqCst);
    }
}

// ============================================================================
// Test Server - RAII wrapper with proper cleanup
// ============================================================================

/// A listening server that stops on drop
pub struct TestServer {
    server: SocketServer,
    port: u16,
}

impl TestServer {
    /// Listen on an ephemeral loopback port
    pub async fn start(server: SocketServer) -> Self {
        let port = server
            .listen(ListenOptions::new("127.0.0.1", 0))
            .await
            .expect("test server failed to listen");

        let _ = wait_for(
            || async move {
                TcpStream::connect(format!("127.0.0.1:{}", port))
                    .await
                    .is_ok()
            },
            DEFAULT_CHECK_INTERVAL,
            Duration::from_secs(5),
        )
        .await;

        Self { server, port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// WebSocket URL for `path`
    pub fn url(&self, path: &str) -> String {
        format!("ws://127.0.0.1:{}{}", self.port, path)
    }

    pub async fn connect(&self, path: &str) -> Result<TestClient, tungstenite::Error> {
        TestClient::connect(&self.url(path)).await
    }
}

impl Deref for TestServer {
    type Target = SocketServer;

    fn deref(&self) -> &SocketServer {
        &self.server
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.server.stop();
    }
}

// ============================================================================
// Test Client
// ============================================================================

/// Minimal WebSocket client for driving a server from tests
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    protocol: Option<String>,
}

impl TestClient {
    pub async fn connect(url: &str) -> Result<Self, tungstenite::Error> {
        Self::connect_with_headers(url, &[]).await
    }

    /// Connect with extra request headers (origin, subprotocol offer, ...)
    pub async fn connect_with_headers(
        url: &str,
        headers: &[(&'static str, &str)],
    ) -> Result<Self, tungstenite::Error> {
        let mut request = url.into_client_request()?;
        for (name, value) in headers {
            let value = HeaderValue::from_str(value).map_err(|e| {
                tungstenite::Error::HttpFormat(tungstenite::http::Error::from(e))
            })?;
            request.headers_mut().insert(*name, value);
        }

        let (ws, response) = tokio_tungstenite::connect_async(request).await?;
        let protocol = response
            .headers()
            .get("sec-websocket-protocol")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(Self { ws, protocol })
    }

    /// Subprotocol selected by the server, if any
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub async fn send_text(&mut self, text: &str) -> Result<(), tungstenite::Error> {
        self.ws.send(WsMessage::Text(text.to_string())).await
    }

    pub async fn send_binary(&mut self, data: Vec<u8>) -> Result<(), tungstenite::Error> {
        self.ws.send(WsMessage::Binary(data)).await
    }

    /// Next text frame, skipping control frames
    pub async fn recv_text(&mut self, max_wait: Duration) -> Option<String> {
        let deadline = Instant::now() + max_wait;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match timeout(remaining, self.ws.next()).await {
                Ok(Some(Ok(WsMessage::Text(text)))) => return Some(text),
                Ok(Some(Ok(WsMessage::Ping(_)))) | Ok(Some(Ok(WsMessage::Pong(_)))) => continue,
                _ => return None,
            }
        }
    }

    /// Wait for the server's close frame and return its code
    pub async fn recv_close(&mut self, max_wait: Duration) -> Option<u16> {
        let deadline = Instant::now() + max_wait;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match timeout(remaining, self.ws.next()).await {
                Ok(Some(Ok(WsMessage::Close(frame)))) => {
                    return Some(frame.map(|f| u16::from(f.code)).unwrap_or(1005))
                }
                Ok(Some(Ok(_))) => continue,
                _ => return None,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

// ============================================================================
// Transport Doubles
// ============================================================================

/// Upgrade request with fixed headers
#[derive(Debug, Clone, Default)]
pub struct MockRequest {
    path: String,
    headers: Vec<(String, String)>,
    remote_addr: Option<SocketAddr>,
}

impl MockRequest {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let name = name.to_ascii_lowercase();
        self.headers.retain(|(n, _)| *n != name);
        self.headers.push((name, value.to_string()));
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

impl UpgradeRequest for MockRequest {
    fn path(&self) -> &str {
        &self.path
    }

    fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

/// What a [`MockResponse`] was told to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    Pending,
    Upgraded {
        user_data: UserData,
        protocol: Option<String>,
        key: String,
    },
    Rejected {
        status: u16,
        headers: Vec<(String, String)>,
    },
    Closed,
}

/// Pending response that records the first terminal call.
///
/// A deferred response queues `cork` sections until [`MockResponse::run_corked`],
/// which lets tests race the deadline timer and abort callbacks against
/// the upgrade.
pub struct MockResponse {
    deferred: bool,
    outcome: Mutex<ResponseOutcome>,
    corked: Mutex<Vec<CorkFn>>,
    aborted: Mutex<(bool, Vec<Box<dyn FnOnce() + Send>>)>,
}

impl MockResponse {
    /// Runs cork sections immediately
    pub fn new() -> Arc<Self> {
        Self::build(false)
    }

    /// Queues cork sections until [`MockResponse::run_corked`]
    pub fn deferred() -> Arc<Self> {
        Self::build(true)
    }

    fn build(deferred: bool) -> Arc<Self> {
        Arc::new(Self {
            deferred,
            outcome: Mutex::new(ResponseOutcome::Pending),
            corked: Mutex::new(Vec::new()),
            aborted: Mutex::new((false, Vec::new())),
        })
    }

    pub fn outcome(&self) -> ResponseOutcome {
        self.outcome.lock().clone()
    }

    /// Run every queued cork section
    pub fn run_corked(&self) {
        let queued: Vec<CorkFn> = std::mem::take(&mut *self.corked.lock());
        for f in queued {
            f(self);
        }
    }

    /// Simulate the peer going away
    pub fn abort(&self) {
        let callbacks = {
            let mut aborted = self.aborted.lock();
            aborted.0 = true;
            std::mem::take(&mut aborted.1)
        };
        for callback in callbacks {
            callback();
        }
    }

    fn settle(&self, outcome: ResponseOutcome) {
        let mut current = self.outcome.lock();
        if *current == ResponseOutcome::Pending {
            *current = outcome;
        }
    }
}

impl UpgradeResponse for MockResponse {
    fn cork(&self, f: CorkFn) {
        if self.deferred {
            self.corked.lock().push(f);
        } else {
            f(self);
        }
    }

    fn on_aborted(&self, f: Box<dyn FnOnce() + Send>) {
        let mut aborted = self.aborted.lock();
        if aborted.0 {
            drop(aborted);
            f();
        } else {
            aborted.1.push(f);
        }
    }

    fn reject(&self, status: u16, _reason: &str, headers: &[(&str, &str)]) {
        self.settle(ResponseOutcome::Rejected {
            status,
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
        });
    }

    fn upgrade(&self, user_data: UserData, key: &str, protocol: Option<&str>, _extensions: &str) {
        self.settle(ResponseOutcome::Upgraded {
            user_data,
            protocol: protocol.map(str::to_string),
            key: key.to_string(),
        });
    }

    fn close(&self) {
        self.settle(ResponseOutcome::Closed);
    }
}

/// Connection double recording what hooks do with it
#[derive(Default)]
pub struct MockSocket {
    id: String,
    user_data: UserData,
    sent: Mutex<Vec<Message>>,
    topics: Mutex<BTreeSet<String>>,
    ended: Mutex<Option<(u16, String)>>,
}

impl MockSocket {
    pub fn new() -> Self {
        Self::with_user_data("mock", UserData::new())
    }

    pub fn with_user_data(id: &str, user_data: UserData) -> Self {
        Self {
            id: id.to_string(),
            user_data,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    /// Close code and reason, once ended or closed
    pub fn ended(&self) -> Option<(u16, String)> {
        self.ended.lock().clone()
    }
}

impl Socket for MockSocket {
    fn id(&self) -> &str {
        &self.id
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn user_data(&self) -> &UserData {
        &self.user_data
    }

    fn send(&self, message: Message) -> basalt_transport::Result<()> {
        self.sent.lock().push(message);
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> bool {
        self.topics.lock().insert(topic.to_string())
    }

    fn unsubscribe(&self, topic: &str) -> bool {
        self.topics.lock().remove(topic)
    }

    fn is_subscribed(&self, topic: &str) -> bool {
        self.topics.lock().contains(topic)
    }

    fn topics(&self) -> Vec<String> {
        self.topics.lock().iter().cloned().collect()
    }

    fn publish(&self, _topic: &str, _message: Message) -> usize {
        0
    }

    fn end(&self, code: u16, reason: &str) {
        self.ended.lock().get_or_insert((code, reason.to_string()));
    }

    fn close(&self) {
        self.ended.lock().get_or_insert((close_code::ABNORMAL, String::new()));
    }
}
