//! WebSocket transport implementation
//!
//! `WebSocketApp` binds a TCP listener, performs the upgrade with
//! tokio-tungstenite and drives one reader loop plus one writer task per
//! connection. Routes are matched on the exact request path.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tokio_tungstenite::{
    tungstenite::{
        handshake::server::{ErrorResponse, Request as HsRequest, Response as HsResponse},
        http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderValue, Response, StatusCode},
        protocol::{
            frame::coding::CloseCode, CloseFrame, Message as WsMessage,
            WebSocketConfig as FrameConfig,
        },
        Error as WsError,
    },
    WebSocketStream,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Result, TransportError};
use crate::hub::TopicHub;
use crate::traits::{
    CorkFn, RouteBehavior, Socket, SocketApp, SocketHandler, UpgradeRequest, UpgradeResponse,
};
use crate::types::{close_code, ListenSocket, Message, UserData};

/// How long a closing connection's writer may take to flush
const WRITER_GRACE: Duration = Duration::from_secs(5);

/// WebSocket configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Upper bound for a whole handshake, from TCP accept (0 = unbounded)
    pub handshake_timeout_ms: u64,
    /// Outbound messages queued per connection before sends and publishes
    /// to it are dropped
    pub max_queued_messages: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 10_000,
            max_queued_messages: 1024,
        }
    }
}

/// Work queued for a connection's writer task
pub(crate) enum Outbound {
    Message(Message),
    Close(Option<CloseFrame<'static>>),
    Terminate,
}

/// WebSocket application
pub struct WebSocketApp {
    inner: Arc<AppInner>,
}

struct AppInner {
    config: WebSocketConfig,
    routes: RwLock<HashMap<String, RouteBehavior>>,
    hub: TopicHub,
}

impl WebSocketApp {
    pub fn new() -> Self {
        Self::with_config(WebSocketConfig::default())
    }

    pub fn with_config(config: WebSocketConfig) -> Self {
        Self {
            inner: Arc::new(AppInner {
                config,
                routes: RwLock::new(HashMap::new()),
                hub: TopicHub::new(),
            }),
        }
    }

    /// Number of topics with at least one subscriber
    pub fn topic_count(&self) -> usize {
        self.inner.hub.topic_count()
    }
}

impl AppInner {
    /// Frame limits for tungstenite, sized to the most permissive route so
    /// oversized frames are refused before they are buffered
    fn frame_config(&self) -> Option<FrameConfig> {
        let limit = self
            .routes
            .read()
            .values()
            .map(|route| route.max_payload_length)
            .max()?;
        let mut config = FrameConfig::default();
        config.max_message_size = Some(limit);
        config.max_frame_size = Some(limit);
        Some(config)
    }
}

impl Default for WebSocketApp {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SocketApp for WebSocketApp {
    fn ws(&self, pattern: &str, behavior: RouteBehavior) {
        debug!("Registering WebSocket route {}", pattern);
        self.inner.routes.write().insert(pattern.to_string(), behavior);
    }

    async fn listen(&self, addr: &str) -> Result<ListenSocket> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let (socket, mut shutdown) = ListenSocket::new(local_addr);

        info!("WebSocket server listening on {}", local_addr);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!("Accepted TCP connection from {}", peer);
                            let inner = Arc::clone(&inner);
                            tokio::spawn(async move {
                                inner.handle_stream(stream, peer).await;
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
            info!("Listener on {} closed", local_addr);
        });

        Ok(socket)
    }

    fn publish(&self, topic: &str, message: Message) -> usize {
        self.inner.hub.publish(topic, &message, None)
    }

    fn num_subscribers(&self, topic: &str) -> usize {
        self.inner.hub.count(topic)
    }
}

impl AppInner {
    async fn handle_stream(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let pending = Arc::new(PendingUpgrade::new());
        let accepted: Arc<Mutex<Option<(RouteBehavior, UserData)>>> = Arc::new(Mutex::new(None));

        let callback = {
            let inner = Arc::clone(&self);
            let pending = Arc::clone(&pending);
            let accepted = Arc::clone(&accepted);
            move |req: &HsRequest,
                  mut response: HsResponse|
                  -> std::result::Result<HsResponse, ErrorResponse> {
                let route = inner.routes.read().get(req.uri().path()).cloned();
                let Some(route) = route else {
                    debug!("No route for {} from {}", req.uri().path(), peer);
                    return Err(error_response(404, &[]));
                };

                let request = HandshakeView {
                    request: req,
                    remote_addr: Some(peer),
                };
                route
                    .handler
                    .upgrade(&request, Arc::clone(&pending) as Arc<dyn UpgradeResponse>);

                match pending.take_decision() {
                    Decision::Upgrade { user_data, protocol } => {
                        if let Some(value) = protocol
                            .as_deref()
                            .and_then(first_protocol)
                            .and_then(|p| HeaderValue::from_str(p).ok())
                        {
                            response.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
                        }
                        *accepted.lock() = Some((route, user_data));
                        Ok(response)
                    }
                    Decision::Reject(error) => Err(error),
                    // The attempt was dropped before completing; tungstenite
                    // cannot leave a request unanswered.
                    Decision::Pending | Decision::Closed => Err(error_response(503, &[])),
                }
            }
        };

        let handshake =
            tokio_tungstenite::accept_hdr_async_with_config(stream, callback, self.frame_config());
        let result = if self.config.handshake_timeout_ms == 0 {
            Ok(handshake.await)
        } else {
            tokio::time::timeout(
                Duration::from_millis(self.config.handshake_timeout_ms),
                handshake,
            )
            .await
        };

        let ws_stream = match result {
            Ok(Ok(ws_stream)) => ws_stream,
            Ok(Err(e)) => {
                debug!("Handshake with {} did not complete: {}", peer, e);
                pending.abort();
                return;
            }
            Err(_) => {
                warn!("Handshake with {} timed out", peer);
                pending.abort();
                return;
            }
        };

        let Some((route, user_data)) = accepted.lock().take() else {
            return;
        };

        self.run_connection(ws_stream, peer, route, user_data).await;
    }

    async fn run_connection(
        self: Arc<Self>,
        ws_stream: WebSocketStream<TcpStream>,
        peer: SocketAddr,
        route: RouteBehavior,
        user_data: UserData,
    ) {
        let (write, mut read) = ws_stream.split();
        let (tx, rx) = mpsc::channel::<Outbound>(self.config.max_queued_messages.max(1));

        let conn = Connection {
            id: Uuid::new_v4().to_string(),
            remote_addr: Some(peer),
            user_data,
            outbound: tx,
            topics: Mutex::new(HashSet::new()),
            closing: Mutex::new(None),
            shutdown: Notify::new(),
            app: Arc::clone(&self),
            handler: Arc::clone(&route.handler),
        };

        let mut writer = tokio::spawn(write_loop(write, rx));

        info!("WebSocket client {} connected from {}", conn.id, peer);
        route.handler.open(&conn);

        let idle = Duration::from_secs(route.idle_timeout);
        let lifetime =
            tokio::time::sleep(Duration::from_secs(route.max_lifetime.saturating_mul(60)));
        tokio::pin!(lifetime);

        let mut close_info: (u16, Bytes) = (close_code::ABNORMAL, Bytes::new());

        loop {
            let next = async {
                if idle.is_zero() {
                    Ok(read.next().await)
                } else {
                    tokio::time::timeout(idle, read.next()).await
                }
            };

            tokio::select! {
                biased;

                _ = conn.shutdown.notified() => {
                    if let Some(info) = conn.closing.lock().take() {
                        close_info = info;
                    }
                    break;
                }
                _ = &mut lifetime, if route.max_lifetime > 0 => {
                    debug!("Connection {} reached its maximum lifetime", conn.id);
                    conn.end(close_code::GOING_AWAY, "Maximum lifetime reached");
                }
                frame = next => match frame {
                    Err(_) => {
                        debug!("Connection {} idle for {:?}, dropping", conn.id, idle);
                        conn.close();
                    }
                    Ok(Some(Ok(WsMessage::Text(text)))) => {
                        conn.dispatch(Message::text(text), route.max_payload_length);
                    }
                    Ok(Some(Ok(WsMessage::Binary(data)))) => {
                        conn.dispatch(Message::binary(data), route.max_payload_length);
                    }
                    Ok(Some(Ok(WsMessage::Close(frame)))) => {
                        close_info = match frame {
                            Some(frame) => (
                                u16::from(frame.code),
                                Bytes::from(frame.reason.into_owned()),
                            ),
                            None => (close_code::NORMAL, Bytes::new()),
                        };
                        let _ = conn.outbound.try_send(Outbound::Close(None));
                        break;
                    }
                    // Ping/pong are answered by tungstenite
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(WsError::Capacity(e)))) => {
                        warn!("Connection {} exceeded the frame limit: {}", conn.id, e);
                        conn.end(close_code::MESSAGE_TOO_BIG, "Message too big");
                    }
                    Ok(Some(Err(e))) => {
                        debug!("WebSocket read error from {}: {}", peer, e);
                        let _ = conn.outbound.try_send(Outbound::Terminate);
                        break;
                    }
                    Ok(None) => {
                        let _ = conn.outbound.try_send(Outbound::Terminate);
                        break;
                    }
                }
            }
        }

        // Leave every topic first so subscription events precede the close event
        let topics: Vec<String> = conn.topics.lock().drain().collect();
        for topic in topics {
            let (old, new) = self.hub.unsubscribe(&topic, &conn.id);
            conn.handler.subscription(&conn, &topic, new, old);
        }

        info!(
            "WebSocket client {} disconnected (code {})",
            conn.id, close_info.0
        );
        route.handler.close(&conn, close_info.0, &close_info.1);

        drop(conn);
        // A peer that stopped reading can hold the writer forever
        if tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
            debug!("Writer for {} did not drain, dropping it", peer);
            writer.abort();
        }
    }
}

async fn write_loop<S>(mut write: S, mut rx: mpsc::Receiver<Outbound>)
where
    S: futures_util::Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(out) = rx.recv().await {
        match out {
            Outbound::Message(message) => {
                if let Err(e) = write.send(to_ws_message(message)).await {
                    error!("WebSocket write error: {}", e);
                    break;
                }
            }
            Outbound::Close(frame) => {
                let _ = write.send(WsMessage::Close(frame)).await;
                let _ = write.flush().await;
                break;
            }
            Outbound::Terminate => break,
        }
    }
}

fn to_ws_message(message: Message) -> WsMessage {
    if message.binary {
        WsMessage::Binary(message.data.to_vec())
    } else {
        match String::from_utf8(message.data.to_vec()) {
            Ok(text) => WsMessage::Text(text),
            Err(e) => WsMessage::Text(String::from_utf8_lossy(e.as_bytes()).into_owned()),
        }
    }
}

/// First entry of a comma-separated subprotocol offer
fn first_protocol(offer: &str) -> Option<&str> {
    offer.split(',').map(str::trim).find(|p| !p.is_empty())
}

fn error_response(status: u16, headers: &[(&str, &str)]) -> ErrorResponse {
    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(None).unwrap_or_else(|e| {
        error!("Invalid error response: {}", e);
        let mut response = Response::new(None);
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
    })
}

/// Borrowed view over the request tungstenite parsed
struct HandshakeView<'a> {
    request: &'a HsRequest,
    remote_addr: Option<SocketAddr>,
}

impl UpgradeRequest for HandshakeView<'_> {
    fn path(&self) -> &str {
        self.request.uri().path()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.request
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

enum Decision {
    Pending,
    Upgrade {
        user_data: UserData,
        protocol: Option<String>,
    },
    Reject(ErrorResponse),
    Closed,
}

#[derive(Default)]
struct AbortState {
    fired: bool,
    callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

/// Pending response for one upgrade attempt
struct PendingUpgrade {
    write: Mutex<()>,
    decision: Mutex<Decision>,
    aborted: Mutex<AbortState>,
}

impl PendingUpgrade {
    fn new() -> Self {
        Self {
            write: Mutex::new(()),
            decision: Mutex::new(Decision::Pending),
            aborted: Mutex::new(AbortState::default()),
        }
    }

    fn decide(&self, decision: Decision) {
        let mut current = self.decision.lock();
        if matches!(*current, Decision::Pending) {
            *current = decision;
        }
    }

    fn take_decision(&self) -> Decision {
        std::mem::replace(&mut *self.decision.lock(), Decision::Closed)
    }

    /// Fire every abort callback registered so far (and any registered later)
    fn abort(&self) {
        let callbacks = {
            let mut state = self.aborted.lock();
            state.fired = true;
            std::mem::take(&mut state.callbacks)
        };
        for callback in callbacks {
            callback();
        }
    }
}

impl UpgradeResponse for PendingUpgrade {
    fn cork(&self, f: CorkFn) {
        let _guard = self.write.lock();
        f(self);
    }

    fn on_aborted(&self, f: Box<dyn FnOnce() + Send>) {
        let mut state = self.aborted.lock();
        if state.fired {
            drop(state);
            f();
        } else {
            state.callbacks.push(f);
        }
    }

    fn reject(&self, status: u16, reason: &str, headers: &[(&str, &str)]) {
        debug!("Rejecting upgrade with {} {}", status, reason);
        self.decide(Decision::Reject(error_response(status, headers)));
    }

    fn upgrade(&self, user_data: UserData, _key: &str, protocol: Option<&str>, _extensions: &str) {
        // tungstenite derives the accept key from the request and negotiates no extensions
        self.decide(Decision::Upgrade {
            user_data,
            protocol: protocol.map(str::to_string),
        });
    }

    fn close(&self) {
        self.decide(Decision::Closed);
    }
}

/// An established WebSocket connection
struct Connection {
    id: String,
    remote_addr: Option<SocketAddr>,
    user_data: UserData,
    outbound: mpsc::Sender<Outbound>,
    topics: Mutex<HashSet<String>>,
    /// Close code and reason reported once the reader loop stops
    closing: Mutex<Option<(u16, Bytes)>>,
    shutdown: Notify,
    app: Arc<AppInner>,
    handler: Arc<dyn SocketHandler>,
}

impl Connection {
    fn dispatch(&self, message: Message, max_payload_length: usize) {
        if message.len() > max_payload_length {
            warn!(
                "Connection {} sent {} bytes (limit {}), closing",
                self.id,
                message.len(),
                max_payload_length
            );
            self.end(close_code::MESSAGE_TOO_BIG, "Message too big");
            return;
        }
        self.handler.message(self, &message);
    }

    fn begin_close(&self, code: u16, reason: &str, out: Outbound) {
        {
            let mut closing = self.closing.lock();
            if closing.is_some() {
                return;
            }
            *closing = Some((code, Bytes::from(reason.to_string())));
        }
        // With a full queue the frame is lost and the writer is dropped on exit
        let _ = self.outbound.try_send(out);
        self.shutdown.notify_one();
    }
}

impl Socket for Connection {
    fn id(&self) -> &str {
        &self.id
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn user_data(&self) -> &UserData {
        &self.user_data
    }

    fn send(&self, message: Message) -> Result<()> {
        self.outbound
            .try_send(Outbound::Message(message))
            .map_err(|e| match e {
                TrySendError::Full(_) => TransportError::Backpressure,
                TrySendError::Closed(_) => TransportError::NotConnected,
            })
    }

    fn subscribe(&self, topic: &str) -> bool {
        if !self.topics.lock().insert(topic.to_string()) {
            return false;
        }
        let (old, new) = self.app.hub.subscribe(topic, &self.id, self.outbound.clone());
        self.handler.subscription(self, topic, new, old);
        true
    }

    fn unsubscribe(&self, topic: &str) -> bool {
        if !self.topics.lock().remove(topic) {
            return false;
        }
        let (old, new) = self.app.hub.unsubscribe(topic, &self.id);
        self.handler.subscription(self, topic, new, old);
        true
    }

    fn is_subscribed(&self, topic: &str) -> bool {
        self.topics.lock().contains(topic)
    }

    fn topics(&self) -> Vec<String> {
        self.topics.lock().iter().cloned().collect()
    }

    fn publish(&self, topic: &str, message: Message) -> usize {
        self.app.hub.publish(topic, &message, Some(&self.id))
    }

    fn end(&self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.begin_close(code, reason, Outbound::Close(Some(frame)));
    }

    fn close(&self) {
        self.begin_close(close_code::ABNORMAL, "", Outbound::Terminate);
    }
}
