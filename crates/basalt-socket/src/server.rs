//! Socket server facade
//!
//! # Example
//!
//! ```no_run
//! use basalt_socket::{Behavior, ListenOptions, Router, ServerOptions, SocketServer};
//!
//! #[tokio::main]
//! async fn main() -> basalt_socket::Result<()> {
//!     let mut router = Router::new();
//!     router.add("echo", Behavior::new().handler(|ws, msg| {
//!         let _ = ws.send(msg.clone());
//!     }))?;
//!
//!     let server = SocketServer::new(ServerOptions::default());
//!     server.mount("/", &router)?;
//!
//!     let port = server.listen(ListenOptions::port(3000)).await?;
//!     println!("listening on {}", port);
//!     Ok(())
//! }
//! ```

use basalt_transport::{
    ListenSocket, Message, RouteBehavior, SocketApp, TransportError, WebSocketApp,
    WebSocketConfig,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::behavior::{Behavior, Hooks};
use crate::config::{Limits, ListenOptions, ServerOptions};
use crate::dispatcher::RouteDispatcher;
use crate::error::{Result, SocketError};
use crate::handshake::HandshakeMediator;
use crate::router::Router;
use crate::routes::{normalize_prefix, route_path, validate_prefix, RouteTable};
use crate::topics::TopicBroadcaster;

/// Multi-route WebSocket server
pub struct SocketServer<A: SocketApp = WebSocketApp> {
    app: Arc<A>,
    options: ServerOptions,
    origins: Arc<Vec<String>>,
    hooks: Arc<Hooks>,
    routes: RwLock<RouteTable>,
    listener: Mutex<Option<ListenSocket>>,
    topics: TopicBroadcaster<A>,
}

impl SocketServer<WebSocketApp> {
    pub fn new(options: ServerOptions) -> Self {
        Self::with_hooks(options, Hooks::default())
    }

    /// Server with a server-wide hook layer
    pub fn with_hooks(options: ServerOptions, hooks: Hooks) -> Self {
        let app = WebSocketApp::with_config(WebSocketConfig {
            handshake_timeout_ms: options.handshake_timeout(),
            ..WebSocketConfig::default()
        });
        Self::with_app(app, options, hooks)
    }
}

impl<A: SocketApp> SocketServer<A> {
    /// Server on a custom transport
    pub fn with_app(app: A, options: ServerOptions, hooks: Hooks) -> Self {
        let app = Arc::new(app);
        Self {
            topics: TopicBroadcaster::new(Arc::clone(&app)),
            origins: Arc::new(options.origins.clone()),
            app,
            options,
            hooks: Arc::new(hooks),
            routes: RwLock::new(RouteTable::new()),
            listener: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn app(&self) -> &Arc<A> {
        &self.app
    }

    /// Mount every event of `router` under `prefix`
    #[doc(alias = "use")]
    pub fn mount(&self, prefix: &str, router: &Router) -> Result<()> {
        self.mount_all(prefix, [router])
    }

    /// Mount several routers under one prefix.
    ///
    /// The prefix must match `[A-Za-z0-9/_-]*`. Every resulting path is
    /// checked before any is installed, so on error nothing is mounted.
    #[doc(alias = "use")]
    pub fn mount_all<'a, I>(&self, prefix: &str, routers: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Router>,
    {
        validate_prefix(prefix)?;
        let prefix = normalize_prefix(prefix);

        let mut routes = self.routes.write();

        let mut batch: Vec<(String, Arc<Behavior>)> = Vec::new();
        let mut seen = HashSet::new();
        for router in routers {
            for (name, behavior) in router.events() {
                let path = route_path(&prefix, name);
                if routes.contains(&path) {
                    return Err(SocketError::DuplicateRoute(path));
                }
                if !seen.insert(path.clone()) {
                    return Err(SocketError::DuplicateEvent(path));
                }
                batch.push((path, Arc::new(behavior.clone())));
            }
        }

        for (path, behavior) in batch {
            let limits = Limits::resolve(&behavior, &self.options);
            let mediator = HandshakeMediator::new(
                self.hooks.upgrade.clone(),
                behavior.hooks.upgrade.clone(),
                Arc::clone(&self.origins),
                limits.protocol.clone(),
                limits.handshake_timeout_ms,
            );
            let handler = RouteDispatcher::new(
                path.clone(),
                Arc::clone(&self.hooks),
                Arc::clone(&behavior),
                mediator,
            );

            self.app.ws(
                &path,
                RouteBehavior {
                    handler: Arc::new(handler),
                    max_payload_length: limits.max_payload_length,
                    idle_timeout: limits.idle_timeout,
                    max_lifetime: limits.max_lifetime,
                },
            );
            routes.add(path.clone(), behavior)?;
            info!("Mounted route {}", path);
        }

        Ok(())
    }

    /// Installed paths, in mount order
    pub fn routes(&self) -> Vec<String> {
        self.routes.read().keys().map(str::to_string).collect()
    }

    /// Bind and start serving. Returns the bound port.
    pub async fn listen(&self, options: ListenOptions) -> Result<u16> {
        if self.listener.lock().is_some() {
            return Err(SocketError::AlreadyListening);
        }

        if options.port != 0 {
            check_port(&options)?;
        }

        let addr = options.addr();
        let socket = self.app.listen(&addr).await.map_err(|e| match e {
            TransportError::Bind { addr, source } => SocketError::Bind {
                addr,
                reason: source.to_string(),
            },
            other => SocketError::Transport(other),
        })?;

        let port = socket.port();
        let mut listener = self.listener.lock();
        if listener.is_some() {
            drop(listener);
            socket.close();
            return Err(SocketError::AlreadyListening);
        }
        info!("Basalt socket server listening on {}", socket.local_addr());
        *listener = Some(socket);

        Ok(port)
    }

    /// Stop accepting connections. Established connections are kept.
    pub fn stop(&self) -> Result<()> {
        let socket = self
            .listener
            .lock()
            .take()
            .ok_or(SocketError::NotListening)?;
        info!("Basalt socket server on {} stopped", socket.local_addr());
        socket.close();
        Ok(())
    }

    pub fn is_listening(&self) -> bool {
        self.listener.lock().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.lock().as_ref().map(|s| s.local_addr())
    }

    pub fn topics(&self) -> &TopicBroadcaster<A> {
        &self.topics
    }

    /// Publish to every subscriber of `topic`
    pub fn publish(&self, topic: &str, message: impl Into<Message>) -> usize {
        self.topics.publish(topic, message)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.subscriber_count(topic)
    }
}

/// Advisory check that `port` is free. Another process can still take it
/// before the real bind, whose result is authoritative.
fn check_port(options: &ListenOptions) -> Result<()> {
    let addr = options.addr();
    match std::net::TcpListener::bind(&addr) {
        Ok(listener) => {
            drop(listener);
            Ok(())
        }
        Err(e) => {
            debug!("Port check on {} failed: {}", addr, e);
            Err(SocketError::Bind {
                addr,
                reason: format!("port {} is unavailable: {}", options.port, e),
            })
        }
    }
}
