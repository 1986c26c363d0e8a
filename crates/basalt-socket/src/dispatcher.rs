//! Lifecycle dispatch
//!
//! One [`RouteDispatcher`] is registered with the transport per route. It
//! composes the server-wide hook layer with the route's layer and always
//! fires them server first, then route. Hooks never short-circuit each
//! other and panics are not caught.

use basalt_transport::{Message, Socket, SocketHandler, UpgradeRequest, UpgradeResponse};
use std::sync::Arc;
use tracing::debug;

use crate::behavior::{Behavior, Hooks};
use crate::handshake::HandshakeMediator;

pub struct RouteDispatcher {
    path: String,
    global: Arc<Hooks>,
    behavior: Arc<Behavior>,
    mediator: HandshakeMediator,
}

impl RouteDispatcher {
    pub fn new(
        path: impl Into<String>,
        global: Arc<Hooks>,
        behavior: Arc<Behavior>,
        mediator: HandshakeMediator,
    ) -> Self {
        Self {
            path: path.into(),
            global,
            behavior,
            mediator,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl SocketHandler for RouteDispatcher {
    fn upgrade(&self, request: &dyn UpgradeRequest, response: Arc<dyn UpgradeResponse>) {
        let handshake = self.mediator.handle(request, response);
        debug!("Upgrade on {} -> {:?}", self.path, handshake.state());
    }

    fn open(&self, ws: &dyn Socket) {
        debug!("Connection {} opened on {}", ws.id(), self.path);
        if let Some(hook) = &self.global.connect {
            hook(ws);
        }
        if let Some(hook) = &self.behavior.hooks.connect {
            hook(ws);
        }
    }

    fn message(&self, ws: &dyn Socket, message: &Message) {
        if let Some(hook) = &self.global.received {
            hook(ws, message);
        }
        if let Some(hook) = &self.behavior.hooks.received {
            hook(ws, message);
        }
        for pre_handler in &self.behavior.pre_handlers {
            pre_handler(ws, message);
        }
        if let Some(handler) = &self.behavior.handler {
            handler(ws, message);
        }
    }

    fn close(&self, ws: &dyn Socket, code: u16, reason: &[u8]) {
        debug!("Connection {} closed on {} ({})", ws.id(), self.path, code);
        if let Some(hook) = &self.global.disconnect {
            hook(ws, code, reason);
        }
        if let Some(hook) = &self.behavior.hooks.disconnect {
            hook(ws, code, reason);
        }
    }

    fn subscription(&self, ws: &dyn Socket, topic: &str, new_count: usize, old_count: usize) {
        if let Some(hook) = &self.global.subscription {
            hook(ws, topic, new_count, old_count);
        }
        if let Some(hook) = &self.behavior.hooks.subscription {
            hook(ws, topic, new_count, old_count);
        }
    }
}
