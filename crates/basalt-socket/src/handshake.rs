//! Upgrade handshake mediation
//!
//! Every upgrade attempt gets a [`Handshake`] state machine:
//!
//! ```text
//! PENDING ─┬─> UPGRADED
//!          ├─> REJECTED   (origin not allowed)
//!          ├─> TIMED_OUT  (deadline fired first; pending response closed)
//!          └─> ABORTED    (peer went away first)
//! ```
//!
//! All four outcomes are terminal and only the first transition out of
//! `PENDING` takes effect, so a timed out or aborted attempt never reaches
//! the upgrade hooks.

use basalt_transport::{UpgradeRequest, UpgradeResponse, UserData};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::behavior::UpgradeHook;

/// Diagnostic header attached to rejected upgrades
pub const ERROR_HEADER: &str = "Basalt-Socket-Error";

/// Diagnostic for an origin outside the allow-list
pub const ORIGIN_NOT_ALLOWED: &str = "Origin not allowed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Pending,
    Upgraded,
    Rejected,
    TimedOut,
    Aborted,
}

/// State of one upgrade attempt
#[derive(Debug)]
pub struct Handshake {
    state: Mutex<HandshakeState>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Handshake {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HandshakeState::Pending),
            timer: Mutex::new(None),
        })
    }

    pub fn state(&self) -> HandshakeState {
        *self.state.lock()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == HandshakeState::Pending
    }

    /// Whether a deadline timer is still armed
    pub fn has_timer(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Leave `PENDING`. Returns false if another outcome already won.
    fn transition(&self, to: HandshakeState) -> bool {
        let mut state = self.state.lock();
        if *state != HandshakeState::Pending {
            return false;
        }
        *state = to;
        true
    }

    fn arm_timer(&self, handle: JoinHandle<()>) {
        if self.is_pending() {
            *self.timer.lock() = Some(handle);
        } else {
            handle.abort();
        }
    }

    fn cancel_timer(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }
}

/// Headers of an upgrade request, captured for the upgrade hooks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub path: String,
    /// `sec-websocket-key`
    pub key: String,
    /// `sec-websocket-protocol`, as offered by the client
    pub protocol: Option<String>,
    /// `sec-websocket-extensions`
    pub extensions: String,
    /// `origin`, else `sec-websocket-origin`
    pub origin: Option<String>,
    pub remote_addr: Option<SocketAddr>,
}

impl HandshakeRequest {
    pub fn read(request: &dyn UpgradeRequest) -> Self {
        Self {
            path: request.path().to_string(),
            key: request
                .header("sec-websocket-key")
                .unwrap_or_default()
                .to_string(),
            protocol: request.header("sec-websocket-protocol").map(str::to_string),
            extensions: request
                .header("sec-websocket-extensions")
                .unwrap_or_default()
                .to_string(),
            origin: request
                .header("origin")
                .or_else(|| request.header("sec-websocket-origin"))
                .map(str::to_string),
            remote_addr: request.remote_addr(),
        }
    }
}

/// Applies origin policy, the handshake deadline and the upgrade hooks
/// for one route
pub struct HandshakeMediator {
    global_hook: Option<UpgradeHook>,
    route_hook: Option<UpgradeHook>,
    origins: Arc<Vec<String>>,
    /// Route or server protocol; the client's offer is used when unset
    protocol: Option<String>,
    /// 0 disables the deadline
    timeout_ms: u64,
}

impl HandshakeMediator {
    pub fn new(
        global_hook: Option<UpgradeHook>,
        route_hook: Option<UpgradeHook>,
        origins: Arc<Vec<String>>,
        protocol: Option<String>,
        timeout_ms: u64,
    ) -> Self {
        Self {
            global_hook,
            route_hook,
            origins,
            protocol,
            timeout_ms,
        }
    }

    fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.origins.is_empty() {
            return true;
        }
        origin.map_or(false, |o| self.origins.iter().any(|allowed| allowed == o))
    }

    /// Drive one upgrade attempt. Must be called from within a tokio runtime.
    pub fn handle(
        &self,
        request: &dyn UpgradeRequest,
        response: Arc<dyn UpgradeResponse>,
    ) -> Arc<Handshake> {
        let handshake = Handshake::new();
        let request = HandshakeRequest::read(request);

        if !self.origin_allowed(request.origin.as_deref()) {
            warn!(
                "Rejecting upgrade on {} from origin {:?}",
                request.path, request.origin
            );
            handshake.transition(HandshakeState::Rejected);
            response.cork(Box::new(|res: &dyn UpgradeResponse| {
                res.reject(401, "Unauthorized", &[(ERROR_HEADER, ORIGIN_NOT_ALLOWED)]);
            }));
            return handshake;
        }

        if self.timeout_ms > 0 {
            let deadline = Duration::from_millis(self.timeout_ms);
            let hs = Arc::clone(&handshake);
            let res = Arc::clone(&response);
            let path = request.path.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                if hs.transition(HandshakeState::TimedOut) {
                    warn!("Handshake on {} timed out after {:?}", path, deadline);
                    res.close();
                }
            });
            handshake.arm_timer(timer);
        }

        {
            let hs = Arc::clone(&handshake);
            response.on_aborted(Box::new(move || {
                if hs.transition(HandshakeState::Aborted) {
                    debug!("Handshake aborted by peer");
                    hs.cancel_timer();
                }
            }));
        }

        let hs = Arc::clone(&handshake);
        let global_hook = self.global_hook.clone();
        let route_hook = self.route_hook.clone();
        let protocol = self.protocol.clone();
        response.cork(Box::new(move |res: &dyn UpgradeResponse| {
            if !hs.transition(HandshakeState::Upgraded) {
                return;
            }

            let base = global_hook.and_then(|hook| hook(&request));
            let extra = route_hook.and_then(|hook| hook(&request));
            let user_data = merge_user_data(base, extra);

            let protocol = protocol.or_else(|| request.protocol.clone());
            res.upgrade(
                user_data,
                &request.key,
                protocol.as_deref(),
                &request.extensions,
            );
            hs.cancel_timer();
            debug!("Upgraded connection on {}", request.path);
        }));

        handshake
    }
}

/// Merge the user data of both hook layers; the route layer wins
pub fn merge_user_data(base: Option<UserData>, extra: Option<UserData>) -> UserData {
    let mut user_data = base.unwrap_or_default();
    if let Some(extra) = extra {
        user_data.merge(extra);
    }
    user_data
}
