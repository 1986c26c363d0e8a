//! Socket Server Tests
//!
//! End-to-end behavior over real WebSocket connections:
//! - Route mounting and lookup
//! - Origin policy and protocol selection
//! - Hook ordering for every lifecycle event
//! - Topic publish and subscriber counts
//! - Listen/stop lifecycle

use basalt_socket::{
    close_code, Behavior, HandshakeRequest, Hooks, ListenOptions, Router, ServerOptions,
    SocketError, SocketServer, UserData, ERROR_HEADER, ORIGIN_NOT_ALLOWED,
};
use basalt_test_utils::{wait_for, EventLog, TestClient, TestServer, DEFAULT_CHECK_INTERVAL};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite;

const WAIT: Duration = Duration::from_secs(2);

fn router(events: Vec<(&str, Behavior)>) -> Router {
    let mut router = Router::new();
    for (name, behavior) in events {
        router.add(name, behavior).unwrap();
    }
    router
}

async fn wait_until<F: Fn() -> bool>(check: F) -> bool {
    let check = &check;
    wait_for(|| async move { check() }, DEFAULT_CHECK_INTERVAL, WAIT).await
}

// ============================================================================
// Routing
// ============================================================================

/// Routes mounted under two prefixes come out normalized and in order
#[tokio::test]
async fn test_mounted_routes_are_reachable() {
    let server = SocketServer::new(ServerOptions::default());
    server
        .mount("/", &router(vec![("", Behavior::new()), ("root", Behavior::new())]))
        .unwrap();
    server
        .mount(
            "crypto/",
            &router(vec![("btc", Behavior::new()), ("eth", Behavior::new())]),
        )
        .unwrap();

    assert_eq!(
        server.routes(),
        vec!["/", "/root", "/crypto/btc", "/crypto/eth"]
    );

    let server = TestServer::start(server).await;
    for path in ["/", "/root", "/crypto/btc", "/crypto/eth"] {
        let client = server.connect(path).await;
        assert!(client.is_ok(), "connect to {} failed", path);
    }

    match server.connect("/crypto").await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 404),
        other => panic!("expected 404, got ok={}", other.is_ok()),
    }
}

/// A second registration of the same path fails and keeps the first
#[tokio::test]
async fn test_duplicate_route_keeps_first() {
    let log = EventLog::new();
    let server = SocketServer::new(ServerOptions::default());

    let first = Behavior::new().on_connect({
        let log = log.clone();
        move |_| log.push("first")
    });
    let second = Behavior::new().on_connect({
        let log = log.clone();
        move |_| log.push("second")
    });

    server.mount("/", &router(vec![("chat", first)])).unwrap();
    let err = server.mount("", &router(vec![("chat", second)])).unwrap_err();
    assert!(matches!(err, SocketError::DuplicateRoute(ref p) if p == "/chat"));

    let server = TestServer::start(server).await;
    let _client = server.connect("/chat").await.unwrap();
    assert!(log.wait_for_len(1, WAIT).await);
    assert_eq!(log.entries(), vec!["first"]);
}

// ============================================================================
// Handshake Policy
// ============================================================================

/// A disallowed origin gets 401 with the diagnostic header and no hook runs
#[tokio::test]
async fn test_disallowed_origin_rejected() {
    let hook_called = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&hook_called);
    let hooks = Hooks::new().on_upgrade(move |_| {
        flag.store(true, Ordering::SeqCst);
        None
    });

    let server = SocketServer::with_hooks(
        ServerOptions::default().origins(["https://app.example"]),
        hooks,
    );
    server.mount("/", &router(vec![("", Behavior::new())])).unwrap();
    let server = TestServer::start(server).await;

    let result =
        TestClient::connect_with_headers(&server.url("/"), &[("origin", "https://evil.example")])
            .await;
    match result {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 401);
            assert_eq!(
                response.headers().get(ERROR_HEADER).unwrap(),
                ORIGIN_NOT_ALLOWED
            );
        }
        other => panic!("expected 401, got ok={}", other.is_ok()),
    }
    assert!(!hook_called.load(Ordering::SeqCst));

    // Listed origin passes
    let client =
        TestClient::connect_with_headers(&server.url("/"), &[("origin", "https://app.example")])
            .await;
    assert!(client.is_ok());
    assert!(hook_called.load(Ordering::SeqCst));
}

/// Without an allow-list every origin is accepted
#[tokio::test]
async fn test_no_allow_list_accepts_any_origin() {
    let server = SocketServer::new(ServerOptions::default());
    server.mount("/", &router(vec![("", Behavior::new())])).unwrap();
    let server = TestServer::start(server).await;

    for origin in ["https://a.example", "null"] {
        let client =
            TestClient::connect_with_headers(&server.url("/"), &[("origin", origin)]).await;
        assert!(client.is_ok(), "origin {} rejected", origin);
    }
    assert!(server.connect("/").await.is_ok());
}

/// Route protocol wins over the server protocol; with neither the client's offer is echoed
#[tokio::test]
async fn test_protocol_selection() {
    let server = SocketServer::new(ServerOptions::default().protocol("server-proto"));
    server
        .mount(
            "/",
            &router(vec![
                ("route", Behavior::new().protocol("route-proto")),
                ("server", Behavior::new()),
            ]),
        )
        .unwrap();
    let server = TestServer::start(server).await;

    let client = TestClient::connect_with_headers(
        &server.url("/route"),
        &[("sec-websocket-protocol", "route-proto")],
    )
    .await
    .unwrap();
    assert_eq!(client.protocol(), Some("route-proto"));

    let client = TestClient::connect_with_headers(
        &server.url("/server"),
        &[("sec-websocket-protocol", "server-proto")],
    )
    .await
    .unwrap();
    assert_eq!(client.protocol(), Some("server-proto"));

    let plain = SocketServer::new(ServerOptions::default());
    plain.mount("/", &router(vec![("", Behavior::new())])).unwrap();
    let plain = TestServer::start(plain).await;
    let client =
        TestClient::connect_with_headers(&plain.url("/"), &[("sec-websocket-protocol", "json")])
            .await
            .unwrap();
    assert_eq!(client.protocol(), Some("json"));
}

/// User data from both upgrade hooks reaches the connection, route entries winning
#[tokio::test]
async fn test_upgrade_hooks_build_user_data() {
    let log = EventLog::new();
    let hooks = Hooks::new().on_upgrade(|req: &HandshakeRequest| {
        Some(
            UserData::new()
                .with("role", "guest")
                .with("origin", req.origin.clone().unwrap_or_default()),
        )
    });
    let behavior = Behavior::new()
        .on_upgrade(|_| Some(UserData::new().with("role", "member")))
        .on_connect({
            let log = log.clone();
            move |ws| {
                let data = ws.user_data();
                log.push(format!(
                    "{} {}",
                    data.get("role").unwrap_or(""),
                    data.get("origin").unwrap_or("")
                ))
            }
        });

    let server = SocketServer::with_hooks(ServerOptions::default(), hooks);
    server.mount("/", &router(vec![("room", behavior)])).unwrap();
    let server = TestServer::start(server).await;

    let _client =
        TestClient::connect_with_headers(&server.url("/room"), &[("origin", "https://o.example")])
            .await
            .unwrap();
    assert!(log.wait_for_len(1, WAIT).await);
    assert_eq!(log.entries(), vec!["member https://o.example"]);
}

// ============================================================================
// Lifecycle Hooks
// ============================================================================

/// Received hooks, pre-handlers and handler fire in a fixed order
#[tokio::test]
async fn test_message_hook_order() {
    let log = EventLog::new();
    let hooks = Hooks::new().on_received({
        let log = log.clone();
        move |_, _| log.push("server received")
    });
    let behavior = Behavior::new()
        .on_received({
            let log = log.clone();
            move |_, _| log.push("route received")
        })
        .pre_handler({
            let log = log.clone();
            move |_, _| log.push("pre-handler 1")
        })
        .pre_handler({
            let log = log.clone();
            move |_, _| log.push("pre-handler 2")
        })
        .handler({
            let log = log.clone();
            move |ws, msg| {
                log.push(format!("handler {}", msg.as_text().unwrap_or("")));
                let _ = ws.send(msg.clone());
            }
        });

    let server = SocketServer::with_hooks(ServerOptions::default(), hooks);
    server.mount("/", &router(vec![("", behavior)])).unwrap();
    let server = TestServer::start(server).await;

    let mut client = server.connect("/").await.unwrap();
    client.send_text("hello").await.unwrap();
    assert_eq!(client.recv_text(WAIT).await.as_deref(), Some("hello"));

    assert_eq!(
        log.entries(),
        vec![
            "server received",
            "route received",
            "pre-handler 1",
            "pre-handler 2",
            "handler hello",
        ]
    );
}

/// Connect, subscription and disconnect events fire server first, in lifecycle order
#[tokio::test]
async fn test_lifecycle_order() {
    let log = EventLog::new();
    let hooks = Hooks::new()
        .on_connect({
            let log = log.clone();
            move |_| log.push("server connect")
        })
        .on_subscription({
            let log = log.clone();
            move |_, topic, new, old| log.push(format!("server sub {} {} {}", topic, new, old))
        })
        .on_disconnect({
            let log = log.clone();
            move |_, code, _| log.push(format!("server disconnect {}", code))
        });
    let behavior = Behavior::new()
        .on_connect({
            let log = log.clone();
            move |ws| {
                log.push("route connect");
                ws.subscribe("news");
            }
        })
        .on_subscription({
            let log = log.clone();
            move |_, topic, new, old| log.push(format!("route sub {} {} {}", topic, new, old))
        })
        .on_disconnect({
            let log = log.clone();
            move |_, code, _| log.push(format!("route disconnect {}", code))
        });

    let server = SocketServer::with_hooks(ServerOptions::default(), hooks);
    server.mount("/", &router(vec![("feed", behavior)])).unwrap();
    let server = TestServer::start(server).await;

    let client = server.connect("/feed").await.unwrap();
    assert!(wait_until(|| server.subscriber_count("news") == 1).await);
    client.close().await;

    assert!(log.wait_for_len(8, WAIT).await);
    assert_eq!(
        log.entries(),
        vec![
            "server connect".to_string(),
            "route connect".to_string(),
            "server sub news 1 0".to_string(),
            "route sub news 1 0".to_string(),
            "server sub news 0 1".to_string(),
            "route sub news 0 1".to_string(),
            format!("server disconnect {}", close_code::NORMAL),
            format!("route disconnect {}", close_code::NORMAL),
        ]
    );
    assert_eq!(server.subscriber_count("news"), 0);
}

/// Oversized messages close the connection and skip the message pipeline
#[tokio::test]
async fn test_max_payload_length() {
    let log = EventLog::new();
    let behavior = Behavior::new()
        .max_payload_length(16)
        .handler({
            let log = log.clone();
            move |_, _| log.push("handler")
        })
        .on_disconnect({
            let log = log.clone();
            move |_, code, _| log.push(format!("disconnect {}", code))
        });

    let server = SocketServer::new(ServerOptions::default());
    server.mount("/", &router(vec![("small", behavior)])).unwrap();
    let server = TestServer::start(server).await;

    let mut client = server.connect("/small").await.unwrap();
    client.send_text("short").await.unwrap();
    client.send_text(&"x".repeat(64)).await.unwrap();

    assert_eq!(
        client.recv_close(WAIT).await,
        Some(close_code::MESSAGE_TOO_BIG)
    );
    assert!(log.wait_for_len(2, WAIT).await);
    assert_eq!(
        log.entries(),
        vec![
            "handler".to_string(),
            format!("disconnect {}", close_code::MESSAGE_TOO_BIG),
        ]
    );
}

// ============================================================================
// Topics
// ============================================================================

/// A client subscribed on connect receives exactly the published payload
#[tokio::test]
async fn test_publish_alert() {
    let behavior = Behavior::new().on_connect(|ws| {
        ws.subscribe("alert");
    });

    let server = SocketServer::new(ServerOptions::default());
    server.mount("/", &router(vec![("", behavior)])).unwrap();
    let server = TestServer::start(server).await;

    let mut client = server.connect("/").await.unwrap();
    assert!(wait_until(|| server.subscriber_count("alert") == 1).await);

    assert_eq!(server.publish("alert", "alert"), 1);
    assert_eq!(client.recv_text(WAIT).await.as_deref(), Some("alert"));
    assert_eq!(client.recv_text(Duration::from_millis(100)).await, None);
}

/// Publishing with no subscribers is a no-op
#[tokio::test]
async fn test_publish_without_subscribers() {
    let server = SocketServer::new(ServerOptions::default());
    assert_eq!(server.publish("nobody", "hello"), 0);
    assert_eq!(server.subscriber_count("nobody"), 0);
}

/// A connection can publish to a topic without receiving its own message
#[tokio::test]
async fn test_socket_publish_skips_sender() {
    let behavior = Behavior::new()
        .on_connect(|ws| {
            ws.subscribe("room");
        })
        .handler(|ws, msg| {
            ws.publish("room", msg.clone());
        });

    let server = SocketServer::new(ServerOptions::default());
    server.mount("/", &router(vec![("chat", behavior)])).unwrap();
    let server = TestServer::start(server).await;

    let mut alice = server.connect("/chat").await.unwrap();
    let mut bob = server.connect("/chat").await.unwrap();
    assert!(wait_until(|| server.subscriber_count("room") == 2).await);

    alice.send_text("hi bob").await.unwrap();
    assert_eq!(bob.recv_text(WAIT).await.as_deref(), Some("hi bob"));
    assert_eq!(alice.recv_text(Duration::from_millis(100)).await, None);
}

// ============================================================================
// Listen / Stop
// ============================================================================

/// listen and stop report misuse
#[tokio::test]
async fn test_listen_stop_errors() {
    let server = SocketServer::new(ServerOptions::default());
    assert!(matches!(server.stop(), Err(SocketError::NotListening)));

    let port = server
        .listen(ListenOptions::new("127.0.0.1", 0))
        .await
        .unwrap();
    assert_ne!(port, 0);
    assert!(matches!(
        server.listen(ListenOptions::new("127.0.0.1", 0)).await,
        Err(SocketError::AlreadyListening)
    ));

    server.stop().unwrap();
    assert!(matches!(server.stop(), Err(SocketError::NotListening)));
}

/// After stop no new connection is accepted
#[tokio::test]
async fn test_stop_refuses_new_connections() {
    let server = SocketServer::new(ServerOptions::default());
    server.mount("/", &router(vec![("", Behavior::new())])).unwrap();
    let port = server
        .listen(ListenOptions::new("127.0.0.1", 0))
        .await
        .unwrap();
    let url = format!("ws://127.0.0.1:{}/", port);
    assert!(TestClient::connect(&url).await.is_ok());

    server.stop().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(TestClient::connect(&url).await.is_err());
}
