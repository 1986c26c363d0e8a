//! Basalt Socket Server
//!
//! Standalone server with two demo routes:
//! - `{prefix}echo` sends every message back to its sender
//! - `{prefix}broadcast` relays every message to all other connected clients

mod config;

use anyhow::{Context, Result};
use basalt_socket::{Behavior, Hooks, Router, SocketServer, UserData};
use basalt_transport::Socket;
use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::config::FileConfig;

const BROADCAST_TOPIC: &str = "broadcast";

#[derive(Parser)]
#[command(name = "basalt-server")]
#[command(about = "Basalt Socket Server")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen host (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Listen port, 0 for an ephemeral port (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Allowed origin; repeat for several (overrides the config file)
    #[arg(long = "origin")]
    origins: Vec<String>,

    /// Prefix the demo routes are mounted under
    #[arg(long, default_value = "/")]
    prefix: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    if let Some(host) = cli.host {
        config.listen.host = host;
    }
    if let Some(port) = cli.port {
        config.listen.port = port;
    }
    if !cli.origins.is_empty() {
        config.server.origins = cli.origins;
    }

    info!("Starting Basalt socket server");

    let hooks = Hooks::new()
        .on_upgrade(|req| {
            req.remote_addr
                .map(|addr| UserData::new().with("remote", addr.to_string()))
        })
        .on_connect(|ws| debug!("{} connected", ws.id()))
        .on_disconnect(|ws, code, _| debug!("{} disconnected ({})", ws.id(), code));

    let server = SocketServer::with_hooks(config.server, hooks);
    server.mount(&cli.prefix, &demo_router()?)?;

    let port = server.listen(config.listen.clone()).await?;
    info!("Routes: {}", server.routes().join(", "));
    info!("Accepting connections on {}:{}", config.listen.host, port);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;
    info!("Received shutdown signal");
    server.stop()?;

    Ok(())
}

fn demo_router() -> Result<Router> {
    let mut router = Router::new();

    router.add(
        "echo",
        Behavior::new().handler(|ws, msg| {
            let _ = ws.send(msg.clone());
        }),
    )?;

    router.add(
        "broadcast",
        Behavior::new()
            .on_connect(|ws| {
                ws.subscribe(BROADCAST_TOPIC);
            })
            .on_subscription(|_, topic, new_count, _| {
                debug!("{} now has {} subscribers", topic, new_count)
            })
            .handler(|ws: &dyn Socket, msg| {
                let delivered = ws.publish(BROADCAST_TOPIC, msg.clone());
                debug!("{} relayed to {} clients", ws.id(), delivered);
            }),
    )?;

    Ok(router)
}
