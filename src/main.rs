//! pubsub-gateway
//!
//! Exposes subscription management of XMPP publish/subscribe nodes over HTTP.
//!
//! # Architecture Overview
//!
//! ```text
//!     HTTP client                 ┌──────────────────────────────────────────────┐
//!     ──────────────────────────▶ │ http (axum)                                  │
//!     GET/POST /channels/         │   auth → handlers → pubsub::service          │
//!       {owner}/{node}/           │                        │                     │
//!       subscriptions             │                        ▼                     │
//!                                 │   session::manager (one session per JID)     │
//!                                 │                        │                     │
//!                                 │                        ▼                     │
//!                                 │   session::connection + correlator           │
//!                                 │                        │                     │
//!                                 │                        ▼                     │
//!                                 │   xmpp::transport (TCP, SASL, bind)  ────────┼──▶ XMPP server
//!                                 └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use pubsub_gateway::config::{load_config, ConfigWatcher, GatewayConfig};
use pubsub_gateway::http::HttpServer;
use pubsub_gateway::lifecycle::{wait_for_shutdown_signal, Shutdown};
use pubsub_gateway::observability::{logging, metrics};
use pubsub_gateway::xmpp::TcpConnector;

#[derive(Parser)]
#[command(name = "pubsub-gateway", version)]
#[command(about = "HTTP gateway for XMPP pub/sub subscriptions", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long, env = "PUBSUB_GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "pubsub-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        xmpp_server = %config.xmpp.server_address,
        domain = %config.xmpp.domain,
        request_timeout_secs = config.xmpp.request_timeout_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher stops when this handle is dropped.
    let (_watcher, config_updates) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        None => {
            let (_, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        shutdown.trigger();
    });

    let connector = Arc::new(TcpConnector::from_config(&config.xmpp));
    let tls = config.listener.tls.clone();
    let bind_address = config.listener.bind_address.clone();
    let server = HttpServer::new(config, connector);

    match tls {
        Some(tls) => {
            let addr = bind_address.parse()?;
            server
                .run_tls(addr, &tls, config_updates, server_shutdown)
                .await?;
        }
        None => {
            let listener = TcpListener::bind(&bind_address).await?;
            tracing::info!(address = %listener.local_addr()?, "Listening for connections");
            server.run(listener, config_updates, server_shutdown).await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
