//! WebSocket tunneling gateway
//!
//! Accepts WebSocket upgrades, reads one binary envelope per tunnel, and
//! relays bytes between the caller and the requested destination, falling
//! back to a configured relay when the destination stays silent.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                   TUNNEL GATEWAY                      │
//!                     │                                                       │
//!   WebSocket caller  │  ┌─────────┐   ┌──────────┐   ┌──────────┐            │
//!   ──────────────────┼─▶│  http   │──▶│  tunnel  │──▶│ protocol │            │
//!                     │  │ server  │   │  driver  │   │  header  │            │
//!                     │  └─────────┘   └────┬─────┘   └──────────┘            │
//!                     │                     │                                 │
//!                     │                     ▼                                 │
//!                     │               ┌──────────┐   ┌──────────┐             │
//!                     │               │ routing  │──▶│  relay   │◀────────────┼──── Destination,
//!                     │               │ planner  │   │ session  │             │     then fallback
//!                     │               └──────────┘   └──────────┘             │
//!                     │                                                       │
//!                     │  config · lifecycle · observability · resilience     │
//!                     └──────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use tunnel_gateway::config::load_config;
use tunnel_gateway::lifecycle::signals::spawn_signal_listener;
use tunnel_gateway::net::tls::load_tls_config;
use tunnel_gateway::observability::{logging, metrics};
use tunnel_gateway::{HttpServer, Shutdown};

#[derive(Parser, Debug)]
#[command(name = "tunnel-gateway", version, about = "WebSocket tunneling gateway")]
struct Args {
    /// Config file path (TOML). Defaults plus environment overrides when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind.to_string();
    }

    logging::init_logging(&config.observability.log_level);
    tracing::info!("tunnel-gateway v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_tunnels = config.listener.max_tunnels,
        fallback = %format!("{}:{}", config.upstream.fallback_host, config.upstream.fallback_port),
        connect_timeout_secs = config.timeouts.connect_secs,
        idle_timeout_secs = config.timeouts.idle_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let shutdown = Shutdown::new();
    spawn_signal_listener(&shutdown);

    let tls = config.listener.tls.clone();
    let server = HttpServer::new(config);

    match tls {
        Some(tls) => {
            let addr: SocketAddr = server.config().listener.bind_address.parse()?;
            let rustls = load_tls_config(&tls).await?;
            server.run_tls(addr, rustls, shutdown.subscribe()).await?;
        }
        None => {
            let listener = TcpListener::bind(&server.config().listener.bind_address).await?;
            server.run(listener, shutdown.subscribe()).await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
