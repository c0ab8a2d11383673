//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the tunnel handler on every path
//! - Wire up middleware (tracing, request ID)
//! - Admit or refuse tunnels before upgrading
//! - Bind server to listener, plain or TLS
//! - Hand upgraded sockets to the tunnel driver

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use axum_server::{tls_rustls::RustlsConfig, Handle};
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn, Instrument};

use crate::config::GatewayConfig;
use crate::http::websocket::into_frames;
use crate::net::{TunnelGuard, TunnelTracker};
use crate::observability::metrics;
use crate::protocol::decode_early_data;
use crate::tunnel::{TunnelDriver, TunnelOutcome, TunnelSettings};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<TunnelSettings>,
    pub tracker: TunnelTracker,
}

/// HTTP server accepting tunnel upgrades.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
    tracker: TunnelTracker,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GatewayConfig) -> Self {
        let tracker = TunnelTracker::new(config.listener.max_tunnels);
        let state = AppState {
            settings: Arc::new(TunnelSettings::from_config(&config)),
            tracker: tracker.clone(),
        };

        let router = Self::build_router(state);
        Self {
            router,
            config,
            tracker,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/", any(tunnel_handler))
            .route("/{*path}", any(tunnel_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        info!(address = %addr, max_tunnels = self.tracker.available_slots(), "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        info!(open_tunnels = self.tracker.active_count(), "HTTP server stopped");
        Ok(())
    }

    /// Run the server over TLS on the configured bind address until
    /// `shutdown` fires.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        info!(address = %addr, max_tunnels = self.tracker.available_slots(), "HTTPS server starting");

        let handle = Handle::new();
        let stopper = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            stopper.graceful_shutdown(None);
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app)
            .await?;

        info!(open_tunnels = self.tracker.active_count(), "HTTPS server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

/// Tunnel entry point for every path.
///
/// Refusals happen before the upgrade so callers get a plain HTTP status.
async fn tunnel_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            debug!(peer = %peer, reason = %rejection.body_text(), "Not a WebSocket upgrade");
            metrics::record_tunnel_rejected("not_websocket");
            return (StatusCode::UPGRADE_REQUIRED, "Expected a WebSocket upgrade").into_response();
        }
    };

    let protocol = match headers.get(header::SEC_WEBSOCKET_PROTOCOL) {
        Some(value) => match value.to_str() {
            Ok(value) => Some(value.to_owned()),
            Err(_) => return reject_early_data(peer),
        },
        None => None,
    };
    let early_data = match decode_early_data(protocol.as_deref()) {
        Ok(early_data) => early_data,
        Err(e) => {
            debug!(peer = %peer, error = %e, "Malformed early data");
            return reject_early_data(peer);
        }
    };

    let Some(guard) = state.tracker.try_admit() else {
        warn!(peer = %peer, "Tunnel limit reached");
        metrics::record_tunnel_rejected("capacity");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many tunnels").into_response();
    };

    // The client fails the handshake unless its protocol is echoed back.
    let upgrade = match protocol {
        Some(protocol) => upgrade.protocols([protocol]),
        None => upgrade,
    };

    let settings = Arc::clone(&state.settings);
    upgrade.on_upgrade(move |socket| serve_tunnel(socket, settings, early_data, guard, peer))
}

fn reject_early_data(peer: SocketAddr) -> Response {
    debug!(peer = %peer, "Rejecting upgrade with invalid early data");
    metrics::record_tunnel_rejected("early_data");
    (StatusCode::BAD_REQUEST, "Invalid early data").into_response()
}

async fn serve_tunnel(
    socket: WebSocket,
    settings: Arc<TunnelSettings>,
    early_data: Option<Bytes>,
    guard: TunnelGuard,
    peer: SocketAddr,
) {
    let span = tracing::info_span!("tunnel", tunnel_id = %guard.id(), peer = %peer);

    async move {
        let started = Instant::now();
        metrics::record_tunnel_opened();
        debug!(early_data = early_data.as_ref().map_or(0, Bytes::len), "Tunnel opened");

        let (outbound, inbound) = into_frames(socket);
        let mut driver = TunnelDriver::new(settings);

        match driver.run(early_data, inbound, outbound).await {
            Ok(TunnelOutcome::NoHeader) => {
                debug!("Caller left before sending an envelope");
            }
            Ok(TunnelOutcome::Relayed(outcome)) => {
                info!(
                    destination = %outcome.destination,
                    attempts = outcome.attempts,
                    bytes_up = outcome.bytes_up,
                    bytes_down = outcome.bytes_down,
                    end = ?outcome.end,
                    "Tunnel closed"
                );
            }
            Err(e) => {
                metrics::record_tunnel_error(e.kind());
                warn!(error = %e, kind = e.kind(), "Tunnel aborted");
            }
        }

        metrics::record_tunnel_closed(started);
        drop(guard);
    }
    .instrument(span)
    .await
}
