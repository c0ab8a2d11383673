//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (tunnels, fallbacks, bytes, errors)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `gateway_tunnels_total` (counter): tunnels admitted
//! - `gateway_tunnels_active` (gauge): tunnels currently open
//! - `gateway_tunnels_rejected_total` (counter): tunnels refused, by reason
//! - `gateway_tunnel_errors_total` (counter): tunnels that ended in error, by kind
//! - `gateway_fallbacks_total` (counter): moves to the next candidate destination
//! - `gateway_bytes_total` (counter): relayed bytes, by direction
//! - `gateway_tunnel_duration_seconds` (histogram): tunnel lifetime
//!
//! # Design Decisions
//! - Recording is a no-op until `init_metrics` installs the exporter
//! - Labels are static strings only; destinations are never used as labels

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const TUNNELS_TOTAL: &str = "gateway_tunnels_total";
pub const TUNNELS_ACTIVE: &str = "gateway_tunnels_active";
pub const TUNNELS_REJECTED_TOTAL: &str = "gateway_tunnels_rejected_total";
pub const TUNNEL_ERRORS_TOTAL: &str = "gateway_tunnel_errors_total";
pub const FALLBACKS_TOTAL: &str = "gateway_fallbacks_total";
pub const BYTES_TOTAL: &str = "gateway_bytes_total";
pub const TUNNEL_DURATION_SECONDS: &str = "gateway_tunnel_duration_seconds";

/// Install the Prometheus exporter with its own HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record a tunnel admitted past the upgrade.
#[inline]
pub fn record_tunnel_opened() {
    counter!(TUNNELS_TOTAL).increment(1);
}

/// Record a tunnel finished, whatever the outcome.
#[inline]
pub fn record_tunnel_closed(started: Instant) {
    histogram!(TUNNEL_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

#[inline]
pub fn set_active_tunnels(active: u64) {
    gauge!(TUNNELS_ACTIVE).set(active as f64);
}

/// Record a refused tunnel (reason: "capacity", "not_websocket", "early_data").
#[inline]
pub fn record_tunnel_rejected(reason: &'static str) {
    counter!(TUNNELS_REJECTED_TOTAL, "reason" => reason).increment(1);
}

/// Record a tunnel that ended in error.
#[inline]
pub fn record_tunnel_error(kind: &'static str) {
    counter!(TUNNEL_ERRORS_TOTAL, "kind" => kind).increment(1);
}

#[inline]
pub fn record_fallback() {
    counter!(FALLBACKS_TOTAL).increment(1);
}

/// Bytes forwarded from the caller to the destination.
#[inline]
pub fn record_bytes_up(bytes: u64) {
    counter!(BYTES_TOTAL, "direction" => "up").increment(bytes);
}

/// Bytes forwarded from the destination to the caller.
#[inline]
pub fn record_bytes_down(bytes: u64) {
    counter!(BYTES_TOTAL, "direction" => "down").increment(bytes);
}
