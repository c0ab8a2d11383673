//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the tunnel gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, TLS, tunnel cap).
    pub listener: ListenerConfig,

    /// Pre-shared caller identity.
    pub identity: IdentityConfig,

    /// Fallback relay and public resolver endpoints.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Relay buffer and queue sizing.
    pub relay: RelayConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent tunnels (backpressure).
    pub max_tunnels: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_tunnels: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Identity every envelope must carry.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Canonical lowercase hyphenated UUID, compared verbatim.
    pub uuid: String,
}

/// Endpoints dialed on behalf of callers besides their own destination.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Fallback relay host, tried after the requested destination.
    pub fallback_host: String,

    /// Fallback relay port.
    pub fallback_port: u16,

    /// Public DNS resolver used for datagram (DNS) tunnels.
    pub resolver_host: String,

    /// Public DNS resolver port.
    pub resolver_port: u16,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            fallback_host: String::new(),
            fallback_port: 443,
            resolver_host: "8.8.4.4".to_string(),
            resolver_port: 53,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-candidate connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Close a tunnel after this many seconds without traffic (0 = never).
    pub idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            idle_secs: 300,
        }
    }
}

/// Relay sizing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Read buffer size for destination connections.
    pub buffer_size: usize,

    /// Max bytes of caller frames kept for replay on fallback.
    pub replay_limit: usize,

    /// Caller frames queued ahead of the active connection.
    pub frame_queue: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: 16 * 1024,
            replay_limit: 64 * 1024,
            frame_queue: 32,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
