//! Tunnel subsystem: one upgraded connection, one envelope, one destination
//! session.
//!
//! # Data Flow
//! ```text
//! inbound frames ──▶ driver.rs ──(first frame)──▶ protocol::decode
//!                        │                          → routing::plan
//!                        │                          → session.rs
//!                        └──(later frames, mpsc)──▶ session.rs ──▶ destination
//!
//! destination ──▶ session.rs ──([ack] + first chunk, then raw)──▶ outbound frames
//! ```
//!
//! # Tunnel States
//! ```text
//! AwaitingHeader → Relaying → Closed
//!        │             │
//!        └─────────────┴────→ Aborted
//! ```
//!
//! # Design Decisions
//! - The session owns the destination socket; caller frames reach it through
//!   a channel, so a write can never race a fallback swap
//! - Candidates are tried strictly in order, one at a time
//! - Caller frames sent before the first response are replayed on fallback

use std::io;
use std::time::Duration;

use crate::config::GatewayConfig;
use crate::protocol::HeaderError;
use crate::routing::Upstreams;

pub mod driver;
pub mod session;

pub use driver::{TunnelDriver, TunnelOutcome, TunnelState};
pub use session::{RelaySession, SessionEnd, SessionOutcome};

/// Fatal tunnel errors. Every variant closes both ends of the tunnel.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("invalid envelope: {0}")]
    Header(#[from] HeaderError),
    #[error("no reachable destination after {attempts} attempt(s)")]
    NoReachableDestination { attempts: usize },
    #[error("caller transport: {0}")]
    Transport(#[source] io::Error),
}

impl TunnelError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TunnelError::Header(HeaderError::IdentityMismatch { .. }) => "identity_mismatch",
            TunnelError::Header(_) => "protocol",
            TunnelError::NoReachableDestination { .. } => "unreachable",
            TunnelError::Transport(_) => "transport",
        }
    }
}

/// Read-only per-process settings every tunnel is built from.
#[derive(Debug, Clone)]
pub struct TunnelSettings {
    /// Canonical identity string envelopes are checked against.
    pub identity: String,
    pub upstreams: Upstreams,
    pub connect_timeout: Duration,
    /// `None` disables the idle timeout.
    pub idle_timeout: Option<Duration>,
    pub buffer_size: usize,
    pub replay_limit: usize,
    pub frame_queue: usize,
}

impl TunnelSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        let idle_timeout = match config.timeouts.idle_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Self {
            identity: config.identity.uuid.clone(),
            upstreams: Upstreams::from_config(&config.upstream),
            connect_timeout: Duration::from_secs(config.timeouts.connect_secs),
            idle_timeout,
            buffer_size: config.relay.buffer_size,
            replay_limit: config.relay.replay_limit,
            frame_queue: config.relay.frame_queue,
        }
    }
}
