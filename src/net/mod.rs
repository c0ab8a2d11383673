//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → tls.rs (optional TLS handshake, via axum-server)
//!     → HTTP upgrade (http/server.rs)
//!     → connection.rs (admission, tunnel ID, lifecycle tracking)
//!     → Hand off to tunnel driver
//!
//! Tunnel States:
//!     AwaitingHeader → Relaying → Closed | Aborted
//! ```
//!
//! # Design Decisions
//! - Bounded tunnel count prevents resource exhaustion
//! - Each tunnel tracked by an RAII guard
//! - TLS is optional and handled transparently

pub mod connection;
pub mod tls;

pub use connection::{TunnelGuard, TunnelId, TunnelTracker};
