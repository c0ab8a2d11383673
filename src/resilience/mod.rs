//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Candidate connect:
//!     → timeouts.rs (bounded connect; elapsed = dead candidate → fallback)
//!
//! Active session:
//!     → timeouts.rs (idle timer touched by both directions)
//!     → no traffic within idle_secs → tunnel closed
//! ```
//!
//! # Design Decisions
//! - Every dial has a deadline; an unbounded connect would pin a tunnel forever
//! - Fallback is sequential and immediate, no backoff between candidates
//! - Idle detection spans both directions, not each one separately

pub mod timeouts;
