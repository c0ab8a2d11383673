//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - One broadcast fan-out for every long-running task
//! - Open tunnels are not waited on; they end with the process

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
