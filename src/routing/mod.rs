//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! ParsedHeader (command, destination)
//!     → planner.rs (build ordered candidate list)
//!     → Return: [primary, fallback relay]
//!
//! Upstreams (at startup):
//!     UpstreamConfig
//!     → fallback relay + public resolver endpoints
//!     → Freeze as immutable Upstreams
//! ```
//!
//! # Design Decisions
//! - Upstreams built at startup, immutable at runtime
//! - Deterministic: same header always yields the same plan
//! - Candidate order is the retry order; no racing, no shuffling
//! - The DNS special case is an explicit branch, not a connect-time side effect

pub mod planner;

pub use planner::{plan, Upstreams};
