//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, tunnel spans)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Tunnel ID flows through every log line via a span
//! - Metrics are cheap (atomic increments) and no-ops until an exporter is installed
//! - The Prometheus exporter is off by default

pub mod logging;
pub mod metrics;
