//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, upgrade admission, early data)
//!     → websocket.rs (binary messages ↔ byte frames)
//!     → tunnel driver
//! ```

pub mod server;
pub mod websocket;

pub use server::HttpServer;
