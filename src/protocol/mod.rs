//! Envelope protocol subsystem.
//!
//! # Data Flow
//! ```text
//! Sec-WebSocket-Protocol header
//!     → early_data.rs (base64 → synthetic first frame)
//!
//! First inbound frame
//!     → header.rs (decode + identity check)
//!     → ParsedHeader { version, command, destination, payload_offset }
//!     → acknowledgment [version, 0] prefixed to the first response chunk
//! ```
//!
//! # Design Decisions
//! - Pure codec, no I/O; the tunnel layer owns all sockets
//! - Exactly one envelope format, one identity check
//! - UDP is accepted only for DNS (port 53)

pub mod early_data;
pub mod header;

pub use early_data::decode_early_data;
pub use header::{
    acknowledgment, decode, Address, Command, Destination, EncodeError, HeaderError,
    ParsedHeader, RequestHeader,
};
