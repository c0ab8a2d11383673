//! WebSocket transport adapter.
//!
//! # Responsibilities
//! - Turn an upgraded WebSocket into a stream of inbound binary frames
//! - Turn outbound byte frames into binary WebSocket messages
//!
//! # Data Flow
//! ```text
//! Caller ←──── binary messages ────→ websocket.rs ←──── Bytes frames ────→ tunnel driver
//! ```
//!
//! # Design Decisions
//! - Only binary messages carry tunnel bytes; text/ping/pong are skipped
//! - A close message ends the inbound stream
//! - Ping/pong handled transparently by the WebSocket implementation

use std::future;
use std::io;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};

/// Split a WebSocket into (outbound sink, inbound frame stream).
pub fn into_frames(
    socket: WebSocket,
) -> (
    impl Sink<Bytes, Error = io::Error> + Send,
    impl Stream<Item = io::Result<Bytes>> + Send,
) {
    let (sink, stream) = socket.split();

    let outbound = sink
        .with(|frame: Bytes| future::ready(Ok::<_, axum::Error>(Message::Binary(frame))))
        .sink_map_err(io::Error::other);

    let inbound = stream
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| future::ready(inbound_frame(msg)));

    (outbound, inbound)
}

fn inbound_frame(msg: Result<Message, axum::Error>) -> Option<io::Result<Bytes>> {
    match msg {
        Ok(Message::Binary(frame)) => Some(Ok(frame)),
        Ok(_) => None,
        Err(e) => Some(Err(io::Error::other(e))),
    }
}
