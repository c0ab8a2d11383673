//! Tunnel driver: routes the inbound frame sequence of one tunnel.
//!
//! # Responsibilities
//! - Take the first frame (early data or first inbound message)
//! - Decode the envelope, plan candidates, start the relay session
//! - Hand every later frame to the session in arrival order
//! - Close the caller transport when the tunnel ends, whatever the reason
//!
//! # Design Decisions
//! - Transport-agnostic: any `Stream` of frames in, any `Sink` of frames out
//! - Exactly one envelope per tunnel; there is no way back to `AwaitingHeader`
//! - Frame forwarding and response draining run concurrently

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::protocol::{self, Command};
use crate::routing;
use crate::tunnel::{RelaySession, SessionOutcome, TunnelError, TunnelSettings};

/// Lifecycle of a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// No envelope yet, no destination connection.
    AwaitingHeader,
    /// Envelope accepted; frames flow to the session.
    Relaying,
    /// Ended normally.
    Closed,
    /// Ended by a fatal error.
    Aborted,
}

/// How a tunnel that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelOutcome {
    /// The caller went away before sending an envelope.
    NoHeader,
    Relayed(SessionOutcome),
}

/// Per-tunnel driver; build one for every upgraded connection.
#[derive(Debug)]
pub struct TunnelDriver {
    settings: Arc<TunnelSettings>,
    state: TunnelState,
}

impl TunnelDriver {
    pub fn new(settings: Arc<TunnelSettings>) -> Self {
        Self {
            settings,
            state: TunnelState::AwaitingHeader,
        }
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// Drive the tunnel to completion.
    ///
    /// `early_data`, when present, is processed as the first frame ahead of
    /// anything read from `inbound`. `outbound` is closed before returning.
    pub async fn run<S, K>(
        &mut self,
        early_data: Option<Bytes>,
        inbound: S,
        outbound: K,
    ) -> Result<TunnelOutcome, TunnelError>
    where
        S: Stream<Item = io::Result<Bytes>>,
        K: Sink<Bytes, Error = io::Error>,
    {
        futures_util::pin_mut!(inbound);
        futures_util::pin_mut!(outbound);

        let result = self.drive(early_data, inbound, &mut outbound).await;

        if let Err(e) = outbound.close().await {
            debug!(error = %e, "Closing caller transport failed");
        }
        self.transition(match result {
            Ok(_) => TunnelState::Closed,
            Err(_) => TunnelState::Aborted,
        });
        result
    }

    async fn drive<S, O>(
        &mut self,
        early_data: Option<Bytes>,
        mut inbound: std::pin::Pin<&mut S>,
        outbound: &mut O,
    ) -> Result<TunnelOutcome, TunnelError>
    where
        S: Stream<Item = io::Result<Bytes>>,
        O: Sink<Bytes, Error = io::Error> + Unpin,
    {
        let first = match early_data {
            Some(frame) => frame,
            None => match inbound.next().await {
                Some(frame) => frame.map_err(TunnelError::Transport)?,
                None => return Ok(TunnelOutcome::NoHeader),
            },
        };

        let header = protocol::decode(&first, &self.settings.identity)?;
        let candidates = routing::plan(&header, &self.settings.upstreams);
        let payload = first.slice(header.payload_offset..);

        info!(
            destination = %header.destination,
            udp = header.command == Command::DatagramDns,
            payload_bytes = payload.len(),
            "Envelope accepted"
        );
        self.transition(TunnelState::Relaying);

        let session = RelaySession::new(
            candidates,
            payload,
            protocol::acknowledgment(header.version),
            &self.settings,
        );
        let (frame_tx, mut frame_rx) = mpsc::channel::<Bytes>(self.settings.frame_queue);

        let forward = async move {
            while let Some(frame) = inbound.next().await {
                let frame = frame.map_err(TunnelError::Transport)?;
                if frame_tx.send(frame).await.is_err() {
                    // Session already over.
                    break;
                }
            }
            Ok::<(), TunnelError>(())
        };

        let relay = session.run(&mut frame_rx, outbound);
        tokio::pin!(relay);

        let forwarded = tokio::select! {
            outcome = &mut relay => return outcome.map(TunnelOutcome::Relayed),
            forwarded = forward => forwarded,
        };
        // The caller stopped sending; the session sees the closed channel.
        forwarded?;
        relay.await.map(TunnelOutcome::Relayed)
    }

    fn transition(&mut self, next: TunnelState) {
        debug!(from = ?self.state, to = ?next, "Tunnel state change");
        self.state = next;
    }
}
