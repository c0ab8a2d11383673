//! Relay session: connect-with-fallback and bidirectional byte relay.
//!
//! # Responsibilities
//! - Dial candidates in order, one at a time, with a connect deadline
//! - Write the initial payload before reading anything back
//! - Prefix the first response chunk with the acknowledgment, once
//! - Forward caller frames in arrival order while draining responses
//! - Fall back when a candidate closes (or fails) without responding
//!
//! # Design Decisions
//! - The session exclusively owns the destination socket; frames arrive
//!   over an mpsc channel instead of through a shared connection slot
//! - Both directions are polled concurrently in one task, so a slow caller
//!   never blocks frame forwarding and vice versa
//! - Frames forwarded before the first response are logged (bounded) and
//!   replayed to the next candidate after the initial payload
//! - Once any byte came back, errors end the session instead of re-dialing

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{Sink, SinkExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::observability::metrics;
use crate::protocol::Destination;
use crate::resilience::timeouts::{with_deadline, IdleTimer};
use crate::tunnel::{TunnelError, TunnelSettings};

/// How a session that reached a responsive destination ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The destination closed (or failed) after responding.
    DestinationClosed,
    /// The caller's frame stream ended.
    CallerClosed,
    /// No traffic in either direction within the idle timeout.
    IdleTimeout,
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// The candidate that served the session.
    pub destination: Destination,
    /// Candidates dialed, including the serving one.
    pub attempts: usize,
    /// Bytes written to the serving destination.
    pub bytes_up: u64,
    /// Bytes received from the serving destination (acknowledgment excluded).
    pub bytes_down: u64,
    pub end: SessionEnd,
}

/// Result of one candidate attempt.
enum AttemptEnd {
    Finished(SessionEnd),
    /// No response came back; the next candidate may be tried.
    Silent,
}

enum DownlinkEnd {
    Eof,
    Failed(io::Error),
}

enum UplinkEnd {
    CallerClosed,
    WriteFailed(io::Error),
}

/// Caller frames sent to a candidate that has not responded yet.
#[derive(Debug)]
struct ReplayLog {
    frames: Vec<Bytes>,
    bytes: usize,
    limit: usize,
    overflowed: bool,
}

impl ReplayLog {
    fn new(limit: usize) -> Self {
        Self {
            frames: Vec::new(),
            bytes: 0,
            limit,
            overflowed: false,
        }
    }

    fn record(&mut self, frame: &Bytes) {
        if self.overflowed {
            return;
        }
        if self.bytes + frame.len() > self.limit {
            self.overflowed = true;
            self.release();
            return;
        }
        self.bytes += frame.len();
        self.frames.push(frame.clone());
    }

    fn release(&mut self) {
        self.frames.clear();
        self.bytes = 0;
    }

    /// False once frames were dropped; a fallback could no longer be faithful.
    fn is_complete(&self) -> bool {
        !self.overflowed
    }
}

/// One tunnel's destination session.
#[derive(Debug)]
pub struct RelaySession {
    candidates: Vec<Destination>,
    initial_payload: Bytes,
    ack: [u8; 2],
    connect_timeout: Duration,
    idle_timeout: Option<Duration>,
    buffer_size: usize,
    replay_limit: usize,
}

impl RelaySession {
    pub fn new(
        candidates: Vec<Destination>,
        initial_payload: Bytes,
        ack: [u8; 2],
        settings: &TunnelSettings,
    ) -> Self {
        Self {
            candidates,
            initial_payload,
            ack,
            connect_timeout: settings.connect_timeout,
            idle_timeout: settings.idle_timeout,
            buffer_size: settings.buffer_size,
            replay_limit: settings.replay_limit,
        }
    }

    /// Run the session until the destination finishes, the caller goes away,
    /// or every candidate turned out dead.
    pub async fn run<O>(
        self,
        frames: &mut mpsc::Receiver<Bytes>,
        outbound: &mut O,
    ) -> Result<SessionOutcome, TunnelError>
    where
        O: Sink<Bytes, Error = io::Error> + Unpin,
    {
        let mut replay = ReplayLog::new(self.replay_limit);
        let mut ack_sent = false;
        let idle = IdleTimer::new(self.idle_timeout);

        for (index, candidate) in self.candidates.iter().enumerate() {
            let attempts = index + 1;
            if index > 0 {
                metrics::record_fallback();
                info!(candidate = %candidate, attempt = attempts, "Falling back to next candidate");
            }

            let stream = match with_deadline(
                self.connect_timeout,
                TcpStream::connect((candidate.host.as_str(), candidate.port)),
            )
            .await
            {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(candidate = %candidate, error = %e, "Candidate unreachable");
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);
            debug!(candidate = %candidate, "Candidate connected");
            idle.touch();

            let (mut reader, mut writer) = stream.into_split();
            let mut bytes_up = 0u64;
            let mut bytes_down = 0u64;

            let end = match self.prime(&mut writer, &replay, &mut bytes_up).await {
                Ok(()) => {
                    self.attempt(
                        &mut reader,
                        &mut writer,
                        frames,
                        outbound,
                        &mut replay,
                        &mut ack_sent,
                        &idle,
                        &mut bytes_up,
                        &mut bytes_down,
                    )
                    .await?
                }
                Err(e) => {
                    warn!(candidate = %candidate, error = %e, "Initial write failed");
                    AttemptEnd::Silent
                }
            };

            match end {
                AttemptEnd::Finished(end) => {
                    debug!(
                        candidate = %candidate,
                        bytes_up,
                        bytes_down,
                        end = ?end,
                        "Session finished"
                    );
                    return Ok(SessionOutcome {
                        destination: candidate.clone(),
                        attempts,
                        bytes_up,
                        bytes_down,
                        end,
                    });
                }
                AttemptEnd::Silent => {
                    info!(candidate = %candidate, "Candidate closed without responding");
                    // Dropped frames cannot be replayed; a retry would hand the
                    // next candidate a stream with a hole in it.
                    if !replay.is_complete() {
                        warn!("Replay log overflowed, cannot fall back");
                        return Err(TunnelError::NoReachableDestination { attempts });
                    }
                }
            }
        }

        Err(TunnelError::NoReachableDestination {
            attempts: self.candidates.len(),
        })
    }

    /// Send the initial payload, then every frame the previous candidate
    /// swallowed, in order.
    async fn prime(
        &self,
        writer: &mut OwnedWriteHalf,
        replay: &ReplayLog,
        bytes_up: &mut u64,
    ) -> io::Result<()> {
        if !self.initial_payload.is_empty() {
            writer.write_all(&self.initial_payload).await?;
            *bytes_up += self.initial_payload.len() as u64;
        }
        for frame in &replay.frames {
            writer.write_all(frame).await?;
            *bytes_up += frame.len() as u64;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt<O>(
        &self,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
        frames: &mut mpsc::Receiver<Bytes>,
        outbound: &mut O,
        replay: &mut ReplayLog,
        ack_sent: &mut bool,
        idle: &IdleTimer,
        bytes_up: &mut u64,
        bytes_down: &mut u64,
    ) -> Result<AttemptEnd, TunnelError>
    where
        O: Sink<Bytes, Error = io::Error> + Unpin,
    {
        let received = AtomicBool::new(false);

        let end = tokio::select! {
            res = pump_downlink(reader, outbound, self.ack, ack_sent, &received, idle, self.buffer_size, bytes_down) => {
                match res? {
                    DownlinkEnd::Eof => {}
                    DownlinkEnd::Failed(e) => debug!(error = %e, "Destination read failed"),
                }
                if received.load(Ordering::Acquire) {
                    AttemptEnd::Finished(SessionEnd::DestinationClosed)
                } else {
                    AttemptEnd::Silent
                }
            }
            res = pump_uplink(writer, frames, replay, &received, idle, bytes_up) => {
                match res {
                    UplinkEnd::CallerClosed => AttemptEnd::Finished(SessionEnd::CallerClosed),
                    UplinkEnd::WriteFailed(e) => {
                        debug!(error = %e, "Destination write failed");
                        if received.load(Ordering::Acquire) {
                            AttemptEnd::Finished(SessionEnd::DestinationClosed)
                        } else {
                            AttemptEnd::Silent
                        }
                    }
                }
            }
            _ = idle.expired() => AttemptEnd::Finished(SessionEnd::IdleTimeout),
        };

        Ok(end)
    }
}

/// Destination → caller. Only a failed send to the caller is an error.
#[allow(clippy::too_many_arguments)]
async fn pump_downlink<O>(
    reader: &mut OwnedReadHalf,
    outbound: &mut O,
    ack: [u8; 2],
    ack_sent: &mut bool,
    received: &AtomicBool,
    idle: &IdleTimer,
    buffer_size: usize,
    bytes_down: &mut u64,
) -> Result<DownlinkEnd, TunnelError>
where
    O: Sink<Bytes, Error = io::Error> + Unpin,
{
    let mut buf = BytesMut::with_capacity(buffer_size);
    loop {
        buf.reserve(buffer_size);
        let n = match reader.read_buf(&mut buf).await {
            Ok(0) => return Ok(DownlinkEnd::Eof),
            Ok(n) => n,
            Err(e) => return Ok(DownlinkEnd::Failed(e)),
        };
        received.store(true, Ordering::Release);
        idle.touch();

        let chunk = buf.split().freeze();
        let frame = if *ack_sent {
            chunk
        } else {
            let mut first = BytesMut::with_capacity(ack.len() + chunk.len());
            first.extend_from_slice(&ack);
            first.extend_from_slice(&chunk);
            first.freeze()
        };

        outbound.send(frame).await.map_err(TunnelError::Transport)?;
        *ack_sent = true;
        *bytes_down += n as u64;
        metrics::record_bytes_down(n as u64);
    }
}

/// Caller → destination, one frame fully written before the next is taken.
async fn pump_uplink(
    writer: &mut OwnedWriteHalf,
    frames: &mut mpsc::Receiver<Bytes>,
    replay: &mut ReplayLog,
    received: &AtomicBool,
    idle: &IdleTimer,
    bytes_up: &mut u64,
) -> UplinkEnd {
    while let Some(frame) = frames.recv().await {
        idle.touch();
        // Logged before writing: a cancelled write is still replayed.
        if received.load(Ordering::Acquire) {
            replay.release();
        } else {
            replay.record(&frame);
        }

        if let Err(e) = writer.write_all(&frame).await {
            return UplinkEnd::WriteFailed(e);
        }
        *bytes_up += frame.len() as u64;
        metrics::record_bytes_up(frame.len() as u64);
    }
    UplinkEnd::CallerClosed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::Upstreams;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn settings() -> TunnelSettings {
        TunnelSettings {
            identity: String::new(),
            upstreams: Upstreams {
                fallback_relay: Destination::new("127.0.0.1", 443),
                public_resolver: Destination::new("127.0.0.1", 53),
            },
            connect_timeout: Duration::from_secs(2),
            idle_timeout: None,
            buffer_size: 4096,
            replay_limit: 1024,
            frame_queue: 8,
        }
    }

    fn candidate(addr: SocketAddr) -> Destination {
        Destination::new(addr.ip().to_string(), addr.port())
    }

    /// Sink that forwards every frame into an unbounded channel.
    fn collector() -> (
        impl Sink<Bytes, Error = io::Error> + Unpin,
        mpsc::UnboundedReceiver<Bytes>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Box::pin(futures_util::sink::unfold(
            tx,
            |tx, frame: Bytes| async move {
                tx.send(frame).map_err(io::Error::other)?;
                Ok::<_, io::Error>(tx)
            },
        ));
        (sink, rx)
    }

    /// Address nothing listens on.
    async fn dead_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    /// Accepts once, reads `expect` bytes, returns them over the channel and
    /// closes without writing.
    async fn silent_destination(expect: usize) -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; expect];
            socket.read_exact(&mut buf).await.unwrap();
            let _ = tx.send(buf);
        });
        (addr, rx)
    }

    /// Echo server that reports everything it received.
    async fn echo_destination() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if socket.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        addr
    }

    /// Reads `expect` bytes, answers `"x"`, then closes. Reports once closed.
    async fn answer_once_destination(expect: usize) -> (SocketAddr, oneshot::Receiver<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; expect];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(b"x").await.unwrap();
            drop(socket);
            let _ = tx.send(());
        });
        (addr, rx)
    }

    /// Listener that reports every accepted connection.
    async fn watched_fallback() -> (SocketAddr, mpsc::UnboundedReceiver<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((_socket, _)) = listener.accept().await {
                let _ = tx.send(());
            }
        });
        (addr, rx)
    }

    /// Like `collector`, but never completes a send after the first frame
    /// arrives, so the downlink stays parked.
    fn stalling_collector() -> (
        impl Sink<Bytes, Error = io::Error> + Unpin,
        mpsc::UnboundedReceiver<Bytes>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Box::pin(futures_util::sink::unfold(
            tx,
            |tx, frame: Bytes| async move {
                tx.send(frame).map_err(io::Error::other)?;
                std::future::pending::<()>().await;
                Ok::<_, io::Error>(tx)
            },
        ));
        (sink, rx)
    }

    #[tokio::test]
    async fn answered_then_closed_does_not_fall_back() {
        let (dest, _closed) = answer_once_destination(3).await;
        let (fallback, mut fallback_accepts) = watched_fallback().await;
        let session = RelaySession::new(
            vec![candidate(dest), candidate(fallback)],
            Bytes::from_static(b"req"),
            [0, 0],
            &settings(),
        );
        let (_frame_tx, mut frame_rx) = mpsc::channel(8);
        let (mut sink, mut out) = collector();

        let outcome = session.run(&mut frame_rx, &mut sink).await.unwrap();
        assert_eq!(outcome.end, SessionEnd::DestinationClosed);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.destination, candidate(dest));
        assert_eq!(outcome.bytes_up, 3);
        assert_eq!(outcome.bytes_down, 1);

        drop(sink);
        assert_eq!(&out.recv().await.unwrap()[..], b"\x00\x00x");
        assert!(out.recv().await.is_none());
        assert!(fallback_accepts.try_recv().is_err());
    }

    #[tokio::test]
    async fn write_failure_after_response_does_not_fall_back() {
        let (dest, closed) = answer_once_destination(3).await;
        let (fallback, mut fallback_accepts) = watched_fallback().await;
        let session = RelaySession::new(
            vec![candidate(dest), candidate(fallback)],
            Bytes::from_static(b"req"),
            [0, 0],
            &settings(),
        );
        let (frame_tx, mut frame_rx) = mpsc::channel(8);
        let (mut sink, mut out) = stalling_collector();

        let run = tokio::spawn(async move { session.run(&mut frame_rx, &mut sink).await });

        // The response is in, and the downlink is parked on the caller.
        assert_eq!(&out.recv().await.unwrap()[..], b"\x00\x00x");
        closed.await.unwrap();

        // Writes into the closed socket fail once the peer resets it.
        for _ in 0..50 {
            if frame_tx.send(Bytes::from_static(b"late")).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        drop(frame_tx);

        let outcome = run.await.unwrap().unwrap();
        assert_eq!(outcome.end, SessionEnd::DestinationClosed);
        assert_eq!(outcome.attempts, 1);
        assert!(fallback_accepts.try_recv().is_err());
    }

    #[tokio::test]
    async fn first_chunk_carries_ack() {
        let echo = echo_destination().await;
        let session = RelaySession::new(vec![candidate(echo)], Bytes::from_static(b"ping"), [0, 0], &settings());
        let (frame_tx, mut frame_rx) = mpsc::channel(8);
        let (mut sink, mut out) = collector();

        let run = tokio::spawn(async move { session.run(&mut frame_rx, &mut sink).await });

        assert_eq!(&out.recv().await.unwrap()[..], b"\x00\x00ping");
        frame_tx.send(Bytes::from_static(b"pong")).await.unwrap();
        assert_eq!(&out.recv().await.unwrap()[..], b"pong");

        drop(frame_tx);
        let outcome = run.await.unwrap().unwrap();
        assert_eq!(outcome.end, SessionEnd::CallerClosed);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.bytes_up, 8);
        assert_eq!(outcome.bytes_down, 8);
    }

    #[tokio::test]
    async fn connect_failure_falls_back() {
        let dead = dead_addr().await;
        let echo = echo_destination().await;
        let session = RelaySession::new(
            vec![candidate(dead), candidate(echo)],
            Bytes::from_static(b"hello"),
            [3, 0],
            &settings(),
        );
        let (frame_tx, mut frame_rx) = mpsc::channel(8);
        let (mut sink, mut out) = collector();

        let run = tokio::spawn(async move { session.run(&mut frame_rx, &mut sink).await });
        assert_eq!(&out.recv().await.unwrap()[..], b"\x03\x00hello");

        drop(frame_tx);
        let outcome = run.await.unwrap().unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.destination, candidate(echo));
    }

    #[tokio::test]
    async fn silent_candidate_gets_replayed_on_fallback() {
        let (silent, mut seen_by_silent) = silent_destination(8).await;
        let echo = echo_destination().await;
        let session = RelaySession::new(
            vec![candidate(silent), candidate(echo)],
            Bytes::from_static(b"init"),
            [0, 0],
            &settings(),
        );
        let (frame_tx, mut frame_rx) = mpsc::channel(8);
        let (mut sink, mut out) = collector();

        frame_tx.send(Bytes::from_static(b"more")).await.unwrap();
        let run = tokio::spawn(async move { session.run(&mut frame_rx, &mut sink).await });

        assert_eq!(seen_by_silent.recv().await.unwrap(), b"initmore");

        // The echo may split its answer; collect until everything arrived.
        let mut echoed = Vec::new();
        while echoed.len() < 2 + 8 {
            echoed.extend_from_slice(&out.recv().await.unwrap());
        }
        assert_eq!(echoed, b"\x00\x00initmore");

        drop(frame_tx);
        let outcome = run.await.unwrap().unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.end, SessionEnd::CallerClosed);
    }

    #[tokio::test]
    async fn exhaustion_sends_nothing() {
        let (silent, _seen) = silent_destination(4).await;
        let dead = dead_addr().await;
        let session = RelaySession::new(
            vec![candidate(silent), candidate(dead)],
            Bytes::from_static(b"init"),
            [0, 0],
            &settings(),
        );
        let (_frame_tx, mut frame_rx) = mpsc::channel(8);
        let (mut sink, mut out) = collector();

        let err = session.run(&mut frame_rx, &mut sink).await.unwrap_err();
        assert!(matches!(err, TunnelError::NoReachableDestination { attempts: 2 }));
        drop(sink);
        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn idle_timeout_ends_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let mut settings = settings();
        settings.idle_timeout = Some(Duration::from_millis(100));
        let session = RelaySession::new(vec![candidate(addr)], Bytes::new(), [0, 0], &settings);
        let (_frame_tx, mut frame_rx) = mpsc::channel(8);
        let (mut sink, _out) = collector();

        let outcome = session.run(&mut frame_rx, &mut sink).await.unwrap();
        assert_eq!(outcome.end, SessionEnd::IdleTimeout);
    }

    #[test]
    fn replay_log_overflow() {
        let mut log = ReplayLog::new(6);
        log.record(&Bytes::from_static(b"abc"));
        log.record(&Bytes::from_static(b"def"));
        assert!(log.is_complete());
        assert_eq!(log.frames.len(), 2);

        log.record(&Bytes::from_static(b"g"));
        assert!(!log.is_complete());
        assert!(log.frames.is_empty());
    }
}
