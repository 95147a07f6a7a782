//! Connection sessions: one per accepted socket.
//!
//! A session runs two loops over the same connection. The receive loop
//! turns inbound messages into handler calls. The send loop drains the
//! session's outbound queue onto the socket. A failed write closes the
//! queue so nothing more is routed here, but reading goes on until the
//! peer or shutdown ends it. When the receive side ends the send side is
//! stopped even mid-write and whatever was never written is handed back
//! in the [`SessionReport`].

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use loadstar_core::job::parse_handshake;
use loadstar_core::{JobError, JobType, Packet, PacketError, TrackedJob};

use crate::directory::DirectoryError;
use crate::observer::{DirectoryEvent, Observers};
use crate::queue::JobQueueReceiver;
use crate::transport::{Inbound, PacketReader, PacketWriter};

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Connecting,
    Active,
    Draining,
    Closed,
}

/// Observable session state. Only ever moves forward.
#[derive(Debug, Clone)]
pub struct SessionStateCell(Arc<watch::Sender<SessionState>>);

impl Default for SessionStateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateCell {
    pub fn new() -> Self {
        Self(Arc::new(watch::Sender::new(SessionState::Connecting)))
    }

    pub fn get(&self) -> SessionState {
        *self.0.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.0.subscribe()
    }

    /// Move to `next`. False if the session is already there or past it.
    pub fn advance(&self, next: SessionState) -> bool {
        self.0.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        })
    }
}

// ── Handler ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// What a session does with its traffic.
pub trait SessionHandler: Send + Sync + 'static {
    /// A whole inbound message arrived.
    fn on_message(&self, message: Packet) -> Result<(), HandlerError>;

    /// Wire form of an outbound job: packet arguments and message body.
    fn render(&self, job: &TrackedJob) -> (Packet, Bytes);

    /// `job` was fully written to the socket.
    fn on_sent(&self, _job: &TrackedJob) {}
}

// ── Report ────────────────────────────────────────────────────────────────────

/// Why the receive loop stopped.
#[derive(Debug)]
pub enum ReceiveEnd {
    EndOfStream,
    Shutdown,
    Io(io::Error),
    Fatal(PacketError),
}

impl fmt::Display for ReceiveEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiveEnd::EndOfStream => write!(f, "end of stream"),
            ReceiveEnd::Shutdown => write!(f, "shutdown"),
            ReceiveEnd::Io(e) => write!(f, "read failed: {e}"),
            ReceiveEnd::Fatal(e) => write!(f, "fatal framing error: {e}"),
        }
    }
}

#[derive(Debug)]
pub struct SessionReport {
    pub end: ReceiveEnd,
    pub received: u64,
    pub discarded: u64,
    pub sent: u64,
    /// Outbound jobs never fully written, in queue order.
    pub unsent: Vec<TrackedJob>,
}

// ── Session ───────────────────────────────────────────────────────────────────

pub struct ConnectionSession<R, W, H> {
    reader: PacketReader<R>,
    writer: PacketWriter<W>,
    handler: Arc<H>,
    outbound: JobQueueReceiver,
    state: SessionStateCell,
    peer: SocketAddr,
    shutdown: CancellationToken,
    observers: Observers,
}

struct SendOutcome<W> {
    writer: PacketWriter<W>,
    outbound: JobQueueReceiver,
    sent: u64,
    failed: Option<TrackedJob>,
}

impl<R, W, H> ConnectionSession<R, W, H>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    H: SessionHandler,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reader: PacketReader<R>,
        writer: PacketWriter<W>,
        handler: Arc<H>,
        outbound: JobQueueReceiver,
        state: SessionStateCell,
        peer: SocketAddr,
        shutdown: CancellationToken,
        observers: Observers,
    ) -> Self {
        Self {
            reader,
            writer,
            handler,
            outbound,
            state,
            peer,
            shutdown,
            observers,
        }
    }

    pub async fn run(self) -> SessionReport {
        let Self {
            mut reader,
            writer,
            handler,
            outbound,
            state,
            peer,
            shutdown,
            observers,
        } = self;

        state.advance(SessionState::Active);
        let stop_send = CancellationToken::new();
        let send_task = tokio::spawn(send_loop(
            writer,
            handler.clone(),
            outbound,
            peer,
            stop_send.clone(),
        ));

        let mut received = 0u64;
        let mut discarded = 0u64;
        let end = loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break ReceiveEnd::Shutdown,
                next = reader.next() => next,
            };
            match next {
                Ok(Inbound::Message(message)) => {
                    received += 1;
                    if let Err(e) = handler.on_message(message) {
                        discarded += 1;
                        tracing::warn!(peer = %peer, error = %e, "message rejected");
                        observers.notify(DirectoryEvent::PacketDiscarded { peer });
                    }
                }
                Ok(Inbound::Malformed(e)) if e.is_fatal() => break ReceiveEnd::Fatal(e),
                Ok(Inbound::Malformed(e)) => {
                    discarded += 1;
                    tracing::warn!(peer = %peer, error = %e, "malformed input discarded");
                    observers.notify(DirectoryEvent::PacketDiscarded { peer });
                }
                Ok(Inbound::Closed) => break ReceiveEnd::EndOfStream,
                Err(e) => break ReceiveEnd::Io(e),
            }
        };

        state.advance(SessionState::Draining);
        stop_send.cancel();

        let mut unsent = Vec::new();
        let mut sent = 0;
        match send_task.await {
            Ok(mut outcome) => {
                sent = outcome.sent;
                if let Err(e) = outcome.writer.shutdown().await {
                    tracing::debug!(peer = %peer, error = %e, "socket shutdown failed");
                }
                unsent.extend(outcome.failed);
                unsent.extend(outcome.outbound.drain());
            }
            Err(e) => tracing::error!(peer = %peer, error = %e, "send task panicked"),
        }

        state.advance(SessionState::Closed);
        tracing::debug!(
            peer = %peer,
            end = %end,
            received,
            discarded,
            sent,
            unsent = unsent.len(),
            "session closed"
        );
        SessionReport {
            end,
            received,
            discarded,
            sent,
            unsent,
        }
    }
}

async fn send_loop<W, H>(
    mut writer: PacketWriter<W>,
    handler: Arc<H>,
    mut outbound: JobQueueReceiver,
    peer: SocketAddr,
    stop: CancellationToken,
) -> SendOutcome<W>
where
    W: AsyncWrite + Unpin,
    H: SessionHandler,
{
    let mut sent = 0;
    let mut failed = None;
    while let Some(job) = outbound.dequeue(&stop).await {
        let (template, body) = handler.render(&job);
        let written = tokio::select! {
            biased;
            _ = stop.cancelled() => None,
            written = writer.send_message(&template, &body) => Some(written),
        };
        match written {
            // Stopped mid-write; the job may be half written.
            None => {
                failed = Some(job);
                break;
            }
            Some(Ok(_)) => {
                sent += 1;
                handler.on_sent(&job);
            }
            Some(Err(e)) => {
                tracing::warn!(
                    peer = %peer,
                    job_id = %job.internal_id(),
                    error = %e,
                    "send failed"
                );
                failed = Some(job);
                outbound.close();
                break;
            }
        }
    }
    SendOutcome {
        writer,
        outbound,
        sent,
        failed,
    }
}

// ── Handshake ─────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("no handshake within {0:?}")]
    Timeout(Duration),
    #[error("connection closed before handshake")]
    Closed,
    #[error("malformed handshake: {0}")]
    Malformed(PacketError),
    #[error("invalid handshake: {0}")]
    Invalid(#[from] JobError),
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

/// Wait for a worker's first message and take its specialty from it.
pub async fn read_handshake<R: AsyncRead + Unpin>(
    reader: &mut PacketReader<R>,
    timeout: Duration,
) -> Result<JobType, HandshakeError> {
    let first = tokio::time::timeout(timeout, reader.next())
        .await
        .map_err(|_| HandshakeError::Timeout(timeout))??;
    match first {
        Inbound::Message(packet) => Ok(parse_handshake(&packet)?),
        Inbound::Malformed(e) => Err(HandshakeError::Malformed(e)),
        Inbound::Closed => Err(HandshakeError::Closed),
    }
}
