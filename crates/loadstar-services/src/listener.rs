//! TCP listeners: one for workers, one for requesters.
//!
//! Every accepted connection gets its own task: register the peer, run a
//! [`ConnectionSession`] until it ends, then deregister. Connection tasks
//! are tracked so shutdown can wait for them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::directory::EntityDirectory;
use crate::endpoint::{RequesterEndpoint, WorkerEndpoint};
use crate::session::{read_handshake, ConnectionSession, SessionStateCell};
use crate::transport::{PacketReader, PacketWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Worker,
    Requester,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Worker => "worker",
            Role::Requester => "requester",
        }
    }
}

/// Per-connection protocol settings.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub handshake_timeout: Duration,
    pub chunk_size: usize,
}

pub struct Listener {
    role: Role,
    listener: TcpListener,
    directory: EntityDirectory,
    settings: ConnectionSettings,
    shutdown: CancellationToken,
    sessions: TaskTracker,
}

impl Listener {
    pub fn new(
        role: Role,
        listener: TcpListener,
        directory: EntityDirectory,
        settings: ConnectionSettings,
        shutdown: CancellationToken,
        sessions: TaskTracker,
    ) -> Self {
        Self {
            role,
            listener,
            directory,
            settings,
            shutdown,
            sessions,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.listener.local_addr()?;
        tracing::info!(role = self.role.as_str(), %addr, "listening");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!(role = self.role.as_str(), "listener shutting down");
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            tracing::warn!(role = self.role.as_str(), error = %e, "accept failed");
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(peer = %peer, error = %e, "set_nodelay failed");
                    }

                    let directory = self.directory.clone();
                    let settings = self.settings;
                    let shutdown = self.shutdown.clone();
                    match self.role {
                        Role::Worker => {
                            self.sessions.spawn(serve_worker(stream, peer, directory, settings, shutdown));
                        }
                        Role::Requester => {
                            self.sessions.spawn(serve_requester(stream, peer, directory, settings, shutdown));
                        }
                    }
                }
            }
        }
    }
}

async fn serve_worker(
    stream: TcpStream,
    peer: SocketAddr,
    directory: EntityDirectory,
    settings: ConnectionSettings,
    shutdown: CancellationToken,
) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = PacketReader::new(read_half);

    let handshake = tokio::select! {
        _ = shutdown.cancelled() => return,
        handshake = read_handshake(&mut reader, settings.handshake_timeout) => handshake,
    };
    let specialty = match handshake {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "worker handshake failed, closing");
            return;
        }
    };

    let (worker, jobs) = directory.register_worker(peer, specialty);
    tracing::info!(worker_id = %worker.id(), peer = %peer, specialty = %specialty, "worker connected");

    let handler = Arc::new(WorkerEndpoint::new(directory.clone(), worker.clone()));
    let session = ConnectionSession::new(
        reader,
        PacketWriter::new(write_half, settings.chunk_size),
        handler,
        jobs,
        SessionStateCell::new(),
        peer,
        shutdown,
        directory.observers().clone(),
    );
    let report = session.run().await;

    // The session closed the job queue, so nothing new can be assigned.
    let orphaned = directory.deregister_worker(worker.id());
    tracing::info!(
        worker_id = %worker.id(),
        reason = %report.end,
        sent = report.sent,
        completed = worker.completed_total(),
        orphaned,
        "worker disconnected"
    );
}

async fn serve_requester(
    stream: TcpStream,
    peer: SocketAddr,
    directory: EntityDirectory,
    settings: ConnectionSettings,
    shutdown: CancellationToken,
) {
    let (read_half, write_half) = stream.into_split();
    let (requester, results) = directory.register_requester(peer);
    tracing::info!(requester_id = %requester.id(), peer = %peer, "requester connected");

    let handler = Arc::new(RequesterEndpoint::new(directory.clone(), requester.clone()));
    let session = ConnectionSession::new(
        PacketReader::new(read_half),
        PacketWriter::new(write_half, settings.chunk_size),
        handler,
        results,
        SessionStateCell::new(),
        peer,
        shutdown,
        directory.observers().clone(),
    );
    let report = session.run().await;

    let books = requester.books();
    let unsent = report.unsent.len();
    directory.deregister_requester(requester.id(), report.unsent);
    tracing::info!(
        requester_id = %requester.id(),
        reason = %report.end,
        requested = books.requested,
        delivered = books.completed,
        unsent,
        "requester disconnected"
    );
}
