//! Loadstar integration test harness.
//!
//! Every test starts its own coordinator on ephemeral loopback ports and
//! talks to it over real TCP, the way workers and requesters do.
//!
//!   cargo test --test integration

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use loadstar_core::config::CoordinatorConfig;
use loadstar_core::job::handshake_packet;
use loadstar_core::{Job, JobType, Packet};
use loadstar_services::{Coordinator, CoordinatorStats, EntityDirectory, Inbound, PacketReader, PacketWriter};

mod failures;
mod routing;

/// How long a test waits for any single expected event.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

// ── Coordinator ───────────────────────────────────────────────────────────────

pub struct TestCoordinator {
    pub worker_addr: SocketAddr,
    pub requester_addr: SocketAddr,
    pub directory: EntityDirectory,
    pub stats: Arc<CoordinatorStats>,
    shutdown: CancellationToken,
    task: JoinHandle<Result<()>>,
}

/// Start a coordinator on 127.0.0.1 with ephemeral ports. `tweak` adjusts
/// the config before binding.
pub async fn start_coordinator(tweak: impl FnOnce(&mut CoordinatorConfig)) -> Result<TestCoordinator> {
    let mut config = CoordinatorConfig::default();
    config.network.bind_addr = "127.0.0.1".to_string();
    config.network.worker_port = 0;
    config.network.requester_port = 0;
    config.network.api_port = 0;
    config.scheduling.retry_interval_ms = 10;
    tweak(&mut config);

    let coordinator = Coordinator::bind(&config, Vec::new()).await?;
    let worker_addr = coordinator.worker_addr()?;
    let requester_addr = coordinator.requester_addr()?;
    let directory = coordinator.directory().clone();
    let stats = coordinator.stats();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(coordinator.run(shutdown.clone()));

    Ok(TestCoordinator {
        worker_addr,
        requester_addr,
        directory,
        stats,
        shutdown,
        task,
    })
}

impl TestCoordinator {
    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        tokio::time::timeout(STEP_TIMEOUT, self.task)
            .await
            .context("coordinator did not stop")??
    }

    /// Wait until `n` workers are registered.
    pub async fn wait_for_workers(&self, n: usize) -> Result<()> {
        wait_for_condition(|| self.directory.workers().len() == n).await
    }

    pub async fn wait_for_requesters(&self, n: usize) -> Result<()> {
        wait_for_condition(|| self.directory.requesters().len() == n).await
    }
}

/// Poll `cond` until it holds or [`STEP_TIMEOUT`] passes.
pub async fn wait_for_condition(mut cond: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not met within {:?}", STEP_TIMEOUT);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

async fn within<T>(what: &str, fut: impl Future<Output = T>) -> Result<T> {
    tokio::time::timeout(STEP_TIMEOUT, fut)
        .await
        .with_context(|| format!("timed out waiting for {what}"))
}

// ── Clients ───────────────────────────────────────────────────────────────────

/// A raw protocol client: a requester, or a worker after [`Peer::worker`].
pub struct Peer {
    reader: PacketReader<OwnedReadHalf>,
    writer: PacketWriter<OwnedWriteHalf>,
}

impl Peer {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: PacketReader::new(read_half),
            writer: PacketWriter::new(write_half, 100),
        })
    }

    /// Connect and handshake as a worker optimised for `specialty`.
    pub async fn worker(addr: SocketAddr, specialty: JobType) -> Result<Self> {
        let mut peer = Self::connect(addr).await?;
        peer.send(&handshake_packet(specialty)).await?;
        Ok(peer)
    }

    pub async fn send(&mut self, packet: &Packet) -> Result<()> {
        self.writer.send_packet(packet).await?;
        Ok(())
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self.writer.get_mut();
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    pub async fn request(&mut self, id: u64, job_type: JobType) -> Result<()> {
        self.send(&Job::new(id, job_type).request_packet()).await
    }

    /// Answer a dispatched job with `result`.
    pub async fn answer(&mut self, job: &Job, succeeded: bool, result: &[u8]) -> Result<()> {
        let reply = job.clone().with_outcome(succeeded, result.to_vec());
        self.writer
            .send_message(&reply.result_template(), result)
            .await?;
        Ok(())
    }

    /// Next whole message; malformed input is skipped.
    pub async fn recv(&mut self) -> Result<Packet> {
        loop {
            match within("a message", self.reader.next()).await?? {
                Inbound::Message(packet) => return Ok(packet),
                Inbound::Malformed(_) => continue,
                Inbound::Closed => bail!("connection closed"),
            }
        }
    }

    /// Next dispatched job, as a worker.
    pub async fn next_job(&mut self) -> Result<Job> {
        Ok(Job::from_request(&self.recv().await?)?)
    }

    /// Next result, as a requester.
    pub async fn next_result(&mut self) -> Result<Job> {
        Ok(Job::from_result(&self.recv().await?)?)
    }

    /// True once the coordinator has closed the connection.
    pub async fn closed_by_peer(&mut self) -> Result<bool> {
        loop {
            match within("close", self.reader.next()).await? {
                Ok(Inbound::Closed) | Err(_) => return Ok(true),
                Ok(Inbound::Malformed(_)) => continue,
                Ok(Inbound::Message(_)) => return Ok(false),
            }
        }
    }
}
