//! Coordinator: binds the listeners and runs every long-lived task until
//! shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use loadstar_core::config::CoordinatorConfig;

use crate::directory::{DirectoryQueues, EntityDirectory};
use crate::listener::{ConnectionSettings, Listener, Role};
use crate::observer::{CoordinatorStats, DirectoryObserver, Observers, TracingObserver};
use crate::router::ResultRouter;
use crate::scheduler::Scheduler;

pub struct Coordinator {
    directory: EntityDirectory,
    queues: DirectoryQueues,
    stats: Arc<CoordinatorStats>,
    settings: ConnectionSettings,
    workers: TcpListener,
    requesters: TcpListener,
}

impl Coordinator {
    /// Validate `config` and bind both listeners. `observers` are notified
    /// alongside the built-in log and counters.
    pub async fn bind(
        config: &CoordinatorConfig,
        observers: Vec<Arc<dyn DirectoryObserver>>,
    ) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(CoordinatorStats::default());
        let mut all: Vec<Arc<dyn DirectoryObserver>> = vec![Arc::new(TracingObserver), stats.clone()];
        all.extend(observers);
        let (directory, queues) = EntityDirectory::new(config.scheduling.clone(), Observers::new(all));

        let net = &config.network;
        let workers = TcpListener::bind((net.bind_addr.as_str(), net.worker_port))
            .await
            .with_context(|| format!("failed to bind worker port {}", net.worker_port))?;
        let requesters = TcpListener::bind((net.bind_addr.as_str(), net.requester_port))
            .await
            .with_context(|| format!("failed to bind requester port {}", net.requester_port))?;

        Ok(Self {
            directory,
            queues,
            stats,
            settings: ConnectionSettings {
                handshake_timeout: config.protocol.handshake_timeout(),
                chunk_size: config.protocol.chunk_size,
            },
            workers,
            requesters,
        })
    }

    pub fn worker_addr(&self) -> Result<SocketAddr> {
        Ok(self.workers.local_addr()?)
    }

    pub fn requester_addr(&self) -> Result<SocketAddr> {
        Ok(self.requesters.local_addr()?)
    }

    pub fn directory(&self) -> &EntityDirectory {
        &self.directory
    }

    pub fn stats(&self) -> Arc<CoordinatorStats> {
        self.stats.clone()
    }

    /// Run until `shutdown` fires or a core task exits, then stop every
    /// task and wait for open connections to wind down.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Self {
            directory,
            queues,
            settings,
            workers,
            requesters,
            ..
        } = self;
        let sessions = TaskTracker::new();

        let mut tasks = JoinSet::new();
        tasks.spawn(labelled(
            "scheduler",
            Scheduler::new(directory.clone(), queues.requests, shutdown.clone()).run(),
        ));
        tasks.spawn(labelled(
            "result router",
            ResultRouter::new(directory.clone(), queues.completions, shutdown.clone()).run(),
        ));
        for (role, listener) in [(Role::Worker, workers), (Role::Requester, requesters)] {
            let name = match role {
                Role::Worker => "worker listener",
                Role::Requester => "requester listener",
            };
            tasks.spawn(labelled(
                name,
                Listener::new(
                    role,
                    listener,
                    directory.clone(),
                    settings,
                    shutdown.clone(),
                    sessions.clone(),
                )
                .run(),
            ));
        }

        tokio::select! {
            _ = shutdown.cancelled() => tracing::info!("coordinator shutting down"),
            Some(exited) = tasks.join_next() => match exited {
                Ok((task, r)) => tracing::error!(task, "core task exited: {:?}", r),
                Err(e) => tracing::error!(error = %e, "core task panicked"),
            },
        }

        shutdown.cancel();
        while let Some(exited) = tasks.join_next().await {
            match exited {
                Ok((task, Ok(()))) => tracing::debug!(task, "core task stopped"),
                Ok((task, Err(e))) => tracing::error!(task, error = %e, "core task failed"),
                Err(e) => tracing::error!(error = %e, "core task panicked"),
            }
        }
        sessions.close();
        sessions.wait().await;
        tracing::info!(in_flight = directory.in_flight(), "coordinator stopped");
        Ok(())
    }
}

async fn labelled(
    name: &'static str,
    task: impl Future<Output = Result<()>>,
) -> (&'static str, Result<()>) {
    (name, task.await)
}
