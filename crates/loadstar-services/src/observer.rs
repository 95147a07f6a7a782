//! Observer hooks: entity and queue events for whoever is watching.
//!
//! The coordinator emits events and never knows who consumes them. Status
//! surfaces, logs and tests all plug in here.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use loadstar_core::{InternalId, JobType, RequesterId, WorkerId};

/// Which queue a job moved through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Requests,
    Completions,
    Worker(WorkerId),
    Requester(RequesterId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryEvent {
    RequesterAdded { id: RequesterId, peer: SocketAddr },
    RequesterRemoved { id: RequesterId },
    WorkerAdded { id: WorkerId, peer: SocketAddr, specialty: JobType },
    WorkerRemoved { id: WorkerId, orphaned: usize },
    JobEnqueued { queue: QueueKind, job: InternalId },
    JobDequeued { queue: QueueKind, job: InternalId },
    JobDelivered { job: InternalId, requester: RequesterId },
    JobUndeliverable { job: InternalId, requester: RequesterId },
    JobRejected { job: InternalId, reason: &'static str },
    PacketDiscarded { peer: SocketAddr },
}

pub trait DirectoryObserver: Send + Sync + 'static {
    fn on_event(&self, event: &DirectoryEvent);
}

/// Fan-out to every registered observer.
#[derive(Clone, Default)]
pub struct Observers(Arc<Vec<Arc<dyn DirectoryObserver>>>);

impl Observers {
    pub fn new(observers: Vec<Arc<dyn DirectoryObserver>>) -> Self {
        Self(Arc::new(observers))
    }

    pub fn notify(&self, event: DirectoryEvent) {
        for observer in self.0.iter() {
            observer.on_event(&event);
        }
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Observers({})", self.0.len())
    }
}

/// Logs every event at trace level.
pub struct TracingObserver;

impl DirectoryObserver for TracingObserver {
    fn on_event(&self, event: &DirectoryEvent) {
        tracing::trace!(?event, "directory event");
    }
}

// ── Counters ──────────────────────────────────────────────────────────────────

/// Running totals, fed by events.
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    requested: AtomicU64,
    delivered: AtomicU64,
    undeliverable: AtomicU64,
    rejected: AtomicU64,
    discarded: AtomicU64,
    workers_seen: AtomicU64,
    requesters_seen: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub requested: u64,
    pub delivered: u64,
    pub undeliverable: u64,
    pub rejected: u64,
    pub discarded: u64,
    pub workers_seen: u64,
    pub requesters_seen: u64,
}

impl CoordinatorStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            requested: get(&self.requested),
            delivered: get(&self.delivered),
            undeliverable: get(&self.undeliverable),
            rejected: get(&self.rejected),
            discarded: get(&self.discarded),
            workers_seen: get(&self.workers_seen),
            requesters_seen: get(&self.requesters_seen),
        }
    }
}

impl DirectoryObserver for CoordinatorStats {
    fn on_event(&self, event: &DirectoryEvent) {
        let counter = match event {
            DirectoryEvent::JobEnqueued {
                queue: QueueKind::Requests,
                ..
            } => &self.requested,
            DirectoryEvent::JobDelivered { .. } => &self.delivered,
            DirectoryEvent::JobUndeliverable { .. } => &self.undeliverable,
            DirectoryEvent::JobRejected { .. } => &self.rejected,
            DirectoryEvent::PacketDiscarded { .. } => &self.discarded,
            DirectoryEvent::WorkerAdded { .. } => &self.workers_seen,
            DirectoryEvent::RequesterAdded { .. } => &self.requesters_seen,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
