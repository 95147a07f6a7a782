//! Entity directory: every connected requester and worker, and the owner
//! of every job in flight.
//!
//! The scheduler, router, sessions and status API all read the same maps,
//! so an entity becomes visible to every lookup at the same instant.

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use loadstar_core::config::SchedulingConfig;
use loadstar_core::{IdRegistry, InternalId, Job, JobType, RequesterId, TrackedJob, WorkerId};

use crate::observer::{DirectoryEvent, Observers, QueueKind};
use crate::queue::{job_queue, JobQueue, JobQueueReceiver};

/// Result text for jobs whose worker went away before finishing them.
pub const WORKER_DISCONNECTED: &str = "WORKER_DISCONNECTED";

/// Completed jobs each worker keeps for inspection.
const COMPLETED_HISTORY: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Requester ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequesterBooks {
    pub requested: u64,
    pub completed: u64,
}

#[derive(Debug)]
pub struct Requester {
    id: RequesterId,
    peer: SocketAddr,
    connected_at: Instant,
    results: JobQueue,
    books: Mutex<RequesterBooks>,
}

impl Requester {
    pub fn id(&self) -> RequesterId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Results waiting to be written to the socket.
    pub fn queued(&self) -> usize {
        self.results.len()
    }

    pub fn books(&self) -> RequesterBooks {
        *lock(&self.books)
    }

    /// Count a result that made it onto the wire.
    pub fn record_delivery(&self) {
        lock(&self.books).completed += 1;
    }

    /// Queue a result for the session to write. Hands it back once the
    /// session has stopped sending.
    pub(crate) fn deliver(&self, job: TrackedJob) -> Result<(), TrackedJob> {
        self.results.enqueue(job)
    }
}

// ── Worker ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct WorkerBooks {
    /// Assigned or sent, not yet completed.
    outstanding: Vec<TrackedJob>,
    completed: VecDeque<TrackedJob>,
    completed_total: u64,
}

#[derive(Debug)]
pub struct Worker {
    id: WorkerId,
    peer: SocketAddr,
    specialty: JobType,
    connected_at: Instant,
    service_times: BTreeMap<JobType, u64>,
    jobs: JobQueue,
    books: Mutex<WorkerBooks>,
}

impl Worker {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn specialty(&self) -> JobType {
        self.specialty
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn service_time(&self, job_type: JobType) -> u64 {
        self.service_times.get(&job_type).copied().unwrap_or(u64::MAX)
    }

    /// Sum of service times over outstanding jobs.
    pub fn total_load(&self) -> u64 {
        lock(&self.books)
            .outstanding
            .iter()
            .map(|j| self.service_time(j.job_type()))
            .sum()
    }

    pub fn outstanding(&self) -> Vec<TrackedJob> {
        lock(&self.books).outstanding.clone()
    }

    pub fn outstanding_count(&self) -> usize {
        lock(&self.books).outstanding.len()
    }

    pub fn completed_total(&self) -> u64 {
        lock(&self.books).completed_total
    }

    /// Most recent completions, oldest first.
    pub fn recent_completions(&self) -> Vec<TrackedJob> {
        lock(&self.books).completed.iter().cloned().collect()
    }

    /// Jobs waiting to be written to the socket.
    pub fn queued(&self) -> usize {
        self.jobs.len()
    }

    /// False once the session has stopped taking jobs.
    pub fn accepting(&self) -> bool {
        !self.jobs.is_closed()
    }

    /// Put a job on the send queue and the outstanding list in one step.
    /// Hands the job back if the session no longer accepts work.
    pub(crate) fn assign(&self, job: TrackedJob) -> Result<(), TrackedJob> {
        let mut books = lock(&self.books);
        self.jobs.enqueue(job.clone())?;
        books.outstanding.push(job);
        Ok(())
    }

    /// Move a job from outstanding to completed under a single lock.
    pub(crate) fn complete(
        &self,
        id: InternalId,
        succeeded: bool,
        result: bytes::Bytes,
    ) -> Option<TrackedJob> {
        let mut books = lock(&self.books);
        let pos = books.outstanding.iter().position(|j| j.internal_id() == id)?;
        let job = books.outstanding.remove(pos).with_outcome(succeeded, result);
        books.completed.push_back(job.clone());
        if books.completed.len() > COMPLETED_HISTORY {
            books.completed.pop_front();
        }
        books.completed_total += 1;
        Some(job)
    }

    fn take_outstanding(&self) -> Vec<TrackedJob> {
        std::mem::take(&mut lock(&self.books).outstanding)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("worker {worker} has no outstanding job {job}")]
    UnknownJob { worker: WorkerId, job: u64 },
    #[error("request queue is closed")]
    RequestsClosed,
    #[error("completion queue is closed")]
    CompletionsClosed,
}

// ── Directory ─────────────────────────────────────────────────────────────────

/// Who a job belongs to. Lives from submission until its result is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOwner {
    pub requester_id: RequesterId,
    pub original_id: u64,
    pub job_type: JobType,
}

/// Consumer halves of the two coordinator-wide queues.
#[derive(Debug)]
pub struct DirectoryQueues {
    pub requests: JobQueueReceiver,
    pub completions: JobQueueReceiver,
}

#[derive(Debug)]
struct Inner {
    ids: IdRegistry,
    scheduling: SchedulingConfig,
    requesters: DashMap<RequesterId, Arc<Requester>>,
    workers: DashMap<WorkerId, Arc<Worker>>,
    owners: DashMap<InternalId, JobOwner>,
    requests: JobQueue,
    completions: JobQueue,
    worker_joined: Notify,
    observers: Observers,
}

/// Shared handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EntityDirectory {
    inner: Arc<Inner>,
}

impl EntityDirectory {
    pub fn new(scheduling: SchedulingConfig, observers: Observers) -> (Self, DirectoryQueues) {
        let (requests, requests_rx) = job_queue(QueueKind::Requests, observers.clone());
        let (completions, completions_rx) = job_queue(QueueKind::Completions, observers.clone());
        let directory = Self {
            inner: Arc::new(Inner {
                ids: IdRegistry::new(),
                scheduling,
                requesters: DashMap::new(),
                workers: DashMap::new(),
                owners: DashMap::new(),
                requests,
                completions,
                worker_joined: Notify::new(),
                observers,
            }),
        };
        (
            directory,
            DirectoryQueues {
                requests: requests_rx,
                completions: completions_rx,
            },
        )
    }

    pub fn observers(&self) -> &Observers {
        &self.inner.observers
    }

    pub fn scheduling(&self) -> &SchedulingConfig {
        &self.inner.scheduling
    }

    // ── Requesters ────────────────────────────────────────────────────────────

    pub fn register_requester(&self, peer: SocketAddr) -> (Arc<Requester>, JobQueueReceiver) {
        let id = self.inner.ids.next_requester_id();
        let (results, results_rx) = job_queue(QueueKind::Requester(id), self.inner.observers.clone());
        let requester = Arc::new(Requester {
            id,
            peer,
            connected_at: Instant::now(),
            results,
            books: Mutex::new(RequesterBooks::default()),
        });
        self.inner.requesters.insert(id, requester.clone());
        self.inner
            .observers
            .notify(DirectoryEvent::RequesterAdded { id, peer });
        (requester, results_rx)
    }

    /// Remove a requester. `unsent` are results its session never wrote;
    /// they are classified undeliverable.
    pub fn deregister_requester(&self, id: RequesterId, unsent: Vec<TrackedJob>) {
        if self.inner.requesters.remove(&id).is_none() {
            return;
        }
        for job in unsent {
            self.mark_undeliverable(&job, id);
        }
        self.inner
            .observers
            .notify(DirectoryEvent::RequesterRemoved { id });
    }

    pub fn requester(&self, id: RequesterId) -> Option<Arc<Requester>> {
        self.inner.requesters.get(&id).map(|r| r.value().clone())
    }

    /// All requesters, ordered by id.
    pub fn requesters(&self) -> Vec<Arc<Requester>> {
        let mut all: Vec<_> = self.inner.requesters.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(|r| r.id);
        all
    }

    // ── Workers ───────────────────────────────────────────────────────────────

    pub fn register_worker(
        &self,
        peer: SocketAddr,
        specialty: JobType,
    ) -> (Arc<Worker>, JobQueueReceiver) {
        let id = self.inner.ids.next_worker_id();
        let (jobs, jobs_rx) = job_queue(QueueKind::Worker(id), self.inner.observers.clone());
        let service_times = JobType::ALL
            .into_iter()
            .map(|t| (t, self.inner.scheduling.service_time(specialty, t)))
            .collect();
        let worker = Arc::new(Worker {
            id,
            peer,
            specialty,
            connected_at: Instant::now(),
            service_times,
            jobs,
            books: Mutex::new(WorkerBooks::default()),
        });
        self.inner.workers.insert(id, worker.clone());
        self.inner.observers.notify(DirectoryEvent::WorkerAdded {
            id,
            peer,
            specialty,
        });
        self.inner.worker_joined.notify_waiters();
        (worker, jobs_rx)
    }

    /// Remove a worker and fail its outstanding jobs back to their
    /// requesters. Call only after the worker's send queue is closed.
    /// Returns how many jobs were orphaned.
    pub fn deregister_worker(&self, id: WorkerId) -> usize {
        let Some((_, worker)) = self.inner.workers.remove(&id) else {
            return 0;
        };
        let orphaned = worker.take_outstanding();
        let count = orphaned.len();
        for job in orphaned {
            tracing::warn!(
                worker_id = %id,
                job_id = %job.internal_id(),
                "worker disconnected with job outstanding"
            );
            self.reject_job(job, WORKER_DISCONNECTED);
        }
        self.inner.observers.notify(DirectoryEvent::WorkerRemoved {
            id,
            orphaned: count,
        });
        count
    }

    pub fn worker(&self, id: WorkerId) -> Option<Arc<Worker>> {
        self.inner.workers.get(&id).map(|w| w.value().clone())
    }

    /// All workers, ordered by id.
    pub fn workers(&self) -> Vec<Arc<Worker>> {
        let mut all: Vec<_> = self.inner.workers.iter().map(|w| w.value().clone()).collect();
        all.sort_by_key(|w| w.id);
        all
    }

    /// Resolves the next time a worker registers. Enable it before
    /// checking for workers so a registration in between is not missed.
    pub fn worker_joined(&self) -> Notified<'_> {
        self.inner.worker_joined.notified()
    }

    // ── Jobs ──────────────────────────────────────────────────────────────────

    /// Record a request under a fresh internal id and queue it for
    /// scheduling.
    pub fn submit_request(
        &self,
        requester: &Requester,
        request: Job,
    ) -> Result<InternalId, DirectoryError> {
        let internal_id = self.inner.ids.next_job_id();
        self.inner.owners.insert(
            internal_id,
            JobOwner {
                requester_id: requester.id,
                original_id: request.id,
                job_type: request.job_type,
            },
        );
        let job = TrackedJob::new(internal_id, requester.id, &request);
        if self.inner.requests.enqueue(job).is_err() {
            self.inner.owners.remove(&internal_id);
            return Err(DirectoryError::RequestsClosed);
        }
        lock(&requester.books).requested += 1;
        Ok(internal_id)
    }

    /// Accept a worker's result and queue it for routing.
    pub fn complete_job(&self, worker: &Worker, result: Job) -> Result<TrackedJob, DirectoryError> {
        let job = worker
            .complete(InternalId(result.id), result.succeeded, result.result)
            .ok_or(DirectoryError::UnknownJob {
                worker: worker.id,
                job: result.id,
            })?;
        self.inner
            .completions
            .enqueue(job.clone())
            .map_err(|_| DirectoryError::CompletionsClosed)?;
        Ok(job)
    }

    /// Fail a job explicitly. It is routed back to its requester with
    /// `reason` as the result.
    pub fn reject_job(&self, job: TrackedJob, reason: &'static str) {
        let id = job.internal_id();
        self.inner
            .observers
            .notify(DirectoryEvent::JobRejected { job: id, reason });
        if self
            .inner
            .completions
            .enqueue(job.with_outcome(false, reason))
            .is_err()
        {
            tracing::warn!(job_id = %id, reason, "completion queue closed, rejected job dropped");
            self.inner.owners.remove(&id);
        }
    }

    pub fn owner_of(&self, id: InternalId) -> Option<JobOwner> {
        self.inner.owners.get(&id).map(|o| *o.value())
    }

    /// Remove and return the owner record of a job reaching its end.
    pub(crate) fn take_owner(&self, id: InternalId) -> Option<JobOwner> {
        self.inner.owners.remove(&id).map(|(_, owner)| owner)
    }

    pub(crate) fn mark_undeliverable(&self, job: &TrackedJob, requester: RequesterId) {
        self.inner.owners.remove(&job.internal_id());
        tracing::warn!(
            job_id = %job.internal_id(),
            original_id = job.original_id(),
            requester_id = %requester,
            "requester gone, result undeliverable"
        );
        self.inner.observers.notify(DirectoryEvent::JobUndeliverable {
            job: job.internal_id(),
            requester,
        });
    }

    /// Jobs submitted and not yet routed to a terminal outcome.
    pub fn in_flight(&self) -> usize {
        self.inner.owners.len()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.requests.len()
    }

    pub fn pending_completions(&self) -> usize {
        self.inner.completions.len()
    }
}
