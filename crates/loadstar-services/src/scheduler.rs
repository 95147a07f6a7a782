//! Scheduler: places each requested job on the worker that should finish
//! it soonest.
//!
//! For every job: keep the least-loaded worker of each specialty, predict
//! `load + service_time` for those candidates, and take the minimum. Ties
//! go to the lowest worker id. With no worker connected the job is parked
//! until one registers, and rejected back to its requester if the wait
//! outlasts the starvation timeout.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use loadstar_core::{JobType, TrackedJob, WorkerId};

use crate::directory::EntityDirectory;
use crate::queue::JobQueueReceiver;

/// Result text for jobs that waited too long for any worker.
pub const NO_WORKER_AVAILABLE: &str = "NO_WORKER_AVAILABLE";

/// One worker's numbers at decision time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub id: WorkerId,
    pub specialty: JobType,
    pub load: u64,
    /// Service time of the job being placed, on this worker.
    pub service_time: u64,
}

impl Candidate {
    fn predicted(&self) -> u64 {
        self.load.saturating_add(self.service_time)
    }
}

/// Pick the worker with the lowest predicted completion time.
pub fn select_worker(candidates: &[Candidate]) -> Option<WorkerId> {
    let mut per_specialty: BTreeMap<JobType, &Candidate> = BTreeMap::new();
    for c in candidates {
        per_specialty
            .entry(c.specialty)
            .and_modify(|best| {
                if (c.load, c.id) < (best.load, best.id) {
                    *best = c;
                }
            })
            .or_insert(c);
    }
    per_specialty
        .values()
        .min_by_key(|c| (c.predicted(), c.id))
        .map(|c| c.id)
}

pub struct Scheduler {
    directory: EntityDirectory,
    requests: JobQueueReceiver,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        directory: EntityDirectory,
        requests: JobQueueReceiver,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            directory,
            requests,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        tracing::info!("scheduler started");
        while let Some(job) = self.requests.dequeue(&self.shutdown).await {
            self.place(job).await;
        }
        tracing::info!("scheduler shutting down");
        Ok(())
    }

    /// Assign `job`, waiting for a worker if none is connected.
    async fn place(&self, mut job: TrackedJob) {
        let scheduling = self.directory.scheduling();
        let retry = scheduling.retry_interval().max(Duration::from_millis(1));
        // Queue time counts against the timeout.
        let submitted = Instant::from_std(job.submitted_at());
        let deadline = scheduling.starvation_timeout().map(|t| submitted + t);
        let mut parked = false;

        loop {
            let joined = self.directory.worker_joined();
            tokio::pin!(joined);
            joined.as_mut().enable();

            match self.try_assign(job) {
                Ok(worker_id) => {
                    if parked {
                        tracing::info!(worker_id = %worker_id, "parked job assigned");
                    }
                    return;
                }
                Err(back) => job = back,
            }

            if !parked {
                parked = true;
                tracing::info!(job_id = %job.internal_id(), "no worker available, job parked");
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::warn!(
                    job_id = %job.internal_id(),
                    requester_id = %job.requester_id(),
                    "no worker arrived in time, rejecting job"
                );
                self.directory.reject_job(job, NO_WORKER_AVAILABLE);
                return;
            }

            let wait_until = match deadline {
                Some(d) => d.min(Instant::now() + retry),
                None => Instant::now() + retry,
            };
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!(job_id = %job.internal_id(), "shutdown with job parked");
                    return;
                }
                _ = &mut joined => {}
                _ = tokio::time::sleep_until(wait_until) => {}
            }
        }
    }

    /// One placement attempt over the current worker set. Workers that
    /// stop accepting mid-attempt are skipped.
    fn try_assign(&self, mut job: TrackedJob) -> Result<WorkerId, TrackedJob> {
        let mut workers = self.directory.workers();
        loop {
            workers.retain(|w| w.accepting());
            let candidates: Vec<Candidate> = workers
                .iter()
                .map(|w| Candidate {
                    id: w.id(),
                    specialty: w.specialty(),
                    load: w.total_load(),
                    service_time: w.service_time(job.job_type()),
                })
                .collect();
            let Some(chosen) = select_worker(&candidates) else {
                return Err(job);
            };
            let Some(pos) = workers.iter().position(|w| w.id() == chosen) else {
                return Err(job);
            };

            let internal_id = job.internal_id();
            match workers[pos].assign(job.with_worker(chosen)) {
                Ok(()) => {
                    tracing::debug!(
                        job_id = %internal_id,
                        worker_id = %chosen,
                        "job assigned"
                    );
                    return Ok(chosen);
                }
                Err(back) => {
                    job = back;
                    workers.remove(pos);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use loadstar_core::config::SchedulingConfig;
    use loadstar_core::{InternalId, Job, RequesterId};

    use super::*;
    use crate::directory::DirectoryQueues;
    use crate::observer::Observers;

    fn candidate(id: u64, specialty: JobType, load: u64, job_type: JobType) -> Candidate {
        Candidate {
            id: WorkerId(id),
            specialty,
            load,
            service_time: SchedulingConfig::default().service_time(specialty, job_type),
        }
    }

    #[test]
    fn tie_on_predicted_time_goes_to_lowest_id() {
        // W1: specialty A, load 8 → 10.  W2: specialty B, load 0 → 10.
        let candidates = [
            candidate(1, JobType::A, 8, JobType::A),
            candidate(2, JobType::B, 0, JobType::A),
        ];
        assert_eq!(select_worker(&candidates), Some(WorkerId(1)));
    }

    #[test]
    fn lightest_same_type_worker_beats_idle_generalist() {
        // W1 → 6, W2 is not a candidate, W3 → 10.
        let candidates = [
            candidate(1, JobType::A, 4, JobType::A),
            candidate(2, JobType::A, 10, JobType::A),
            candidate(3, JobType::B, 0, JobType::A),
        ];
        assert_eq!(select_worker(&candidates), Some(WorkerId(1)));
    }

    #[test]
    fn prefers_specialist_when_generalist_is_slower() {
        let candidates = [
            candidate(1, JobType::B, 0, JobType::A),
            candidate(2, JobType::A, 4, JobType::A),
        ];
        assert_eq!(select_worker(&candidates), Some(WorkerId(2)));
    }

    #[test]
    fn least_loaded_worker_represents_its_specialty() {
        let candidates = [
            candidate(1, JobType::A, 6, JobType::A),
            candidate(2, JobType::A, 2, JobType::A),
            candidate(3, JobType::A, 2, JobType::A),
            candidate(4, JobType::B, 0, JobType::A),
        ];
        assert_eq!(select_worker(&candidates), Some(WorkerId(2)));
    }

    #[test]
    fn no_candidates_no_choice() {
        assert_eq!(select_worker(&[]), None);
    }

    fn setup(
        starvation_timeout_ms: u64,
    ) -> (EntityDirectory, DirectoryQueues, CancellationToken) {
        let scheduling = SchedulingConfig {
            retry_interval_ms: 10,
            starvation_timeout_ms,
            ..SchedulingConfig::default()
        };
        let (dir, queues) = EntityDirectory::new(scheduling, Observers::default());
        (dir, queues, CancellationToken::new())
    }

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn assigns_to_registered_worker() {
        let (dir, queues, shutdown) = setup(0);
        let (requester, _results) = dir.register_requester(peer(1));
        let (worker, mut jobs) = dir.register_worker(peer(2), JobType::A);
        let task = tokio::spawn(Scheduler::new(dir.clone(), queues.requests, shutdown.clone()).run());

        dir.submit_request(&requester, Job::new(11, JobType::A)).unwrap();
        let sent = jobs.dequeue(&shutdown).await.unwrap();
        assert_eq!(sent.worker_id(), Some(worker.id()));
        assert_eq!(sent.original_id(), 11);
        assert_eq!(worker.total_load(), 2);

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn parked_job_waits_for_first_worker() {
        let (dir, queues, shutdown) = setup(0);
        let (requester, _results) = dir.register_requester(peer(1));
        let task = tokio::spawn(Scheduler::new(dir.clone(), queues.requests, shutdown.clone()).run());

        let id = dir.submit_request(&requester, Job::new(1, JobType::B)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(dir.owner_of(id).is_some());

        let (worker, mut jobs) = dir.register_worker(peer(2), JobType::A);
        let sent = tokio::time::timeout(Duration::from_secs(2), jobs.dequeue(&shutdown))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sent.internal_id(), id);
        assert_eq!(worker.outstanding_count(), 1);

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn starved_job_is_rejected_to_requester() {
        let (dir, mut queues, shutdown) = setup(30);
        let (requester, _results) = dir.register_requester(peer(1));
        let task = tokio::spawn(Scheduler::new(dir.clone(), queues.requests, shutdown.clone()).run());

        let id = dir.submit_request(&requester, Job::new(1, JobType::A)).unwrap();
        let rejected = tokio::time::timeout(Duration::from_secs(2), queues.completions.dequeue(&shutdown))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rejected.internal_id(), id);
        assert!(!rejected.succeeded());
        assert_eq!(&rejected.result()[..], NO_WORKER_AVAILABLE.as_bytes());

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn queued_jobs_starve_on_their_own_clock() {
        let (dir, mut queues, shutdown) = setup(150);
        let (requester, _results) = dir.register_requester(peer(1));
        let task = tokio::spawn(Scheduler::new(dir.clone(), queues.requests, shutdown.clone()).run());

        let started = Instant::now();
        for n in 0..5 {
            dir.submit_request(&requester, Job::new(n, JobType::A)).unwrap();
        }
        for _ in 0..5 {
            let rejected = tokio::time::timeout(Duration::from_secs(2), queues.completions.dequeue(&shutdown))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(&rejected.result()[..], NO_WORKER_AVAILABLE.as_bytes());
        }
        // One timeout for the lot, not one per queued job.
        assert!(started.elapsed() < Duration::from_millis(450), "took {:?}", started.elapsed());

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn closed_worker_is_skipped() {
        let (dir, queues, shutdown) = setup(0);
        let (requester, _results) = dir.register_requester(peer(1));
        let (_gone, gone_jobs) = dir.register_worker(peer(2), JobType::A);
        let (live, mut live_jobs) = dir.register_worker(peer(3), JobType::B);
        drop(gone_jobs);
        let task = tokio::spawn(Scheduler::new(dir.clone(), queues.requests, shutdown.clone()).run());

        dir.submit_request(&requester, Job::new(1, JobType::A)).unwrap();
        let sent = live_jobs.dequeue(&shutdown).await.unwrap();
        assert_eq!(sent.worker_id(), Some(live.id()));

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[test]
    fn load_counts_outstanding_service_times() {
        let (dir, _queues, _shutdown) = setup(0);
        let (worker, _jobs) = dir.register_worker(peer(2), JobType::A);
        for (n, t) in [(0, JobType::A), (1, JobType::B)] {
            let job = TrackedJob::new(InternalId(n), RequesterId(0), &Job::new(n, t));
            worker.assign(job).unwrap();
        }
        assert_eq!(worker.total_load(), 12);
    }
}
