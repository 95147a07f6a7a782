//! Job queues: unbounded FIFOs between tasks.
//!
//! Many producers, one consumer. Dequeue blocks until a job arrives or the
//! caller's cancellation token fires, whichever comes first.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use loadstar_core::TrackedJob;

use crate::observer::{DirectoryEvent, Observers, QueueKind};

/// Create a connected producer/consumer pair.
pub fn job_queue(kind: QueueKind, observers: Observers) -> (JobQueue, JobQueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        JobQueue {
            tx,
            depth: depth.clone(),
            kind,
            observers: observers.clone(),
        },
        JobQueueReceiver {
            rx,
            depth,
            kind,
            observers,
        },
    )
}

/// Producer half. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<TrackedJob>,
    depth: Arc<AtomicUsize>,
    kind: QueueKind,
    observers: Observers,
}

impl JobQueue {
    /// Append a job. Hands it back if the consumer is gone.
    pub fn enqueue(&self, job: TrackedJob) -> Result<(), TrackedJob> {
        let id = job.internal_id();
        self.depth.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(job)) = self.tx.send(job) {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(job);
        }
        self.observers.notify(DirectoryEvent::JobEnqueued {
            queue: self.kind,
            job: id,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the consumer has closed or dropped its half.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct JobQueueReceiver {
    rx: mpsc::UnboundedReceiver<TrackedJob>,
    depth: Arc<AtomicUsize>,
    kind: QueueKind,
    observers: Observers,
}

impl JobQueueReceiver {
    /// Wait for the next job. `None` once `cancel` fires or every producer
    /// is gone.
    pub async fn dequeue(&mut self, cancel: &CancellationToken) -> Option<TrackedJob> {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            job = self.rx.recv() => job,
        }?;
        self.took(&job);
        Some(job)
    }

    pub fn try_dequeue(&mut self) -> Option<TrackedJob> {
        let job = self.rx.try_recv().ok()?;
        self.took(&job);
        Some(job)
    }

    /// Refuse further jobs. Already queued jobs stay available.
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Close the queue and take everything left in it.
    pub fn drain(&mut self) -> Vec<TrackedJob> {
        self.close();
        std::iter::from_fn(|| self.try_dequeue()).collect()
    }

    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn took(&self, job: &TrackedJob) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
        self.observers.notify(DirectoryEvent::JobDequeued {
            queue: self.kind,
            job: job.internal_id(),
        });
    }
}
