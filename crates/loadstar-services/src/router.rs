//! Result router: hands every finished job to the requester that asked
//! for it.

use tokio_util::sync::CancellationToken;

use loadstar_core::{RequesterId, TrackedJob};

use crate::directory::EntityDirectory;
use crate::observer::DirectoryEvent;
use crate::queue::JobQueueReceiver;

/// Where a finished job ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    Delivered { requester: RequesterId },
    /// The owning requester is gone or no longer accepting results.
    Undeliverable { requester: RequesterId },
    /// No owner on record; the job already reached an outcome.
    Unknown,
}

/// Route one finished job. The owner record is consumed either way.
pub fn route(directory: &EntityDirectory, job: TrackedJob) -> Routing {
    let Some(owner) = directory.take_owner(job.internal_id()) else {
        tracing::warn!(job_id = %job.internal_id(), "finished job has no owner, dropped");
        return Routing::Unknown;
    };
    let requester = owner.requester_id;
    let Some(target) = directory.requester(requester) else {
        directory.mark_undeliverable(&job, requester);
        return Routing::Undeliverable { requester };
    };

    let id = job.internal_id();
    match target.deliver(job) {
        Ok(()) => {
            directory
                .observers()
                .notify(DirectoryEvent::JobDelivered { job: id, requester });
            Routing::Delivered { requester }
        }
        Err(job) => {
            directory.mark_undeliverable(&job, requester);
            Routing::Undeliverable { requester }
        }
    }
}

pub struct ResultRouter {
    directory: EntityDirectory,
    completions: JobQueueReceiver,
    shutdown: CancellationToken,
}

impl ResultRouter {
    pub fn new(
        directory: EntityDirectory,
        completions: JobQueueReceiver,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            directory,
            completions,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        tracing::info!("result router started");
        while let Some(job) = self.completions.dequeue(&self.shutdown).await {
            let id = job.internal_id();
            let succeeded = job.succeeded();
            if let Routing::Delivered { requester } = route(&self.directory, job) {
                tracing::debug!(job_id = %id, requester_id = %requester, succeeded, "result routed");
            }
        }
        tracing::info!("result router shutting down");
        Ok(())
    }
}
