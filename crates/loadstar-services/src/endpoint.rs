//! Session handlers for the two kinds of peer.

use std::sync::Arc;

use bytes::Bytes;

use loadstar_core::{Job, Packet, TrackedJob};

use crate::directory::{EntityDirectory, Requester, Worker};
use crate::session::{HandlerError, SessionHandler};

/// Worker side: jobs go out, results come in.
pub struct WorkerEndpoint {
    directory: EntityDirectory,
    worker: Arc<Worker>,
}

impl WorkerEndpoint {
    pub fn new(directory: EntityDirectory, worker: Arc<Worker>) -> Self {
        Self { directory, worker }
    }
}

impl SessionHandler for WorkerEndpoint {
    fn on_message(&self, message: Packet) -> Result<(), HandlerError> {
        let result = Job::from_result(&message)?;
        let job = self.directory.complete_job(&self.worker, result)?;
        tracing::debug!(
            worker_id = %self.worker.id(),
            job_id = %job.internal_id(),
            succeeded = job.succeeded(),
            "result received"
        );
        Ok(())
    }

    fn render(&self, job: &TrackedJob) -> (Packet, Bytes) {
        (job.dispatch_job().request_packet(), Bytes::new())
    }
}

/// Requester side: requests come in, results go out.
pub struct RequesterEndpoint {
    directory: EntityDirectory,
    requester: Arc<Requester>,
}

impl RequesterEndpoint {
    pub fn new(directory: EntityDirectory, requester: Arc<Requester>) -> Self {
        Self {
            directory,
            requester,
        }
    }
}

impl SessionHandler for RequesterEndpoint {
    fn on_message(&self, message: Packet) -> Result<(), HandlerError> {
        let request = Job::from_request(&message)?;
        let original_id = request.id;
        let internal_id = self.directory.submit_request(&self.requester, request)?;
        tracing::debug!(
            requester_id = %self.requester.id(),
            original_id,
            job_id = %internal_id,
            "request accepted"
        );
        Ok(())
    }

    fn render(&self, job: &TrackedJob) -> (Packet, Bytes) {
        let delivery = job.delivery_job();
        (delivery.result_template(), delivery.result.clone())
    }

    fn on_sent(&self, _job: &TrackedJob) {
        self.requester.record_delivery();
    }
}
