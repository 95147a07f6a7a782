//! Jobs: what requesters submit, what workers execute, and the
//! coordinator's record of each one in flight.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ids::{InternalId, RequesterId, WorkerId};
use crate::packet::{parse_flag, ArgKey, Packet};

// ── Job type ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobType {
    A,
    B,
}

impl JobType {
    pub const ALL: [JobType; 2] = [JobType::A, JobType::B];

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::A => "A",
            JobType::B => "B",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| JobError::Invalid {
                key: ArgKey::JobType,
                value: s.to_string(),
            })
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// A packet that framed correctly but does not describe a job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("missing {0}")]
    Missing(ArgKey),
    #[error("invalid {key} value {value:?}")]
    Invalid { key: ArgKey, value: String },
}

fn required(packet: &Packet, key: ArgKey) -> Result<&str, JobError> {
    packet.scalar(key).ok_or(JobError::Missing(key))
}

fn parse_job_type(packet: &Packet, key: ArgKey) -> Result<JobType, JobError> {
    let raw = required(packet, key)?;
    raw.parse().map_err(|_| JobError::Invalid {
        key,
        value: raw.to_string(),
    })
}

fn parse_id(packet: &Packet) -> Result<u64, JobError> {
    let raw = required(packet, ArgKey::JobId)?;
    raw.parse().map_err(|_| JobError::Invalid {
        key: ArgKey::JobId,
        value: raw.to_string(),
    })
}

// ── Job ───────────────────────────────────────────────────────────────────────

/// A job as seen on the wire. Two jobs are equal when their ids are.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: u64,
    pub job_type: JobType,
    pub succeeded: bool,
    pub result: Bytes,
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}

impl Job {
    pub fn new(id: u64, job_type: JobType) -> Self {
        Self {
            id,
            job_type,
            succeeded: false,
            result: Bytes::new(),
        }
    }

    pub fn with_outcome(mut self, succeeded: bool, result: impl Into<Bytes>) -> Self {
        self.succeeded = succeeded;
        self.result = result.into();
        self
    }

    /// Parse a request. `JOB_ID` and `JOB_TYPE` are required.
    pub fn from_request(packet: &Packet) -> Result<Self, JobError> {
        Ok(Job::new(parse_id(packet)?, parse_job_type(packet, ArgKey::JobType)?))
    }

    /// Parse a result. `JOB_SUCCEEDED` is required on top of the request
    /// fields; the message is the result.
    pub fn from_result(packet: &Packet) -> Result<Self, JobError> {
        let job = Job::from_request(packet)?;
        let raw = required(packet, ArgKey::JobSucceeded)?;
        let succeeded = parse_flag(raw).ok_or_else(|| JobError::Invalid {
            key: ArgKey::JobSucceeded,
            value: raw.to_string(),
        })?;
        Ok(job.with_outcome(succeeded, packet.message().clone()))
    }

    /// Request or dispatch packet: id and type only.
    pub fn request_packet(&self) -> Packet {
        Packet::new()
            .arg(ArgKey::JobId, self.id)
            .arg(ArgKey::JobType, self.job_type.as_str())
    }

    /// Result arguments. The result itself goes out as the message, split
    /// across packets when long.
    pub fn result_template(&self) -> Packet {
        self.request_packet()
            .arg(ArgKey::JobSucceeded, self.succeeded)
    }
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// The first packet a worker sends: the job type it is fastest at.
pub fn handshake_packet(specialty: JobType) -> Packet {
    Packet::new().arg(ArgKey::OptimizedForJobType, specialty.as_str())
}

pub fn parse_handshake(packet: &Packet) -> Result<JobType, JobError> {
    parse_job_type(packet, ArgKey::OptimizedForJobType)
}

// ── Tracked job ───────────────────────────────────────────────────────────────

/// The coordinator's immutable record of one submitted job.
///
/// Updates return a new value. Equality is by internal id.
#[derive(Debug, Clone)]
pub struct TrackedJob {
    internal_id: InternalId,
    original_id: u64,
    job_type: JobType,
    requester_id: RequesterId,
    worker_id: Option<WorkerId>,
    succeeded: bool,
    result: Bytes,
    submitted_at: Instant,
}

impl PartialEq for TrackedJob {
    fn eq(&self, other: &Self) -> bool {
        self.internal_id == other.internal_id
    }
}

impl Eq for TrackedJob {}

impl TrackedJob {
    pub fn new(internal_id: InternalId, requester_id: RequesterId, request: &Job) -> Self {
        Self {
            internal_id,
            original_id: request.id,
            job_type: request.job_type,
            requester_id,
            worker_id: None,
            succeeded: false,
            result: Bytes::new(),
            submitted_at: Instant::now(),
        }
    }

    pub fn internal_id(&self) -> InternalId {
        self.internal_id
    }

    pub fn original_id(&self) -> u64 {
        self.original_id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn requester_id(&self) -> RequesterId {
        self.requester_id
    }

    pub fn worker_id(&self) -> Option<WorkerId> {
        self.worker_id
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn result(&self) -> &Bytes {
        &self.result
    }

    /// When the coordinator accepted the request.
    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    pub fn with_worker(self, worker_id: WorkerId) -> Self {
        Self {
            worker_id: Some(worker_id),
            ..self
        }
    }

    pub fn with_outcome(self, succeeded: bool, result: impl Into<Bytes>) -> Self {
        Self {
            succeeded,
            result: result.into(),
            ..self
        }
    }

    /// The job as a worker sees it: keyed by internal id.
    pub fn dispatch_job(&self) -> Job {
        Job::new(self.internal_id.0, self.job_type)
    }

    /// The job as its requester sees it: original id restored.
    pub fn delivery_job(&self) -> Job {
        Job::new(self.original_id, self.job_type).with_outcome(self.succeeded, self.result.clone())
    }
}
