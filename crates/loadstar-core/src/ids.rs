//! Identity registry: monotonic ids for jobs, workers and requesters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Coordinator-wide job id. The only key used for worker traffic.
    InternalId
);
id_type!(WorkerId);
id_type!(RequesterId);

/// Three independent counters, starting at zero.
///
/// `fetch_add` makes each counter strictly increasing and collision-free
/// no matter how many tasks draw from it.
#[derive(Debug, Default)]
pub struct IdRegistry {
    next_job: AtomicU64,
    next_worker: AtomicU64,
    next_requester: AtomicU64,
}

impl IdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_job_id(&self) -> InternalId {
        InternalId(self.next_job.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_worker_id(&self) -> WorkerId {
        WorkerId(self.next_worker.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_requester_id(&self) -> RequesterId {
        RequesterId(self.next_requester.fetch_add(1, Ordering::Relaxed))
    }
}
