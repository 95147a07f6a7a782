//! HTTP API handlers: exposes coordinator state as JSON.

pub mod status;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use loadstar_services::{CoordinatorStats, EntityDirectory};

#[derive(Clone)]
pub struct ApiState {
    pub directory: EntityDirectory,
    pub stats: Arc<CoordinatorStats>,
    /// Cancelling this stops the coordinator.
    pub shutdown: CancellationToken,
}
