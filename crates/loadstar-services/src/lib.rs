//! loadstar-services: the coordinator runtime: directory, queues,
//! scheduling, routing and per-connection sessions.

pub mod coordinator;
pub mod directory;
pub mod endpoint;
pub mod listener;
pub mod observer;
pub mod queue;
pub mod router;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use coordinator::Coordinator;
pub use directory::{
    DirectoryError, DirectoryQueues, EntityDirectory, JobOwner, Requester, RequesterBooks, Worker,
    WORKER_DISCONNECTED,
};
pub use observer::{
    CoordinatorStats, DirectoryEvent, DirectoryObserver, Observers, QueueKind, StatsSnapshot,
    TracingObserver,
};
pub use queue::{job_queue, JobQueue, JobQueueReceiver};
pub use router::{route, ResultRouter, Routing};
pub use scheduler::{select_worker, Candidate, Scheduler, NO_WORKER_AVAILABLE};
pub use session::{
    ConnectionSession, HandlerError, ReceiveEnd, SessionHandler, SessionReport, SessionState,
    SessionStateCell,
};
pub use transport::{Inbound, PacketReader, PacketWriter, TransportError};
