//! loadstar-core: wire format, job model, identities and configuration.
//! All other loadstar crates depend on this one.

pub mod assembler;
pub mod config;
pub mod ids;
pub mod job;
pub mod packet;

pub use assembler::{InboundAssembler, MessageReassembler};
pub use ids::{IdRegistry, InternalId, RequesterId, WorkerId};
pub use job::{Job, JobError, JobType, TrackedJob};
pub use packet::{ArgKey, ArgValue, Packet, PacketDecoder, PacketError};
