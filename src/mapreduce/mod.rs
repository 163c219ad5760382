//! MapReduce master scheduler and its building blocks.

mod barrier;
mod caller;
mod handoff;
mod job;
mod local;
mod master;
mod registry;

pub use caller::WorkerCaller;
pub use handoff::Registrar;
pub use job::{DoJobArgs, JobType, WorkerReply, WorkerRequest};
pub use local::{LocalCluster, LocalWorker};
pub use master::{Master, MasterConfig};
pub use registry::WorkerInfo;

pub(crate) use barrier::{PhaseBarrier, PhaseCompleter};
pub(crate) use caller::{call_do_job, call_shutdown};
pub(crate) use handoff::HandoffQueue;
pub(crate) use registry::WorkerRegistry;
