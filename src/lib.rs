//! Viewmaster: two coordination services for fault-tolerant systems.
//!
//! - A primary/backup **view service** that decides which server is primary
//!   and which is backup, failing over when heartbeats stop.
//! - A **MapReduce master** that schedules Map then Reduce jobs over a pool
//!   of failure-prone workers until every job has completed.
//!
//! The network transport is external; workers are reached through the
//! `WorkerCaller` trait, and remote failures surface as `CallError`.

#[macro_use]
mod utils;

mod mapreduce;
mod transport;
mod viewservice;

pub use utils::{logger_init, ViewmasterError, ME};

pub use transport::CallError;

pub use viewservice::{View, ViewServer, ViewServerConfig, Viewnum};

pub use mapreduce::{
    DoJobArgs, JobType, LocalCluster, LocalWorker, Master, MasterConfig,
    Registrar, WorkerCaller, WorkerInfo, WorkerReply, WorkerRequest,
};
