//! Job description and worker-facing request/reply messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which phase a job belongs to.
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone, Serialize, Deserialize)]
pub enum JobType {
    Map,
    Reduce,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JobType::Map => write!(f, "Map"),
            JobType::Reduce => write!(f, "Reduce"),
        }
    }
}

/// Arguments of one job assignment.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct DoJobArgs {
    /// Input file the whole run operates on.
    pub file: String,

    /// Phase of this job.
    pub operation: JobType,

    /// Index of this job within its phase.
    pub job_number: usize,

    /// Number of jobs in the other phase: nReduce for a Map job (output
    /// partitions to produce), nMap for a Reduce job (input shards to read).
    pub num_other_phase: usize,
}

impl DoJobArgs {
    /// Composes the assignment of job `job_number` of phase `operation` for
    /// a run over `file` with `n_map` Map and `n_reduce` Reduce jobs.
    pub fn new(
        file: &str,
        operation: JobType,
        job_number: usize,
        n_map: usize,
        n_reduce: usize,
    ) -> Self {
        let num_other_phase = match operation {
            JobType::Map => n_reduce,
            JobType::Reduce => n_map,
        };
        DoJobArgs {
            file: file.into(),
            operation,
            job_number,
            num_other_phase,
        }
    }
}

/// Request from the master to a worker.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum WorkerRequest {
    /// Execute one job.
    DoJob(DoJobArgs),

    /// Exit, reporting how many jobs were completed.
    Shutdown,
}

/// Reply from a worker to the master.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum WorkerReply {
    /// Whether the job was executed successfully.
    DoJob { ok: bool },

    /// Number of jobs this worker completed over its lifetime.
    Shutdown { njobs: u64 },
}
