//! In-process worker pool reachable through the `WorkerCaller` seam.
//!
//! Workers here do not run any user Map/Reduce function; they only account
//! for the jobs they accept. Failures can be scripted per worker or rolled
//! at random, which makes the pool useful for simulations and tests of the
//! master's retry behavior.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::mapreduce::{DoJobArgs, WorkerCaller, WorkerReply, WorkerRequest};
use crate::transport::CallError;
use crate::utils::ViewmasterError;

use async_trait::async_trait;

use rand::Rng;

use tokio::time::{self, Duration};

/// One simulated worker.
#[derive(Debug)]
pub struct LocalWorker {
    /// Endpoint name.
    name: String,

    /// Jobs completed so far.
    njobs: AtomicU64,

    /// Currently executing a job?
    busy: AtomicBool,

    /// Crashed or shut down; unreachable from then on.
    down: AtomicBool,

    /// Number of upcoming job calls to fail on purpose.
    fail_next: AtomicU64,

    /// Probability that a job call fails.
    fail_prob: f64,

    /// Simulated time spent executing one job.
    job_delay: Duration,
}

impl LocalWorker {
    /// Endpoint name of this worker.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Makes the next `n` job calls fail as unreachable.
    pub fn fail_next(&self, n: u64) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Crashes this worker; every later call fails as unreachable.
    pub fn crash(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    /// Has this worker crashed or been shut down?
    pub fn is_down(&self) -> bool {
        self.down.load(Ordering::SeqCst)
    }

    /// Jobs completed so far.
    pub fn njobs(&self) -> u64 {
        self.njobs.load(Ordering::SeqCst)
    }

    /// Decides whether this job call should fail.
    fn roll_failure(&self) -> bool {
        let scripted = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            })
            .is_ok();
        scripted
            || (self.fail_prob > 0.0
                && rand::thread_rng().gen_bool(self.fail_prob))
    }
}

/// Clears a worker's busy flag when the job call ends, including when the
/// caller gives up on it midway.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A pool of in-process workers keyed by endpoint name.
#[derive(Debug, Default)]
pub struct LocalCluster {
    /// Map from endpoint name -> worker.
    workers: RwLock<HashMap<String, Arc<LocalWorker>>>,

    /// Every accepted job assignment, in acceptance order.
    assignments: Mutex<Vec<(String, DoJobArgs)>>,

    /// Number of job calls that reached an already busy worker.
    overlaps: AtomicU64,
}

impl LocalCluster {
    /// Creates an empty pool.
    pub fn new() -> Self {
        LocalCluster::default()
    }

    /// Adds a worker that fails each job call with probability `fail_prob`
    /// and otherwise spends `job_delay` on it.
    pub fn add_worker(
        &self,
        name: &str,
        fail_prob: f64,
        job_delay: Duration,
    ) -> Result<Arc<LocalWorker>, ViewmasterError> {
        if !(0.0..=1.0).contains(&fail_prob) {
            return logged_err!("invalid fail_prob {} for '{}'", fail_prob, name);
        }

        let mut workers =
            self.workers.write().unwrap_or_else(PoisonError::into_inner);
        if workers.contains_key(name) {
            return logged_err!("duplicate local worker '{}'", name);
        }
        let worker = Arc::new(LocalWorker {
            name: name.into(),
            njobs: AtomicU64::new(0),
            busy: AtomicBool::new(false),
            down: AtomicBool::new(false),
            fail_next: AtomicU64::new(0),
            fail_prob,
            job_delay,
        });
        workers.insert(name.into(), Arc::clone(&worker));
        Ok(worker)
    }

    /// Looks up a worker by endpoint name.
    pub fn worker(&self, name: &str) -> Option<Arc<LocalWorker>> {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Copy of the accepted assignments log.
    pub fn assignments(&self) -> Vec<(String, DoJobArgs)> {
        self.assignments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of job calls that found their worker already busy.
    pub fn overlaps(&self) -> u64 {
        self.overlaps.load(Ordering::SeqCst)
    }

    /// Executes one job call on `worker`.
    async fn do_job(
        &self,
        worker: &LocalWorker,
        args: DoJobArgs,
    ) -> Result<WorkerReply, CallError> {
        if worker.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
            return Err(CallError::Protocol(format!(
                "worker '{}' already busy",
                worker.name
            )));
        }
        let _busy = BusyGuard(&worker.busy);

        if worker.roll_failure() {
            pf_debug!(
                "worker '{}' failing {} {}",
                worker.name,
                args.operation,
                args.job_number
            );
            return Err(CallError::Unreachable);
        }

        self.assignments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((worker.name.clone(), args));
        if !worker.job_delay.is_zero() {
            time::sleep(worker.job_delay).await;
        }
        worker.njobs.fetch_add(1, Ordering::SeqCst);
        Ok(WorkerReply::DoJob { ok: true })
    }
}

#[async_trait]
impl WorkerCaller for LocalCluster {
    async fn call(
        &self,
        worker: &str,
        req: WorkerRequest,
    ) -> Result<WorkerReply, CallError> {
        let worker = self.worker(worker).ok_or(CallError::Unreachable)?;
        if worker.is_down() {
            return Err(CallError::Unreachable);
        }

        match req {
            WorkerRequest::DoJob(args) => self.do_job(&worker, args).await,
            WorkerRequest::Shutdown => {
                worker.down.store(true, Ordering::SeqCst);
                Ok(WorkerReply::Shutdown {
                    njobs: worker.njobs(),
                })
            }
        }
    }
}
