//! MapReduce master scheduler.
//!
//! Runs every Map job, waits for all of them, runs every Reduce job, waits
//! for all of them, then tells every known worker to shut down. Each job is
//! driven by its own dispatch loop that keeps retrying on whatever worker
//! becomes available next until some worker completes it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::mapreduce::{
    call_do_job, call_shutdown, DoJobArgs, HandoffQueue, JobType,
    PhaseBarrier, PhaseCompleter, Registrar, WorkerCaller, WorkerInfo,
    WorkerRegistry,
};
use crate::utils::ViewmasterError;

use serde::Deserialize;

use tokio::task::JoinSet;
use tokio::time::Duration;

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct MasterConfig {
    /// Per-call timeout towards workers in millisecs; 0 means wait for as
    /// long as the transport does.
    pub call_timeout_ms: u64,
}

#[allow(clippy::derivable_impls)]
impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig { call_timeout_ms: 0 }
    }
}

/// Everything one dispatch loop needs, shared by all loops of a run.
#[derive(Clone)]
struct DispatchCtx {
    caller: Arc<dyn WorkerCaller>,
    handoff: HandoffQueue,
    registry: Arc<WorkerRegistry>,
    timeout: Option<Duration>,
}

/// The MapReduce master.
pub struct Master {
    /// Input file of the run.
    file: String,

    /// Number of Map jobs.
    n_map: usize,

    /// Number of Reduce jobs.
    n_reduce: usize,

    /// Configuration parameters struct.
    config: MasterConfig,

    /// Shared context handed to dispatch loops.
    ctx: DispatchCtx,
}

// Master public API implementation
impl Master {
    /// Creates a new master for a run over `file` with `n_map` Map jobs and
    /// `n_reduce` Reduce jobs, reaching workers through `caller`.
    pub async fn new_and_setup(
        file: &str,
        n_map: usize,
        n_reduce: usize,
        caller: Arc<dyn WorkerCaller>,
        config_str: Option<&str>, // master config in TOML format
    ) -> Result<Self, ViewmasterError> {
        if n_map == 0 {
            return logged_err!("invalid number of Map jobs {}", n_map);
        }
        if n_reduce == 0 {
            return logged_err!("invalid number of Reduce jobs {}", n_reduce);
        }

        let config = parsed_config!(config_str => MasterConfig;
                                    call_timeout_ms)?;
        let timeout = if config.call_timeout_ms > 0 {
            Some(Duration::from_millis(config.call_timeout_ms))
        } else {
            None
        };

        Ok(Master {
            file: file.into(),
            n_map,
            n_reduce,
            config,
            ctx: DispatchCtx {
                caller,
                handoff: HandoffQueue::new(),
                registry: Arc::new(WorkerRegistry::new()),
                timeout,
            },
        })
    }

    /// Configuration in effect.
    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    /// Returns a handle through which workers register. Pre-known workers
    /// can be registered before `run()`.
    pub fn registrar(&self) -> Registrar {
        self.ctx.handoff.registrar(Arc::clone(&self.ctx.registry))
    }

    /// Snapshot of all registered workers, sorted by endpoint.
    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.ctx.registry.snapshot()
    }

    /// Runs the whole job: Map phase, Reduce phase, then the shutdown sweep.
    /// Returns the job count each worker reported at shutdown.
    ///
    /// Does not return while some job has no responsive worker to run on.
    pub async fn run(&self) -> Result<HashMap<String, u64>, ViewmasterError> {
        pf_info!(
            "running '{}' with {} Map and {} Reduce jobs, {} workers known",
            self.file,
            self.n_map,
            self.n_reduce,
            self.ctx.registry.len()
        );

        // stragglers of the Map phase are only aborted once the whole run
        // is over
        let mut map_tasks = JoinSet::new();
        self.run_phase(JobType::Map, &mut map_tasks).await?;

        let mut reduce_tasks = JoinSet::new();
        self.run_phase(JobType::Reduce, &mut reduce_tasks).await?;

        Ok(self.kill_workers().await)
    }

    /// Tells every registered worker to shut down and collects the job
    /// counts they report. Workers that cannot be reached are logged and
    /// left out; there are no retries.
    pub async fn kill_workers(&self) -> HashMap<String, u64> {
        let mut njobs = HashMap::new();
        for info in self.ctx.registry.snapshot() {
            pf_debug!("shutting down worker '{}'", info.endpoint);
            match call_shutdown(
                self.ctx.caller.as_ref(),
                &info.endpoint,
                self.ctx.timeout,
            )
            .await
            {
                Ok(n) => {
                    njobs.insert(info.endpoint, n);
                }
                Err(e) => {
                    pf_warn!(
                        "error shutting down worker '{}': {}",
                        info.endpoint,
                        e
                    );
                }
            }
        }
        njobs
    }
}

// Master phase scheduling implementation
impl Master {
    /// Spawns one dispatch loop per job of `phase` into `tasks` and blocks
    /// until all of them reported completion.
    async fn run_phase(
        &self,
        phase: JobType,
        tasks: &mut JoinSet<()>,
    ) -> Result<(), ViewmasterError> {
        let total = match phase {
            JobType::Map => self.n_map,
            JobType::Reduce => self.n_reduce,
        };
        let mut barrier = PhaseBarrier::new(phase, total);

        for job_number in 0..total {
            let args = DoJobArgs::new(
                &self.file,
                phase,
                job_number,
                self.n_map,
                self.n_reduce,
            );
            tasks.spawn(Self::dispatch_task(
                self.ctx.clone(),
                args,
                barrier.completer()?,
            ));
        }

        pf_debug!("waiting on {} {} jobs", barrier.remaining(), phase);
        barrier.wait().await?;
        pf_info!("{} phase finished", phase);
        Ok(())
    }

    /// Dispatch loop of one job. Takes the next available worker and
    /// assigns the job to it; on failure the worker's token is discarded
    /// (unless the worker re-registered during the call) and the loop tries
    /// the next one, indefinitely.
    async fn dispatch_task(
        ctx: DispatchCtx,
        args: DoJobArgs,
        completer: PhaseCompleter,
    ) {
        loop {
            let token = match ctx.handoff.take().await {
                Ok(token) => token,
                Err(e) => {
                    pf_error!(
                        "{} {} gave up waiting for workers: {}",
                        args.operation,
                        args.job_number,
                        e
                    );
                    return;
                }
            };

            match call_do_job(
                ctx.caller.as_ref(),
                token.worker(),
                &args,
                ctx.timeout,
            )
            .await
            {
                Ok(()) => {
                    pf_debug!(
                        "{} {} done by '{}'",
                        args.operation,
                        args.job_number,
                        token.worker()
                    );
                    ctx.registry.record_success(token.worker());
                    if let Err(e) = completer.complete(args.job_number) {
                        pf_error!("error reporting completion: {}", e);
                    }
                    if let Err(e) = ctx.handoff.give_back(token) {
                        pf_error!("error returning worker token: {}", e);
                    }
                    return;
                }

                Err(e) => {
                    // the worker is presumed unreliable; drop its token
                    pf_warn!(
                        "{} {} failed on '{}': {}",
                        args.operation,
                        args.job_number,
                        token.worker(),
                        e
                    );
                    if ctx.registry.discard_token(token.worker()) {
                        pf_info!(
                            "worker '{}' re-registered meanwhile, token kept",
                            token.worker()
                        );
                        if let Err(e) = ctx.handoff.give_back(token) {
                            pf_error!("error returning worker token: {}", e);
                        }
                    }
                }
            }
        }
    }
}
