//! Seam to the external transport used to reach workers.

use crate::mapreduce::{DoJobArgs, WorkerReply, WorkerRequest};
use crate::transport::{call_within, CallError};

use async_trait::async_trait;

use tokio::time::Duration;

/// Synchronous request/reply call primitive towards workers, provided by
/// the external transport. `Ok` means a reply came back; `Err` names why
/// none did.
#[async_trait]
pub trait WorkerCaller: Send + Sync {
    /// Sends `req` to the worker at `worker` and waits for its reply.
    async fn call(
        &self,
        worker: &str,
        req: WorkerRequest,
    ) -> Result<WorkerReply, CallError>;
}

/// Assigns one job to `worker`. Succeeds only if the worker replied that it
/// executed the job.
pub(crate) async fn call_do_job(
    caller: &dyn WorkerCaller,
    worker: &str,
    args: &DoJobArgs,
    timeout: Option<Duration>,
) -> Result<(), CallError> {
    let reply = call_within(
        timeout,
        caller.call(worker, WorkerRequest::DoJob(args.clone())),
    )
    .await?;
    match reply {
        WorkerReply::DoJob { ok: true } => Ok(()),
        WorkerReply::DoJob { ok: false } => Err(CallError::Rejected),
        other => Err(CallError::Protocol(format!(
            "DoJob answered with {:?}",
            other
        ))),
    }
}

/// Tells `worker` to shut down and returns its reported job count.
pub(crate) async fn call_shutdown(
    caller: &dyn WorkerCaller,
    worker: &str,
    timeout: Option<Duration>,
) -> Result<u64, CallError> {
    let reply =
        call_within(timeout, caller.call(worker, WorkerRequest::Shutdown))
            .await?;
    match reply {
        WorkerReply::Shutdown { njobs } => Ok(njobs),
        other => Err(CallError::Protocol(format!(
            "Shutdown answered with {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod caller_tests {
    use super::*;
    use crate::mapreduce::JobType;

    /// Replies with a fixed answer to everything.
    struct FixedCaller(WorkerReply);

    #[async_trait]
    impl WorkerCaller for FixedCaller {
        async fn call(
            &self,
            _worker: &str,
            _req: WorkerRequest,
        ) -> Result<WorkerReply, CallError> {
            Ok(self.0.clone())
        }
    }

    fn args() -> DoJobArgs {
        DoJobArgs::new("input", JobType::Map, 0, 2, 1)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn do_job_outcomes() {
        let caller = FixedCaller(WorkerReply::DoJob { ok: true });
        assert_eq!(call_do_job(&caller, "w", &args(), None).await, Ok(()));
        let caller = FixedCaller(WorkerReply::DoJob { ok: false });
        assert_eq!(
            call_do_job(&caller, "w", &args(), None).await,
            Err(CallError::Rejected)
        );
        let caller = FixedCaller(WorkerReply::Shutdown { njobs: 3 });
        assert!(matches!(
            call_do_job(&caller, "w", &args(), None).await,
            Err(CallError::Protocol(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn shutdown_outcomes() {
        let caller = FixedCaller(WorkerReply::Shutdown { njobs: 3 });
        assert_eq!(call_shutdown(&caller, "w", None).await, Ok(3));
        let caller = FixedCaller(WorkerReply::DoJob { ok: true });
        assert!(matches!(
            call_shutdown(&caller, "w", None).await,
            Err(CallError::Protocol(_))
        ));
    }
}
