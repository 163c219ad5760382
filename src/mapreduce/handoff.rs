//! Handoff queue of available-worker tokens.
//!
//! A worker becomes available exactly once when it registers and again
//! every time it finishes an assignment. Both producers feed the same
//! queue, which every dispatch loop drains. The registry allows at most one
//! live token per worker, so the queue never holds more tokens than there
//! are known workers and needs no capacity bound.

use std::sync::Arc;

use crate::mapreduce::WorkerRegistry;
use crate::utils::ViewmasterError;

use tokio::sync::{mpsc, Mutex};

/// The right to contact one specific worker with a new assignment. At most
/// one token per worker is alive at any time; not `Clone` on purpose.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct WorkerToken {
    worker: String,
}

impl WorkerToken {
    /// Endpoint of the worker this token is for.
    pub(crate) fn worker(&self) -> &str {
        &self.worker
    }
}

/// Multi-producer multi-consumer queue of worker tokens.
#[derive(Debug, Clone)]
pub(crate) struct HandoffQueue {
    /// Sender side, used for returning tokens.
    tx_token: mpsc::UnboundedSender<WorkerToken>,

    /// Receiver side, shared by all dispatch loops.
    rx_token: Arc<Mutex<mpsc::UnboundedReceiver<WorkerToken>>>,
}

impl HandoffQueue {
    /// Creates an empty queue.
    pub(crate) fn new() -> Self {
        let (tx_token, rx_token) = mpsc::unbounded_channel();
        HandoffQueue {
            tx_token,
            rx_token: Arc::new(Mutex::new(rx_token)),
        }
    }

    /// Waits for the next available worker token.
    pub(crate) async fn take(&self) -> Result<WorkerToken, ViewmasterError> {
        let mut rx_token = self.rx_token.lock().await;
        match rx_token.recv().await {
            Some(token) => Ok(token),
            None => logged_err!("handoff queue has been closed"),
        }
    }

    /// Returns a token after its worker completed an assignment, or after
    /// the worker re-registered while its failing assignment was in flight.
    pub(crate) fn give_back(
        &self,
        token: WorkerToken,
    ) -> Result<(), ViewmasterError> {
        Ok(self.tx_token.send(token)?)
    }

    /// Creates a registrar feeding this queue.
    pub(crate) fn registrar(&self, registry: Arc<WorkerRegistry>) -> Registrar {
        Registrar {
            tx_token: self.tx_token.clone(),
            registry,
        }
    }
}

/// Registration path of workers into the handoff queue. Cheap to clone;
/// hand one to whatever receives worker registrations.
#[derive(Debug, Clone)]
pub struct Registrar {
    tx_token: mpsc::UnboundedSender<WorkerToken>,
    registry: Arc<WorkerRegistry>,
}

impl Registrar {
    /// Registers the worker at `endpoint`, making it available for
    /// assignments. Never blocks, so any number of workers can register
    /// before the master starts running.
    ///
    /// Returns `Ok(false)` if the worker already holds a live token. The
    /// registration is still remembered: should that token's current
    /// assignment fail, the token goes back to the queue instead of being
    /// discarded.
    pub fn register(&self, endpoint: &str) -> Result<bool, ViewmasterError> {
        if endpoint.is_empty() {
            return logged_err!("cannot register worker with empty endpoint");
        }
        if !self.registry.admit(endpoint) {
            pf_debug!("worker '{}' already holds a token", endpoint);
            return Ok(false);
        }

        let token = WorkerToken {
            worker: endpoint.into(),
        };
        if let Err(e) = self.tx_token.send(token) {
            self.registry.discard_token(endpoint);
            return logged_err!("error registering worker '{}': {}", endpoint, e);
        }
        pf_info!("worker '{}' registered", endpoint);
        Ok(true)
    }
}

#[cfg(test)]
mod handoff_tests {
    use super::*;
    use tokio::time::{self, Duration};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn register_take_give_back() -> Result<(), ViewmasterError> {
        let registry = Arc::new(WorkerRegistry::new());
        let queue = HandoffQueue::new();
        let registrar = queue.registrar(Arc::clone(&registry));

        assert!(registrar.register("w1")?);
        assert!(!registrar.register("w1")?);
        assert!(registrar.register("").is_err());
        assert!(registrar.register("w2")?);

        let t1 = queue.take().await?;
        assert_eq!(t1.worker(), "w1");
        queue.give_back(t1)?;
        assert_eq!(queue.take().await?.worker(), "w2");
        assert_eq!(queue.take().await?.worker(), "w1");
        assert_eq!(registry.len(), 2);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn take_waits_for_registration() -> Result<(), ViewmasterError> {
        let registry = Arc::new(WorkerRegistry::new());
        let queue = HandoffQueue::new();
        let registrar = queue.registrar(Arc::clone(&registry));

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.take().await })
        };
        time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        registrar.register("late")?;
        let token = waiter.await??;
        assert_eq!(token.worker(), "late");
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn revoked_worker_reregisters() -> Result<(), ViewmasterError> {
        let registry = Arc::new(WorkerRegistry::new());
        let queue = HandoffQueue::new();
        let registrar = queue.registrar(Arc::clone(&registry));

        registrar.register("w1")?;
        let token = queue.take().await?;
        assert!(!registry.discard_token(token.worker()));
        drop(token);

        assert!(registrar.register("w1")?);
        assert_eq!(queue.take().await?.worker(), "w1");
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn register_many_before_draining() -> Result<(), ViewmasterError> {
        let registry = Arc::new(WorkerRegistry::new());
        let queue = HandoffQueue::new();
        let registrar = queue.registrar(Arc::clone(&registry));

        for i in 0..500 {
            assert!(registrar.register(&format!("w{}", i))?);
        }
        assert_eq!(registry.len(), 500);
        for i in 0..500 {
            assert_eq!(queue.take().await?.worker(), format!("w{}", i));
        }
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rejoin_while_in_flight_keeps_token() -> Result<(), ViewmasterError> {
        let registry = Arc::new(WorkerRegistry::new());
        let queue = HandoffQueue::new();
        let registrar = queue.registrar(Arc::clone(&registry));

        registrar.register("w1")?;
        let token = queue.take().await?;
        // worker restarts while its assignment is outstanding
        assert!(!registrar.register("w1")?);
        // the assignment then fails; the token survives the discard
        assert!(registry.discard_token(token.worker()));
        queue.give_back(token)?;
        assert_eq!(queue.take().await?.worker(), "w1");
        assert!(registry.snapshot()[0].has_token());
        Ok(())
    }
}
