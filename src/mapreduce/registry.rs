//! Registry of every worker the master has heard of.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Information about a registered worker.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct WorkerInfo {
    /// The worker's endpoint.
    pub endpoint: String,

    /// Jobs this worker has successfully completed for the master.
    pub jobs_completed: u64,

    /// Whether a handoff token for this worker is currently alive.
    has_token: bool,

    /// Registered again while its token was alive.
    rejoined: bool,
}

impl WorkerInfo {
    /// Is a handoff token for this worker currently alive?
    pub fn has_token(&self) -> bool {
        self.has_token
    }
}

/// Known workers, kept for the master's lifetime. Tracks which workers hold
/// a live handoff token so that no worker ever has two.
#[derive(Debug, Default)]
pub(crate) struct WorkerRegistry {
    workers: Mutex<HashMap<String, WorkerInfo>>,
}

impl WorkerRegistry {
    /// Creates an empty registry.
    pub(crate) fn new() -> Self {
        WorkerRegistry::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, WorkerInfo>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admits `endpoint` for a new token. Returns true if a token should be
    /// minted: the worker is new, or is known but its token got discarded.
    /// Returns false if the worker already holds a live token, in which case
    /// the registration is remembered for `discard_token()`.
    pub(crate) fn admit(&self, endpoint: &str) -> bool {
        let mut workers = self.lock();
        match workers.get_mut(endpoint) {
            Some(info) if info.has_token => {
                info.rejoined = true;
                false
            }
            Some(info) => {
                info.has_token = true;
                true
            }
            None => {
                workers.insert(
                    endpoint.into(),
                    WorkerInfo {
                        endpoint: endpoint.into(),
                        jobs_completed: 0,
                        has_token: true,
                        rejoined: false,
                    },
                );
                true
            }
        }
    }

    /// Discards the token of `endpoint` after a failed assignment. If the
    /// worker registered again while the token was alive, that registration
    /// takes the token over instead: returns true and the caller must hand
    /// the token back to the queue.
    pub(crate) fn discard_token(&self, endpoint: &str) -> bool {
        match self.lock().get_mut(endpoint) {
            Some(info) if info.rejoined => {
                info.rejoined = false;
                true
            }
            Some(info) => {
                info.has_token = false;
                false
            }
            None => false,
        }
    }

    /// Counts one successfully completed job for `endpoint`. A pending
    /// re-registration is satisfied by the token going back to the queue.
    pub(crate) fn record_success(&self, endpoint: &str) {
        if let Some(info) = self.lock().get_mut(endpoint) {
            info.jobs_completed += 1;
            info.rejoined = false;
        }
    }

    /// Snapshot of all workers, sorted by endpoint.
    pub(crate) fn snapshot(&self) -> Vec<WorkerInfo> {
        let mut infos: Vec<WorkerInfo> = self.lock().values().cloned().collect();
        infos.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        infos
    }

    /// Number of registered workers.
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod registry_tests {
    use super::*;

    #[test]
    fn admit_once_per_token() {
        let registry = WorkerRegistry::new();
        assert!(registry.admit("w1"));
        assert!(!registry.admit("w1"));
        assert!(registry.admit("w2"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn readmit_after_revoke() {
        let registry = WorkerRegistry::new();
        assert!(registry.admit("w1"));
        assert!(!registry.discard_token("w1"));
        assert!(!registry.snapshot()[0].has_token());
        assert!(registry.admit("w1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn success_counts() {
        let registry = WorkerRegistry::new();
        registry.admit("w2");
        registry.admit("w1");
        registry.record_success("w1");
        registry.record_success("w1");
        registry.record_success("nobody");
        let infos = registry.snapshot();
        assert_eq!(infos[0].endpoint, "w1");
        assert_eq!(infos[0].jobs_completed, 2);
        assert_eq!(infos[1].jobs_completed, 0);
    }

    #[test]
    fn rejoin_survives_one_discard() {
        let registry = WorkerRegistry::new();
        assert!(registry.admit("w1"));
        assert!(!registry.admit("w1"));
        assert!(registry.discard_token("w1"));
        assert!(registry.snapshot()[0].has_token());
        assert!(!registry.discard_token("w1"));
        assert!(!registry.snapshot()[0].has_token());
        assert!(!registry.discard_token("nobody"));
    }

    #[test]
    fn success_clears_rejoin() {
        let registry = WorkerRegistry::new();
        registry.admit("w1");
        registry.admit("w1");
        registry.record_success("w1");
        assert!(!registry.discard_token("w1"));
        assert!(registry.admit("w1"));
    }
}
