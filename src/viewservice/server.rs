//! View service endpoint: the lock-guarded view store plus lifecycle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::transport::CallError;
use crate::utils::ViewmasterError;
use crate::viewservice::{HeartbeatClock, View, ViewStore, Viewnum};

use serde::Deserialize;

use tokio::sync::watch;
use tokio::time::Duration;

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct ViewServerConfig {
    /// Interval between two heartbeat clock ticks in millisecs.
    pub ping_interval_ms: u64,

    /// Number of silent ticks after which a server is considered dead.
    pub dead_pings: u64,
}

#[allow(clippy::derivable_impls)]
impl Default for ViewServerConfig {
    fn default() -> Self {
        ViewServerConfig {
            ping_interval_ms: 100,
            dead_pings: 5,
        }
    }
}

/// The view service. Every heartbeat, tick, and query is serialized through
/// the lock on the view store, which is never held across an `.await`.
///
/// The heartbeat clock stops when the service is killed or when the last
/// `Arc` handle to it is dropped.
pub struct ViewServer {
    /// My endpoint name.
    me: String,

    /// Configuration parameters struct.
    config: ViewServerConfig,

    /// The view store, only ever touched under this lock.
    store: Mutex<ViewStore>,

    /// Set once the server has been killed.
    dead: AtomicBool,

    /// Number of heartbeat/query calls served.
    rpc_count: AtomicU64,

    /// Sender side of the kill signal watched by the heartbeat clock.
    tx_kill: watch::Sender<bool>,
}

// ViewServer public API implementation
impl ViewServer {
    /// Creates a new view service named `me` and spawns its heartbeat clock.
    /// Must be called within the context of a tokio runtime.
    pub async fn new_and_setup(
        me: impl ToString,
        config_str: Option<&str>, // view service config in TOML format
    ) -> Result<Arc<Self>, ViewmasterError> {
        let config = parsed_config!(config_str => ViewServerConfig;
                                    ping_interval_ms, dead_pings)?;
        if config.dead_pings == 0 {
            return logged_err!(
                "invalid config.dead_pings '{}'",
                config.dead_pings
            );
        }

        // rejects a zero ping interval
        let clock =
            HeartbeatClock::new(Duration::from_millis(config.ping_interval_ms))?;

        let (tx_kill, rx_kill) = watch::channel(false);
        let server = Arc::new(ViewServer {
            me: me.to_string(),
            store: Mutex::new(ViewStore::new(config.dead_pings)),
            config,
            dead: AtomicBool::new(false),
            rpc_count: AtomicU64::new(0),
            tx_kill,
        });

        // the clock exits upon kill or once the last handle is dropped
        let _ = clock.spawn(Arc::downgrade(&server), rx_kill);

        pf_info!("view service '{}' up", server.me);
        Ok(server)
    }

    /// My endpoint name.
    pub fn me(&self) -> &str {
        &self.me
    }

    /// Configuration in effect.
    pub fn config(&self) -> &ViewServerConfig {
        &self.config
    }

    /// Heartbeat from server `name` which has seen up to view `viewnum`.
    /// Replies with the current view, changed or not.
    pub fn heartbeat(
        &self,
        name: &str,
        viewnum: Viewnum,
    ) -> Result<View, CallError> {
        self.admit_call()?;
        let view = self.lock_store().heartbeat(name, viewnum);
        pf_trace!("heartbeat '{}' @ {} -> {:?}", name, viewnum, view);
        Ok(view)
    }

    /// Returns the current view without changing anything.
    pub fn query(&self) -> Result<View, CallError> {
        self.admit_call()?;
        Ok(self.lock_store().view())
    }

    /// Shuts the service down: the clock stops and later calls fail as
    /// unreachable.
    pub fn kill(&self) {
        if self.dead.swap(true, Ordering::SeqCst) {
            return;
        }
        // the clock may have exitted already; nothing to do then
        let _ = self.tx_kill.send(true);
        pf_info!("view service '{}' killed", self.me);
    }

    /// Has this service been killed?
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    /// Number of heartbeat/query calls served so far.
    pub fn rpc_count(&self) -> u64 {
        self.rpc_count.load(Ordering::SeqCst)
    }
}

// ViewServer internal helpers
impl ViewServer {
    /// Takes the store lock. A poisoned lock still guards a consistent
    /// store, since every transition completes before any panic point.
    fn lock_store(&self) -> MutexGuard<'_, ViewStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rejects calls to a killed service, counts the rest.
    fn admit_call(&self) -> Result<(), CallError> {
        if self.is_dead() {
            return Err(CallError::Unreachable);
        }
        self.rpc_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// One heartbeat clock tick.
    pub(crate) fn tick(&self) {
        if self.is_dead() {
            return;
        }
        self.lock_store().tick();
    }
}
