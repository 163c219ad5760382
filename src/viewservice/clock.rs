//! Heartbeat clock driving the view service's failure detection.

use std::sync::Weak;

use crate::utils::ViewmasterError;
use crate::viewservice::ViewServer;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};

/// Periodic driver that calls `ViewServer::tick()` once per ping interval
/// until the server gets killed.
pub(crate) struct HeartbeatClock {
    /// Interval between two ticks.
    interval: Duration,
}

impl HeartbeatClock {
    /// Creates a new clock ticking every `interval`.
    pub(crate) fn new(interval: Duration) -> Result<Self, ViewmasterError> {
        if interval.is_zero() {
            return logged_err!("invalid heartbeat clock interval {:?}", interval);
        }
        Ok(HeartbeatClock { interval })
    }

    /// Spawns the clock task. The task exits once `rx_kill` observes `true`,
    /// its sender is dropped, or `server` is gone.
    pub(crate) fn spawn(
        self,
        server: Weak<ViewServer>,
        rx_kill: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(Self::clock_thread(self.interval, server, rx_kill))
    }

    /// Clock thread function.
    async fn clock_thread(
        interval: Duration,
        server: Weak<ViewServer>,
        mut rx_kill: watch::Receiver<bool>,
    ) {
        pf_debug!("heartbeat clock thread spawned");

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !*rx_kill.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(server) = server.upgrade() else {
                        break;
                    };
                    server.tick();
                },

                res = rx_kill.changed() => {
                    if res.is_err() {
                        break; // sender side gone
                    }
                }
            }
        }

        pf_debug!("heartbeat clock thread exitted");
    }
}
