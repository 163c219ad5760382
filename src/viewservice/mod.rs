//! Primary/backup view service: decides which server is primary and which
//! is backup, based on heartbeats and a periodic liveness clock.

mod clock;
mod server;
mod view;

pub use server::{ViewServer, ViewServerConfig};
pub use view::{View, Viewnum};

pub(crate) use clock::HeartbeatClock;
pub(crate) use view::ViewStore;
