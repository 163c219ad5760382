//! View record and the view transition logic driven by heartbeats and ticks.

use serde::{Deserialize, Serialize};

/// View number type.
pub type Viewnum = u64;

/// The record naming the current primary and backup servers. An empty
/// string means the role is vacant.
#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
pub struct View {
    /// Version of this view; bumped by exactly 1 on every transition.
    pub viewnum: Viewnum,

    /// Endpoint of the primary server.
    pub primary: String,

    /// Endpoint of the backup server.
    pub backup: String,
}

impl View {
    /// Is the primary role filled?
    #[inline]
    pub fn has_primary(&self) -> bool {
        !self.primary.is_empty()
    }

    /// Is the backup role filled?
    #[inline]
    pub fn has_backup(&self) -> bool {
        !self.backup.is_empty()
    }

    /// Is `name` the current primary?
    #[inline]
    pub fn is_primary(&self, name: &str) -> bool {
        self.has_primary() && self.primary == name
    }

    /// Is `name` the current backup?
    #[inline]
    pub fn is_backup(&self, name: &str) -> bool {
        self.has_backup() && self.backup == name
    }
}

/// The View Store: current view plus acknowledgment and liveness
/// bookkeeping. Holds no lock itself; the owning `ViewServer` serializes
/// every access.
#[derive(Debug)]
pub(crate) struct ViewStore {
    /// Current view.
    view: View,

    /// Last viewnum the primary confirmed through its own heartbeat.
    primary_ack: Viewnum,

    /// Last viewnum the backup confirmed through its own heartbeat.
    backup_ack: Viewnum,

    /// Logical clock, advanced once per tick.
    current_tick: u64,

    /// Tick of the latest heartbeat heard from the primary.
    primary_tick: u64,

    /// Tick of the latest heartbeat heard from the backup.
    backup_tick: u64,

    /// Number of silent ticks after which a role is considered dead.
    dead_pings: u64,
}

impl ViewStore {
    /// Creates a store in the bootstrap state: viewnum 0, no roles.
    pub(crate) fn new(dead_pings: u64) -> Self {
        ViewStore {
            view: View::default(),
            primary_ack: 0,
            backup_ack: 0,
            current_tick: 0,
            primary_tick: 0,
            backup_tick: 0,
            dead_pings,
        }
    }

    /// Has the primary of the current view acknowledged it?
    #[inline]
    fn acked(&self) -> bool {
        self.view.viewnum == self.primary_ack
    }

    /// Has the role last heard at `role_tick` gone silent for too long?
    #[inline]
    fn silent(&self, role_tick: u64) -> bool {
        self.current_tick.saturating_sub(role_tick) >= self.dead_pings
    }

    /// Backup takes over the primary role. No-op if there is no backup.
    ///
    /// The new primary inherits the former backup's ack and liveness
    /// records instead of being treated as freshly heard from.
    fn promote_backup(&mut self) {
        if !self.view.has_backup() {
            return;
        }
        self.view.primary = std::mem::take(&mut self.view.backup);
        self.view.viewnum += 1;
        self.primary_ack = self.backup_ack;
        self.primary_tick = self.backup_tick;
        pf_info!(
            "promoted backup '{}' to primary in view {}",
            self.view.primary,
            self.view.viewnum
        );
    }

    /// Handles a heartbeat from server `name` that has seen up to view
    /// `viewnum`, and returns the (possibly new) current view.
    ///
    /// The cases are checked in order and the first match wins.
    pub(crate) fn heartbeat(&mut self, name: &str, viewnum: Viewnum) -> View {
        if !self.view.has_primary() && self.view.viewnum == 0 {
            // very first server becomes primary
            self.view.primary = name.into();
            self.view.viewnum += 1;
            self.primary_ack = 0;
            self.primary_tick = self.current_tick;
            pf_info!("admitted '{}' as first primary in view 1", name);
        } else if self.view.is_primary(name) {
            if viewnum == 0 {
                // primary restarted and lost its view; it cannot go on
                // acting as primary
                pf_warn!("primary '{}' restarted", name);
                self.promote_backup();
            } else {
                self.primary_ack = viewnum;
                self.primary_tick = self.current_tick;
            }
        } else if !self.view.has_backup() && self.acked() {
            self.view.backup = name.into();
            self.view.viewnum += 1;
            self.backup_ack = viewnum;
            self.backup_tick = self.current_tick;
            pf_info!(
                "admitted '{}' as backup in view {}",
                name,
                self.view.viewnum
            );
        } else if self.view.is_backup(name) {
            if viewnum == 0 && self.acked() {
                // restarted backup rejoins under a fresh view
                self.view.viewnum += 1;
                pf_info!(
                    "re-admitted restarted backup '{}' in view {}",
                    name,
                    self.view.viewnum
                );
            }
            self.backup_ack = viewnum;
            self.backup_tick = self.current_tick;
        }

        self.view.clone()
    }

    /// Advances the logical clock by one tick and retires roles that have
    /// been silent for `dead_pings` ticks, as long as the primary has
    /// acknowledged the current view.
    pub(crate) fn tick(&mut self) {
        self.current_tick += 1;

        if self.silent(self.primary_tick) && self.acked() {
            self.promote_backup();
        }

        if self.view.has_backup()
            && self.silent(self.backup_tick)
            && self.acked()
        {
            pf_info!(
                "dropped silent backup '{}' in view {}",
                self.view.backup,
                self.view.viewnum + 1
            );
            self.view.backup.clear();
            self.view.viewnum += 1;
        }
    }

    /// Returns a copy of the current view.
    #[inline]
    pub(crate) fn view(&self) -> View {
        self.view.clone()
    }
}

#[cfg(test)]
mod view_tests {
    use super::*;

    const DEAD_PINGS: u64 = 5;

    fn make_view(viewnum: Viewnum, primary: &str, backup: &str) -> View {
        View {
            viewnum,
            primary: primary.into(),
            backup: backup.into(),
        }
    }

    /// Drives a store to {2, "A", "B"} with A having acked view 2.
    fn stable_store() -> ViewStore {
        let mut store = ViewStore::new(DEAD_PINGS);
        store.heartbeat("A", 0);
        store.heartbeat("A", 1);
        store.heartbeat("B", 0);
        store.heartbeat("A", 2);
        assert_eq!(store.view(), make_view(2, "A", "B"));
        store
    }

    #[test]
    fn first_primary() {
        let mut store = ViewStore::new(DEAD_PINGS);
        assert_eq!(store.view(), View::default());
        assert_eq!(store.heartbeat("A", 0), make_view(1, "A", ""));
    }

    #[test]
    fn backup_needs_ack() {
        let mut store = ViewStore::new(DEAD_PINGS);
        store.heartbeat("A", 0);
        // A has not acked view 1 yet, so B is only told the view
        assert_eq!(store.heartbeat("B", 0), make_view(1, "A", ""));
        store.heartbeat("A", 1);
        assert_eq!(store.heartbeat("B", 0), make_view(2, "A", "B"));
    }

    #[test]
    fn third_server_idles() {
        let mut store = stable_store();
        assert_eq!(store.heartbeat("C", 0), make_view(2, "A", "B"));
        assert_eq!(store.heartbeat("C", 2), make_view(2, "A", "B"));
    }

    #[test]
    fn primary_dies_backup_promoted() {
        let mut store = stable_store();
        for _ in 0..(DEAD_PINGS - 1) {
            store.heartbeat("B", 2);
            store.tick();
            assert_eq!(store.view(), make_view(2, "A", "B"));
        }
        store.heartbeat("B", 2);
        store.tick();
        assert_eq!(store.view(), make_view(3, "B", ""));
    }

    #[test]
    fn both_silent_backup_promoted() {
        let mut store = stable_store();
        for _ in 0..DEAD_PINGS {
            store.tick();
        }
        assert_eq!(store.view(), make_view(3, "B", ""));
        // no further change while nobody is left to promote
        for _ in 0..(3 * DEAD_PINGS) {
            store.tick();
        }
        assert_eq!(store.view(), make_view(3, "B", ""));
    }

    #[test]
    fn new_backup_after_promotion() {
        let mut store = stable_store();
        for _ in 0..DEAD_PINGS {
            store.heartbeat("B", 2);
            store.tick();
        }
        assert_eq!(store.view(), make_view(3, "B", ""));
        // B has not acked view 3 yet
        assert_eq!(store.heartbeat("C", 0), make_view(3, "B", ""));
        store.heartbeat("B", 3);
        assert_eq!(store.heartbeat("C", 0), make_view(4, "B", "C"));
    }

    #[test]
    fn promotion_inherits_backup_ack() {
        let mut store = stable_store();
        store.heartbeat("B", 2);
        store.heartbeat("A", 0); // primary restarted
        assert_eq!(store.view(), make_view(3, "B", ""));
        assert_eq!(store.primary_ack, 2);
        assert!(!store.acked());
    }

    #[test]
    fn restarted_primary_without_backup_stays() {
        let mut store = ViewStore::new(DEAD_PINGS);
        store.heartbeat("A", 0);
        store.heartbeat("A", 1);
        assert_eq!(store.heartbeat("A", 0), make_view(1, "A", ""));
    }

    #[test]
    fn restarted_backup_readmitted() {
        let mut store = stable_store();
        assert_eq!(store.heartbeat("B", 0), make_view(3, "A", "B"));
        // not acked by A yet, so a second restart changes nothing
        assert_eq!(store.heartbeat("B", 0), make_view(3, "A", "B"));
        store.heartbeat("A", 3);
        assert_eq!(store.heartbeat("B", 0), make_view(4, "A", "B"));
    }

    #[test]
    fn silent_backup_dropped() {
        let mut store = stable_store();
        for _ in 0..DEAD_PINGS {
            store.heartbeat("A", 2);
            store.tick();
        }
        assert_eq!(store.view(), make_view(3, "A", ""));
        // slot is free again once A acks
        store.heartbeat("A", 3);
        assert_eq!(store.heartbeat("C", 0), make_view(4, "A", "C"));
    }

    #[test]
    fn no_transition_without_ack() {
        let mut store = ViewStore::new(DEAD_PINGS);
        store.heartbeat("A", 0);
        store.heartbeat("A", 1);
        store.heartbeat("B", 0);
        // A never acks view 2 and goes silent; B must not take over
        for _ in 0..(3 * DEAD_PINGS) {
            store.heartbeat("B", 2);
            store.tick();
        }
        assert_eq!(store.view(), make_view(2, "A", "B"));
    }

    #[test]
    fn stale_primary_ack_tolerated() {
        let mut store = stable_store();
        assert_eq!(store.heartbeat("A", 1), make_view(2, "A", "B"));
        assert_eq!(store.primary_ack, 1);
        // no admissions while the ack lags
        store.tick();
        assert_eq!(store.view(), make_view(2, "A", "B"));
    }

    #[test]
    fn viewnum_steps_by_one() {
        let mut store = ViewStore::new(DEAD_PINGS);
        let mut last = store.view().viewnum;
        let pings: [(&str, Viewnum); 10] = [
            ("A", 0),
            ("B", 0),
            ("A", 1),
            ("B", 0),
            ("A", 2),
            ("B", 0),
            ("A", 3),
            ("A", 0),
            ("C", 0),
            ("B", 4),
        ];
        for (name, viewnum) in pings {
            let view = store.heartbeat(name, viewnum);
            assert!(view.viewnum == last || view.viewnum == last + 1);
            assert_ne!(view.primary, view.backup);
            last = view.viewnum;
            store.tick();
            let view = store.view();
            assert!(view.viewnum == last || view.viewnum == last + 1);
            last = view.viewnum;
        }
    }

    #[test]
    fn view_role_helpers() {
        let view = make_view(2, "A", "");
        assert!(view.has_primary());
        assert!(!view.has_backup());
        assert!(view.is_primary("A"));
        assert!(!view.is_backup(""));
    }
}
