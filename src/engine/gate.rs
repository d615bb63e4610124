//! Concurrency gate
//!
//! Bounds the number of clients served at the same time. A client counts as
//! active while it produced OTA traffic within the activity window; new
//! clients are admitted only while a slot is free.

use crate::time::SteadyTime;
use crate::transport::ExtAddr;

/// Maximum simultaneously active transfers.
pub const OTAU_MAX_ACTIVE: usize = 4;

/// How long a client stays "active" after its last OTA message.
pub const ACTIVITY_WINDOW_MS: u64 = 10_000;

/// Interval between stale-entry sweeps.
pub const ACTIVITY_SWEEP_MS: u64 = 3_000;

/// Tracks recent per-client OTA activity.
#[derive(Debug, Default)]
pub struct ActivityGate {
    entries: Vec<(ExtAddr, SteadyTime)>,
    last_sweep: Option<SteadyTime>,
}

impl ActivityGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn prune(&mut self, now: SteadyTime) {
        self.entries
            .retain(|(_, last)| now.elapsed_since(*last) < ACTIVITY_WINDOW_MS);
    }

    /// Record OTA activity for `addr`, refreshing its slot.
    pub fn mark_activity(&mut self, addr: ExtAddr, now: SteadyTime) {
        self.prune(now);

        if let Some(entry) = self.entries.iter_mut().find(|(a, _)| *a == addr) {
            entry.1 = now;
            return;
        }
        if self.entries.len() >= OTAU_MAX_ACTIVE {
            // admission is decided by may_start; never grow past the bound
            log::debug!("activity gate full, not tracking {}", addr);
            return;
        }
        self.entries.push((addr, now));
    }

    /// May `addr` start or continue a transfer right now?
    pub fn may_start(&mut self, addr: ExtAddr, now: SteadyTime) -> bool {
        self.prune(now);
        self.entries.iter().any(|(a, _)| *a == addr) || self.entries.len() < OTAU_MAX_ACTIVE
    }

    /// Drop the slot held by `addr`, freeing it for another client.
    pub fn remove(&mut self, addr: ExtAddr) {
        self.entries.retain(|(a, _)| *a != addr);
    }

    /// Periodic sweep; a no-op while the table is empty.
    pub fn tick(&mut self, now: SteadyTime) {
        if self.entries.is_empty() {
            self.last_sweep = None;
            return;
        }
        let due = self
            .last_sweep
            .map_or(true, |t| now.elapsed_since(t) >= ACTIVITY_SWEEP_MS);
        if due {
            self.last_sweep = Some(now);
            self.prune(now);
        }
    }

    /// Number of currently tracked clients.
    pub fn active_count(&self) -> usize {
        self.entries.len()
    }
}
