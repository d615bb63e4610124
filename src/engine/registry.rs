//! Client registry
//!
//! Owns every known client record, keyed by extended address. Records are
//! created on first observed OTA traffic (or operator discovery) and removed
//! by the inactivity sweep.

use super::node::ClientRecord;
use crate::time::SteadyTime;
use crate::transport::ExtAddr;
use std::collections::HashMap;

/// The table of known OTA clients.
#[derive(Debug, Default)]
pub struct Registry {
    nodes: HashMap<ExtAddr, ClientRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, addr: ExtAddr) -> bool {
        self.nodes.contains_key(&addr)
    }

    pub fn get(&self, addr: ExtAddr) -> Option<&ClientRecord> {
        self.nodes.get(&addr)
    }

    pub fn get_mut(&mut self, addr: ExtAddr) -> Option<&mut ClientRecord> {
        self.nodes.get_mut(&addr)
    }

    /// Fetch the record for `addr`, creating it on first contact.
    pub fn get_or_insert(
        &mut self,
        addr: ExtAddr,
        nwk_addr: u16,
        now: SteadyTime,
    ) -> &mut ClientRecord {
        self.nodes.entry(addr).or_insert_with(|| {
            log::info!("new otau client {}", addr);
            ClientRecord::new(addr, nwk_addr, now)
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientRecord> {
        self.nodes.values()
    }

    /// Snapshot of all known addresses, for iteration that mutates records.
    pub fn addrs(&self) -> Vec<ExtAddr> {
        self.nodes.keys().copied().collect()
    }

    /// Remove records without activity for `max_idle_ms`; returns the
    /// removed addresses.
    pub fn cleanup(&mut self, now: SteadyTime, max_idle_ms: u64) -> Vec<ExtAddr> {
        let removed: Vec<ExtAddr> = self
            .nodes
            .values()
            .filter(|n| now.elapsed_since(n.last_activity) >= max_idle_ms)
            .map(|n| n.ext_addr)
            .collect();

        for addr in &removed {
            self.nodes.remove(addr);
            log::info!("removed dormant otau client {}", addr);
        }

        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(ms: u64) -> SteadyTime {
        SteadyTime::from_millis(ms)
    }

    #[test]
    fn test_get_or_insert_creates_once() {
        let mut reg = Registry::new();
        reg.get_or_insert(ExtAddr(1), 0x1234, t(0));
        reg.get_or_insert(ExtAddr(1), 0x5678, t(10));

        assert_eq!(reg.len(), 1);
        // the record keeps its original network address until a request
        // updates it
        assert_eq!(reg.get(ExtAddr(1)).unwrap().nwk_addr, 0x1234);
    }

    #[test]
    fn test_cleanup_removes_dormant_records() {
        let mut reg = Registry::new();
        reg.get_or_insert(ExtAddr(1), 0, t(0));
        reg.get_or_insert(ExtAddr(2), 0, t(0));
        reg.get_mut(ExtAddr(2)).unwrap().last_activity = t(5_000);

        let removed = reg.cleanup(t(10_000), 10_000);
        assert_eq!(removed, vec![ExtAddr(1)]);
        assert!(!reg.contains(ExtAddr(1)));
        assert!(reg.contains(ExtAddr(2)));
    }
}
