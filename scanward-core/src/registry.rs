//! In-memory host registry for one run
//!
//! Records are keyed by address and iterated in address order, so every pass
//! over the registry visits hosts in the same sequence.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use tracing::debug;

use crate::model::{HostRecord, HostSnapshot};

type HostsMap = BTreeMap<String, HostRecord>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostRegistry {
    hosts: HostsMap,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing record for `address`, or a fresh default one. The flag is
    /// true when the record was created by this call.
    pub fn get_or_create(&mut self, address: &str) -> (&mut HostRecord, bool) {
        match self.hosts.entry(address.to_string()) {
            Entry::Occupied(entry) => (entry.into_mut(), false),
            Entry::Vacant(entry) => {
                debug!(address, "created record");
                (entry.insert(HostRecord::new(address)), true)
            }
        }
    }

    pub fn get(&self, address: &str) -> Option<&HostRecord> {
        self.hosts.get(address)
    }

    pub fn get_mut(&mut self, address: &str) -> Option<&mut HostRecord> {
        self.hosts.get_mut(address)
    }

    /// Only the retention pass removes records
    pub fn remove(&mut self, address: &str) -> Option<HostRecord> {
        self.hosts.remove(address)
    }

    pub fn all(&self) -> impl Iterator<Item = &HostRecord> {
        self.hosts.values()
    }

    pub fn all_mut(&mut self) -> impl Iterator<Item = &mut HostRecord> {
        self.hosts.values_mut()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.hosts.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn running_count(&self) -> usize {
        self.hosts.values().filter(|h| h.running).count()
    }

    pub fn snapshots(&self) -> Vec<HostSnapshot> {
        self.hosts.values().map(HostRecord::snapshot).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_never_duplicates() {
        let mut registry = HostRegistry::new();

        let (record, new) = registry.get_or_create("10.0.0.5");
        assert!(new);
        record.comment = "printer".into();

        let (record, new) = registry.get_or_create("10.0.0.5");
        assert!(!new);
        assert_eq!(record.comment, "printer");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_running_count_and_remove() {
        let mut registry = HostRegistry::new();
        registry.get_or_create("10.0.0.1").0.running = true;
        registry.get_or_create("10.0.0.2");
        registry.get_or_create("10.0.0.3").0.running = true;
        assert_eq!(registry.running_count(), 2);

        assert!(registry.remove("10.0.0.1").is_some());
        assert!(registry.remove("10.0.0.1").is_none());
        assert_eq!(registry.running_count(), 1);
        assert_eq!(registry.addresses(), vec!["10.0.0.2", "10.0.0.3"]);
    }
}
