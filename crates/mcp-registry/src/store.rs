//! The shared record store.
//!
//! The store is the single shared mutable resource in the system. Writers go
//! through the orchestrator's per-name serialization; readers take cloned
//! snapshots and must tolerate staleness. The backing implementation is
//! deliberately opaque behind [`RecordStore`].

use crate::record::{ProcessRecord, ProcessStatus};
use dashmap::DashMap;
use std::sync::Arc;

/// Storage interface for process records.
pub trait RecordStore: Send + Sync {
    /// Snapshot of one record.
    fn get(&self, name: &str) -> Option<ProcessRecord>;

    /// Insert or replace a record.
    fn put(&self, record: ProcessRecord);

    /// Snapshot of all records, in no particular order.
    fn list(&self) -> Vec<ProcessRecord>;

    /// Retire a record: force it to `Stopped` rather than deleting it, so
    /// references to the name stay resolvable.
    fn retire(&self, name: &str);
}

/// In-memory [`RecordStore`] backed by a sharded concurrent map.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<String, ProcessRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, name: &str) -> Option<ProcessRecord> {
        self.records.get(name).map(|entry| entry.clone())
    }

    fn put(&self, record: ProcessRecord) {
        self.records.insert(record.name.clone(), record);
    }

    fn list(&self) -> Vec<ProcessRecord> {
        self.records.iter().map(|entry| entry.clone()).collect()
    }

    fn retire(&self, name: &str) {
        if let Some(mut entry) = self.records.get_mut(name) {
            entry.status = ProcessStatus::Stopped;
            entry.pid = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(name: &str) -> ProcessRecord {
        ProcessRecord::new(
            name,
            vec!["/bin/true".to_string()],
            Duration::from_secs(30),
        )
    }

    #[test]
    fn put_get_round_trip() {
        let store = MemoryStore::new();
        assert!(store.get("a").is_none());

        store.put(record("a"));
        let snapshot = store.get("a").unwrap();
        assert_eq!(snapshot.name, "a");
        assert_eq!(snapshot.status, ProcessStatus::Stopped);
    }

    #[test]
    fn snapshots_are_detached_from_the_store() {
        let store = MemoryStore::new();
        store.put(record("a"));

        let mut snapshot = store.get("a").unwrap();
        snapshot.mark_starting().unwrap();

        // Mutating the snapshot does not touch the stored record.
        assert_eq!(store.get("a").unwrap().status, ProcessStatus::Stopped);
    }

    #[test]
    fn retire_forces_stopped_without_removal() {
        let store = MemoryStore::new();
        let mut rec = record("a");
        rec.mark_starting().unwrap();
        rec.mark_running(55).unwrap();
        store.put(rec);

        store.retire("a");
        let snapshot = store.get("a").unwrap();
        assert_eq!(snapshot.status, ProcessStatus::Stopped);
        assert!(snapshot.pid.is_none());
    }

    #[test]
    fn list_returns_every_record() {
        let store = MemoryStore::new();
        store.put(record("a"));
        store.put(record("b"));
        store.put(record("c"));

        let mut names: Vec<String> = store.list().into_iter().map(|r| r.name).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
