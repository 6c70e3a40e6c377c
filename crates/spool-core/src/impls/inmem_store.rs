//! InMemoryEntryStore - entry store for tests and throwaway queues.
//!
//! Records are kept serialized, so a load goes through the same serde path as
//! the file store. Writes and deletes can be made to fail on demand to
//! exercise rollback paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::{EntryId, EntryRecord, Payload};
use crate::error::StorageError;
use crate::ports::{EntryStore, LoadReport, SkippedRecord};

/// Cloning shares the underlying map, so a second queue opened on a clone
/// sees the same records (useful for simulating a restart).
#[derive(Debug, Clone, Default)]
pub struct InMemoryEntryStore {
    records: Arc<Mutex<BTreeMap<EntryId, Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
    fail_deletes: Arc<AtomicBool>,
}

impl InMemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `write` fail until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `delete` fail until reset.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Store raw bytes under `entry_id`, bypassing serialization.
    pub fn insert_raw(&self, entry_id: EntryId, bytes: Vec<u8>) {
        self.lock().insert(entry_id, bytes);
    }

    /// Decode one stored record, if present and readable.
    pub fn get<P: Payload>(&self, entry_id: &EntryId) -> Option<EntryRecord<P>> {
        let records = self.lock();
        let bytes = records.get(entry_id)?;
        serde_json::from_slice(bytes).ok()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<EntryId, Vec<u8>>> {
        self.records.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl EntryStore for InMemoryEntryStore {
    fn write<P: Payload>(&self, record: &EntryRecord<P>) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!(
                "write of {} rejected",
                record.entry_id
            )));
        }
        let bytes = serde_json::to_vec(record)
            .map_err(|e| StorageError::serialization(record.entry_id.to_string(), e))?;
        self.lock().insert(record.entry_id, bytes);
        Ok(())
    }

    fn read_all<P: Payload>(&self) -> Result<LoadReport<P>, StorageError> {
        let mut report = LoadReport::default();
        for (entry_id, bytes) in self.lock().iter() {
            match serde_json::from_slice::<EntryRecord<P>>(bytes) {
                Ok(record) => report.records.push(record),
                Err(e) => report.skipped.push(SkippedRecord {
                    location: entry_id.to_string(),
                    reason: e.to_string(),
                }),
            }
        }
        Ok(report)
    }

    fn delete(&self, entry_id: &EntryId) -> Result<(), StorageError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!(
                "delete of {entry_id} rejected"
            )));
        }
        self.lock().remove(entry_id);
        Ok(())
    }

    fn exists(&self, entry_id: &EntryId) -> bool {
        self.lock().contains_key(entry_id)
    }

    fn destroy(&self) -> Result<(), StorageError> {
        self.lock().clear();
        Ok(())
    }
}
