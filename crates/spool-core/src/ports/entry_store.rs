//! EntryStore port - エントリの永続化
//!
//! One store instance owns the bytes of exactly one queue. The queue keeps
//! its indices in memory and treats the store as the source of truth: a
//! change is committed only once `write` / `delete` has returned `Ok`.

use crate::domain::{EntryId, EntryRecord, Payload};
use crate::error::StorageError;

/// A record that could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    /// Where the record lives (file path or key).
    pub location: String,
    pub reason: String,
}

/// Result of enumerating a store. Corruption is isolated per record: a bad
/// record ends up in `skipped`, the rest still load.
#[derive(Debug, Clone)]
pub struct LoadReport<P> {
    pub records: Vec<EntryRecord<P>>,
    pub skipped: Vec<SkippedRecord>,
}

impl<P> Default for LoadReport<P> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

pub trait EntryStore: Send + Sync {
    /// Atomically replace the stored record for `record.entry_id`. A crash
    /// mid-write leaves either the old record or the new one, never a torn
    /// one.
    fn write<P: Payload>(&self, record: &EntryRecord<P>) -> Result<(), StorageError>;

    /// Every record currently stored. Fails only if the store as a whole is
    /// unreadable.
    fn read_all<P: Payload>(&self) -> Result<LoadReport<P>, StorageError>;

    /// Remove a record. Removing an unknown id succeeds.
    fn delete(&self, entry_id: &EntryId) -> Result<(), StorageError>;

    /// Whether any record (readable or not) is stored under `entry_id`.
    fn exists(&self, entry_id: &EntryId) -> bool;

    /// Drop the store's namespace itself. Used when a queue is removed.
    fn destroy(&self) -> Result<(), StorageError>;
}
