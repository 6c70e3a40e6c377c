//! Queue: ordered, indexed entries over one entry store.
//!
//! Every mutating call and every snapshot runs under one mutex per queue, so
//! the scan-select-transition-persist sequence of a claim is indivisible with
//! respect to everything else touching the same queue. Changes are written to
//! the store first; the indices only move once the write is accepted.

mod index;

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use self::index::QueueIndex;
use crate::config::{QueueConfig, RecoveryPolicy};
use crate::domain::{
    EntryContext, EntryEvent, EntryId, EntryLog, EntryRecord, EntryState, Payload, QueueEntry,
    QueueId,
};
use crate::error::{QueueError, Result};
use crate::impls::FsEntryStore;
use crate::observability::QueueCounts;
use crate::ports::{Clock, EntryStore, IdGenerator, SkippedRecord, SystemClock, UlidGenerator};

/// Fresh ids are retried this many times on collision before giving up.
const ID_ATTEMPTS: usize = 4;

/// Collaborators and knobs for opening a queue.
#[derive(Clone)]
pub struct QueueOptions {
    pub config: QueueConfig,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    /// Directory backing the queue, if any (informational).
    pub storage_path: Option<PathBuf>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            config: QueueConfig::default(),
            ids: Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
            storage_path: None,
        }
    }
}

impl QueueOptions {
    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `clock` for timestamps and for the time part of new ids.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }
}

/// Outcome of a bulk removal. Failures do not stop the rest.
#[derive(Debug, Default)]
pub struct RemovalReport {
    pub removed: Vec<EntryId>,
    pub failed: Vec<(EntryId, QueueError)>,
}

impl RemovalReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Queue<P, S = FsEntryStore> {
    queue_id: QueueId,
    name: String,
    storage_path: Option<PathBuf>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    store: S,
    index: Mutex<QueueIndex<P>>,
    skipped: Vec<SkippedRecord>,
}

impl<P: Payload, S: EntryStore> fmt::Debug for Queue<P, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("queue_id", &self.queue_id)
            .field("name", &self.name)
            // try_lock: formatting may happen while the index is held.
            .field("count", &self.index.try_lock().ok().map(|index| index.len()))
            .finish()
    }
}

impl<P: Payload, S: EntryStore> Queue<P, S> {
    /// Open a queue over `store`, loading every record it holds.
    ///
    /// Records that fail to decode are skipped (see `skipped_records`).
    /// Entries left Processing are handled per `RecoveryPolicy`.
    pub fn open(name: &str, store: S, options: QueueOptions) -> Result<Self> {
        let queue_id = QueueId::for_name(name);
        let report = store.read_all::<P>()?;
        let mut records = report.records;

        let recovered = match options.config.recovery {
            RecoveryPolicy::ResetToWaiting => {
                Self::recover_processing(&queue_id, &store, options.clock.as_ref(), &mut records)
            }
            RecoveryPolicy::Keep => 0,
        };

        let index = QueueIndex::from_records(records);
        info!(
            queue_id = %queue_id,
            name,
            entries = index.len(),
            recovered,
            skipped = report.skipped.len(),
            "queue opened"
        );

        Ok(Self {
            queue_id,
            name: name.to_string(),
            storage_path: options.storage_path,
            config: options.config,
            clock: options.clock,
            ids: options.ids,
            store,
            index: Mutex::new(index),
            skipped: report.skipped,
        })
    }

    /// Put entries a dead process left Processing back to Waiting. An entry
    /// whose reset cannot be persisted stays Processing.
    fn recover_processing(
        queue_id: &QueueId,
        store: &S,
        clock: &dyn Clock,
        records: &mut [EntryRecord<P>],
    ) -> usize {
        let mut recovered = 0;
        for record in records
            .iter_mut()
            .filter(|r| r.state == EntryState::Processing)
        {
            let now = clock.now();
            let mut reset = record.clone();
            reset.apply(EntryEvent::Requeue, now);
            reset.push_log(
                EntryLog::warning("recovered", "was processing when the queue was last closed"),
                now,
            );
            match store.write(&reset) {
                Ok(()) => {
                    *record = reset;
                    recovered += 1;
                }
                Err(e) => warn!(
                    queue_id = %queue_id,
                    entry_id = %record.entry_id,
                    error = %e,
                    "could not reset processing entry"
                ),
            }
        }
        recovered
    }

    pub fn queue_id(&self) -> &QueueId {
        &self.queue_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage_path(&self) -> Option<&Path> {
        self.storage_path.as_deref()
    }

    pub fn config(&self) -> QueueConfig {
        self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Records that could not be decoded when the queue was opened.
    pub fn skipped_records(&self) -> &[SkippedRecord] {
        &self.skipped
    }

    fn lock(&self) -> MutexGuard<'_, QueueIndex<P>> {
        self.index.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn handle(&self, index: &QueueIndex<P>, entry_id: &EntryId) -> Option<QueueEntry<P>> {
        index.get(entry_id).map(|slot| {
            QueueEntry::new(self.queue_id.clone(), slot.record.clone(), slot.context.clone())
        })
    }

    fn handles(&self, index: &QueueIndex<P>, ids: &[EntryId]) -> Vec<QueueEntry<P>> {
        ids.iter().filter_map(|id| self.handle(index, id)).collect()
    }

    // ------------------------------------------------------------------
    // Producers
    // ------------------------------------------------------------------

    /// Create, persist and index a new entry. Starts Suspending when
    /// `suspended` is set, Waiting otherwise.
    pub fn add_entry(&self, payload: P, tag: Option<&str>, suspended: bool) -> Result<QueueEntry<P>> {
        let mut index = self.lock();
        let entry_id = self.fresh_id(&index)?;
        let sequence = index.allocate_sequence();
        let record = EntryRecord::new(
            entry_id,
            sequence,
            payload,
            tag.map(str::to_string),
            suspended,
            self.clock.now(),
        );

        self.store.write(&record)?;
        debug!(
            queue_id = %self.queue_id,
            entry_id = %entry_id,
            state = %record.state,
            tag = record.tag.as_deref().unwrap_or(""),
            "entry added"
        );
        index.insert(record.clone(), None);
        Ok(QueueEntry::new(self.queue_id.clone(), record, None))
    }

    fn fresh_id(&self, index: &QueueIndex<P>) -> Result<EntryId> {
        let mut entry_id = self.ids.generate_entry_id();
        for _ in 1..ID_ATTEMPTS {
            if !index.contains(&entry_id) && !self.store.exists(&entry_id) {
                return Ok(entry_id);
            }
            entry_id = self.ids.generate_entry_id();
        }
        if index.contains(&entry_id) || self.store.exists(&entry_id) {
            return Err(QueueError::DuplicateId(entry_id));
        }
        Ok(entry_id)
    }

    // ------------------------------------------------------------------
    // Consumers
    // ------------------------------------------------------------------

    /// Claim the next Waiting entry, moving it to Processing. `None` means
    /// there is nothing to do right now.
    pub fn get_entry_for_processing(&self) -> Result<Option<QueueEntry<P>>> {
        let mut index = self.lock();
        let Some(entry_id) = index.next_claim(self.config.claim_order) else {
            return Ok(None);
        };
        self.commit(&mut index, entry_id, EntryEvent::Claim, None)?;
        Ok(self.handle(&index, &entry_id))
    }

    /// Apply `event` to the live entry behind `entry`, optionally appending
    /// `log`. On success `entry` is refreshed; on failure nothing changed.
    pub fn transition_entry(
        &self,
        entry: &mut QueueEntry<P>,
        event: EntryEvent,
        log: Option<EntryLog>,
    ) -> Result<()> {
        let mut index = self.lock();
        self.commit(&mut index, entry.id(), event, log)?;
        if let Some(fresh) = self.handle(&index, &entry.id()) {
            *entry = fresh;
        }
        Ok(())
    }

    pub fn finish_entry(&self, entry: &mut QueueEntry<P>) -> Result<()> {
        self.transition_entry(entry, EntryEvent::Finish, None)
    }

    pub fn fail_entry(&self, entry: &mut QueueEntry<P>) -> Result<()> {
        self.transition_entry(entry, EntryEvent::Fail, None)
    }

    /// Requeue: Processing or Suspending back to Waiting.
    pub fn wait_entry(&self, entry: &mut QueueEntry<P>) -> Result<()> {
        self.transition_entry(entry, EntryEvent::Requeue, None)
    }

    pub fn suspend_entry(&self, entry: &mut QueueEntry<P>) -> Result<()> {
        self.transition_entry(entry, EntryEvent::Suspend, None)
    }

    /// Append a log line without changing state.
    pub fn append_log(&self, entry: &mut QueueEntry<P>, log: EntryLog) -> Result<()> {
        let mut index = self.lock();
        let entry_id = entry.id();
        let slot = index
            .get(&entry_id)
            .ok_or(QueueError::EntryNotFound(entry_id))?;

        let mut updated = slot.record.clone();
        updated.push_log(log, self.clock.now());
        self.store.write(&updated)?;
        index.replace(updated);

        if let Some(fresh) = self.handle(&index, &entry_id) {
            *entry = fresh;
        }
        Ok(())
    }

    /// Attach (or clear) the volatile context of the live entry.
    pub fn set_context(&self, entry: &mut QueueEntry<P>, context: Option<EntryContext>) -> Result<()> {
        let mut index = self.lock();
        let entry_id = entry.id();
        let slot = index
            .get_mut(&entry_id)
            .ok_or(QueueError::EntryNotFound(entry_id))?;
        slot.context = context.clone();
        entry.context = context;
        Ok(())
    }

    /// Validate, persist, then index one transition. The live record is
    /// only touched after the store accepted the new version.
    fn commit(
        &self,
        index: &mut QueueIndex<P>,
        entry_id: EntryId,
        event: EntryEvent,
        log: Option<EntryLog>,
    ) -> Result<()> {
        let slot = index
            .get(&entry_id)
            .ok_or(QueueError::EntryNotFound(entry_id))?;

        let from = slot.record.state;
        let mut updated = slot.record.clone();
        let now = self.clock.now();
        if updated.apply(event, now).is_none() {
            return Err(QueueError::InvalidTransition {
                entry_id,
                from,
                event,
            });
        }
        if let Some(log) = log {
            updated.push_log(log, now);
        }

        self.store.write(&updated)?;
        debug!(
            queue_id = %self.queue_id,
            entry_id = %entry_id,
            %event,
            from = %from,
            to = %updated.state,
            "entry transitioned"
        );
        index.replace(updated);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------

    /// Delete an entry. Refused while it is Processing.
    pub fn remove_entry(&self, entry: &QueueEntry<P>) -> Result<()> {
        let mut index = self.lock();
        let entry_id = entry.id();
        let state = index
            .get(&entry_id)
            .map(|slot| slot.record.state)
            .ok_or(QueueError::EntryNotFound(entry_id))?;
        if !state.is_removable() {
            return Err(QueueError::GuardViolation { entry_id, state });
        }
        self.delete(&mut index, &entry_id)
    }

    /// Delete every Finished entry, best effort.
    pub fn remove_finished_entries(&self) -> RemovalReport {
        let mut index = self.lock();
        let ids = index.ids_with_state(EntryState::Finished);
        self.delete_all(&mut index, ids)
    }

    /// Delete every entry regardless of state, Processing included. Meant
    /// for tearing a queue down.
    pub fn remove_all_entries(&self) -> RemovalReport {
        let mut index = self.lock();
        let ids = index.ids().to_vec();
        self.delete_all(&mut index, ids)
    }

    fn delete(&self, index: &mut QueueIndex<P>, entry_id: &EntryId) -> Result<()> {
        self.store.delete(entry_id)?;
        index.remove(entry_id);
        debug!(queue_id = %self.queue_id, entry_id = %entry_id, "entry removed");
        Ok(())
    }

    fn delete_all(&self, index: &mut QueueIndex<P>, ids: Vec<EntryId>) -> RemovalReport {
        let mut report = RemovalReport::default();
        for entry_id in ids {
            match self.delete(index, &entry_id) {
                Ok(()) => report.removed.push(entry_id),
                Err(e) => {
                    warn!(
                        queue_id = %self.queue_id,
                        entry_id = %entry_id,
                        error = %e,
                        "failed to remove entry"
                    );
                    report.failed.push((entry_id, e));
                }
            }
        }
        report
    }

    // ------------------------------------------------------------------
    // Cooperation with other queues
    // ------------------------------------------------------------------

    /// Move `entry` out of `source` into this queue: persisted here, then
    /// deleted there. On success `entry` is re-parented to this queue.
    pub fn adopt_entry<S2: EntryStore>(
        &self,
        source: &Queue<P, S2>,
        entry: &mut QueueEntry<P>,
    ) -> Result<()> {
        if source.queue_id == self.queue_id {
            return Err(QueueError::SameQueue);
        }

        // queue_id 順にロックする（逆向きの adopt 同士でデッドロックしない）
        let (mut dst, mut src) = if self.queue_id < source.queue_id {
            let dst = self.lock();
            (dst, source.lock())
        } else {
            let src = source.lock();
            (self.lock(), src)
        };

        let entry_id = entry.id();
        let slot = src
            .get(&entry_id)
            .ok_or(QueueError::EntryNotFound(entry_id))?;
        if !slot.record.state.is_removable() {
            return Err(QueueError::GuardViolation {
                entry_id,
                state: slot.record.state,
            });
        }
        if dst.contains(&entry_id) || self.store.exists(&entry_id) {
            return Err(QueueError::DuplicateId(entry_id));
        }

        let mut record = slot.record.clone();
        record.sequence = dst.allocate_sequence();
        record.push_log(
            EntryLog::info("moved", format!("from queue {}", source.name)),
            self.clock.now(),
        );

        self.store.write(&record)?;
        if let Err(e) = source.store.delete(&entry_id) {
            if let Err(undo) = self.store.delete(&entry_id) {
                warn!(
                    queue_id = %self.queue_id,
                    entry_id = %entry_id,
                    error = %undo,
                    "could not undo partial move; entry is stored in both queues"
                );
            }
            return Err(e.into());
        }

        let context = src.remove(&entry_id).and_then(|slot| slot.context);
        dst.insert(record, context);
        debug!(
            queue_id = %self.queue_id,
            from = %source.queue_id,
            entry_id = %entry_id,
            "entry adopted"
        );

        if let Some(fresh) = self.handle(&dst, &entry_id) {
            *entry = fresh;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries (snapshots; never affected by later mutation)
    // ------------------------------------------------------------------

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn counts(&self) -> QueueCounts {
        self.lock().counts()
    }

    pub fn count_of_state(&self, state: EntryState) -> usize {
        self.lock().counts().get(state)
    }

    pub fn count_for_tag(&self, tag: &str) -> usize {
        self.lock().count_for_tag(tag)
    }

    pub fn count_of_state_for_tag(&self, state: EntryState, tag: &str) -> usize {
        self.lock().count_of_state_for_tag(state, tag)
    }

    /// Entry at FIFO position `index`.
    pub fn entry_at_index(&self, index: usize) -> Option<QueueEntry<P>> {
        let guard = self.lock();
        let entry_id = *guard.ids().get(index)?;
        self.handle(&guard, &entry_id)
    }

    pub fn entry_for_id(&self, entry_id: &EntryId) -> Option<QueueEntry<P>> {
        let guard = self.lock();
        self.handle(&guard, entry_id)
    }

    /// Every entry in FIFO order.
    pub fn entries(&self) -> Vec<QueueEntry<P>> {
        let guard = self.lock();
        self.handles(&guard, guard.ids())
    }

    pub fn entries_for_tag(&self, tag: &str) -> Vec<QueueEntry<P>> {
        let guard = self.lock();
        let ids = guard.ids_for_tag(tag);
        self.handles(&guard, &ids)
    }

    pub fn tag_names(&self) -> BTreeSet<String> {
        self.lock().tag_names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryEntryStore;
    use crate::ports::FixedClock;
    use chrono::{Duration, TimeZone, Utc};

    type TestQueue = Queue<serde_json::Value, InMemoryEntryStore>;

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ))
    }

    fn open(store: &InMemoryEntryStore, clock: &Arc<FixedClock>) -> TestQueue {
        let options = QueueOptions::default().with_clock(clock.clone());
        Queue::open("jobs", store.clone(), options).unwrap()
    }

    fn payload(n: u32) -> serde_json::Value {
        serde_json::json!({ "n": n })
    }

    #[test]
    fn add_entry_persists_before_returning() {
        let store = InMemoryEntryStore::new();
        let queue = open(&store, &clock());

        let entry = queue.add_entry(payload(1), Some("mail"), false).unwrap();

        assert_eq!(entry.state(), EntryState::Waiting);
        assert_eq!(entry.queue_id(), queue.queue_id());
        let stored = store.get::<serde_json::Value>(&entry.id()).unwrap();
        assert_eq!(&stored, entry.record());
    }

    #[test]
    fn debug_shows_identity_and_size() {
        let store = InMemoryEntryStore::new();
        let queue = open(&store, &clock());
        queue.add_entry(payload(1), None, false).unwrap();

        let rendered = format!("{queue:?}");
        assert!(rendered.contains("\"jobs\""));
        assert!(rendered.contains(queue.queue_id().as_str()));
        assert!(rendered.contains("Some(1)"));
    }

    #[test]
    fn suspend_persists_and_blocks_claims_until_requeued() {
        let store = InMemoryEntryStore::new();
        let clock = clock();
        let queue = open(&store, &clock);
        let added = queue.add_entry(payload(1), Some("mail"), false).unwrap();
        let mut claimed = queue.get_entry_for_processing().unwrap().unwrap();

        clock.advance(Duration::seconds(2));
        queue.suspend_entry(&mut claimed).unwrap();

        assert_eq!(claimed.state(), EntryState::Suspending);
        assert_eq!(claimed.modified(), clock.now());
        let stored = store.get::<serde_json::Value>(&added.id()).unwrap();
        assert_eq!(stored.state, EntryState::Suspending);
        assert_eq!(&stored, claimed.record());
        assert_eq!(queue.count_of_state(EntryState::Suspending), 1);
        assert_eq!(queue.count_of_state(EntryState::Processing), 0);
        assert_eq!(queue.count_of_state_for_tag(EntryState::Suspending, "mail"), 1);
        assert!(queue.get_entry_for_processing().unwrap().is_none());

        // Suspending can only go back to Waiting.
        assert!(matches!(
            queue.finish_entry(&mut claimed),
            Err(QueueError::InvalidTransition { from: EntryState::Suspending, .. })
        ));

        queue.wait_entry(&mut claimed).unwrap();
        assert_eq!(claimed.state(), EntryState::Waiting);
        let again = queue.get_entry_for_processing().unwrap().unwrap();
        assert_eq!(again.id(), added.id());
        assert_eq!(queue.count_of_state(EntryState::Suspending), 0);
    }

    #[test]
    fn add_suspended_entry_is_not_claimable() {
        let store = InMemoryEntryStore::new();
        let queue = open(&store, &clock());

        let mut entry = queue.add_entry(payload(1), None, true).unwrap();
        assert_eq!(entry.state(), EntryState::Suspending);
        assert!(queue.get_entry_for_processing().unwrap().is_none());

        queue.wait_entry(&mut entry).unwrap();
        let claimed = queue.get_entry_for_processing().unwrap().unwrap();
        assert_eq!(claimed.id(), entry.id());
    }

    #[test]
    fn failed_write_rolls_back_transition() {
        let store = InMemoryEntryStore::new();
        let queue = open(&store, &clock());
        let added = queue.add_entry(payload(1), None, false).unwrap();
        let mut claimed = queue.get_entry_for_processing().unwrap().unwrap();

        store.fail_writes(true);
        let err = queue.finish_entry(&mut claimed).unwrap_err();
        assert!(matches!(err, QueueError::Storage(_)));
        assert!(!err.is_recoverable());

        assert_eq!(claimed.state(), EntryState::Processing);
        let live = queue.entry_for_id(&added.id()).unwrap();
        assert_eq!(live.state(), EntryState::Processing);
        assert_eq!(queue.count_of_state(EntryState::Processing), 1);
        assert_eq!(queue.count_of_state(EntryState::Finished), 0);
        let stored = store.get::<serde_json::Value>(&added.id()).unwrap();
        assert_eq!(stored.state, EntryState::Processing);

        store.fail_writes(false);
        queue.finish_entry(&mut claimed).unwrap();
        assert!(claimed.has_finished());
    }

    #[test]
    fn failed_write_on_add_leaves_queue_empty() {
        let store = InMemoryEntryStore::new();
        let queue = open(&store, &clock());

        store.fail_writes(true);
        assert!(queue.add_entry(payload(1), Some("mail"), false).is_err());
        assert_eq!(queue.count(), 0);
        assert_eq!(queue.count_for_tag("mail"), 0);
        assert!(queue.tag_names().is_empty());
    }

    #[test]
    fn invalid_transition_changes_nothing() {
        let store = InMemoryEntryStore::new();
        let clock = clock();
        let queue = open(&store, &clock);
        let mut entry = queue.add_entry(payload(1), None, false).unwrap();
        let before = store.get::<serde_json::Value>(&entry.id()).unwrap();

        clock.advance(Duration::seconds(10));
        let err = queue.finish_entry(&mut entry).unwrap_err();
        assert!(matches!(
            err,
            QueueError::InvalidTransition {
                from: EntryState::Waiting,
                event: EntryEvent::Finish,
                ..
            }
        ));
        assert!(err.is_recoverable());

        let after = store.get::<serde_json::Value>(&entry.id()).unwrap();
        assert_eq!(after, before);
        assert_eq!(queue.entry_for_id(&entry.id()).unwrap().record(), &before);
    }

    #[test]
    fn transition_with_log_persists_log_and_modified() {
        let store = InMemoryEntryStore::new();
        let clock = clock();
        let queue = open(&store, &clock);
        queue.add_entry(payload(1), None, false).unwrap();
        let mut entry = queue.get_entry_for_processing().unwrap().unwrap();

        clock.advance(Duration::seconds(3));
        queue
            .transition_entry(
                &mut entry,
                EntryEvent::Fail,
                Some(EntryLog::error("upload", "connection reset")),
            )
            .unwrap();

        assert_eq!(entry.state(), EntryState::Waiting);
        assert_eq!(entry.logs().len(), 1);
        assert_eq!(entry.logs()[0].detail, "connection reset");
        assert_eq!(entry.modified(), clock.now());
        let stored = store.get::<serde_json::Value>(&entry.id()).unwrap();
        assert_eq!(&stored, entry.record());
    }

    #[test]
    fn append_log_bumps_modified_only() {
        let store = InMemoryEntryStore::new();
        let clock = clock();
        let queue = open(&store, &clock);
        let mut entry = queue.add_entry(payload(1), None, false).unwrap();

        clock.advance(Duration::seconds(1));
        queue
            .append_log(&mut entry, EntryLog::new(crate::domain::LogSeverity::Notice, "hint", ""))
            .unwrap();

        assert_eq!(entry.state(), EntryState::Waiting);
        assert_eq!(entry.logs().len(), 1);
        assert!(entry.modified() > entry.created());
    }

    #[test]
    fn context_is_kept_in_memory_but_not_persisted() {
        let store = InMemoryEntryStore::new();
        let clock = clock();
        let queue = open(&store, &clock);
        queue.add_entry(payload(1), None, false).unwrap();
        let mut entry = queue.get_entry_for_processing().unwrap().unwrap();

        queue
            .set_context(&mut entry, Some(Arc::new(42_u64) as EntryContext))
            .unwrap();
        let live = queue.entry_for_id(&entry.id()).unwrap();
        assert_eq!(live.context_as::<u64>(), Some(&42));

        drop(queue);
        let reopened = open(&store, &clock);
        let reloaded = reopened.entry_for_id(&entry.id()).unwrap();
        assert!(reloaded.context().is_none());
    }

    #[test]
    fn remove_refuses_processing_entries() {
        let store = InMemoryEntryStore::new();
        let queue = open(&store, &clock());
        queue.add_entry(payload(1), Some("mail"), false).unwrap();
        let mut claimed = queue.get_entry_for_processing().unwrap().unwrap();

        let err = queue.remove_entry(&claimed).unwrap_err();
        assert!(matches!(err, QueueError::GuardViolation { state: EntryState::Processing, .. }));
        assert_eq!(queue.count(), 1);
        assert_eq!(queue.count_for_tag("mail"), 1);
        assert!(store.exists(&claimed.id()));

        queue.finish_entry(&mut claimed).unwrap();
        queue.remove_entry(&claimed).unwrap();
        assert_eq!(queue.count(), 0);
        assert!(!store.exists(&claimed.id()));
        assert!(queue.tag_names().is_empty());
    }

    #[test]
    fn remove_unknown_entry_is_not_found() {
        let store = InMemoryEntryStore::new();
        let queue = open(&store, &clock());
        let entry = queue.add_entry(payload(1), None, false).unwrap();
        queue.remove_entry(&entry).unwrap();

        assert!(matches!(
            queue.remove_entry(&entry),
            Err(QueueError::EntryNotFound(_))
        ));
    }

    #[test]
    fn remove_finished_is_best_effort() {
        let store = InMemoryEntryStore::new();
        let queue = open(&store, &clock());
        for n in 0..3 {
            queue.add_entry(payload(n), None, false).unwrap();
        }
        for _ in 0..2 {
            let mut e = queue.get_entry_for_processing().unwrap().unwrap();
            queue.finish_entry(&mut e).unwrap();
        }

        store.fail_deletes(true);
        let report = queue.remove_finished_entries();
        assert!(!report.is_complete());
        assert_eq!(report.failed.len(), 2);
        assert_eq!(queue.count(), 3);

        store.fail_deletes(false);
        let report = queue.remove_finished_entries();
        assert!(report.is_complete());
        assert_eq!(report.removed.len(), 2);
        assert_eq!(queue.count(), 1);
        assert_eq!(queue.count_of_state(EntryState::Waiting), 1);
    }

    #[test]
    fn remove_all_ignores_processing_guard() {
        let store = InMemoryEntryStore::new();
        let queue = open(&store, &clock());
        queue.add_entry(payload(1), Some("a"), false).unwrap();
        queue.add_entry(payload(2), Some("b"), true).unwrap();
        queue.get_entry_for_processing().unwrap().unwrap();

        let report = queue.remove_all_entries();
        assert!(report.is_complete());
        assert_eq!(report.removed.len(), 2);
        assert_eq!(queue.count(), 0);
        assert_eq!(queue.counts(), QueueCounts::default());
        assert!(store.is_empty());
    }

    #[test]
    fn queries_reflect_tags_and_states() {
        let store = InMemoryEntryStore::new();
        let queue = open(&store, &clock());
        let a = queue.add_entry(payload(1), Some("mail"), false).unwrap();
        let b = queue.add_entry(payload(2), Some("sms"), false).unwrap();
        let c = queue.add_entry(payload(3), Some("mail"), false).unwrap();
        queue.add_entry(payload(4), None, false).unwrap();
        queue.get_entry_for_processing().unwrap();

        assert_eq!(queue.count(), 4);
        assert_eq!(queue.count_for_tag("mail"), 2);
        assert_eq!(queue.count_for_tag("none"), 0);
        assert_eq!(queue.count_of_state_for_tag(EntryState::Processing, "mail"), 1);
        assert_eq!(queue.count_of_state_for_tag(EntryState::Waiting, "mail"), 1);
        assert_eq!(
            queue.tag_names().into_iter().collect::<Vec<_>>(),
            vec!["mail".to_string(), "sms".to_string()]
        );

        let mail: Vec<_> = queue.entries_for_tag("mail").iter().map(|e| e.id()).collect();
        assert_eq!(mail, vec![a.id(), c.id()]);
        assert_eq!(queue.entry_at_index(1).unwrap().id(), b.id());
        assert!(queue.entry_at_index(4).is_none());
    }

    #[test]
    fn snapshots_do_not_follow_live_changes() {
        let store = InMemoryEntryStore::new();
        let queue = open(&store, &clock());
        queue.add_entry(payload(1), None, false).unwrap();
        queue.add_entry(payload(2), None, false).unwrap();

        let snapshot = queue.entries();
        let mut claimed = queue.get_entry_for_processing().unwrap().unwrap();
        queue.finish_entry(&mut claimed).unwrap();
        queue.remove_entry(&claimed).unwrap();

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|e| e.state() == EntryState::Waiting));
        assert_eq!(queue.count(), 1);
    }

    #[test]
    fn claim_order_modified_sends_requeued_entries_to_the_back() {
        let store = InMemoryEntryStore::new();
        let clock = clock();
        let options = QueueOptions::default()
            .with_clock(clock.clone())
            .with_config(QueueConfig {
                claim_order: crate::config::ClaimOrder::Modified,
                ..QueueConfig::default()
            });
        let queue: TestQueue = Queue::open("jobs", store, options).unwrap();

        let first = queue.add_entry(payload(1), None, false).unwrap();
        clock.advance(Duration::seconds(1));
        let second = queue.add_entry(payload(2), None, false).unwrap();
        clock.advance(Duration::seconds(1));

        let mut claimed = queue.get_entry_for_processing().unwrap().unwrap();
        assert_eq!(claimed.id(), first.id());
        clock.advance(Duration::seconds(1));
        queue.fail_entry(&mut claimed).unwrap();

        let next = queue.get_entry_for_processing().unwrap().unwrap();
        assert_eq!(next.id(), second.id());
    }

    #[test]
    fn adopt_moves_entry_between_queues() {
        let clock = clock();
        let src_store = InMemoryEntryStore::new();
        let dst_store = InMemoryEntryStore::new();
        let options = QueueOptions::default().with_clock(clock.clone());
        let source: TestQueue = Queue::open("inbox", src_store.clone(), options.clone()).unwrap();
        let dest: TestQueue = Queue::open("archive", dst_store.clone(), options).unwrap();

        let mut entry = source.add_entry(payload(1), Some("mail"), false).unwrap();
        dest.adopt_entry(&source, &mut entry).unwrap();

        assert_eq!(entry.queue_id(), dest.queue_id());
        assert_eq!(entry.tag(), Some("mail"));
        assert_eq!(entry.logs().last().unwrap().title, "moved");
        assert_eq!(source.count(), 0);
        assert_eq!(dest.count_for_tag("mail"), 1);
        assert!(!src_store.exists(&entry.id()));
        assert!(dst_store.exists(&entry.id()));
    }

    #[test]
    fn adopt_rejects_duplicates_processing_and_self() {
        let clock = clock();
        let store = InMemoryEntryStore::new();
        let options = QueueOptions::default().with_clock(clock.clone());
        let source: TestQueue = Queue::open("inbox", store.clone(), options.clone()).unwrap();
        let dest: TestQueue =
            Queue::open("archive", InMemoryEntryStore::new(), options).unwrap();

        let mut entry = source.add_entry(payload(1), None, false).unwrap();
        assert!(matches!(
            source.adopt_entry(&source, &mut entry),
            Err(QueueError::SameQueue)
        ));

        // Same record already sitting in the destination store.
        dest.store().write(entry.record()).unwrap();
        assert!(matches!(
            dest.adopt_entry(&source, &mut entry),
            Err(QueueError::DuplicateId(_))
        ));
        dest.store().delete(&entry.id()).unwrap();

        let mut claimed = source.get_entry_for_processing().unwrap().unwrap();
        assert!(matches!(
            dest.adopt_entry(&source, &mut claimed),
            Err(QueueError::GuardViolation { .. })
        ));
        assert_eq!(source.count(), 1);
        assert_eq!(dest.count(), 0);
    }

    #[test]
    fn adopt_undoes_destination_write_when_source_delete_fails() {
        let clock = clock();
        let src_store = InMemoryEntryStore::new();
        let dst_store = InMemoryEntryStore::new();
        let options = QueueOptions::default().with_clock(clock.clone());
        let source: TestQueue = Queue::open("inbox", src_store.clone(), options.clone()).unwrap();
        let dest: TestQueue = Queue::open("archive", dst_store.clone(), options).unwrap();

        let mut entry = source.add_entry(payload(1), None, false).unwrap();
        src_store.fail_deletes(true);

        assert!(dest.adopt_entry(&source, &mut entry).is_err());
        assert_eq!(entry.queue_id(), source.queue_id());
        assert_eq!(source.count(), 1);
        assert_eq!(dest.count(), 0);
        assert!(dst_store.is_empty());
    }

    #[test]
    fn reopen_resets_processing_entries() {
        let store = InMemoryEntryStore::new();
        let clock = clock();
        let queue = open(&store, &clock);
        queue.add_entry(payload(1), None, false).unwrap();
        let claimed = queue.get_entry_for_processing().unwrap().unwrap();
        drop(queue);

        clock.advance(Duration::minutes(5));
        let reopened = open(&store, &clock);
        let entry = reopened.entry_for_id(&claimed.id()).unwrap();

        assert_eq!(entry.state(), EntryState::Waiting);
        assert_eq!(entry.logs().last().unwrap().title, "recovered");
        assert_eq!(entry.modified(), clock.now());
        let stored = store.get::<serde_json::Value>(&claimed.id()).unwrap();
        assert_eq!(stored.state, EntryState::Waiting);
    }

    #[test]
    fn reopen_with_keep_policy_leaves_processing_entries() {
        let store = InMemoryEntryStore::new();
        let clock = clock();
        let queue = open(&store, &clock);
        queue.add_entry(payload(1), None, false).unwrap();
        queue.get_entry_for_processing().unwrap().unwrap();
        drop(queue);

        let options = QueueOptions::default()
            .with_clock(clock.clone())
            .with_config(QueueConfig {
                recovery: RecoveryPolicy::Keep,
                ..QueueConfig::default()
            });
        let reopened: TestQueue = Queue::open("jobs", store, options).unwrap();
        assert_eq!(reopened.count_of_state(EntryState::Processing), 1);
        assert!(reopened.get_entry_for_processing().unwrap().is_none());
    }

    #[test]
    fn reopen_skips_corrupt_records() {
        let store = InMemoryEntryStore::new();
        let clock = clock();
        let queue = open(&store, &clock);
        let good = queue.add_entry(payload(1), None, false).unwrap();
        drop(queue);

        let bad_id = EntryId::from_ulid(ulid::Ulid::new());
        store.insert_raw(bad_id, b"\x00\x01garbage".to_vec());

        let reopened = open(&store, &clock);
        assert_eq!(reopened.count(), 1);
        assert!(reopened.entry_for_id(&good.id()).is_some());
        assert_eq!(reopened.skipped_records().len(), 1);
        assert_eq!(reopened.skipped_records()[0].location, bad_id.to_string());
    }
}
