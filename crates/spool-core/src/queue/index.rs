//! In-memory indices of one queue.
//!
//! Invariant: `order`, `entries` and `tags` describe exactly the same set of
//! entries, and `counts` matches their states. Every method below keeps that
//! true on return; the queue only calls them after the store has accepted the
//! change.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::config::ClaimOrder;
use crate::domain::{EntryContext, EntryId, EntryRecord, EntryState, Payload};
use crate::observability::QueueCounts;

/// A live entry: durable record plus the volatile context slot.
pub(crate) struct Slot<P> {
    pub record: EntryRecord<P>,
    pub context: Option<EntryContext>,
}

pub(crate) struct QueueIndex<P> {
    /// Ids sorted by `(created, sequence)`: the FIFO order.
    order: Vec<EntryId>,

    /// All live entries (single source of truth in memory).
    entries: HashMap<EntryId, Slot<P>>,

    /// Tag -> ids carrying it.
    tags: HashMap<String, HashSet<EntryId>>,

    counts: QueueCounts,

    /// Next sequence number to hand out.
    next_sequence: u64,
}

impl<P: Payload> QueueIndex<P> {
    pub fn from_records(records: Vec<EntryRecord<P>>) -> Self {
        let mut index = Self {
            order: Vec::with_capacity(records.len()),
            entries: HashMap::with_capacity(records.len()),
            tags: HashMap::new(),
            counts: QueueCounts::default(),
            next_sequence: 1,
        };
        for record in records {
            index.insert(record, None);
        }
        index
    }

    pub fn allocate_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }

    pub fn contains(&self, entry_id: &EntryId) -> bool {
        self.entries.contains_key(entry_id)
    }

    pub fn get(&self, entry_id: &EntryId) -> Option<&Slot<P>> {
        self.entries.get(entry_id)
    }

    pub fn get_mut(&mut self, entry_id: &EntryId) -> Option<&mut Slot<P>> {
        self.entries.get_mut(entry_id)
    }

    pub fn insert(&mut self, record: EntryRecord<P>, context: Option<EntryContext>) {
        let entry_id = record.entry_id;
        let key = (record.created, record.sequence);
        let pos = self.order.partition_point(|id| {
            let r = &self.entries[id].record;
            (r.created, r.sequence) <= key
        });

        self.next_sequence = self.next_sequence.max(record.sequence + 1);
        self.counts.increment(record.state);
        if let Some(tag) = &record.tag {
            self.tags.entry(tag.clone()).or_default().insert(entry_id);
        }
        self.order.insert(pos, entry_id);
        self.entries.insert(entry_id, Slot { record, context });
    }

    /// Swap in a persisted new version of an existing record. The tag is
    /// immutable, so only the state counts move.
    pub fn replace(&mut self, record: EntryRecord<P>) {
        let Some(slot) = self.entries.get_mut(&record.entry_id) else {
            return;
        };
        self.counts.shift(slot.record.state, record.state);
        slot.record = record;
    }

    pub fn remove(&mut self, entry_id: &EntryId) -> Option<Slot<P>> {
        let slot = self.entries.remove(entry_id)?;
        self.order.retain(|id| id != entry_id);
        self.counts.decrement(slot.record.state);
        if let Some(tag) = &slot.record.tag
            && let Some(ids) = self.tags.get_mut(tag)
        {
            ids.remove(entry_id);
            if ids.is_empty() {
                self.tags.remove(tag);
            }
        }
        Some(slot)
    }

    /// The Waiting entry that should be claimed next.
    pub fn next_claim(&self, order: ClaimOrder) -> Option<EntryId> {
        let mut waiting = self
            .order
            .iter()
            .map(|id| &self.entries[id].record)
            .filter(|r| r.state.is_claimable());

        match order {
            ClaimOrder::Created => waiting.next().map(|r| r.entry_id),
            ClaimOrder::Modified => waiting
                .min_by_key(|r| (r.modified, r.sequence))
                .map(|r| r.entry_id),
        }
    }

    pub fn ids(&self) -> &[EntryId] {
        &self.order
    }

    pub fn ids_with_state(&self, state: EntryState) -> Vec<EntryId> {
        self.order
            .iter()
            .filter(|id| self.entries[*id].record.state == state)
            .copied()
            .collect()
    }

    pub fn ids_for_tag(&self, tag: &str) -> Vec<EntryId> {
        match self.tags.get(tag) {
            Some(ids) => self
                .order
                .iter()
                .filter(|id| ids.contains(*id))
                .copied()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn counts(&self) -> QueueCounts {
        self.counts
    }

    pub fn count_for_tag(&self, tag: &str) -> usize {
        self.tags.get(tag).map(HashSet::len).unwrap_or(0)
    }

    pub fn count_of_state_for_tag(&self, state: EntryState, tag: &str) -> usize {
        self.tags
            .get(tag)
            .map(|ids| {
                ids.iter()
                    .filter(|id| self.entries[*id].record.state == state)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn tag_names(&self) -> BTreeSet<String> {
        self.tags.keys().cloned().collect()
    }
}
