//! Entry record: the durable form of one unit of work.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{EntryEvent, EntryId, EntryLog, EntryState};

/// Work payload carried by an entry.
///
/// The queue only stores and returns it; it never looks inside.
pub trait Payload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Everything about an entry that survives a restart.
///
/// Design:
/// - One record is one file (or blob) in the entry store.
/// - State changes happen here; the queue persists the record and only then
///   updates its indices.
/// - `modified >= created` holds after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "P: Payload")]
pub struct EntryRecord<P> {
    pub entry_id: EntryId,

    /// Tie-breaker for entries created in the same clock instant.
    pub sequence: u64,

    pub payload: P,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    pub state: EntryState,

    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,

    #[serde(default)]
    pub logs: Vec<EntryLog>,
}

impl<P: Payload> EntryRecord<P> {
    pub fn new(
        entry_id: EntryId,
        sequence: u64,
        payload: P,
        tag: Option<String>,
        suspended: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id,
            sequence,
            payload,
            tag,
            state: EntryState::initial(suspended),
            created: now,
            modified: now,
            logs: Vec::new(),
        }
    }

    /// Apply `event`, returning the new state, or `None` (record untouched)
    /// when the transition is not allowed.
    pub fn apply(&mut self, event: EntryEvent, now: DateTime<Utc>) -> Option<EntryState> {
        let next = self.state.apply(event)?;
        self.state = next;
        self.touch(now);
        Some(next)
    }

    /// Append a log line stamped with `now`.
    pub fn push_log(&mut self, mut log: EntryLog, now: DateTime<Utc>) {
        log.timestamp = now;
        self.logs.push(log);
        self.touch(now);
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.modified = now.max(self.created);
    }
}
