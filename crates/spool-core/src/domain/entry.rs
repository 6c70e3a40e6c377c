//! Caller-facing entry handle.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{EntryId, EntryLog, EntryRecord, EntryState, Payload, QueueId};

/// Volatile per-entry slot for the embedding application (e.g. a handle to
/// the in-flight execution). Never persisted; lost on reload.
pub type EntryContext = Arc<dyn Any + Send + Sync>;

/// A snapshot of one entry as the queue saw it when the handle was produced.
///
/// The queue is the authority on state: operations validate against the live
/// entry, and refresh the handle passed to them on success.
#[derive(Clone)]
pub struct QueueEntry<P> {
    pub(crate) queue_id: QueueId,
    pub(crate) record: EntryRecord<P>,
    pub(crate) context: Option<EntryContext>,
}

impl<P: Payload> QueueEntry<P> {
    pub(crate) fn new(queue_id: QueueId, record: EntryRecord<P>, context: Option<EntryContext>) -> Self {
        Self {
            queue_id,
            record,
            context,
        }
    }

    pub fn id(&self) -> EntryId {
        self.record.entry_id
    }

    /// Queue this handle was produced by.
    pub fn queue_id(&self) -> &QueueId {
        &self.queue_id
    }

    pub fn payload(&self) -> &P {
        &self.record.payload
    }

    pub fn tag(&self) -> Option<&str> {
        self.record.tag.as_deref()
    }

    pub fn state(&self) -> EntryState {
        self.record.state
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.record.created
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.record.modified
    }

    pub fn logs(&self) -> &[EntryLog] {
        &self.record.logs
    }

    pub fn record(&self) -> &EntryRecord<P> {
        &self.record
    }

    pub fn context(&self) -> Option<&EntryContext> {
        self.context.as_ref()
    }

    /// Downcast the context slot to a concrete type.
    pub fn context_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.context.as_deref().and_then(|c| c.downcast_ref::<T>())
    }

    pub fn can_remove(&self) -> bool {
        self.record.state.is_removable()
    }

    pub fn has_finished(&self) -> bool {
        self.record.state.is_terminal()
    }
}

impl<P: fmt::Debug> fmt::Debug for QueueEntry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueEntry")
            .field("queue_id", &self.queue_id)
            .field("record", &self.record)
            .field("has_context", &self.context.is_some())
            .finish()
    }
}
