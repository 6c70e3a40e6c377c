use std::path::PathBuf;

use thiserror::Error;

use crate::domain::{EntryEvent, EntryId, EntryState};

/// Failure touching the durable record of an entry or queue.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record at {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to move temp file into {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },

    /// Raised by stores that reject writes (e.g. fault injection in tests).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn serialization(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Serialization {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("entry {entry_id}: cannot {event} from {from}")]
    InvalidTransition {
        entry_id: EntryId,
        from: EntryState,
        event: EntryEvent,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("entry id already present in queue: {0}")]
    DuplicateId(EntryId),

    #[error("entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("entry {entry_id} cannot be removed while {state}")]
    GuardViolation { entry_id: EntryId, state: EntryState },

    #[error("source and destination are the same queue")]
    SameQueue,
}

impl QueueError {
    /// Whether the queue is known to be unchanged and the caller may simply
    /// retry or pick a different action.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, QueueError::Storage(_))
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
