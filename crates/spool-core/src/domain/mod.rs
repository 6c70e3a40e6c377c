//! Domain model: ids, entry state machine, records, logs and handles.

pub mod entry;
pub mod ids;
pub mod log;
pub mod record;
pub mod state;

pub use self::entry::{EntryContext, QueueEntry};
pub use self::ids::{EntryId, QueueId};
pub use self::log::{EntryLog, LogSeverity};
pub use self::record::{EntryRecord, Payload};
pub use self::state::{EntryEvent, EntryState};
