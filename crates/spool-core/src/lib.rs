//! spool-core
//!
//! Durable single-host work queue. Producers add entries carrying an opaque
//! payload and an optional tag; consumers claim one Waiting entry at a time
//! and report finish, fail, requeue or suspend. Every entry is persisted as
//! it is created and on every transition, so queues survive restarts.
//!
//! # モジュール構成
//! - **domain**: ids, entry state machine, records, logs, handles
//! - **ports**: seams to collaborators (EntryStore, Clock, IdGenerator)
//! - **impls**: FsEntryStore (default), InMemoryEntryStore
//! - **queue**: Queue with indices and the claim protocol
//! - **manager**: QueueManager, one live Queue per name over a storage root
//! - **config**: environment-driven configuration
//!
//! ```no_run
//! use spool_core::QueueManager;
//!
//! let manager = QueueManager::<serde_json::Value>::new("/var/lib/spool");
//! let queue = manager.queue_with_name("thumbnails")?;
//! queue.add_entry(serde_json::json!({"path": "a.png"}), Some("png"), false)?;
//!
//! if let Some(mut entry) = queue.get_entry_for_processing()? {
//!     // ... do the work ...
//!     queue.finish_entry(&mut entry)?;
//! }
//! # Ok::<(), spool_core::QueueError>(())
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod manager;
pub mod observability;
pub mod ports;
pub mod queue;

pub use config::{ClaimOrder, Config, ConfigError, QueueConfig, RecoveryPolicy};
pub use domain::{
    EntryContext, EntryEvent, EntryId, EntryLog, EntryRecord, EntryState, LogSeverity, Payload,
    QueueEntry, QueueId,
};
pub use error::{QueueError, Result, StorageError};
pub use manager::{JsonQueueManager, QueueManager, QueueMeta, default_manager};
pub use observability::QueueCounts;
pub use queue::{Queue, QueueOptions, RemovalReport};
