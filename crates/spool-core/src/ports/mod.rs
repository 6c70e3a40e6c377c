//! Ports - 抽象化レイヤー
//!
//! Seams between the queue and its collaborators.
//!
//! - `EntryStore`: durable storage of entry records
//! - `Clock`: time source for `created` / `modified`
//! - `IdGenerator`: entry id allocation

pub mod clock;
pub mod entry_store;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::entry_store::{EntryStore, LoadReport, SkippedRecord};
pub use self::id_generator::{IdGenerator, UlidGenerator};
