//! Impls - implementations of the ports.
//!
//! - **FsEntryStore**: one JSON file per entry, atomic replace (default)
//! - **InMemoryEntryStore**: tests and ephemeral queues

pub mod fs_store;
pub mod inmem_store;

pub use self::fs_store::FsEntryStore;
pub use self::inmem_store::InMemoryEntryStore;
