//! IdGenerator port - ID 生成の抽象化
//!
//! Entry ids are ULIDs, so they sort by creation time.

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::EntryId;
use crate::ports::Clock;

/// IdGenerator hands out entry ids.
///
/// # ULID
/// - 48-bit millisecond timestamp + 80 random bits
/// - no coordination or persisted counter needed to stay unique across
///   restarts, including against ids of entries already removed
pub trait IdGenerator: Send + Sync {
    fn generate_entry_id(&self) -> EntryId;
}

/// ULID based generator. Takes its timestamp from a `Clock`, so tests with a
/// `FixedClock` get ids with a known time component.
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_entry_id(&self) -> EntryId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        EntryId::from(ulid)
    }
}
