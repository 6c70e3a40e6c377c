//! Identifiers for entries and queues.
//!
//! - `EntryId` wraps a ULID: 128 bits, 80 of them random, so ids stay unique
//!   for the lifetime of a storage root without a persisted counter.
//! - `QueueId` is derived from the queue name with SHA-256, so the same name
//!   always lands in the same directory.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ulid::Ulid;

/// Identifier of one entry within a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Ulid);

impl EntryId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for EntryId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntryId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// Stable identifier of a queue, independent of how its name is spelled on
/// disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueId(String);

impl QueueId {
    /// Number of digest bytes kept in the hex id.
    const DIGEST_BYTES: usize = 16;

    pub fn for_name(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        let hex = digest[..Self::DIGEST_BYTES]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>();
        Self(hex)
    }

    /// Accepts an id read back from a directory name. Returns `None` for
    /// anything that is not a well-formed id.
    pub fn parse(raw: &str) -> Option<Self> {
        let well_formed = raw.len() == Self::DIGEST_BYTES * 2
            && raw.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        well_formed.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
