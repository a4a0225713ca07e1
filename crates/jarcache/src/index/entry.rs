use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::key::CacheKey;

/// Milliseconds since the epoch, the timestamp unit of the index.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// The opaque identifier of a cache slot, of the form `"<i>/<j>"` with
/// `i, j ∈ [0, 250)`. Doubles as the slot's directory path relative to the
/// cache root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(String);

impl EntryId {
    pub(crate) fn from_levels(i: u32, j: u32) -> Self {
        EntryId(format!("{i}/{j}"))
    }

    /// Wraps a raw id string, `None` if it is empty.
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            None
        } else {
            Some(EntryId(raw.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of the cache index.
///
/// Equality is by id only: two entries are the same slot even if their other
/// fields were to differ. Ordering is descending by `last_accessed`, so that
/// a sorted table has the most recently used entries at the front.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub id: EntryId,
    pub last_accessed: i64,
    pub key: CacheKey,
}

impl IndexEntry {
    pub fn new(id: EntryId, last_accessed: i64, key: CacheKey) -> Self {
        IndexEntry {
            id,
            last_accessed,
            key,
        }
    }
}

impl PartialEq for IndexEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for IndexEntry {}

impl Ord for IndexEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .last_accessed
            .cmp(&self.last_accessed)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for IndexEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
