//! The cache index: which resource lives in which slot, and when it was
//! last used.
//!
//! The index is layered bottom-up:
//!
//! - [`CacheAction`](action::CacheAction) is the unit of durability, one
//!   log line per mutation.
//! - [`IndexEntries`](entries::IndexEntries) is the in-memory table, kept
//!   sorted most-recently-used first.
//! - [`IndexLog`](log::IndexLog) owns the physical log file: replay on
//!   load, buffered appends, compaction rewrites.
//! - [`Index`] is the query/mutation view handed to transaction closures;
//!   it performs no I/O of its own and delegates all persistence to the
//!   log.
//! - [`IndexHolder`](holder::IndexHolder) is the transaction boundary that
//!   wraps every access in lock/load/mutate/persist/unlock.

pub mod action;
pub mod entries;
pub mod entry;
pub mod holder;
pub mod log;


use url::Url;

use crate::key::CacheKey;
use crate::version::VersionString;

use self::entry::{EntryId, IndexEntry, now_millis};
use self::log::IndexLog;

/// A mutable view over the loaded entry table.
///
/// Only obtainable through [`IndexHolder`](holder::IndexHolder), which
/// guarantees the log is locked and loaded for the lifetime of the view.
#[derive(Debug)]
pub struct Index<'a> {
    log: &'a mut IndexLog,
}

impl<'a> Index<'a> {
    pub(crate) fn new(log: &'a mut IndexLog) -> Self {
        Index { log }
    }

    /// The first entry with exactly this key, in recency order.
    pub fn find_entry(&self, key: &CacheKey) -> Option<IndexEntry> {
        self.log
            .all_entries()
            .iter()
            .find(|e| e.key == *key)
            .cloned()
    }

    /// Finds an entry and bumps its access time in one pass.
    ///
    /// The returned entry carries the new timestamp.
    pub fn find_and_mark_accessed(&mut self, key: &CacheKey) -> Option<IndexEntry> {
        let mut entry = self.find_entry(key)?;
        let now = now_millis();
        self.log.mark_accessed(entry.id.clone(), now);
        entry.last_accessed = now;
        Some(entry)
    }

    /// All entries for this location, regardless of version.
    pub fn find_all_entries(&self, url: &Url) -> Vec<IndexEntry> {
        self.log
            .all_entries()
            .iter()
            .filter(|e| e.key.matches_url(url))
            .cloned()
            .collect()
    }

    /// All entries for this location whose version is a member of the given
    /// version-string (or which are unversioned, if none is given).
    pub fn find_all_entries_matching(
        &self,
        url: &Url,
        version_string: Option<&VersionString>,
    ) -> Vec<IndexEntry> {
        self.log
            .all_entries()
            .iter()
            .filter(|e| e.key.matches_version_string(url, version_string))
            .cloned()
            .collect()
    }

    /// Creates a new entry for the given key and slot, accessed now.
    pub fn create_entry(&mut self, key: CacheKey, id: EntryId) -> IndexEntry {
        let entry = IndexEntry::new(id, now_millis(), key);
        self.log.add_entry(entry.clone());
        entry
    }

    /// Removes the entry occupying the given slot, if any.
    pub fn remove_entry(&mut self, id: EntryId) {
        self.log.remove_entry(id);
    }

    /// Removes the first entry with exactly this key, if any.
    pub fn remove_key(&mut self, key: &CacheKey) {
        if let Some(entry) = self.find_entry(key) {
            self.log.remove_entry(entry.id);
        }
    }

    /// Drops all entries.
    pub fn clear(&mut self) {
        self.log.clear();
    }

    /// Requests a compacting rewrite of the log on persist.
    pub fn request_compression(&mut self) {
        self.log.request_compression();
    }

    /// All entries, most recently used first.
    pub fn all_entries(&self) -> &[IndexEntry] {
        self.log.all_entries()
    }
}
