use super::entry::{EntryId, IndexEntry};

/// The in-memory entry table, kept sorted most-recently-used first.
///
/// All mutations report whether they changed anything; the log uses that to
/// decide which actions are worth persisting.
#[derive(Debug, Clone, Default)]
pub struct IndexEntries {
    entries: Vec<IndexEntry>,
}

impl IndexEntries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry at its recency position.
    ///
    /// Returns `false` if an entry with the same id is already present.
    pub fn add(&mut self, entry: IndexEntry) -> bool {
        if self.contains(&entry.id) {
            return false;
        }
        self.entries.push(entry);
        self.resort();
        true
    }

    /// Removes the entry with the given id, reporting whether it existed.
    pub fn remove(&mut self, id: &EntryId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != *id);
        self.entries.len() != before
    }

    /// Bumps the access time of the entry with the given id and restores the
    /// sort order. Returns `false` if no such entry exists.
    pub fn touch(&mut self, id: &EntryId, last_accessed: i64) -> bool {
        match self.entries.iter_mut().find(|e| e.id == *id) {
            Some(entry) => {
                entry.last_accessed = last_accessed;
                self.resort();
                true
            }
            None => false,
        }
    }

    /// Drops all entries, reporting whether the table was non-empty.
    pub fn clear(&mut self) -> bool {
        let changed = !self.entries.is_empty();
        self.entries.clear();
        changed
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        self.entries.iter().any(|e| e.id == *id)
    }

    /// All entries, most recently used first.
    pub fn all(&self) -> &[IndexEntry] {
        &self.entries
    }

    fn resort(&mut self) {
        // stable: entries with equal timestamps keep first-encountered order
        self.entries.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
    }
}
