//! The append-only log file backing the cache index.
//!
//! This is the only component that touches the physical log file. Mutations
//! are buffered as [`CacheAction`]s and written out by [`persist_changes`],
//! either as appended lines or, after a compaction request, as a full
//! rewrite containing one `Add` line per surviving entry.
//!
//! [`persist_changes`]: IndexLog::persist_changes

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use fs4::fs_std::FileExt;
use tempfile::NamedTempFile;

use crate::error::CacheError;

use super::action::CacheAction;
use super::entries::IndexEntries;
use super::entry::{EntryId, IndexEntry};

/// Filesystems commonly store modification times with one-second
/// granularity. Within that window an unchanged mtime proves nothing, so
/// the file is re-parsed unconditionally.
const MTIME_GRANULARITY: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct IndexLog {
    path: PathBuf,
    lock_path: PathBuf,
    /// The held cross-process lock. The lock lives on a sidecar file so
    /// that compaction can replace the log itself via rename without
    /// invalidating locks other processes are blocked on.
    lock: Option<File>,
    entries: IndexEntries,
    unsaved: Vec<CacheAction>,
    compression_requested: bool,
    last_sync: Option<SyncPoint>,
}

/// Remembers when the in-memory table was last synchronized with the file.
#[derive(Debug)]
struct SyncPoint {
    mtime: Option<SystemTime>,
    at: Instant,
}

impl IndexLog {
    pub fn new(path: PathBuf) -> Self {
        let mut lock_name = path.file_name().unwrap_or_default().to_os_string();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);

        IndexLog {
            path,
            lock_path,
            lock: None,
            entries: IndexEntries::new(),
            unsaved: Vec::new(),
            compression_requested: false,
            last_sync: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquires the exclusive advisory lock, blocking until it is free.
    pub fn lock(&mut self) -> Result<(), CacheError> {
        if self.lock.is_some() {
            return Ok(());
        }
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)?;
        file.lock_exclusive()?;
        self.lock = Some(file);
        Ok(())
    }

    /// Releases the lock. Dropping the file descriptor releases the
    /// advisory lock even if the explicit unlock fails.
    pub fn unlock(&mut self) {
        if let Some(file) = self.lock.take() {
            if let Err(error) = FileExt::unlock(&file) {
                tracing::warn!(error = &error as &dyn std::error::Error, "failed to unlock cache index");
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    pub fn is_dirty(&self) -> bool {
        !self.unsaved.is_empty() || self.compression_requested
    }

    /// Reconstructs the entry table by replaying the log file.
    ///
    /// Fails when called without holding the lock, or over unsaved changes
    /// (loading over dirty state would silently lose writes). The file is
    /// only re-parsed if its modification time changed since the last
    /// load/store, or if less than [`MTIME_GRANULARITY`] has elapsed since
    /// then.
    pub fn load(&mut self) -> Result<(), CacheError> {
        if !self.is_locked() {
            return Err(CacheError::NotLocked);
        }
        if self.is_dirty() {
            return Err(CacheError::UnsavedChanges);
        }
        if !self.needs_reload() {
            return Ok(());
        }

        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let mut entries = IndexEntries::new();
        for line in content.lines() {
            // corrupted lines parse to Noop and are skipped, never fatal
            CacheAction::parse(line).apply_to(&mut entries);
        }
        self.entries = entries;
        self.record_sync();
        Ok(())
    }

    fn needs_reload(&self) -> bool {
        let Some(sync) = &self.last_sync else {
            return true;
        };
        if sync.at.elapsed() < MTIME_GRANULARITY {
            return true;
        }
        self.current_mtime() != sync.mtime
    }

    fn current_mtime(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    fn record_sync(&mut self) {
        self.last_sync = Some(SyncPoint {
            mtime: self.current_mtime(),
            at: Instant::now(),
        });
    }

    /// All entries, most recently used first.
    pub fn all_entries(&self) -> &[IndexEntry] {
        self.entries.all()
    }

    /// Adds an entry; buffered for persistence only if the table changed.
    pub fn add_entry(&mut self, entry: IndexEntry) {
        self.apply(CacheAction::Add(entry));
    }

    /// Bumps an entry's access time and restores the recency order.
    pub fn mark_accessed(&mut self, id: EntryId, last_accessed: i64) {
        self.apply(CacheAction::Touch(id, last_accessed));
    }

    /// Removes an entry. Nothing happens if the id is unknown.
    pub fn remove_entry(&mut self, id: EntryId) {
        self.apply(CacheAction::Remove(id));
    }

    fn apply(&mut self, action: CacheAction) {
        if action.apply_to(&mut self.entries) {
            self.unsaved.push(action);
        }
    }

    /// Drops all entries; the file is truncated on the next persist.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.compression_requested = true;
    }

    /// Marks the log for a full rewrite instead of an append on the next
    /// persist, discarding the action history.
    pub fn request_compression(&mut self) {
        self.compression_requested = true;
    }

    /// Drops all buffered, un-persisted mutations.
    ///
    /// The in-memory table may still reflect them, so the next [`load`]
    /// is forced to re-parse the file.
    ///
    /// [`load`]: IndexLog::load
    pub fn discard_changes(&mut self) {
        self.unsaved.clear();
        self.compression_requested = false;
        self.last_sync = None;
    }

    /// Writes buffered changes to the file and clears the dirty state.
    ///
    /// The buffer is consumed up front, so a failed write discards the
    /// buffered actions from durability while the in-memory table stays
    /// correct for the rest of the process lifetime. This mirrors the
    /// long-standing behavior of other writers of this format; changing it
    /// would alter how concurrent processes converge.
    pub fn persist_changes(&mut self) -> Result<(), CacheError> {
        if !self.is_locked() {
            return Err(CacheError::NotLocked);
        }

        let actions = mem::take(&mut self.unsaved);
        let compress = mem::replace(&mut self.compression_requested, false);

        let result = if compress {
            self.rewrite_compacted()
        } else if actions.is_empty() {
            Ok(())
        } else {
            self.append_actions(&actions)
        };
        self.record_sync();
        result
    }

    /// Rewrites the whole file as one `Add` action per current entry,
    /// atomically via a tempfile in the same directory.
    fn rewrite_compacted(&mut self) -> Result<(), CacheError> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(parent)?;
        for entry in self.entries.all() {
            writeln!(tmp, "{}", CacheAction::Add(entry.clone()).serialize())?;
        }
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn append_actions(&mut self, actions: &[CacheAction]) -> Result<(), CacheError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut buffer = String::new();
        for action in actions {
            buffer.push_str(&action.serialize());
            buffer.push('\n');
        }
        file.write_all(buffer.as_bytes())?;
        Ok(())
    }
}

impl Drop for IndexLog {
    fn drop(&mut self) {
        self.unlock();
    }
}
