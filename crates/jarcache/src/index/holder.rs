//! The transaction boundary of the cache index.
//!
//! One transaction = one lock acquisition = one load/mutate/persist/unlock
//! cycle. There is no finer-grained locking and no nesting.

use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::CacheError;
use crate::legacy;

use super::Index;
use super::log::IndexLog;

/// Serializes all access to the index, across processes and threads.
///
/// Cross-process exclusion comes from the advisory file lock owned by the
/// [`IndexLog`]; since that lock is not re-entrant within a process, an
/// in-process mutex guards the acquire step to avoid self-deadlock between
/// threads of the same process.
#[derive(Debug)]
pub struct IndexHolder {
    log: Mutex<IndexLog>,
    legacy_path: PathBuf,
}

impl IndexHolder {
    /// `log_path` is the current-format log file; `legacy_path` is the old
    /// property-file index that gets migrated once if the log is absent.
    pub fn new(log_path: PathBuf, legacy_path: PathBuf) -> Self {
        IndexHolder {
            log: Mutex::new(IndexLog::new(log_path)),
            legacy_path,
        }
    }

    /// Runs `action` against the index under the exclusive lock.
    ///
    /// The log is loaded before the closure runs and, if the closure left
    /// unsaved actions or a pending compaction, persisted afterwards.
    /// Persistence failures are logged and swallowed: the in-memory table
    /// already reflects the mutation and the closure's result stands. The
    /// lock is released before returning in every case, including when the
    /// closure panics; buffered mutations of an unwound transaction are
    /// discarded so later transactions start from the persisted state.
    pub fn with_index<T>(&self, action: impl FnOnce(&mut Index) -> T) -> Result<T, CacheError> {
        let mut log = self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        log.lock()?;
        let mut guard = TransactionGuard {
            log: &mut log,
            completed: false,
        };
        let result = self.run_locked(&mut *guard.log, action);
        guard.completed = true;
        result
    }

    fn run_locked<T>(
        &self,
        log: &mut IndexLog,
        action: impl FnOnce(&mut Index) -> T,
    ) -> Result<T, CacheError> {
        self.ensure_log_exists(log)?;
        log.load()?;

        let value = action(&mut Index::new(log));

        if log.is_dirty() {
            if let Err(error) = log.persist_changes() {
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    path = %log.path().display(),
                    "failed to persist cache index changes"
                );
            }
        }
        Ok(value)
    }

    /// Creates an empty log, or migrates the legacy index into one, if no
    /// log exists yet. Runs under the file lock, so two processes racing on
    /// first access migrate exactly once.
    fn ensure_log_exists(&self, log: &mut IndexLog) -> Result<(), CacheError> {
        if log.path().exists() {
            return Ok(());
        }
        if self.legacy_path.is_file() {
            legacy::migrate(&self.legacy_path, log.path())?;
        } else {
            std::fs::write(log.path(), b"")?;
        }
        Ok(())
    }
}

/// Unlocks the log when the transaction ends, however it ends. An unwound
/// transaction additionally drops its buffered mutations.
struct TransactionGuard<'a> {
    log: &'a mut IndexLog,
    completed: bool,
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.log.discard_changes();
        }
        self.log.unlock();
    }
}
