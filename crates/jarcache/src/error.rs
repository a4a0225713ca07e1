use std::io;

use thiserror::Error;
use url::Url;

/// An error raised by the cache engine.
///
/// Most read-style operations on the cache never surface errors to the
/// caller; corruption and I/O problems degrade to "not cached" or to log
/// messages. The variants here cover the cases that are fatal to an
/// operation: a resource that can never be cached, a broken transaction
/// setup, or an exhausted slot tree.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The resource URL cannot be cached at all (e.g. a `file:` URL).
    ///
    /// This is raised before any lock is taken.
    #[error("resource is not cacheable: {0}")]
    NotCacheable(Url),

    /// The index log was used without holding the exclusive file lock.
    #[error("cache index is not locked")]
    NotLocked,

    /// The index log was asked to reload while unsaved changes exist.
    ///
    /// Loading over dirty state would silently lose writes.
    #[error("cache index has unsaved changes")]
    UnsavedChanges,

    /// All 62,500 slot directories are taken.
    #[error("no free cache directory slot")]
    OutOfSlots,

    /// The filter passed to the cache-ids listing is not a valid regex.
    #[error("invalid cache id filter")]
    InvalidFilter(#[from] regex::Error),

    /// An I/O failure during transaction setup (creating or locking the
    /// index log). There is no valid index to act on in this case.
    #[error("cache index i/o failure")]
    Io(#[from] io::Error),
}
