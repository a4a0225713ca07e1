//! A multi-process-safe disk cache for downloaded resources.
//!
//! Resources are addressed by a [`CacheKey`], their URL plus an optional
//! [`VersionId`]. Payloads live in two-level slot directories under the
//! cache root, each with a metadata sidecar; an append-only log file holds
//! the index and the least-recently-used order. All index access runs under
//! an exclusive advisory file lock, so any number of processes can share
//! one cache root, and every mutation is a single appended line, so a crash
//! mid-write costs at most that line.
//!
//! [`CacheStore`] is the entry point.

pub mod config;
pub mod error;
pub mod logging;
pub mod version;

mod index;
mod key;
mod legacy;
mod meta;
mod properties;
mod store;

pub use config::Config;
pub use error::CacheError;
pub use index::entry::{EntryId, IndexEntry};
pub use key::{CacheKey, is_cacheable};
pub use meta::{DownloadInfo, ResourceInfo};
pub use store::{CacheIdInfo, CacheIdKind, CacheStore, NoopShortcutCleaner, ShortcutCleaner};
pub use version::{VersionId, VersionString};
