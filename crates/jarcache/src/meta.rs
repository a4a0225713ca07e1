//! Per-slot metadata sidecars.
//!
//! Every cache slot carries a `.info` file next to the payload, recording
//! the size and timestamps of the download that produced it. The sidecar is
//! what makes "cached" decidable: a payload whose length disagrees with the
//! recorded content length is a torn download and is treated as absent.

use std::io;
use std::path::{Path, PathBuf};

use url::Url;

use crate::index::entry::EntryId;
use crate::properties::Properties;

/// Name of the metadata sidecar inside a slot directory.
pub(crate) const INFO_FILE_NAME: &str = ".info";

const KEY_CONTENT_LENGTH: &str = "content-length";
const KEY_LAST_MODIFIED: &str = "last-modified";
const KEY_LAST_UPDATED: &str = "last-updated";
const KEY_JNLP_PATH: &str = "jnlp-path";

/// Metadata of a completed download, as reported by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadInfo {
    /// Remote modification time, millis since the epoch. Zero if unknown.
    pub last_modified: i64,
    /// When the bytes were fetched, millis since the epoch.
    pub downloaded_at: i64,
}

/// The stored sidecar data of a cached resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceInfo {
    pub content_length: Option<i64>,
    pub last_modified: Option<i64>,
    pub last_updated: Option<i64>,
    pub jnlp_path: Option<String>,
}

/// A cache slot on disk: the payload file and its `.info` sidecar.
///
/// The slot directory is `<root>/<i>/<j>` for the entry id `"<i>/<j>"`; the
/// payload keeps the last path segment of the resource URL as its file name
/// so the cache directory stays browsable.
#[derive(Debug, Clone)]
pub(crate) struct CacheSlot {
    dir: PathBuf,
    payload: PathBuf,
    info: PathBuf,
}

impl CacheSlot {
    pub(crate) fn new(root: &Path, id: &EntryId, location: &Url) -> Self {
        let dir = root.join(id.as_str());
        let payload = dir.join(payload_file_name(location));
        let info = dir.join(INFO_FILE_NAME);
        CacheSlot { dir, payload, info }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn payload(&self) -> &Path {
        &self.payload
    }

    pub(crate) fn info_path(&self) -> &Path {
        &self.info
    }

    /// Creates the slot directory and an initial sidecar, tagged with the
    /// launch descriptor path when one is known.
    pub(crate) fn create_info_file(&self, jnlp_path: Option<&str>) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut properties = Properties::new();
        match jnlp_path {
            Some(path) => properties.set(KEY_JNLP_PATH, path),
            None => tracing::debug!(dir = %self.dir.display(), "no jnlp-path to record"),
        }
        properties.store(&self.info)
    }

    /// Records the metadata of a finished download.
    ///
    /// The content length is measured from the payload on disk rather than
    /// trusted from the transport, so a short write is detectable later.
    /// Keys this engine does not know about survive the rewrite.
    pub(crate) fn store_info(&self, download: &DownloadInfo) -> io::Result<()> {
        let length = std::fs::metadata(&self.payload)?.len();

        let mut properties = Properties::load(&self.info)?;
        properties.set(KEY_CONTENT_LENGTH, length.to_string());
        properties.set(KEY_LAST_MODIFIED, download.last_modified.to_string());
        properties.set(KEY_LAST_UPDATED, download.downloaded_at.to_string());
        properties.store(&self.info)
    }

    pub(crate) fn resource_info(&self) -> io::Result<ResourceInfo> {
        let properties = Properties::load(&self.info)?;
        Ok(ResourceInfo {
            content_length: properties.get_i64(KEY_CONTENT_LENGTH),
            last_modified: properties.get_i64(KEY_LAST_MODIFIED),
            last_updated: properties.get_i64(KEY_LAST_UPDATED),
            jnlp_path: properties.get(KEY_JNLP_PATH).map(str::to_owned),
        })
    }

    pub(crate) fn info_exists(&self) -> bool {
        self.info.is_file()
    }

    pub(crate) fn jnlp_path(&self) -> Option<String> {
        let properties = Properties::load(&self.info).ok()?;
        properties.get(KEY_JNLP_PATH).map(str::to_owned)
    }

    /// Whether the payload is fully present: it exists and its length equals
    /// the recorded content length. Any read error counts as not cached.
    pub(crate) fn is_cached(&self) -> bool {
        let Ok(metadata) = std::fs::metadata(&self.payload) else {
            return false;
        };
        if !metadata.is_file() {
            return false;
        }
        let Ok(properties) = Properties::load(&self.info) else {
            return false;
        };
        properties.get_i64(KEY_CONTENT_LENGTH) == Some(metadata.len() as i64)
    }

    /// Whether the cached payload is at least as new as the remote resource.
    ///
    /// An unknown remote modification time (zero or negative) never counts
    /// as current; equality does.
    pub(crate) fn is_current(&self, remote_last_modified: i64) -> bool {
        if !self.is_cached() || remote_last_modified <= 0 {
            return false;
        }
        let Ok(properties) = Properties::load(&self.info) else {
            return false;
        };
        match properties.get_i64(KEY_LAST_MODIFIED) {
            Some(stored) => remote_last_modified <= stored,
            None => false,
        }
    }
}

/// The payload file name for a resource: the last segment of the URL path,
/// or `"0"` for URLs without one.
pub(crate) fn payload_file_name(location: &Url) -> &str {
    match location.path().rsplit_once('/') {
        Some((_, name)) if !name.is_empty() => name,
        _ => "0",
    }
}
