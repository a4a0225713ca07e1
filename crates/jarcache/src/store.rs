//! The cache engine.
//!
//! [`CacheStore`] ties the index, the slot layout and the metadata sidecars
//! together. It owns no global state: construct one from a [`Config`] and
//! pass it around by reference. All index access goes through the holder's
//! transactions, so several stores (or several processes) pointing at the
//! same cache root coexist safely.
//!
//! Payload bytes are deliberately written outside the index lock; only the
//! bookkeeping runs inside a transaction.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use regex::Regex;
use url::Url;

use crate::config::Config;
use crate::error::CacheError;
use crate::index::Index;
use crate::index::entry::{EntryId, IndexEntry};
use crate::index::holder::IndexHolder;
use crate::key::{CacheKey, is_cacheable};
use crate::meta::{CacheSlot, DownloadInfo, INFO_FILE_NAME, ResourceInfo};
use crate::version::VersionString;

/// Slot indices run in `[0, 250)` on both directory levels.
const SLOT_LEVELS: u32 = 250;

/// Removes OS shortcuts pointing into the cache when entries are deleted in
/// bulk. The engine itself never creates shortcuts; launchers that do can
/// plug in their own cleaner.
pub trait ShortcutCleaner: fmt::Debug + Send + Sync {
    /// Called with the lowercased cache id of the deleted group, or `"ALL"`
    /// when the whole cache was cleared.
    fn remove_shortcuts(&self, cache_id: &str);
}

/// The default cleaner: does nothing.
#[derive(Debug, Default)]
pub struct NoopShortcutCleaner;

impl ShortcutCleaner for NoopShortcutCleaner {
    fn remove_shortcuts(&self, _cache_id: &str) {}
}

/// What a [`CacheIdInfo`] groups entries by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheIdKind {
    /// The `jnlp-path` recorded in the entries' metadata sidecars.
    JnlpPath,
    /// The host of the entries' resource URLs.
    Domain,
}

/// A group of cache entries sharing one id, as listed by
/// [`CacheStore::get_cache_ids`].
#[derive(Debug, Clone)]
pub struct CacheIdInfo {
    pub id: String,
    pub kind: CacheIdKind,
    pub entries: Vec<IndexEntry>,
}

/// A disk cache of downloaded resources, addressed by URL and optional
/// version.
#[derive(Debug)]
pub struct CacheStore {
    config: Config,
    index: IndexHolder,
    shortcut_cleaner: Box<dyn ShortcutCleaner>,
}

impl CacheStore {
    /// Opens the cache at the configured root, creating the directory if
    /// needed.
    pub fn new(config: Config) -> Result<Self, CacheError> {
        fs::create_dir_all(&config.cache_dir)?;
        let index = IndexHolder::new(config.index_file(), config.legacy_index_file());
        Ok(CacheStore {
            config,
            index,
            shortcut_cleaner: Box::new(NoopShortcutCleaner),
        })
    }

    /// Replaces the shortcut cleaner invoked on bulk deletions.
    pub fn with_shortcut_cleaner(mut self, cleaner: Box<dyn ShortcutCleaner>) -> Self {
        self.shortcut_cleaner = cleaner;
        self
    }

    /// The file a resource is (or will be) cached in.
    ///
    /// Allocates a fresh slot if the resource has none yet; an existing
    /// entry is marked as accessed. The file itself may not exist or may be
    /// incomplete, check [`is_cached`](Self::is_cached) before reading it.
    pub fn get_or_create_cache_file(&self, key: &CacheKey) -> Result<PathBuf, CacheError> {
        self.require_cacheable(key)?;
        let entry = self
            .index
            .with_index(|idx| self.get_or_create_entry(idx, key))??;
        Ok(self.slot(&entry).payload().to_path_buf())
    }

    /// Streams `reader` into the cache and records the download metadata.
    ///
    /// The index lock is held only for the entry lookup; the byte copy and
    /// the sidecar update run outside of it.
    pub fn add_to_cache(
        &self,
        key: &CacheKey,
        download: &DownloadInfo,
        reader: &mut impl io::Read,
    ) -> Result<PathBuf, CacheError> {
        self.require_cacheable(key)?;
        let entry = self
            .index
            .with_index(|idx| self.get_or_create_entry(idx, key))??;

        let slot = self.slot(&entry);
        tracing::debug!(
            location = %key.location(),
            file = %slot.payload().display(),
            "downloading file into cache"
        );
        let mut out = fs::File::create(slot.payload())?;
        io::copy(reader, &mut out)?;
        slot.store_info(download)?;

        Ok(slot.payload().to_path_buf())
    }

    /// Allocates a fresh slot for a re-download of an already cached
    /// resource.
    ///
    /// The stale entry is dropped from the index immediately; its directory
    /// lingers on disk until the next [`clean_cache`](Self::clean_cache)
    /// sweep, so readers holding the old path are not pulled out from under.
    pub fn replace_existing_cache_file(&self, key: &CacheKey) -> Result<PathBuf, CacheError> {
        self.require_cacheable(key)?;
        let entry = self
            .index
            .with_index(|idx| {
                idx.remove_key(key);
                self.create_slot_and_entry(idx, key)
            })??;
        Ok(self.slot(&entry).payload().to_path_buf())
    }

    /// The stored sidecar metadata of a resource, if it has a cache entry.
    pub fn get_resource_info(&self, key: &CacheKey) -> Result<Option<ResourceInfo>, CacheError> {
        self.require_cacheable(key)?;
        let entry = self.index.with_index(|idx| idx.find_entry(key))?;
        Ok(entry.and_then(|entry| self.slot(&entry).resource_info().ok()))
    }

    /// Whether the resource is fully present in the cache.
    ///
    /// A pure read: the entry's access time is not bumped. Never fails;
    /// lookup problems of any kind count as "not cached".
    pub fn is_cached(&self, key: &CacheKey) -> bool {
        let cached = self
            .lookup(key)
            .map(|entry| self.slot(&entry).is_cached())
            .unwrap_or(false);
        tracing::debug!(key = %key, cached, "cache presence check");
        cached
    }

    /// Whether the cached copy is at least as new as the remote resource.
    ///
    /// Marks the entry as accessed on the way.
    pub fn is_up_to_date(&self, key: &CacheKey, last_modified: i64) -> bool {
        let up_to_date = self
            .lookup_and_touch(key)
            .map(|entry| self.slot(&entry).is_current(last_modified))
            .unwrap_or(false);
        tracing::debug!(key = %key, up_to_date, "cache freshness check");
        up_to_date
    }

    /// The most preferable cached entry for a location.
    ///
    /// Candidates are the entries matching `version_string` (or the
    /// unversioned entry when none is given), ranked by the version-string's
    /// preference order; the best one that is actually present on disk wins.
    pub fn get_best_matching_entry(
        &self,
        location: &Url,
        version_string: Option<&VersionString>,
    ) -> Result<Option<IndexEntry>, CacheError> {
        let mut candidates = self
            .index
            .with_index(|idx| idx.find_all_entries_matching(location, version_string))?;

        if candidates.len() > 1 {
            candidates.sort_by(|a, b| {
                let a = a.key.version();
                let b = b.key.version();
                match (version_string, a, b) {
                    (Some(vs), Some(a), Some(b)) => vs.compare_preference(b, a),
                    _ => b.cmp(&a),
                }
            });
        }

        Ok(candidates
            .into_iter()
            .find(|entry| self.slot(entry).is_cached()))
    }

    /// All cached-on-disk entries for a location, version ascending.
    pub fn get_all_entries(&self, location: &Url) -> Result<Vec<IndexEntry>, CacheError> {
        let mut entries = self.index.with_index(|idx| idx.find_all_entries(location))?;
        entries.retain(|entry| self.slot(entry).is_cached());
        entries.sort_by(|a, b| a.key.version().cmp(&b.key.version()));
        Ok(entries)
    }

    /// Lists cache entries grouped by jnlp-path and/or domain, keeping only
    /// groups whose id matches `filter` (anchored regex).
    ///
    /// Groups appear in the order their first entry occurs in the index.
    pub fn get_cache_ids(
        &self,
        filter: &str,
        include_jnlp_path: bool,
        include_domain: bool,
    ) -> Result<Vec<CacheIdInfo>, CacheError> {
        if !include_jnlp_path && !include_domain {
            return Ok(Vec::new());
        }
        let filter = Regex::new(&format!("^(?:{filter})$"))?;
        let entries = self.index.with_index(|idx| idx.all_entries().to_vec())?;

        let mut groups: Vec<CacheIdInfo> = Vec::new();
        let mut push = |id: &str, kind: CacheIdKind, entry: &IndexEntry| {
            if !filter.is_match(id) {
                return;
            }
            match groups.iter_mut().find(|g| g.id == id && g.kind == kind) {
                Some(group) => group.entries.push(entry.clone()),
                None => groups.push(CacheIdInfo {
                    id: id.to_owned(),
                    kind,
                    entries: vec![entry.clone()],
                }),
            }
        };

        for entry in &entries {
            if include_jnlp_path {
                if let Some(jnlp_path) = self.slot(entry).jnlp_path() {
                    push(&jnlp_path, CacheIdKind::JnlpPath, entry);
                }
            }
            if include_domain {
                if let Some(domain) = entry.key.domain() {
                    push(domain, CacheIdKind::Domain, entry);
                }
            }
        }
        Ok(groups)
    }

    /// Deletes the entry for a key, payload and slot directory included.
    pub fn delete_from_cache(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.index.with_index(|idx| {
            if let Some(entry) = idx.find_entry(key) {
                self.delete_entry(idx, &entry);
            }
        })
    }

    /// Deletes every entry for a location matching the version-string.
    pub fn delete_all_from_cache(
        &self,
        location: &Url,
        version_string: Option<&VersionString>,
    ) -> Result<(), CacheError> {
        self.index.with_index(|idx| {
            for entry in idx.find_all_entries_matching(location, version_string) {
                self.delete_entry(idx, &entry);
            }
        })
    }

    /// Deletes every entry belonging to a cache id, then invokes the
    /// shortcut cleaner for it.
    pub fn delete_by_cache_id(&self, cache_id: &CacheIdInfo) -> Result<(), CacheError> {
        let id = cache_id.id.clone();
        let kind = cache_id.kind;

        self.index.with_index(|idx| {
            let entries = idx.all_entries().to_vec();
            for entry in entries {
                let entry_id = match kind {
                    CacheIdKind::Domain => entry.key.domain().map(str::to_owned),
                    CacheIdKind::JnlpPath => self.slot(&entry).jnlp_path(),
                };
                if entry_id.as_deref() == Some(id.as_str()) {
                    self.delete_entry(idx, &entry);
                }
            }
        })?;

        self.shortcut_cleaner.remove_shortcuts(&id.to_lowercase());
        Ok(())
    }

    /// Deletes everything in the cache.
    ///
    /// Refuses (returning `false`) while another launcher instance holds the
    /// main lock, since yanking payloads out from under a running
    /// application is not recoverable.
    pub fn clear_cache(&self) -> bool {
        if self.cannot_clear_cache() {
            return false;
        }
        tracing::debug!(dir = %self.config.cache_dir.display(), "clearing cache directory");

        let result = self.index.with_index(|idx| {
            for dir in self.level_one_dirs() {
                delete_dir(&dir);
            }
            idx.clear();
        });
        if let Err(error) = result {
            tracing::error!(
                error = &error as &dyn std::error::Error,
                "failed to clear the cache"
            );
            return false;
        }

        self.shortcut_cleaner.remove_shortcuts("ALL");
        true
    }

    /// Evicts stale and over-budget entries and repairs disk/index drift.
    ///
    /// Walks the index most recently used first; an entry survives only if
    /// its sidecar and payload exist and the accumulated payload size stays
    /// within the configured budget. Surviving slots are purged of stray
    /// files. Afterwards, slot directories unknown to the index and empty
    /// top-level directories are removed. The log is compacted as part of
    /// the same transaction.
    pub fn clean_cache(&self) -> Result<(), CacheError> {
        tracing::debug!("preparing to clean up the cache");
        if self.cannot_clear_cache() {
            return Ok(());
        }

        let level_one_dirs = self.level_one_dirs();
        if level_one_dirs.is_empty() {
            tracing::debug!("no folders in the cache dir, clearing the index");
            return self.index.with_index(|idx| idx.clear());
        }

        let mut ids_on_disk = self.collect_slot_ids_from_disk(&level_one_dirs);
        let ids_in_index = self.index.with_index(|idx| {
            idx.request_compression();

            let max_size = self.config.max_size_bytes();
            let mut used: u64 = 0;

            let mut ids = Vec::new();
            for entry in idx.all_entries().to_vec() {
                ids.push(entry.id.clone());

                let slot = self.slot(&entry);
                if !slot.info_exists() {
                    tracing::debug!(location = %entry.key.location(), "missing info file");
                    idx.remove_entry(entry.id);
                    delete_dir(slot.dir());
                    continue;
                }
                let Ok(metadata) = fs::metadata(slot.payload()) else {
                    tracing::debug!(location = %entry.key.location(), "missing cache file");
                    idx.remove_entry(entry.id);
                    delete_dir(slot.dir());
                    continue;
                };
                if !metadata.is_file() {
                    tracing::debug!(location = %entry.key.location(), "missing cache file");
                    idx.remove_entry(entry.id);
                    delete_dir(slot.dir());
                    continue;
                }

                let size = metadata.len();
                if let Some(max_size) = max_size {
                    if used + size > max_size {
                        tracing::debug!(
                            used,
                            size,
                            max_size,
                            location = %entry.key.location(),
                            "cache size budget exceeded"
                        );
                        idx.remove_entry(entry.id);
                        delete_dir(slot.dir());
                        continue;
                    }
                }

                self.delete_stray_files(&slot);
                used += size;
            }
            ids
        })?;

        // slot dirs the index does not know about
        for id in ids_in_index {
            ids_on_disk.retain(|on_disk| *on_disk != id);
        }
        for id in ids_on_disk {
            let dir = self.config.cache_dir.join(id.as_str());
            tracing::debug!(dir = %dir.display(), "deleting slot directory with no index entry");
            delete_dir(&dir);
        }

        for dir in level_one_dirs {
            if dir_is_empty(&dir) {
                delete_dir(&dir);
            }
        }

        tracing::debug!("done cleaning the cache");
        Ok(())
    }

    // Helpers

    fn require_cacheable(&self, key: &CacheKey) -> Result<(), CacheError> {
        if is_cacheable(key.location()) {
            Ok(())
        } else {
            Err(CacheError::NotCacheable(key.location().clone()))
        }
    }

    fn slot(&self, entry: &IndexEntry) -> CacheSlot {
        CacheSlot::new(&self.config.cache_dir, &entry.id, entry.key.location())
    }

    fn lookup(&self, key: &CacheKey) -> Option<IndexEntry> {
        if !is_cacheable(key.location()) {
            return None;
        }
        self.index
            .with_index(|idx| idx.find_entry(key))
            .ok()
            .flatten()
    }

    fn lookup_and_touch(&self, key: &CacheKey) -> Option<IndexEntry> {
        if !is_cacheable(key.location()) {
            return None;
        }
        self.index
            .with_index(|idx| idx.find_and_mark_accessed(key))
            .ok()
            .flatten()
    }

    fn get_or_create_entry(
        &self,
        idx: &mut Index,
        key: &CacheKey,
    ) -> Result<IndexEntry, CacheError> {
        match idx.find_and_mark_accessed(key) {
            Some(entry) => Ok(entry),
            None => self.create_slot_and_entry(idx, key),
        }
    }

    /// Allocates a fresh slot directory, writes its initial sidecar and
    /// registers the entry. Must run inside an index transaction so that no
    /// two processes hand out the same slot.
    fn create_slot_and_entry(
        &self,
        idx: &mut Index,
        key: &CacheKey,
    ) -> Result<IndexEntry, CacheError> {
        let id = self.allocate_slot_id()?;
        let slot = CacheSlot::new(&self.config.cache_dir, &id, key.location());
        slot.create_info_file(self.config.jnlp_path.as_deref())?;
        Ok(idx.create_entry(key.clone(), id))
    }

    fn allocate_slot_id(&self) -> Result<EntryId, CacheError> {
        for i in 0..SLOT_LEVELS {
            for j in 0..SLOT_LEVELS {
                let id = EntryId::from_levels(i, j);
                let dir = self.config.cache_dir.join(id.as_str());
                if !dir.exists() {
                    fs::create_dir_all(&dir)?;
                    return Ok(id);
                }
            }
        }
        Err(CacheError::OutOfSlots)
    }

    fn delete_entry(&self, idx: &mut Index, entry: &IndexEntry) {
        let slot = self.slot(entry);
        tracing::info!(file = %slot.payload().display(), "deleting cache file");
        delete_dir(slot.dir());
        idx.remove_entry(entry.id.clone());
    }

    /// Removes everything in a surviving slot directory that is neither the
    /// payload nor the sidecar.
    fn delete_stray_files(&self, slot: &CacheSlot) {
        let Ok(dir_entries) = fs::read_dir(slot.dir()) else {
            return;
        };
        for dir_entry in dir_entries.flatten() {
            let path = dir_entry.path();
            if path != slot.payload() && dir_entry.file_name() != INFO_FILE_NAME {
                tracing::debug!(file = %path.display(), "found unknown file in cache slot");
                delete_dir(&path);
            }
        }
    }

    fn level_one_dirs(&self) -> Vec<PathBuf> {
        let Ok(dir_entries) = fs::read_dir(&self.config.cache_dir) else {
            return Vec::new();
        };
        dir_entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect()
    }

    /// All slot ids present on disk that carry a sidecar, index or not.
    fn collect_slot_ids_from_disk(&self, level_one_dirs: &[PathBuf]) -> Vec<EntryId> {
        let mut ids = Vec::new();
        for level_one in level_one_dirs {
            let Ok(dir_entries) = fs::read_dir(level_one) else {
                continue;
            };
            for level_two in dir_entries.flatten() {
                if !level_two.path().is_dir() {
                    continue;
                }
                if !level_two.path().join(INFO_FILE_NAME).is_file() {
                    continue;
                }
                let Some(level_one_name) = level_one.file_name() else {
                    continue;
                };
                let id = format!(
                    "{}/{}",
                    level_one_name.to_string_lossy(),
                    level_two.file_name().to_string_lossy()
                );
                if let Some(id) = EntryId::parse(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    fn cannot_clear_cache(&self) -> bool {
        if !self.ok_to_clear_cache() {
            tracing::info!(
                "cannot clear the cache at this time, another launcher instance is running"
            );
            return true;
        }
        if !self.config.cache_dir.is_dir() {
            tracing::error!(
                dir = %self.config.cache_dir.display(),
                "cannot clear the cache, no such directory"
            );
            return true;
        }
        false
    }

    /// Whether no launcher instance is currently running, judged by a
    /// non-blocking probe of the main lock file.
    fn ok_to_clear_cache(&self) -> bool {
        let lock_path = self.config.main_lock_file();
        if !lock_path.is_file() {
            tracing::debug!("no launcher instance file found");
            return true;
        }
        let file = match fs::OpenOptions::new().write(true).open(&lock_path) {
            Ok(file) => file,
            Err(error) => {
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    path = %lock_path.display(),
                    "failed to open the launcher instance file"
                );
                return false;
            }
        };
        match file.try_lock_exclusive() {
            Ok(true) => {
                if let Err(error) = FileExt::unlock(&file) {
                    tracing::warn!(
                        error = &error as &dyn std::error::Error,
                        "failed to unlock the launcher instance file"
                    );
                }
                tracing::debug!("no other launcher instances are running");
                true
            }
            Ok(false) => {
                tracing::info!("other launcher instances are running");
                false
            }
            Err(error) => {
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to probe the launcher instance lock"
                );
                false
            }
        }
    }
}

fn delete_dir(path: &Path) {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    if let Err(error) = result {
        if error.kind() != io::ErrorKind::NotFound {
            tracing::error!(
                error = &error as &dyn std::error::Error,
                path = %path.display(),
                "failed to delete"
            );
        }
    }
}

fn dir_is_empty(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::VersionId;

    fn store(dir: &Path) -> CacheStore {
        store_with_max_size(dir, -1)
    }

    fn store_with_max_size(dir: &Path, max_size_mb: i64) -> CacheStore {
        let config = Config {
            cache_dir: dir.to_path_buf(),
            max_size_mb,
            jnlp_path: None,
        };
        CacheStore::new(config).unwrap()
    }

    fn key(location: &str, version: Option<&str>) -> CacheKey {
        CacheKey::new(
            location.parse().unwrap(),
            version.map(|v| v.parse::<VersionId>().unwrap()),
        )
    }

    fn download() -> DownloadInfo {
        DownloadInfo {
            last_modified: 1000,
            downloaded_at: 2000,
        }
    }

    fn add(store: &CacheStore, key: &CacheKey, contents: &str) -> PathBuf {
        store
            .add_to_cache(key, &download(), &mut contents.as_bytes())
            .unwrap()
    }

    #[test]
    fn first_resource_lands_in_the_first_slot() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let store = store(dir.path());

        let key = key("http://example.com/example.jar", Some("1.0"));
        let file = store.get_or_create_cache_file(&key).unwrap();

        assert_eq!(file, dir.path().join("0/0/example.jar"));
        assert!(dir.path().join("0/0/.info").is_file());
        let log = std::fs::read_to_string(dir.path().join("recently_used.cache")).unwrap();
        assert!(log.starts_with("::i=0/0::l=http://example.com/example.jar::v=1.0::a="));
    }

    #[test]
    fn slots_are_not_handed_out_twice() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let store = store(dir.path());

        let first = store
            .get_or_create_cache_file(&key("http://example.com/a.jar", None))
            .unwrap();
        let second = store
            .get_or_create_cache_file(&key("http://example.com/b.jar", None))
            .unwrap();
        let first_again = store
            .get_or_create_cache_file(&key("http://example.com/a.jar", None))
            .unwrap();

        assert_eq!(first, dir.path().join("0/0/a.jar"));
        assert_eq!(second, dir.path().join("0/1/b.jar"));
        assert_eq!(first_again, first);
    }

    #[test]
    fn local_urls_are_rejected_before_touching_the_index() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let store = store(dir.path());

        let result = store.get_or_create_cache_file(&key("file:///home/user/a.jar", None));
        assert!(matches!(result, Err(CacheError::NotCacheable(_))));
        assert!(!dir.path().join("recently_used.cache").exists());
        assert!(!store.is_cached(&key("file:///home/user/a.jar", None)));
    }

    #[test]
    fn added_resources_are_cached() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let store = store(dir.path());
        let key = key("http://example.com/example.jar", Some("1.0"));

        assert!(!store.is_cached(&key));
        let file = add(&store, &key, "Foo");
        assert!(store.is_cached(&key));
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "Foo");

        let info = store.get_resource_info(&key).unwrap().unwrap();
        assert_eq!(info.content_length, Some(3));
        assert_eq!(info.last_modified, Some(1000));
        assert_eq!(info.last_updated, Some(2000));
    }

    #[test]
    fn presence_checks_do_not_touch_the_index() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let store = store(dir.path());
        let key = key("http://example.com/example.jar", None);
        add(&store, &key, "Foo");

        let log_path = dir.path().join("recently_used.cache");
        let before = std::fs::read_to_string(&log_path).unwrap();

        assert!(store.is_cached(&key));
        assert!(store.is_cached(&key));

        // no touch lines appended, no recency change
        let after = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn truncated_payloads_do_not_count_as_cached() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let store = store(dir.path());
        let key = key("http://example.com/example.jar", None);

        let file = add(&store, &key, "Foo");
        std::fs::write(&file, "F").unwrap();

        assert!(!store.is_cached(&key));
    }

    #[test]
    fn freshness_follows_the_remote_modification_time() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let store = store(dir.path());
        let key = key("http://example.com/example.jar", None);
        add(&store, &key, "Foo");

        assert!(store.is_up_to_date(&key, 1000));
        assert!(store.is_up_to_date(&key, 999));
        assert!(!store.is_up_to_date(&key, 1001));
        assert!(!store.is_up_to_date(&key, 0));
    }

    #[test]
    fn replace_allocates_a_fresh_slot() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let store = store(dir.path());
        let key = key("http://example.com/example.jar", None);

        let old = add(&store, &key, "old");
        let new = store.replace_existing_cache_file(&key).unwrap();

        assert_ne!(old, new);
        // the stale payload stays on disk until the next sweep
        assert!(old.exists());
        assert_eq!(store.get_or_create_cache_file(&key).unwrap(), new);
    }

    #[test]
    fn best_match_follows_the_version_string_preference() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let store = store(dir.path());
        let location: Url = "http://example.com/example.jar".parse().unwrap();

        add(&store, &key("http://example.com/example.jar", Some("1.0")), "a");
        add(&store, &key("http://example.com/example.jar", Some("2.0")), "b");
        add(&store, &key("http://example.com/example.jar", Some("3.0")), "c");

        let vs: VersionString = "2.0 3.0".parse().unwrap();
        let best = store.get_best_matching_entry(&location, Some(&vs)).unwrap();
        assert_eq!(
            best.unwrap().key.version().unwrap().to_string(),
            "2.0"
        );

        let vs: VersionString = "1.0+".parse().unwrap();
        let best = store.get_best_matching_entry(&location, Some(&vs)).unwrap();
        assert_eq!(
            best.unwrap().key.version().unwrap().to_string(),
            "3.0"
        );
    }

    #[test]
    fn best_match_skips_entries_missing_on_disk() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let store = store(dir.path());
        let location: Url = "http://example.com/example.jar".parse().unwrap();

        add(&store, &key("http://example.com/example.jar", Some("1.0")), "a");
        let newest = add(&store, &key("http://example.com/example.jar", Some("2.0")), "b");
        std::fs::remove_file(newest).unwrap();

        let vs: VersionString = "1+".parse().unwrap();
        let best = store.get_best_matching_entry(&location, Some(&vs)).unwrap();
        assert_eq!(
            best.unwrap().key.version().unwrap().to_string(),
            "1.0"
        );
    }

    #[test]
    fn all_entries_are_version_ascending_and_cached_only() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let store = store(dir.path());
        let location: Url = "http://example.com/example.jar".parse().unwrap();

        add(&store, &key("http://example.com/example.jar", Some("2.0")), "b");
        add(&store, &key("http://example.com/example.jar", Some("1.0")), "a");
        let gone = add(&store, &key("http://example.com/example.jar", Some("3.0")), "c");
        std::fs::remove_file(gone).unwrap();

        let versions: Vec<_> = store
            .get_all_entries(&location)
            .unwrap()
            .iter()
            .map(|e| e.key.version().unwrap().to_string())
            .collect();
        assert_eq!(versions, ["1.0", "2.0"]);
    }

    #[test]
    fn delete_from_cache_removes_the_slot() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let store = store(dir.path());
        let key = key("http://example.com/example.jar", None);

        let file = add(&store, &key, "Foo");
        store.delete_from_cache(&key).unwrap();

        assert!(!file.exists());
        assert!(!file.parent().unwrap().exists());
        assert!(!store.is_cached(&key));
    }

    #[test]
    fn delete_all_respects_the_version_string() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let store = store(dir.path());
        let location: Url = "http://example.com/example.jar".parse().unwrap();

        add(&store, &key("http://example.com/example.jar", Some("1.0")), "a");
        add(&store, &key("http://example.com/example.jar", Some("2.0")), "b");

        let vs: VersionString = "1*".parse().unwrap();
        store.delete_all_from_cache(&location, Some(&vs)).unwrap();

        assert!(!store.is_cached(&key("http://example.com/example.jar", Some("1.0"))));
        assert!(store.is_cached(&key("http://example.com/example.jar", Some("2.0"))));
    }

    #[test]
    fn cache_ids_group_by_domain() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let store = store(dir.path());

        add(&store, &key("http://one.example.com/a.jar", None), "a");
        add(&store, &key("http://one.example.com/b.jar", None), "b");
        add(&store, &key("http://two.example.com/c.jar", None), "c");

        let ids = store.get_cache_ids(".*", false, true).unwrap();
        assert_eq!(ids.len(), 2);
        let one = ids.iter().find(|i| i.id == "one.example.com").unwrap();
        assert_eq!(one.kind, CacheIdKind::Domain);
        assert_eq!(one.entries.len(), 2);

        let filtered = store.get_cache_ids("two.*", false, true).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "two.example.com");

        // the filter is anchored, not a substring match
        let anchored = store.get_cache_ids("example", false, true).unwrap();
        assert!(anchored.is_empty());
    }

    #[test]
    fn cache_ids_group_by_jnlp_path() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let config = Config {
            cache_dir: dir.path().to_path_buf(),
            max_size_mb: -1,
            jnlp_path: Some("http://example.com/app.jnlp".to_owned()),
        };
        let store = CacheStore::new(config).unwrap();

        add(&store, &key("http://example.com/a.jar", None), "a");
        add(&store, &key("http://example.com/b.jar", None), "b");

        let ids = store.get_cache_ids(".*", true, false).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].id, "http://example.com/app.jnlp");
        assert_eq!(ids[0].kind, CacheIdKind::JnlpPath);
        assert_eq!(ids[0].entries.len(), 2);
    }

    #[test]
    fn invalid_filters_are_rejected() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let store = store(dir.path());

        let result = store.get_cache_ids("(", true, true);
        assert!(matches!(result, Err(CacheError::InvalidFilter(_))));
    }

    #[test]
    fn delete_by_cache_id_removes_the_whole_group() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let store = store(dir.path());

        add(&store, &key("http://one.example.com/a.jar", None), "a");
        add(&store, &key("http://two.example.com/b.jar", None), "b");

        let ids = store.get_cache_ids("one.*", false, true).unwrap();
        store.delete_by_cache_id(&ids[0]).unwrap();

        assert!(!store.is_cached(&key("http://one.example.com/a.jar", None)));
        assert!(store.is_cached(&key("http://two.example.com/b.jar", None)));
    }

    #[test]
    fn clear_cache_empties_the_whole_tree() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let store = store(dir.path());
        let key = key("http://example.com/example.jar", None);
        add(&store, &key, "Foo");

        assert!(store.clear_cache());
        assert!(!store.is_cached(&key));
        assert!(!dir.path().join("0").exists());

        // clearing an already empty cache is fine
        assert!(store.clear_cache());
    }

    #[test]
    fn clear_cache_refuses_while_a_launcher_holds_the_main_lock() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let store = store(dir.path());
        let key = key("http://example.com/example.jar", None);
        add(&store, &key, "Foo");

        let main_lock = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(dir.path().join("main.lock"))
            .unwrap();
        main_lock.lock_exclusive().unwrap();

        assert!(!store.clear_cache());
        assert!(store.is_cached(&key));

        FileExt::unlock(&main_lock).unwrap();
        assert!(store.clear_cache());
    }

    #[test]
    fn clean_cache_drops_entries_with_missing_files() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let store = store(dir.path());

        let kept = key("http://example.com/kept.jar", None);
        let torn = key("http://example.com/torn.jar", None);
        add(&store, &kept, "Foo");
        let torn_file = add(&store, &torn, "Bar");
        std::fs::remove_file(&torn_file).unwrap();

        store.clean_cache().unwrap();

        assert!(store.is_cached(&kept));
        assert!(!store.is_cached(&torn));
        assert!(!torn_file.parent().unwrap().exists());
    }

    #[test]
    fn clean_cache_evicts_least_recently_used_entries_over_budget() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();

        // 1 MB budget, two payloads of ~0.6 MB: only the most recently
        // used one fits
        let store = store_with_max_size(dir.path(), 1);
        let old = key("http://example.com/old.jar", None);
        let new = key("http://example.com/new.jar", None);
        add(&store, &old, &"x".repeat(600 * 1024));
        // the index timestamps have millisecond granularity
        std::thread::sleep(std::time::Duration::from_millis(5));
        add(&store, &new, &"y".repeat(600 * 1024));
        // bump the new entry so it is most recently used
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.get_or_create_cache_file(&new).unwrap();

        store.clean_cache().unwrap();

        assert!(store.is_cached(&new));
        assert!(!store.is_cached(&old));
    }

    #[test]
    fn clean_cache_removes_orphan_slot_dirs_and_empty_level_one_dirs() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let store = store(dir.path());

        let key = key("http://example.com/example.jar", None);
        add(&store, &key, "Foo");

        // a slot dir with a sidecar but no index entry
        let orphan = dir.path().join("7/7");
        std::fs::create_dir_all(&orphan).unwrap();
        std::fs::write(orphan.join(".info"), "").unwrap();
        // an empty level-one dir
        std::fs::create_dir_all(dir.path().join("9")).unwrap();

        store.clean_cache().unwrap();

        assert!(store.is_cached(&key));
        assert!(!orphan.exists());
        assert!(!dir.path().join("7").exists());
        assert!(!dir.path().join("9").exists());
    }

    #[test]
    fn clean_cache_purges_stray_files_from_surviving_slots() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let store = store(dir.path());

        let key = key("http://example.com/example.jar", None);
        let file = add(&store, &key, "Foo");
        let stray = file.parent().unwrap().join("leftover.tmp");
        std::fs::write(&stray, "junk").unwrap();

        store.clean_cache().unwrap();

        assert!(store.is_cached(&key));
        assert!(!stray.exists());
    }

    #[test]
    fn clean_cache_compacts_the_log() {
        jarcache_test::setup();
        let dir = jarcache_test::tempdir();
        let store = store(dir.path());

        let key = key("http://example.com/example.jar", None);
        add(&store, &key, "Foo");
        // several touches pile up in the log
        store.get_or_create_cache_file(&key).unwrap();
        store.get_or_create_cache_file(&key).unwrap();

        store.clean_cache().unwrap();

        let log = std::fs::read_to_string(dir.path().join("recently_used.cache")).unwrap();
        assert_eq!(log.lines().count(), 1);
        assert!(store.is_cached(&key));
    }
}
