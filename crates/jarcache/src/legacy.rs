//! One-shot migration of the legacy property-file index.
//!
//! Before the append-only log, the index was a single property file with
//! keys of the form `<id>.lastAccessed`, `<id>.delete`, `<id>.href` and
//! `<id>.version`. On the first access to a cache root that has such a file
//! but no log yet, the surviving entries are rewritten as `Add` actions
//! into a fresh log and the old file is deleted. This runs at most once per
//! cache root.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use url::Url;

use crate::index::action::CacheAction;
use crate::index::entry::{EntryId, IndexEntry};
use crate::key::CacheKey;
use crate::properties::Properties;
use crate::version::VersionId;

const KEY_LAST_ACCESSED: &str = "lastAccessed";
const KEY_DELETE: &str = "delete";
const KEY_HREF: &str = "href";
const KEY_VERSION: &str = "version";

/// Converts a legacy property file into the new log at `log_path`, then
/// deletes the old file.
pub(crate) fn migrate(legacy_path: &Path, log_path: &Path) -> std::io::Result<()> {
    tracing::info!(
        legacy = %legacy_path.display(),
        log = %log_path.display(),
        "migrating legacy cache index"
    );

    let properties = Properties::load(legacy_path)?;
    let entries = convert_properties_to_entries(&properties);

    let mut out = Vec::new();
    for entry in &entries {
        writeln!(out, "{}", CacheAction::Add(entry.clone()).serialize())?;
    }
    std::fs::write(log_path, out)?;

    if let Err(error) = std::fs::remove_file(legacy_path) {
        tracing::warn!(
            error = &error as &dyn std::error::Error,
            "failed to delete legacy cache index"
        );
    }
    Ok(())
}

/// Converts the grouped legacy properties into entries, most recently used
/// first.
///
/// Entries marked for deletion or with unparseable data are dropped; a
/// corrupt legacy index never fails the migration.
pub(crate) fn convert_properties_to_entries(properties: &Properties) -> Vec<IndexEntry> {
    // group all properties with the same id, dropping malformed keys
    let mut grouped: HashMap<&str, HashMap<&str, &str>> = HashMap::new();
    for (key, value) in properties.iter() {
        match key.split_once('.') {
            Some((id, field)) if !id.is_empty() && !field.is_empty() => {
                grouped.entry(id).or_default().insert(field, value);
            }
            _ => tracing::debug!(key, "found broken legacy property"),
        }
    }

    let mut entries = Vec::with_capacity(grouped.len());
    for (raw_id, values) in grouped {
        if values.get(KEY_DELETE).copied() == Some("true") {
            continue;
        }
        let Some(entry) = convert_entry(raw_id, &values) else {
            tracing::debug!(id = raw_id, "found broken legacy entry");
            continue;
        };
        entries.push(entry);
    }

    entries.sort();
    entries
}

fn convert_entry(raw_id: &str, values: &HashMap<&str, &str>) -> Option<IndexEntry> {
    let id = normalize_id(raw_id)?;
    let location: Url = values.get(KEY_HREF)?.parse().ok()?;
    let version: Option<VersionId> = match values.get(KEY_VERSION) {
        Some(raw) => Some(raw.parse().ok()?),
        None => None,
    };
    let last_accessed: i64 = values.get(KEY_LAST_ACCESSED)?.parse().ok()?;

    let key = CacheKey::new(location, version);
    Some(IndexEntry::new(id, last_accessed, key))
}

/// Legacy ids were written either as `i/j` or as `i-j`; both map to the
/// slot directory `<root>/i/j`.
fn normalize_id(raw: &str) -> Option<EntryId> {
    let (i, j) = raw.split_once(['/', '-'])?;
    let i: u32 = i.parse().ok()?;
    let j: u32 = j.parse().ok()?;
    Some(EntryId::from_levels(i, j))
}
