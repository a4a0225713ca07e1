//! The log record of the cache index.
//!
//! Every mutation of the index is represented as one action, serialized as
//! one line of the log file. The line format is shared with other processes
//! working on the same cache directory and must stay bit-compatible:
//!
//! - Add:    `::i=<id>::l=<url>::v=<version>::a=<millis>::` (the `v` field
//!   is omitted for unversioned resources)
//! - Touch:  `::i=<id>::a=<millis>::`
//! - Remove: `!<id>!`
//!
//! Fields are delimited by the literal token `::`; a `::` occurring inside a
//! field value is escaped by doubling it, and the parser reassembles split
//! fields by detecting the resulting empty tokens. The escape cannot
//! represent a value ending in `::`: its doubled form runs into the next
//! field delimiter, the reassembly merges the two fields, and the line no
//! longer matches any action pattern, so it degrades to `Noop` on read.
//! That is a limitation of the shared format itself, not of this parser.
//! A sibling writer emits remove lines without the trailing `!`, so both
//! forms are accepted on read.
//!
//! Anything that does not parse, blank lines included, degrades to
//! [`CacheAction::Noop`]. A single corrupted line must never fail a whole
//! load.

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::key::CacheKey;
use crate::version::VersionId;

use super::entries::IndexEntries;
use super::entry::{EntryId, IndexEntry};

const DELIMITER: &str = "::";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheAction {
    Add(IndexEntry),
    Touch(EntryId, i64),
    Remove(EntryId),
    Noop,
}

impl CacheAction {
    /// Applies this action to the entry table, reporting whether the table
    /// changed.
    pub fn apply_to(&self, entries: &mut IndexEntries) -> bool {
        match self {
            CacheAction::Add(entry) => entries.add(entry.clone()),
            CacheAction::Touch(id, last_accessed) => entries.touch(id, *last_accessed),
            CacheAction::Remove(id) => entries.remove(id),
            CacheAction::Noop => false,
        }
    }

    /// Parses one log line. Never fails; unparseable lines are `Noop`.
    pub fn parse(line: &str) -> CacheAction {
        if let Some(remove) = line.strip_prefix('!') {
            let id = remove.strip_suffix('!').unwrap_or(remove);
            if id.is_empty() || id.contains('!') {
                return CacheAction::Noop;
            }
            return match EntryId::parse(id) {
                Some(id) => CacheAction::Remove(id),
                None => CacheAction::Noop,
            };
        }

        let Some(fields) = split_fields(line) else {
            return CacheAction::Noop;
        };

        match fields.as_slice() {
            [i, a] => match (parse_id(i), parse_millis(a)) {
                (Some(id), Some(millis)) => CacheAction::Touch(id, millis),
                _ => CacheAction::Noop,
            },
            [i, l, a] => parse_add(i, l, None, a),
            [i, l, v, a] => parse_add(i, l, Some(v), a),
            _ => CacheAction::Noop,
        }
    }

    /// Serializes this action as one log line. `Noop` serializes to an empty
    /// line, which parses back to `Noop`.
    pub fn serialize(&self) -> String {
        match self {
            CacheAction::Add(entry) => {
                let mut line = String::new();
                push_field(&mut line, "i", entry.id.as_str());
                push_field(&mut line, "l", entry.key.location().as_str());
                if let Some(version) = entry.key.version() {
                    push_field(&mut line, "v", &version.to_string());
                }
                push_field(&mut line, "a", &entry.last_accessed.to_string());
                line.push_str(DELIMITER);
                line
            }
            CacheAction::Touch(id, last_accessed) => {
                let mut line = String::new();
                push_field(&mut line, "i", id.as_str());
                push_field(&mut line, "a", &last_accessed.to_string());
                line.push_str(DELIMITER);
                line
            }
            CacheAction::Remove(id) => format!("!{id}!"),
            CacheAction::Noop => String::new(),
        }
    }
}

impl fmt::Display for CacheAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

fn push_field(line: &mut String, name: &str, value: &str) {
    line.push_str(DELIMITER);
    line.push_str(name);
    line.push('=');
    // a :: inside a value is escaped by doubling it
    line.push_str(&value.replace(DELIMITER, "::::"));
}

/// Splits a line into its fields, undoing the doubling escape.
///
/// The line must start and end with the delimiter; an empty token between
/// two delimiters marks an escaped `::` belonging to the preceding field.
fn split_fields(line: &str) -> Option<Vec<String>> {
    let tokens: Vec<&str> = line.split(DELIMITER).collect();
    if tokens.len() < 3 || !tokens[0].is_empty() || !tokens[tokens.len() - 1].is_empty() {
        return None;
    }

    let mut fields: Vec<String> = Vec::new();
    let mut joining = false;
    for token in &tokens[1..tokens.len() - 1] {
        if token.is_empty() {
            fields.last_mut()?.push_str(DELIMITER);
            joining = true;
        } else if joining {
            fields.last_mut()?.push_str(token);
            joining = false;
        } else {
            fields.push((*token).to_owned());
        }
    }
    Some(fields)
}

fn field_value<'a>(field: &'a str, name: &str) -> Option<&'a str> {
    let value = field.strip_prefix(name)?.strip_prefix('=')?;
    if value.is_empty() { None } else { Some(value) }
}

fn parse_id(field: &str) -> Option<EntryId> {
    EntryId::parse(field_value(field, "i")?)
}

fn parse_millis(field: &str) -> Option<i64> {
    field_value(field, "a")?.parse().ok()
}

fn parse_add(i: &str, l: &str, v: Option<&str>, a: &str) -> CacheAction {
    let Some(id) = parse_id(i) else {
        return CacheAction::Noop;
    };
    let Some(location) = field_value(l, "l").and_then(|raw| Url::parse(raw).ok()) else {
        return CacheAction::Noop;
    };
    let version = match v {
        Some(field) => match field_value(field, "v").map(VersionId::from_str) {
            Some(Ok(version)) => Some(version),
            _ => return CacheAction::Noop,
        },
        None => None,
    };
    let Some(millis) = parse_millis(a) else {
        return CacheAction::Noop;
    };

    let key = CacheKey::new(location, version);
    CacheAction::Add(IndexEntry::new(id, millis, key))
}
