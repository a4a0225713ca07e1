//! A flat `key=value` file format compatible with Java property files.
//!
//! Both the `.info` metadata sidecars and the legacy cache index are plain
//! property files written by other tools, so the exact on-disk shape is
//! dictated by interop: `#`/`!` comment lines, `=` or `:` as the key-value
//! separator, and backslash escapes for separators occurring inside keys or
//! values. Only the single-line subset is supported; neither format uses
//! line continuations.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;

/// An in-memory view of a property file.
///
/// Keys the engine does not know about are kept as-is and survive a
/// read-modify-write cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a property file. A missing file yields an empty set.
    pub fn load(path: &Path) -> io::Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let mut values = BTreeMap::new();
        for line in content.lines() {
            let line = line.trim_start();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            if let Some((key, value)) = split_pair(line) {
                values.insert(key, value);
            }
        }
        Properties { values }
    }

    pub fn store(&self, path: &Path) -> io::Result<()> {
        let mut out = Vec::new();
        for (key, value) in &self.values {
            writeln!(out, "{}={}", escape(key), escape(value))?;
        }
        std::fs::write(path, out)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// A value parsed as an integer; unparseable or absent values are `None`.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key)?.trim().parse().ok()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_owned(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Splits a line at the first unescaped `=` or `:` and unescapes both parts.
fn split_pair(line: &str) -> Option<(String, String)> {
    let mut key = String::new();
    let mut chars = line.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    key.push(unescape_char(escaped));
                }
            }
            '=' | ':' => {
                let value = unescape(line[i + c.len_utf8()..].trim_start());
                return Some((key.trim_end().to_owned(), value));
            }
            _ => key.push(c),
        }
    }
    None
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(unescape_char(escaped));
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn unescape_char(c: char) -> char {
    match c {
        't' => '\t',
        'n' => '\n',
        'r' => '\r',
        other => other,
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' | '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}
