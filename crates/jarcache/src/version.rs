//! JSR-56 style resource versioning.
//!
//! A *version-id* is an exact version attached to a resource (`1.4.0_04`).
//! It is a tuple of elements separated by `.`, `-` or `_`, optionally
//! carrying a trailing match modifier: `+` (greater-or-equal) or `*`
//! (prefix match).
//!
//! A *version-string* is a space-separated list of version-ranges, where a
//! range is one or more version-ids joined by `&` (all must match). It
//! describes the set of acceptable versions for a request, with earlier
//! ranges taking preference over later ones.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Syntax of a version-id according to JSR-56, appendix A: strings of
/// characters excluding whitespace, ampersands, separators and modifiers,
/// joined by separators, with an optional trailing modifier.
static VERSION_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s&._\-*+]+([._\-][^\s&._\-*+]+)*[*+]?$").unwrap()
});

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("'{0}' is not a valid version-id according to JSR-56, appendix A")]
pub struct InvalidVersionId(pub String);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("'{0}' is not a valid version-string according to JSR-56, appendix A")]
pub struct InvalidVersionString(pub String);

/// An exact version associated with a resource, such as a jar file.
#[derive(Debug, Clone)]
pub struct VersionId {
    raw: String,
}

/// One tuple element, prepared for normalized comparison.
///
/// Numeric elements compare numerically, alphanumeric ones lexicographically,
/// and an alphanumeric element is always greater than a numeric one.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Element {
    Num(i64),
    Alpha(String),
}

impl Element {
    fn parse(s: &str) -> Element {
        if !s.is_empty() && !s.starts_with('-') {
            if let Ok(n) = s.parse::<i64>() {
                return Element::Num(n);
            }
        }
        Element::Alpha(s.to_owned())
    }

    fn zero() -> Element {
        Element::Num(0)
    }
}

impl Ord for Element {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Element::Num(a), Element::Num(b)) => a.cmp(b),
            (Element::Alpha(a), Element::Alpha(b)) => a.cmp(b),
            (Element::Num(_), Element::Alpha(_)) => Ordering::Less,
            (Element::Alpha(_), Element::Num(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Element {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl VersionId {
    /// Does this version-id end in the `*` prefix-match modifier?
    pub fn has_prefix_match_modifier(&self) -> bool {
        self.raw.ends_with('*')
    }

    /// Does this version-id end in the `+` greater-or-equal modifier?
    pub fn has_greater_or_equal_modifier(&self) -> bool {
        self.raw.ends_with('+')
    }

    /// An exact version-id carries no match modifier.
    pub fn is_exact(&self) -> bool {
        !self.has_prefix_match_modifier() && !self.has_greater_or_equal_modifier()
    }

    /// The version-id broken into tuple elements, modifier stripped.
    ///
    /// `1.3.0-rc2-w` becomes `(1, 3, 0, rc2, w)` and `1.2.2-001+`
    /// becomes `(1, 2, 2, 001)`.
    fn tuple(&self) -> Vec<Element> {
        self.raw
            .trim_end_matches(['*', '+'])
            .split(['.', '-', '_'])
            .map(Element::parse)
            .collect()
    }

    /// Tuple with trailing zero elements dropped, the canonical form used for
    /// equality and hashing ("1.3" and "1.3.0" are the same version).
    fn canonical(&self) -> Vec<Element> {
        let mut tuple = self.tuple();
        while tuple.last() == Some(&Element::zero()) && tuple.len() > 1 {
            tuple.pop();
        }
        tuple
    }

    /// Matches `other` against this version-id, honoring this id's modifier:
    /// prefix match for `*`, greater-or-equal for `+`, exact match otherwise.
    pub fn is_match_of(&self, other: &VersionId) -> bool {
        if self.has_prefix_match_modifier() {
            self.is_prefix_match_of(other)
        } else if self.has_greater_or_equal_modifier() {
            other >= self
        } else {
            self == other
        }
    }

    /// A is a prefix match of B if the elements of A equal the first elements
    /// of B, B being zero-padded to at least the length of A. `1.2.1` is a
    /// prefix of `1.2.1-004` but not of `1.2.0` or `1.2.10`; `1.2.0.0` is a
    /// prefix of `1.2`.
    pub fn is_prefix_match_of(&self, other: &VersionId) -> bool {
        let prefix = self.tuple();
        let mut other = other.tuple();
        while other.len() < prefix.len() {
            other.push(Element::zero());
        }
        prefix.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl FromStr for VersionId {
    type Err = InvalidVersionId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !VERSION_ID_RE.is_match(s) {
            return Err(InvalidVersionId(s.to_owned()));
        }
        Ok(VersionId { raw: s.to_owned() })
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Ord for VersionId {
    /// Ordering per JSR-56 appendix A.1: tuples are zero-padded to equal
    /// length and compared element by element.
    fn cmp(&self, other: &Self) -> Ordering {
        let mut a = self.tuple();
        let mut b = other.tuple();
        while a.len() < b.len() {
            a.push(Element::zero());
        }
        while b.len() < a.len() {
            b.push(Element::zero());
        }
        a.cmp(&b)
    }
}

impl PartialOrd for VersionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for VersionId {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VersionId {}

impl Hash for VersionId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for element in self.canonical() {
            match element {
                Element::Num(n) => n.hash(state),
                Element::Alpha(s) => s.hash(state),
            }
        }
    }
}

/// A set of acceptable versions, with preference order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionString {
    raw: String,
    ranges: Vec<VersionRange>,
}

/// One version-range: version-ids joined by `&`, all of which must match.
#[derive(Debug, Clone, PartialEq, Eq)]
struct VersionRange {
    parts: Vec<VersionId>,
}

impl VersionRange {
    fn matches(&self, id: &VersionId) -> bool {
        self.parts.iter().all(|part| part.is_match_of(id))
    }
}

impl VersionString {
    /// Is the concrete `id` a member of this version set?
    pub fn contains(&self, id: &VersionId) -> bool {
        self.ranges.iter().any(|range| range.matches(id))
    }

    /// Ranks two concrete version-ids by this version-string's preference:
    /// ids matching an earlier range are greater; ties fall back to the
    /// natural tuple ordering.
    pub fn compare_preference(&self, a: &VersionId, b: &VersionId) -> Ordering {
        let rank_a = self.rank(a);
        let rank_b = self.rank(b);
        match (rank_a, rank_b) {
            (Some(ra), Some(rb)) if ra != rb => rb.cmp(&ra),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            _ => a.cmp(b),
        }
    }

    fn rank(&self, id: &VersionId) -> Option<usize> {
        self.ranges.iter().position(|range| range.matches(id))
    }
}

impl FromStr for VersionString {
    type Err = InvalidVersionString;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidVersionString(s.to_owned());

        let ranges = s
            .split_whitespace()
            .map(|range| {
                let parts = range
                    .split('&')
                    .map(|part| part.parse::<VersionId>().map_err(|_| invalid()))
                    .collect::<Result<Vec<_>, _>>()?;
                if parts.is_empty() {
                    return Err(invalid());
                }
                Ok(VersionRange { parts })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if ranges.is_empty() {
            return Err(invalid());
        }
        Ok(VersionString {
            raw: s.to_owned(),
            ranges,
        })
    }
}

impl fmt::Display for VersionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
