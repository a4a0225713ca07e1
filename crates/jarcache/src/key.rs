//! Identity of a cacheable resource.

use std::fmt;

use url::Url;

use crate::version::{VersionId, VersionString};

/// Identifies a cacheable resource by its location and optional version.
///
/// The location is kept in the normalized form produced by [`Url`]: the host
/// is case-folded and default ports are stripped. Two keys are equal iff the
/// normalized locations match and the versions match exactly, i.e. both are
/// absent or both are present and equal. No wildcard is implied by an absent
/// version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    location: Url,
    version: Option<VersionId>,
}

impl CacheKey {
    pub fn new(location: Url, version: Option<VersionId>) -> Self {
        CacheKey { location, version }
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn version(&self) -> Option<&VersionId> {
        self.version.as_ref()
    }

    /// The host of the location, used to group entries by domain.
    pub fn domain(&self) -> Option<&str> {
        self.location.host_str()
    }

    /// Does this key point at the given location, regardless of version?
    pub fn matches_url(&self, url: &Url) -> bool {
        self.location == *url
    }

    /// Does this key point at the given location and exact version?
    pub fn matches(&self, url: &Url, version: Option<&VersionId>) -> bool {
        self.matches_url(url) && self.version.as_ref() == version
    }

    /// Does this key point at the given location with a version that is a
    /// member of `version_string`?
    ///
    /// An absent version matches only an absent version-string and vice
    /// versa; there is no implicit wildcard in either direction.
    pub fn matches_version_string(
        &self,
        url: &Url,
        version_string: Option<&VersionString>,
    ) -> bool {
        if !self.matches_url(url) {
            return false;
        }
        match (&self.version, version_string) {
            (None, None) => true,
            (Some(version), Some(vs)) => vs.contains(version),
            _ => false,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{} (v: {})", self.location, version),
            None => write!(f, "{}", self.location),
        }
    }
}

/// Whether contents of the given URL can be put into the cache.
///
/// Local resources are never cached; they are already on disk.
pub fn is_cacheable(url: &Url) -> bool {
    !matches!(url.scheme(), "file" | "jar")
}
