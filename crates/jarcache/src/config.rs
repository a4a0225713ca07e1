use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};

/// File name of the cache index log inside the cache root.
pub const INDEX_FILE_NAME: &str = "recently_used.cache";

/// File name of the legacy property-file index inside the cache root.
///
/// Migrated into [`INDEX_FILE_NAME`] on first access, then deleted.
pub const LEGACY_INDEX_FILE_NAME: &str = "recently_used";

/// File name of the "launcher instance running" lock inside the cache root.
///
/// Held by running launchers; destructive cache operations refuse to run
/// while anyone holds it.
pub const MAIN_LOCK_FILE_NAME: &str = "main.lock";

/// Configuration of the cache engine.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory of the cache. Will be created if it does not exist.
    pub cache_dir: PathBuf,

    /// Maximum total size of cached payloads in megabytes.
    ///
    /// Negative or unparseable values mean unlimited.
    #[serde(deserialize_with = "deserialize_max_size")]
    pub max_size_mb: i64,

    /// Path of the descriptor that started the current launch, if any.
    ///
    /// Used only to tag freshly created metadata files so that cache
    /// entries can later be grouped per application.
    pub jnlp_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_dir: default_cache_dir(),
            max_size_mb: -1,
            jnlp_path: None,
        }
    }
}

/// Default value for the "cache_dir" configuration.
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jarcache")
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }

    /// The size budget in bytes, `None` meaning unlimited.
    pub fn max_size_bytes(&self) -> Option<u64> {
        if self.max_size_mb < 0 {
            None
        } else {
            Some((self.max_size_mb as u64) << 20)
        }
    }

    pub fn index_file(&self) -> PathBuf {
        self.cache_dir.join(INDEX_FILE_NAME)
    }

    pub fn legacy_index_file(&self) -> PathBuf {
        self.cache_dir.join(LEGACY_INDEX_FILE_NAME)
    }

    pub fn main_lock_file(&self) -> PathBuf {
        self.cache_dir.join(MAIN_LOCK_FILE_NAME)
    }
}

/// The max-size setting historically comes from a free-form property store,
/// so it is accepted both as a number and as a string. Anything that does
/// not parse as an integer means unlimited.
fn deserialize_max_size<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Number(n) => n,
        Raw::Text(s) => s.trim().parse().unwrap_or(-1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_by_default() {
        let config = Config::get(None).unwrap();
        assert_eq!(config.max_size_mb, -1);
        assert_eq!(config.max_size_bytes(), None);
    }

    #[test]
    fn max_size_converts_megabytes_to_bytes() {
        let config: Config = serde_yaml::from_str("max_size_mb: 2").unwrap();
        assert_eq!(config.max_size_bytes(), Some(2 * 1024 * 1024));
    }

    #[test]
    fn unparseable_max_size_means_unlimited() {
        let config: Config = serde_yaml::from_str("max_size_mb: a lot").unwrap();
        assert_eq!(config.max_size_bytes(), None);

        let config: Config = serde_yaml::from_str("max_size_mb: '100'").unwrap();
        assert_eq!(config.max_size_bytes(), Some(100 << 20));
    }

    #[test]
    fn paths_are_derived_from_the_cache_dir() {
        let config: Config = serde_yaml::from_str("cache_dir: /tmp/cache").unwrap();
        assert_eq!(config.index_file(), Path::new("/tmp/cache/recently_used.cache"));
        assert_eq!(config.legacy_index_file(), Path::new("/tmp/cache/recently_used"));
    }
}
