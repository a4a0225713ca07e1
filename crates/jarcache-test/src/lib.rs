//! Helpers for testing the cache engine.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all
//!    console output is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory
//!    is held for the entire lifetime of the test. When dropped too early,
//!    the cache root disappears under the engine mid-test. To avoid this,
//!    assign it to a variable in the test function (e.g.
//!    `let dir = jarcache_test::tempdir()`).

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;
pub use url::Url;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `jarcache`
///    crate and mutes all other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("jarcache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped, unless
/// [`keep`](TempDir::keep) is called. Use it as a guard to automatically
/// clean up after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Parses a URL, panicking on invalid input.
pub fn url(input: &str) -> Url {
    input.parse().unwrap()
}
