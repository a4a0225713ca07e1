use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Initializes logging for binaries embedding the cache engine.
///
/// The library itself only emits `tracing` events and never installs a
/// subscriber on its own; hosts that do not care can skip this entirely.
/// `env_filter` takes the usual directive syntax, e.g. `"jarcache=debug"`.
pub fn init(env_filter: &str) {
    fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(true)
        .try_init()
        .ok();
}
