//! Runtime configuration from environment variables.
//!
//! Overrides exist for operators running in environments where procfs is
//! relocated, and they double as seams for end-to-end testing. They are
//! read exactly once per process and cached.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Environment variable names used by the monitor.
const ENV_TIMING_THRESHOLD: &str = "SELF_GUARD_TIMING_THRESHOLD";
const ENV_MAPS: &str = "SELF_GUARD_MAPS";
const ENV_STATUS: &str = "SELF_GUARD_STATUS";

/// Cached runtime configuration, initialized once from environment variables.
static CONFIG: OnceLock<Config> = OnceLock::new();

#[derive(Debug)]
pub(crate) struct Config {
    /// Timing-probe threshold override, in backend units (cycles for the
    /// native backends, nanoseconds for the portable one).
    pub(crate) timing_threshold: Option<u64>,
    /// Override for the memory-map pseudo-file (default `/proc/self/maps`).
    pub(crate) maps_path: Option<PathBuf>,
    /// Override for the process status pseudo-file (default `/proc/self/status`).
    pub(crate) status_path: Option<PathBuf>,
}

/// Initialize the configuration from environment variables.
fn load() -> Config {
    Config {
        timing_threshold: std::env::var(ENV_TIMING_THRESHOLD)
            .ok()
            .and_then(|s| s.parse::<u64>().ok()),
        maps_path: std::env::var(ENV_MAPS).ok().map(PathBuf::from),
        status_path: std::env::var(ENV_STATUS).ok().map(PathBuf::from),
    }
}

/// Returns the cached configuration.
/// Environment variables are read exactly once per process.
#[inline]
pub(crate) fn config() -> &'static Config {
    CONFIG.get_or_init(load)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_is_cached() {
        let c1 = config();
        let c2 = config();
        assert!(std::ptr::eq(c1, c2));
    }
}
