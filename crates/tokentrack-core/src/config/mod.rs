//! Static configuration consumed by the tracker registry.

use std::time::Duration;

/// Default per-file inactivity timeout (5 minutes)
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default global idle-shutdown timeout (10 minutes)
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default window during which a detected invalidation is reported (60 seconds)
pub const DEFAULT_REBUILD_ALERT: Duration = Duration::from_secs(60);

/// Default cache-read drop (in tokens) that counts as an invalidation
pub const DEFAULT_DROP_THRESHOLD: u64 = 10_000;

/// Default period of the eviction and idle-shutdown sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Tracker settings
///
/// `None` timeouts mean the corresponding sweep is disabled ("never").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSettings {
    /// Evict a file's entry after this long without a read
    pub session_timeout: Option<Duration>,
    /// Shut the daemon down after this long without any request
    pub idle_timeout: Option<Duration>,
    /// How long `cache_rebuilding` stays true after an invalidation
    pub rebuild_alert: Duration,
    /// Minimum cache-read drop that counts as an invalidation
    pub drop_threshold: u64,
    /// Period of the background sweeps
    pub sweep_interval: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            session_timeout: Some(DEFAULT_SESSION_TIMEOUT),
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            rebuild_alert: DEFAULT_REBUILD_ALERT,
            drop_threshold: DEFAULT_DROP_THRESHOLD,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}
