//! Snapshot cache and coordinator tuning.

use std::num::NonZeroUsize;
use std::time::Duration;

const DEFAULT_TTL_SECONDS: u64 = 60 * 60;
const DEFAULT_RENDER_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_HOT_LIMIT: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Age after which a snapshot is still served but flagged for revalidation.
    pub ttl: Duration,
    /// Upper bound for one engine call, and the age at which a `rendering` entry may be
    /// reclaimed.
    pub render_timeout: Duration,
    /// Maximum snapshots kept in the in-memory hot layer.
    pub hot_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_TTL_SECONDS),
            render_timeout: Duration::from_secs(DEFAULT_RENDER_TIMEOUT_SECONDS),
            hot_limit: DEFAULT_HOT_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            ttl: Duration::from_secs(u64::from(settings.ttl_seconds.get())),
            render_timeout: Duration::from_secs(u64::from(settings.render_timeout_seconds.get())),
            hot_limit: settings.hot_limit,
        }
    }
}

impl CacheConfig {
    /// Returns the hot layer limit as NonZeroUsize, clamping to 1 if zero.
    pub fn hot_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.hot_limit).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(3600));
        assert_eq!(config.render_timeout, Duration::from_secs(30));
        assert_eq!(config.hot_limit, 256);
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            hot_limit: 0,
            ..Default::default()
        };
        assert_eq!(config.hot_limit_non_zero().get(), 1);
    }
}
