//! Session configuration.
//!
//! Values are consumed verbatim by the engine. The defaults suit the slow,
//! rate-limited providers this gateway fronts: long enough TTLs to absorb
//! PROPFIND storms, short enough that the active reconciliation loop keeps
//! external edits visible.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default entry time-to-live. Long enough for the change detector to run.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(120);

/// Minimum cache TTL at which the external-change detector is worth running.
pub const DEFAULT_DETECTOR_MIN_TTL: Duration = Duration::from_secs(60);

/// Default page size for folder listings.
pub const DEFAULT_LISTING_PAGE_SIZE: usize = 1000;

/// Retry and timeout settings for upstream calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Extra attempts after the first for transient failures.
    pub max_retries: usize,
    /// Delay between error-driven attempts.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Time budget of a single attempt.
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
    /// Interval between polls of a long-running server operation.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Overall budget when polling a long-running server operation.
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            call_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            operation_timeout: Duration::from_secs(600),
        }
    }
}

/// Configuration of a gateway session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkydavConfig {
    /// Time-to-live of cached entries. Zero disables caching entirely.
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// Cadence of the eager expiry sweep.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Cadence of the external-change detector.
    #[serde(with = "humantime_serde")]
    pub activity_poll_interval: Duration,

    /// The detector only runs when `cache_ttl` is at least this long. With a
    /// shorter TTL the cache relies on expiry alone.
    #[serde(with = "humantime_serde")]
    pub detector_min_ttl: Duration,

    /// How long server counters may lag behind this process's own
    /// operations before the lag is reported as an error.
    #[serde(with = "humantime_serde")]
    pub counter_lag_tolerance: Duration,

    /// `limit` passed to each listing page request.
    pub listing_page_size: usize,

    /// Prefetch the parent folder in the background after a miss.
    pub prefetch_parent: bool,

    /// Maximum number of endpoints a shard pool creates.
    pub shard_pool_size: usize,

    /// Concurrent users per endpoint before another endpoint is created.
    pub shard_max_users: usize,

    /// How long a failed endpoint stays excluded from selection.
    #[serde(with = "humantime_serde")]
    pub ban_cooldown: Duration,

    /// Upstream retry settings.
    pub retry: RetryConfig,
}

impl Default for SkydavConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            sweep_interval: Duration::from_secs(60),
            activity_poll_interval: Duration::from_secs(30),
            detector_min_ttl: DEFAULT_DETECTOR_MIN_TTL,
            counter_lag_tolerance: Duration::from_secs(300),
            listing_page_size: DEFAULT_LISTING_PAGE_SIZE,
            prefetch_parent: true,
            shard_pool_size: 8,
            shard_max_users: 1,
            ban_cooldown: Duration::from_secs(120),
            retry: RetryConfig::default(),
        }
    }
}

impl SkydavConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: SkydavConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listing_page_size == 0 {
            return Err(ConfigError::Invalid(
                "listing_page_size must be greater than zero".into(),
            ));
        }
        if self.shard_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "shard_pool_size must be greater than zero".into(),
            ));
        }
        if self.shard_max_users == 0 {
            return Err(ConfigError::Invalid(
                "shard_max_users must be greater than zero".into(),
            ));
        }
        if self.detector_enabled() && self.activity_poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "activity_poll_interval must be non-zero while the detector is enabled".into(),
            ));
        }
        if self.cache_enabled() && self.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "sweep_interval must be non-zero while caching is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Whether entries are cached at all.
    pub fn cache_enabled(&self) -> bool {
        !self.cache_ttl.is_zero()
    }

    /// Whether the external-change detector should poll.
    pub fn detector_enabled(&self) -> bool {
        self.cache_enabled() && self.cache_ttl >= self.detector_min_ttl
    }

    /// Sets the entry TTL.
    #[must_use]
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Sets the expiry sweep interval.
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the detector poll interval.
    #[must_use]
    pub fn activity_poll_interval(mut self, interval: Duration) -> Self {
        self.activity_poll_interval = interval;
        self
    }

    /// Sets the minimum TTL that enables the detector.
    #[must_use]
    pub fn detector_min_ttl(mut self, ttl: Duration) -> Self {
        self.detector_min_ttl = ttl;
        self
    }

    /// Sets the tolerated lag of server counters.
    #[must_use]
    pub fn counter_lag_tolerance(mut self, tolerance: Duration) -> Self {
        self.counter_lag_tolerance = tolerance;
        self
    }

    /// Sets the listing page size.
    #[must_use]
    pub fn listing_page_size(mut self, size: usize) -> Self {
        self.listing_page_size = size;
        self
    }

    /// Enables or disables background parent prefetch.
    #[must_use]
    pub fn prefetch_parent(mut self, enabled: bool) -> Self {
        self.prefetch_parent = enabled;
        self
    }

    /// Sets the shard pool limits.
    #[must_use]
    pub fn shard_pool(mut self, size: usize, max_users: usize) -> Self {
        self.shard_pool_size = size;
        self.shard_max_users = max_users;
        self
    }

    /// Sets the ban cooldown for failed endpoints.
    #[must_use]
    pub fn ban_cooldown(mut self, cooldown: Duration) -> Self {
        self.ban_cooldown = cooldown;
        self
    }

    /// Sets the retry settings.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SkydavConfig::default();
        assert_eq!(config.cache_ttl, Duration::from_secs(120));
        assert!(config.cache_enabled());
        assert!(config.detector_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_short_ttl_turns_detector_off() {
        let config = SkydavConfig::default().cache_ttl(Duration::from_secs(30));
        assert!(config.cache_enabled());
        // 30s TTL is below the 60s floor
        assert!(!config.detector_enabled());
    }

    #[test]
    fn test_zero_ttl_disables_everything() {
        let config = SkydavConfig::default().cache_ttl(Duration::ZERO);
        assert!(!config.cache_enabled());
        assert!(!config.detector_enabled());
    }

    #[test]
    fn test_builder_pattern() {
        let config = SkydavConfig::default()
            .cache_ttl(Duration::from_secs(300))
            .shard_pool(4, 2)
            .listing_page_size(50);
        assert!(config.detector_enabled());
        assert_eq!(config.shard_pool_size, 4);
        assert_eq!(config.shard_max_users, 2);
        assert_eq!(config.listing_page_size, 50);
    }

    #[test]
    fn test_parse_toml_with_humantime() {
        let config = SkydavConfig::from_toml_str(
            r#"
            cache_ttl = "5m"
            activity_poll_interval = "15s"
            shard_pool_size = 3

            [retry]
            max_retries = 5
            call_timeout = "10s"
            "#,
        )
        .unwrap();
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.activity_poll_interval, Duration::from_secs(15));
        assert_eq!(config.shard_pool_size, 3);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.call_timeout, Duration::from_secs(10));
        // untouched keys keep defaults
        assert_eq!(config.retry.retry_delay, Duration::from_millis(500));
        assert_eq!(config.listing_page_size, DEFAULT_LISTING_PAGE_SIZE);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = SkydavConfig::from_toml_str("listing_page_size = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = SkydavConfig::from_toml_str("cache_ttl = 12").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skydav.toml");
        std::fs::write(&path, "cache_ttl = \"0s\"\n").unwrap();

        let config = SkydavConfig::load(&path).unwrap();
        assert!(!config.cache_enabled());

        let missing = SkydavConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io(_)));
    }
}
