//! Environment-sourced runtime configuration, validated once at startup.

use std::{env, time::Duration};

use tracing::info;

use crate::error::ConfigError;

const ENV_CACHE_MAX_ENTRIES: &str = "WHEELSPIN_CACHE_MAX_ENTRIES";
const ENV_CACHE_TTL_SECS: &str = "WHEELSPIN_CACHE_TTL_SECS";
const ENV_CLEANUP_INTERVAL_SECS: &str = "WHEELSPIN_CLEANUP_INTERVAL_SECS";
const ENV_CLEANUP_EXPIRY_THRESHOLD_SECS: &str = "WHEELSPIN_CLEANUP_EXPIRY_THRESHOLD_SECS";
const ENV_CLEANUP_MAX_SCAN: &str = "WHEELSPIN_CLEANUP_MAX_SCAN";
const ENV_CLEANUP_TIMEOUT_SECS: &str = "WHEELSPIN_CLEANUP_TIMEOUT_SECS";
const ENV_DEBOUNCE_DELAY_MS: &str = "WHEELSPIN_DEBOUNCE_DELAY_MS";
const ENV_DEBOUNCE_MAX_WAIT_MS: &str = "WHEELSPIN_DEBOUNCE_MAX_WAIT_MS";
const ENV_RETRY_MAX_ATTEMPTS: &str = "WHEELSPIN_RETRY_MAX_ATTEMPTS";
const ENV_RETRY_BASE_DELAY_MS: &str = "WHEELSPIN_RETRY_BASE_DELAY_MS";
const ENV_RETRY_MAX_DELAY_MS: &str = "WHEELSPIN_RETRY_MAX_DELAY_MS";
const ENV_ROOM_TTL_SECS: &str = "WHEELSPIN_ROOM_TTL_SECS";
const ENV_KEY_PREFIX: &str = "WHEELSPIN_KEY_PREFIX";
const ENV_PRESENTATION_TIME_SECS: &str = "WHEELSPIN_PRESENTATION_TIME_SECS";

/// Immutable runtime configuration shared across the synchronization core.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum number of entries the broadcast cache may hold.
    pub cache_max_entries: usize,
    /// How long a broadcast-cache entry stays valid. Mirrors the room TTL by
    /// default so the cache never outlives the store's authoritative record.
    pub cache_ttl: Duration,
    /// How often the cleanup sweeper runs.
    pub cleanup_interval: Duration,
    /// Keys whose remaining TTL falls below this threshold are cleaned up
    /// proactively.
    pub cleanup_expiry_threshold: Duration,
    /// Upper bound on keys scanned per sweep run.
    pub cleanup_max_scan: usize,
    /// Wall-clock budget for one sweep run.
    pub cleanup_timeout: Duration,
    /// Quiet window before a queued broadcast flushes.
    pub debounce_delay: Duration,
    /// Ceiling after which a pending room is flushed even under continuous
    /// churn.
    pub debounce_max_wait: Duration,
    /// Maximum emission attempts before a broadcast is declared failed.
    pub retry_max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent attempt.
    pub retry_base_delay: Duration,
    /// Hard ceiling on the inter-attempt delay.
    pub retry_max_delay: Duration,
    /// TTL applied to room keys in the durable store.
    pub room_ttl_secs: u64,
    /// Namespace prefix for room keys in the durable store.
    pub key_prefix: String,
    /// Countdown duration for one presentation, source of the wire
    /// `timerState.maxTime` field.
    pub presentation_time: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cache_max_entries: 500,
            cache_ttl: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(60),
            cleanup_expiry_threshold: Duration::from_secs(5),
            cleanup_max_scan: 1000,
            cleanup_timeout: Duration::from_secs(30),
            debounce_delay: Duration::from_millis(150),
            debounce_max_wait: Duration::from_millis(1000),
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(2),
            room_ttl_secs: 3600,
            key_prefix: "rooms:".into(),
            presentation_time: Duration::from_secs(300),
        }
    }
}

impl SyncConfig {
    /// Load the configuration from the environment, falling back to defaults
    /// for unset variables and failing on unparseable or out-of-range values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let room_ttl_secs = parse_env(ENV_ROOM_TTL_SECS, defaults.room_ttl_secs)?;

        let config = Self {
            cache_max_entries: parse_env(ENV_CACHE_MAX_ENTRIES, defaults.cache_max_entries)?,
            // The cache TTL tracks the room TTL unless explicitly overridden.
            cache_ttl: Duration::from_secs(parse_env(ENV_CACHE_TTL_SECS, room_ttl_secs)?),
            cleanup_interval: Duration::from_secs(parse_env(
                ENV_CLEANUP_INTERVAL_SECS,
                defaults.cleanup_interval.as_secs(),
            )?),
            cleanup_expiry_threshold: Duration::from_secs(parse_env(
                ENV_CLEANUP_EXPIRY_THRESHOLD_SECS,
                defaults.cleanup_expiry_threshold.as_secs(),
            )?),
            cleanup_max_scan: parse_env(ENV_CLEANUP_MAX_SCAN, defaults.cleanup_max_scan)?,
            cleanup_timeout: Duration::from_secs(parse_env(
                ENV_CLEANUP_TIMEOUT_SECS,
                defaults.cleanup_timeout.as_secs(),
            )?),
            debounce_delay: Duration::from_millis(parse_env(
                ENV_DEBOUNCE_DELAY_MS,
                defaults.debounce_delay.as_millis() as u64,
            )?),
            debounce_max_wait: Duration::from_millis(parse_env(
                ENV_DEBOUNCE_MAX_WAIT_MS,
                defaults.debounce_max_wait.as_millis() as u64,
            )?),
            retry_max_attempts: parse_env(ENV_RETRY_MAX_ATTEMPTS, defaults.retry_max_attempts)?,
            retry_base_delay: Duration::from_millis(parse_env(
                ENV_RETRY_BASE_DELAY_MS,
                defaults.retry_base_delay.as_millis() as u64,
            )?),
            retry_max_delay: Duration::from_millis(parse_env(
                ENV_RETRY_MAX_DELAY_MS,
                defaults.retry_max_delay.as_millis() as u64,
            )?),
            room_ttl_secs,
            key_prefix: env::var(ENV_KEY_PREFIX).unwrap_or(defaults.key_prefix),
            presentation_time: Duration::from_secs(parse_env(
                ENV_PRESENTATION_TIME_SECS,
                defaults.presentation_time.as_secs(),
            )?),
        };

        config.validate()?;
        info!(
            cache_max_entries = config.cache_max_entries,
            cache_ttl_secs = config.cache_ttl.as_secs(),
            room_ttl_secs = config.room_ttl_secs,
            key_prefix = %config.key_prefix,
            "loaded synchronization configuration"
        );
        Ok(config)
    }

    /// Check range and ordering invariants. Called by [`Self::from_env`];
    /// exposed so hand-built configurations in tests go through the same
    /// gate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_max_entries == 0 {
            return Err(ConfigError::OutOfRange(
                "cache max entries must be at least 1".into(),
            ));
        }
        if self.cache_ttl.is_zero() {
            return Err(ConfigError::OutOfRange(
                "cache TTL must be strictly positive".into(),
            ));
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::OutOfRange(
                "cleanup interval must be strictly positive".into(),
            ));
        }
        if self.cleanup_max_scan == 0 {
            return Err(ConfigError::OutOfRange(
                "cleanup max scan count must be at least 1".into(),
            ));
        }
        if self.cleanup_timeout.is_zero() {
            return Err(ConfigError::OutOfRange(
                "cleanup timeout must be strictly positive".into(),
            ));
        }
        if self.debounce_delay.is_zero() {
            return Err(ConfigError::OutOfRange(
                "debounce delay must be strictly positive".into(),
            ));
        }
        if self.debounce_max_wait <= self.debounce_delay {
            return Err(ConfigError::OutOfRange(format!(
                "debounce max wait ({:?}) must exceed the debounce delay ({:?})",
                self.debounce_max_wait, self.debounce_delay
            )));
        }
        if self.retry_max_attempts == 0 {
            return Err(ConfigError::OutOfRange(
                "retry max attempts must be at least 1".into(),
            ));
        }
        if self.retry_base_delay.is_zero() {
            return Err(ConfigError::OutOfRange(
                "retry base delay must be strictly positive".into(),
            ));
        }
        if self.retry_max_delay < self.retry_base_delay {
            return Err(ConfigError::OutOfRange(format!(
                "retry max delay ({:?}) must not undercut the base delay ({:?})",
                self.retry_max_delay, self.retry_base_delay
            )));
        }
        if self.room_ttl_secs == 0 {
            return Err(ConfigError::OutOfRange(
                "room TTL must be strictly positive".into(),
            ));
        }
        if self.key_prefix.is_empty() {
            return Err(ConfigError::OutOfRange(
                "key prefix must not be empty".into(),
            ));
        }
        if self.presentation_time.is_zero() {
            return Err(ConfigError::OutOfRange(
                "presentation time must be strictly positive".into(),
            ));
        }
        Ok(())
    }
}

/// Read and parse one environment variable, falling back to `default` when
/// the variable is unset.
fn parse_env<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|err| ConfigError::InvalidValue {
            key,
            reason: format!("`{raw}`: {err}"),
        }),
        Err(_) => Ok(default),
    }
}
