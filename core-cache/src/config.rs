//! Cache configuration and policies

use crate::db::DatabaseConfig;
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the songbook cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Connection settings for the backing SQLite database
    pub database: DatabaseConfig,

    /// Deadline applied to every store and queue operation (default: 30s)
    pub operation_timeout: Duration,

    /// Song population above which LRU eviction removes anything (default: 50)
    pub eviction_ceiling: u64,

    /// Share of the song population removed per eviction pass (default: 20)
    pub eviction_percent: u8,

    /// Quota usage that triggers eviction (default: 80%)
    pub quota_threshold_percent: f64,

    /// Multiplier applied to serialized length when estimating size (default: 2)
    pub size_multiplier: u64,

    /// Retry bookkeeping for the sync queue
    pub retry_policy: RetryPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            operation_timeout: Duration::from_secs(30),
            eviction_ceiling: 50,
            eviction_percent: 20,
            quota_threshold_percent: 80.0,
            size_multiplier: 2,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration backed by an in-memory database.
    pub fn in_memory() -> Self {
        Self::default().with_database(DatabaseConfig::in_memory())
    }

    pub fn with_database(mut self, database: DatabaseConfig) -> Self {
        self.database = database;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the eviction ceiling and percentage.
    pub fn with_eviction(mut self, ceiling: u64, percent: u8) -> Self {
        self.eviction_ceiling = ceiling;
        self.eviction_percent = percent;
        self
    }

    pub fn with_quota_threshold(mut self, percent: f64) -> Self {
        self.quota_threshold_percent = percent;
        self
    }

    pub fn with_size_multiplier(mut self, multiplier: u64) -> Self {
        self.size_multiplier = multiplier;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.database.database_url.trim().is_empty() {
            return Err(CacheError::Config(
                "database_url cannot be empty".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(CacheError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }

        if self.operation_timeout.is_zero() {
            return Err(CacheError::Config(
                "operation_timeout must be greater than 0".to_string(),
            ));
        }

        if self.eviction_percent == 0 || self.eviction_percent > 100 {
            return Err(CacheError::Config(
                "eviction_percent must be between 1 and 100".to_string(),
            ));
        }

        if !(0.0..=100.0).contains(&self.quota_threshold_percent) {
            return Err(CacheError::Config(
                "quota_threshold_percent must be between 0 and 100".to_string(),
            ));
        }

        if self.size_multiplier == 0 {
            return Err(CacheError::Config(
                "size_multiplier must be greater than 0".to_string(),
            ));
        }

        self.retry_policy.validate()
    }
}

/// Retry ceiling and backoff for failed sync operations.
///
/// The queue itself never sleeps; the delay is advice for whoever drains it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Failed operations at or above this count are dead-lettered
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each further one
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(CacheError::Config(
                "max_retries must be at least 1".to_string(),
            ));
        }

        if self.base_delay > self.max_delay {
            return Err(CacheError::Config(
                "base_delay cannot exceed max_delay".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.operation_timeout, Duration::from_secs(30));
        assert_eq!(config.eviction_ceiling, 50);
        assert_eq!(config.eviction_percent, 20);
        assert_eq!(config.quota_threshold_percent, 80.0);
        assert_eq!(config.size_multiplier, 2);
        assert_eq!(config.retry_policy.max_retries, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = CacheConfig::in_memory()
            .with_operation_timeout(Duration::from_secs(5))
            .with_eviction(10, 50)
            .with_quota_threshold(90.0)
            .with_retry_policy(RetryPolicy::default().with_max_retries(2));

        assert_eq!(config.database.database_url, "sqlite::memory:");
        assert_eq!(config.eviction_ceiling, 10);
        assert_eq!(config.eviction_percent, 50);
        assert_eq!(config.quota_threshold_percent, 90.0);
        assert_eq!(config.retry_policy.max_retries, 2);
    }

    #[test]
    fn test_validation() {
        let config = CacheConfig::default().with_eviction(50, 0);
        assert!(matches!(config.validate(), Err(CacheError::Config(_))));

        let config = CacheConfig::default().with_quota_threshold(120.0);
        assert!(config.validate().is_err());

        let config = CacheConfig::default().with_operation_timeout(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = CacheConfig::default().with_retry_policy(
            RetryPolicy::default().with_backoff(Duration::from_secs(10), Duration::from_secs(1)),
        );
        assert!(config.validate().is_err());
    }
}
