use std::time::Duration;

use adminkit_core::{DomainError, DomainResult};

/// Tuning knobs of one cache instance.
///
/// These are the only externally configurable parameters of the cache; nothing
/// else affects its behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of resident entries.
    pub max_size: usize,
    /// Lifetime of an entry, measured from insertion.
    pub ttl: Duration,
    /// Period of the background sweep. `Duration::ZERO` disables the sweeper
    /// and leaves expiry to reads and [`purge_expired`](crate::ExpiringCache::purge_expired).
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            ttl: Duration::from_secs(10 * 60),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Preset for permission sets: a short TTL bounds how long a missed
    /// invalidation can keep a revoked permission alive.
    pub fn permissions() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            ..Self::default()
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Lazy expiry only (no background thread).
    pub fn without_sweeper(self) -> Self {
        self.with_cleanup_interval(Duration::ZERO)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.max_size == 0 {
            return Err(DomainError::validation("cache max_size must be greater than zero"));
        }
        if self.ttl.is_zero() {
            return Err(DomainError::validation("cache ttl must be greater than zero"));
        }
        Ok(())
    }
}
