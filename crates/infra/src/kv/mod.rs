//! Key-value backing store.
//!
//! The session and lockout stores only need string values with per-key
//! expiry plus unordered string sets, which is the subset of Redis modelled
//! here.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use adminkit_auth::StoreError;

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use in_memory::InMemoryKeyValueStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisKeyValueStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KvError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("store is closed")]
    Closed,

    /// A string command hit a set key or vice versa.
    #[error("wrong kind of value at key '{0}'")]
    WrongType(String),
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Write a string value. `ttl: None` keeps it until deleted.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), KvError>;

    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Returns whether the key existed.
    async fn del(&self, key: &str) -> Result<bool, KvError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError>;

    async fn srem(&self, key: &str, member: &str) -> Result<(), KvError>;

    /// Members of a set; empty when the key is absent.
    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError>;

    /// Set a key's TTL. Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Raise a key's TTL to at least `ttl`; a longer remaining TTL is kept.
    /// Returns `false` when the key does not exist.
    async fn extend_expiry(&self, key: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Atomically increment an integer counter (missing keys count from zero)
    /// and set its TTL. Returns the new value.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, KvError>;

    async fn ping(&self) -> Result<(), KvError>;

    async fn close(&self) -> Result<(), KvError>;
}

#[async_trait]
impl<S> KeyValueStore for Arc<S>
where
    S: KeyValueStore + ?Sized,
{
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), KvError> {
        (**self).set(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        (**self).get(key).await
    }

    async fn del(&self, key: &str) -> Result<bool, KvError> {
        (**self).del(key).await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError> {
        (**self).sadd(key, member).await
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), KvError> {
        (**self).srem(key, member).await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        (**self).smembers(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        (**self).expire(key, ttl).await
    }

    async fn extend_expiry(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        (**self).extend_expiry(key, ttl).await
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, KvError> {
        (**self).incr(key, ttl).await
    }

    async fn ping(&self) -> Result<(), KvError> {
        (**self).ping().await
    }

    async fn close(&self) -> Result<(), KvError> {
        (**self).close().await
    }
}

/// Run one store call under `limit`, mapping failures to [`StoreError`].
pub(crate) async fn bounded<T, F>(limit: Duration, op: &'static str, key: &str, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, KvError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(KvError::Closed)) => Err(StoreError::Closed),
        Ok(Err(err)) => Err(StoreError::Backend {
            op,
            key: key.to_string(),
            message: err.to_string(),
        }),
        Err(_) => {
            warn!(op, key, timeout_ms = limit.as_millis() as u64, "store call timed out");
            Err(StoreError::Timeout {
                op,
                key: key.to_string(),
            })
        }
    }
}
