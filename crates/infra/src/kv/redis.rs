//! Redis backend over a multiplexed, auto-reconnecting `ConnectionManager`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{info, instrument};

use super::{KeyValueStore, KvError};

#[derive(Clone)]
pub struct RedisKeyValueStore {
    conn: ConnectionManager,
    closed: std::sync::Arc<AtomicBool>,
}

impl core::fmt::Debug for RedisKeyValueStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisKeyValueStore")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn command_error(command: &str, err: redis::RedisError) -> KvError {
    if err.kind() == redis::ErrorKind::TypeError || err.code() == Some("WRONGTYPE") {
        return KvError::WrongType(format!("{command}: {err}"));
    }
    KvError::Backend(format!("{command} failed: {err}"))
}

// PX / PEXPIRE take whole milliseconds; never round a live TTL down to zero.
fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl RedisKeyValueStore {
    /// Connect to `redis_url` (e.g. `redis://localhost:6379`).
    pub async fn connect(redis_url: impl AsRef<str>) -> Result<Self, KvError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| KvError::Backend(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| KvError::Backend(format!("redis connection failed: {e}")))?;
        info!("connected to redis");
        Ok(Self {
            conn,
            closed: std::sync::Arc::new(AtomicBool::new(false)),
        })
    }

    fn connection(&self) -> Result<ConnectionManager, KvError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KvError::Closed);
        }
        Ok(self.conn.clone())
    }
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    #[instrument(skip(self, value), err)]
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), KvError> {
        let mut conn = self.connection()?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            if ttl.is_zero() {
                return Err(KvError::Backend("invalid expire time in 'set' command".into()));
            }
            cmd.arg("PX").arg(millis(ttl));
        }
        cmd.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| command_error("SET", e))
    }

    #[instrument(skip(self), err)]
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.connection()?;
        redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut conn)
            .await
            .map_err(|e| command_error("GET", e))
    }

    #[instrument(skip(self), err)]
    async fn del(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.connection()?;
        let removed: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("DEL", e))?;
        Ok(removed > 0)
    }

    #[instrument(skip(self), err)]
    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError> {
        let mut conn = self.connection()?;
        let _: u64 = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("SADD", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn srem(&self, key: &str, member: &str) -> Result<(), KvError> {
        let mut conn = self.connection()?;
        let _: u64 = redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("SREM", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        let mut conn = self.connection()?;
        redis::cmd("SMEMBERS")
            .arg(key)
            .query_async::<_, Vec<String>>(&mut conn)
            .await
            .map_err(|e| command_error("SMEMBERS", e))
    }

    #[instrument(skip(self), err)]
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut conn = self.connection()?;
        if ttl.is_zero() {
            return self.del(key).await;
        }
        let applied: u64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("PEXPIRE", e))?;
        Ok(applied == 1)
    }

    /// `PEXPIRE .. NX` arms a key without a TTL and `PEXPIRE .. GT` only
    /// lengthens one; together, in one transaction, they keep the larger TTL.
    /// Needs Redis 7.
    #[instrument(skip(self), err)]
    async fn extend_expiry(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut conn = self.connection()?;
        let ms = millis(ttl);
        let (armed, lengthened): (u64, u64) = redis::pipe()
            .atomic()
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ms)
            .arg("NX")
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ms)
            .arg("GT")
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("PEXPIRE", e))?;
        if armed == 1 || lengthened == 1 {
            return Ok(true);
        }
        let exists: u64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("EXISTS", e))?;
        Ok(exists == 1)
    }

    #[instrument(skip(self), err)]
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, KvError> {
        let mut conn = self.connection()?;
        if ttl.is_zero() {
            return Err(KvError::Backend("invalid expire time in 'incr' command".into()));
        }
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("INCR", e))?;
        Ok(count)
    }

    async fn ping(&self) -> Result<(), KvError> {
        let mut conn = self.connection()?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("PING", e))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), KvError> {
        // The manager's connection is dropped with the last clone.
        self.closed.store(true, Ordering::Release);
        info!("redis store closed");
        Ok(())
    }
}
