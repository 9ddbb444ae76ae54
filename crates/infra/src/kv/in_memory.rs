use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use adminkit_core::{Clock, SystemClock, add_std};

use super::{KeyValueStore, KvError};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

/// In-process store with Redis-compatible semantics, for tests and dev.
///
/// Expiry follows the injected [`Clock`]; expired keys disappear on the next
/// access. A set whose last member is removed disappears with it.
#[derive(Debug)]
pub struct InMemoryKeyValueStore {
    inner: Mutex<HashMap<String, Slot>>,
    clock: Arc<dyn Clock>,
    closed: AtomicBool,
    latency: Mutex<Duration>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            clock,
            closed: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    /// Delay every call by `latency` (simulated round trip).
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut l) = self.latency.lock() {
            *l = latency;
        }
    }

    /// Live keys, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now();
        match self.inner.lock() {
            Ok(map) => map
                .iter()
                .filter(|(_, slot)| !is_expired(slot, now))
                .map(|(k, _)| k.clone())
                .collect(),
            Err(_) => vec![],
        }
    }

    /// Remaining TTL of a live key; `None` for missing or persistent keys.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        let map = self.inner.lock().ok()?;
        let slot = map.get(key).filter(|s| !is_expired(s, now))?;
        adminkit_core::remaining(slot.expires_at?, now)
    }

    async fn enter(&self) -> Result<MutexGuard<'_, HashMap<String, Slot>>, KvError> {
        let latency = self.latency.lock().map(|l| *l).unwrap_or_default();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(KvError::Closed);
        }
        let mut map = self
            .inner
            .lock()
            .map_err(|_| KvError::Backend("in-memory store poisoned".into()))?;
        let now = self.clock.now();
        map.retain(|_, slot| !is_expired(slot, now));
        Ok(map)
    }
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

fn is_expired(slot: &Slot, now: DateTime<Utc>) -> bool {
    slot.expires_at.is_some_and(|at| at <= now)
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), KvError> {
        if ttl.is_some_and(|t| t.is_zero()) {
            return Err(KvError::Backend("invalid expire time in 'set' command".into()));
        }
        let now = self.clock.now();
        let mut map = self.enter().await?;
        map.insert(
            key.to_string(),
            Slot {
                value: Value::Str(value),
                expires_at: ttl.map(|t| add_std(now, t)),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let map = self.enter().await?;
        match map.get(key).map(|s| &s.value) {
            None => Ok(None),
            Some(Value::Str(v)) => Ok(Some(v.clone())),
            Some(Value::Set(_)) => Err(KvError::WrongType(key.to_string())),
        }
    }

    async fn del(&self, key: &str) -> Result<bool, KvError> {
        let mut map = self.enter().await?;
        Ok(map.remove(key).is_some())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError> {
        let mut map = self.enter().await?;
        let slot = map.entry(key.to_string()).or_insert_with(|| Slot {
            value: Value::Set(BTreeSet::new()),
            expires_at: None,
        });
        match &mut slot.value {
            Value::Set(members) => {
                members.insert(member.to_string());
                Ok(())
            }
            Value::Str(_) => Err(KvError::WrongType(key.to_string())),
        }
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), KvError> {
        let mut map = self.enter().await?;
        let emptied = match map.get_mut(key).map(|s| &mut s.value) {
            None => return Ok(()),
            Some(Value::Set(members)) => {
                members.remove(member);
                members.is_empty()
            }
            Some(Value::Str(_)) => return Err(KvError::WrongType(key.to_string())),
        };
        if emptied {
            map.remove(key);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        let map = self.enter().await?;
        match map.get(key).map(|s| &s.value) {
            None => Ok(vec![]),
            Some(Value::Set(members)) => Ok(members.iter().cloned().collect()),
            Some(Value::Str(_)) => Err(KvError::WrongType(key.to_string())),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let now = self.clock.now();
        let mut map = self.enter().await?;
        if ttl.is_zero() {
            return Ok(map.remove(key).is_some());
        }
        match map.get_mut(key) {
            Some(slot) => {
                slot.expires_at = Some(add_std(now, ttl));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn extend_expiry(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let now = self.clock.now();
        let mut map = self.enter().await?;
        let Some(slot) = map.get_mut(key) else {
            return Ok(false);
        };
        let wanted = add_std(now, ttl);
        slot.expires_at = Some(slot.expires_at.map_or(wanted, |at| at.max(wanted)));
        Ok(true)
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, KvError> {
        if ttl.is_zero() {
            return Err(KvError::Backend("invalid expire time in 'incr' command".into()));
        }
        let now = self.clock.now();
        let mut map = self.enter().await?;
        let current = match map.get(key).map(|s| &s.value) {
            None => 0,
            Some(Value::Str(v)) => v
                .parse::<i64>()
                .map_err(|_| KvError::Backend("value is not an integer or out of range".into()))?,
            Some(Value::Set(_)) => return Err(KvError::WrongType(key.to_string())),
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| KvError::Backend("increment or decrement would overflow".into()))?;
        map.insert(
            key.to_string(),
            Slot {
                value: Value::Str(next.to_string()),
                expires_at: Some(add_std(now, ttl)),
            },
        );
        Ok(next)
    }

    async fn ping(&self) -> Result<(), KvError> {
        self.enter().await.map(|_| ())
    }

    async fn close(&self) -> Result<(), KvError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use adminkit_core::ManualClock;

    use super::*;

    fn store() -> (InMemoryKeyValueStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        (InMemoryKeyValueStore::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn values_expire_on_the_clock() {
        let (kv, clock) = store();
        kv.set("a", "1".into(), Some(Duration::from_secs(10))).await.unwrap();
        kv.set("b", "2".into(), None).await.unwrap();

        clock.advance(Duration::from_secs(9));
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(kv.ttl("a"), Some(Duration::from_secs(1)));

        clock.advance(Duration::from_secs(1));
        assert_eq!(kv.get("a").await.unwrap(), None);
        assert_eq!(kv.get("b").await.unwrap().as_deref(), Some("2"));
        assert_eq!(kv.ttl("b"), None);
    }

    #[tokio::test]
    async fn zero_ttl_set_is_rejected() {
        let (kv, _) = store();
        assert!(matches!(
            kv.set("a", "1".into(), Some(Duration::ZERO)).await,
            Err(KvError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn set_semantics_match_redis() {
        let (kv, _) = store();
        kv.sadd("s", "x").await.unwrap();
        kv.sadd("s", "x").await.unwrap();
        kv.sadd("s", "y").await.unwrap();
        assert_eq!(kv.smembers("s").await.unwrap(), vec!["x".to_string(), "y".to_string()]);

        kv.srem("s", "x").await.unwrap();
        kv.srem("s", "y").await.unwrap();
        assert!(kv.smembers("s").await.unwrap().is_empty());
        assert!(!kv.expire("s", Duration::from_secs(5)).await.unwrap());

        kv.set("str", "v".into(), None).await.unwrap();
        assert_eq!(kv.sadd("str", "x").await, Err(KvError::WrongType("str".into())));
        kv.sadd("s", "x").await.unwrap();
        assert_eq!(kv.get("s").await, Err(KvError::WrongType("s".into())));
    }

    #[tokio::test]
    async fn expire_on_a_set() {
        let (kv, clock) = store();
        kv.sadd("s", "x").await.unwrap();
        assert!(kv.expire("s", Duration::from_secs(2)).await.unwrap());
        clock.advance(Duration::from_secs(2));
        assert!(kv.smembers("s").await.unwrap().is_empty());
        assert!(kv.keys().is_empty());
    }

    #[tokio::test]
    async fn extend_expiry_never_shortens() {
        let (kv, clock) = store();
        kv.sadd("s", "x").await.unwrap();
        assert!(kv.extend_expiry("s", Duration::from_secs(100)).await.unwrap());
        assert!(kv.extend_expiry("s", Duration::from_secs(10)).await.unwrap());
        assert_eq!(kv.ttl("s"), Some(Duration::from_secs(100)));

        clock.advance(Duration::from_secs(95));
        assert!(kv.extend_expiry("s", Duration::from_secs(10)).await.unwrap());
        assert_eq!(kv.ttl("s"), Some(Duration::from_secs(10)));
        assert!(!kv.extend_expiry("missing", Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_increments_are_all_counted() {
        let (kv, clock) = store();
        let kv = Arc::new(kv);
        kv.set_latency(Duration::from_millis(2));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let kv = kv.clone();
                tokio::spawn(async move { kv.incr("n", Duration::from_secs(30)).await.unwrap() })
            })
            .collect();
        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=20).collect::<Vec<i64>>());
        assert_eq!(kv.ttl("n"), Some(Duration::from_secs(30)));

        clock.advance(Duration::from_secs(30));
        assert_eq!(kv.incr("n", Duration::from_secs(30)).await.unwrap(), 1);

        kv.set("word", "abc".into(), None).await.unwrap();
        assert!(matches!(kv.incr("word", Duration::from_secs(1)).await, Err(KvError::Backend(_))));
    }

    #[tokio::test]
    async fn closed_store_refuses_calls() {
        let (kv, _) = store();
        kv.close().await.unwrap();
        assert_eq!(kv.ping().await, Err(KvError::Closed));
        assert_eq!(kv.get("a").await, Err(KvError::Closed));
    }
}
