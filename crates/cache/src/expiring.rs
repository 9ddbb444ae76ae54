//! The expiring cache engine.
//!
//! # Invariants
//! - At most `max_size` entries are resident; inserting a new key at capacity
//!   first evicts the entry closest to expiry (oldest insertion on ties).
//! - An entry is never returned at or after its `expires_at`.
//! - After [`ExpiringCache::stop`], reads miss and writes are ignored.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use adminkit_core::{Clock, DomainResult, SystemClock, add_std};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::CacheConfig;
use crate::stats::CacheStats;
use crate::sweeper::{self, SweeperHandle};

/// A cached value with its lifetime bounds.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    seq: u64,
}

impl<V> CacheEntry<V> {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

struct State<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    next_seq: u64,
}

impl<K, V> State<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Evict the entry closest to expiry. Returns false when empty.
    fn evict_one(&mut self) -> bool {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| (e.expires_at, e.seq))
            .map(|(k, _)| k.clone());

        match victim {
            Some(key) => {
                self.entries.remove(&key);
                true
            }
            None => false,
        }
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before - self.entries.len()
    }
}

struct Shared<K, V> {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    stopped: AtomicBool,
    state: Mutex<State<K, V>>,
}

impl<K, V> Shared<K, V> {
    fn lock(&self) -> MutexGuard<'_, State<K, V>> {
        // A panic while holding the lock cannot leave the map structurally
        // broken, so keep serving from it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Size-bounded, TTL-based key/value cache, safe for concurrent use.
///
/// Each instance owns one background sweeper thread (unless
/// `cleanup_interval` is zero), stopped by [`stop`](Self::stop) or on drop.
pub struct ExpiringCache<K, V> {
    shared: Arc<Shared<K, V>>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Create a cache on the wall clock and start its sweeper.
    pub fn new(config: CacheConfig) -> DomainResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a cache reading time from `clock`.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> DomainResult<Self> {
        config.validate()?;

        let shared = Arc::new(Shared {
            config,
            clock,
            stopped: AtomicBool::new(false),
            state: Mutex::new(State {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                next_seq: 0,
            }),
        });

        let sweeper = if config.cleanup_interval.is_zero() {
            None
        } else {
            let target = shared.clone();
            sweeper::spawn("adminkit-cache-sweeper", config.cleanup_interval, move || {
                if target.is_stopped() {
                    return;
                }
                let now = target.clock.now();
                let removed = target.lock().purge_expired(now);
                if removed > 0 {
                    debug!(removed, "cache sweep evicted expired entries");
                }
            })
        };

        Ok(Self {
            shared,
            sweeper: Mutex::new(sweeper),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    /// Look up a live entry. Expired entries are removed and counted as misses.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.shared.clock.now();
        let mut guard = self.shared.lock();
        if self.shared.is_stopped() {
            return None;
        }
        let state = &mut *guard;

        let expired = match state.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                state.hits += 1;
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            state.entries.remove(key);
        }
        state.misses += 1;
        None
    }

    /// Insert or replace `key`, restarting its TTL.
    pub fn set(&self, key: K, value: V) {
        let now = self.shared.clock.now();
        let expires_at = add_std(now, self.shared.config.ttl);
        let mut guard = self.shared.lock();
        if self.shared.is_stopped() {
            return;
        }
        let state = &mut *guard;

        if !state.entries.contains_key(&key) {
            while state.entries.len() >= self.shared.config.max_size {
                if !state.evict_one() {
                    break;
                }
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                expires_at,
                seq,
            },
        );
    }

    /// Remove `key`. Returns whether an entry (live or expired) was present.
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shared.lock().entries.remove(key).is_some()
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.shared.clock.now();
        self.shared
            .lock()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    /// Drop every entry. Statistics are kept.
    pub fn clear(&self) {
        self.shared.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.shared.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run one sweep synchronously. Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.shared.clock.now();
        self.shared.lock().purge_expired(now)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.shared.lock();
        CacheStats::new(state.entries.len(), state.hits, state.misses)
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Stop the background sweeper and release all entries.
    ///
    /// Only the first call has an effect.
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.shutdown();
        }

        self.shared.lock().entries.clear();
        debug!("cache stopped");
    }
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone + AsRef<str> + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Remove every entry whose key starts with `prefix`. Returns the count.
    pub fn delete_prefix(&self, prefix: &str) -> usize {
        let mut state = self.shared.lock();
        let before = state.entries.len();
        state.entries.retain(|k, _| !k.as_ref().starts_with(prefix));
        before - state.entries.len()
    }
}

impl<K, V> Drop for ExpiringCache<K, V> {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::Release);
        let handle = self
            .sweeper
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.shutdown();
        }
    }
}

impl<K, V> core::fmt::Debug for ExpiringCache<K, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExpiringCache")
            .field("config", &self.shared.config)
            .field("stopped", &self.shared.is_stopped())
            .finish_non_exhaustive()
    }
}
