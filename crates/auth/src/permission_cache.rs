//! Read-through cache of per-user permission sets.
//!
//! Every authorization check lands here. A miss loads the user's codes from
//! the authoritative [`PermissionLookup`] and caches them for the configured
//! TTL; writes that affect permissions invalidate through
//! [`PermissionInvalidation`] before they are acknowledged.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use adminkit_cache::{CacheConfig, CacheStats, ExpiringCache};
use adminkit_core::{Clock, DomainResult, SystemClock, UserId};

use crate::permissions::{InvalidationScope, Permission, PermissionChange};

/// Authoritative source of user permissions (normally the relational store).
#[async_trait]
pub trait PermissionLookup: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// All permission codes currently granted to the user through any role.
    async fn user_permission_codes(&self, user_id: UserId) -> Result<Vec<String>, Self::Error>;

    async fn user_has_permission(&self, user_id: UserId, code: &str) -> Result<bool, Self::Error> {
        let codes = self.user_permission_codes(user_id).await?;
        Ok(codes.iter().any(|c| c == code))
    }
}

#[async_trait]
impl<T> PermissionLookup for Arc<T>
where
    T: PermissionLookup + ?Sized,
{
    type Error = T::Error;

    async fn user_permission_codes(&self, user_id: UserId) -> Result<Vec<String>, Self::Error> {
        (**self).user_permission_codes(user_id).await
    }

    async fn user_has_permission(&self, user_id: UserId, code: &str) -> Result<bool, Self::Error> {
        (**self).user_has_permission(user_id, code).await
    }
}

/// Invalidation half of the permission cache, object-safe so write paths can
/// hold it without knowing the lookup type.
pub trait PermissionInvalidation: Send + Sync {
    fn invalidate_user(&self, user_id: UserId);
    fn invalidate_users(&self, user_ids: &[UserId]);
    fn invalidate_all(&self);

    fn apply_change(&self, change: &PermissionChange) {
        match change.scope() {
            InvalidationScope::User(user_id) => self.invalidate_user(user_id),
            InvalidationScope::Users(user_ids) => self.invalidate_users(user_ids),
            InvalidationScope::All => self.invalidate_all(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PermissionCacheStats {
    pub cached_users: usize,
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    pub cache: CacheStats,
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }
}

type PermissionSet = Arc<HashSet<Permission>>;

pub struct PermissionCache<L> {
    lookup: L,
    cache: ExpiringCache<UserId, PermissionSet>,
    // Bumped by every invalidation. A load that straddles an invalidation is
    // returned to its caller but not cached.
    generation: AtomicU64,
}

impl<L> PermissionCache<L>
where
    L: PermissionLookup,
{
    pub fn new(lookup: L, config: CacheConfig) -> DomainResult<Self> {
        Self::with_clock(lookup, config, Arc::new(SystemClock))
    }

    pub fn with_clock(lookup: L, config: CacheConfig, clock: Arc<dyn Clock>) -> DomainResult<Self> {
        Ok(Self {
            lookup,
            cache: ExpiringCache::with_clock(config, clock)?,
            generation: AtomicU64::new(0),
        })
    }

    pub async fn has_permission(&self, user_id: UserId, code: &str) -> Result<bool, L::Error> {
        let set = self.permission_set(user_id).await?;
        Ok(set.contains(code))
    }

    /// `true` if the user holds at least one of `codes`. An empty slice never
    /// matches.
    pub async fn has_any_permission(&self, user_id: UserId, codes: &[&str]) -> Result<bool, L::Error> {
        if codes.is_empty() {
            return Ok(false);
        }
        let set = self.permission_set(user_id).await?;
        Ok(codes.iter().any(|code| set.contains(*code)))
    }

    pub async fn has_all_permissions(&self, user_id: UserId, codes: &[&str]) -> Result<bool, L::Error> {
        let set = self.permission_set(user_id).await?;
        Ok(codes.iter().all(|code| set.contains(*code)))
    }

    /// The user's permission codes, sorted.
    pub async fn user_permissions(&self, user_id: UserId) -> Result<Vec<String>, L::Error> {
        let set = self.permission_set(user_id).await?;
        let mut codes: Vec<String> = set.iter().map(|p| p.as_str().to_string()).collect();
        codes.sort_unstable();
        Ok(codes)
    }

    pub fn stats(&self) -> PermissionCacheStats {
        let cache = self.cache.stats();
        PermissionCacheStats {
            cached_users: cache.size,
            ttl: self.cache.config().ttl,
            cache,
        }
    }

    pub fn stop(&self) {
        self.cache.stop();
    }

    async fn permission_set(&self, user_id: UserId) -> Result<PermissionSet, L::Error> {
        if let Some(set) = self.cache.get(&user_id) {
            return Ok(set);
        }

        let generation = self.generation.load(Ordering::Acquire);
        let codes = self.lookup.user_permission_codes(user_id).await?;
        let set: PermissionSet = Arc::new(codes.into_iter().map(Permission::from).collect());

        if self.generation.load(Ordering::Acquire) == generation {
            self.cache.set(user_id, set.clone());
        } else {
            debug!(%user_id, "permission set invalidated during load; not caching");
        }
        Ok(set)
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl<L> PermissionInvalidation for PermissionCache<L>
where
    L: PermissionLookup,
{
    fn invalidate_user(&self, user_id: UserId) {
        self.bump();
        self.cache.delete(&user_id);
        debug!(%user_id, "permission cache invalidated for user");
    }

    fn invalidate_users(&self, user_ids: &[UserId]) {
        self.bump();
        for user_id in user_ids {
            self.cache.delete(user_id);
        }
        debug!(users = user_ids.len(), "permission cache invalidated for users");
    }

    fn invalidate_all(&self) {
        self.bump();
        self.cache.clear();
        info!("permission cache cleared");
    }
}

impl<L> core::fmt::Debug for PermissionCache<L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PermissionCache")
            .field("cache", &self.cache)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}
