//! [`SessionRepository`] over a [`KeyValueStore`].
//!
//! Layout (all keys share the configured prefix):
//!
//! - `session:{id}`: JSON [`SessionRecord`], TTL = time to `expires_at`
//! - `user:sessions:{user_id}`: set of session ids, TTL covers the
//!   longest-lived member plus `index_ttl_extension` and is never shortened
//! - `mfa:token:{token}`: JSON [`MfaPendingRecord`], TTL = time to `expires_at`
//!
//! The index may name sessions that have already expired; readers prune
//! those members as they find them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use adminkit_auth::{MfaPendingRecord, SessionRecord, SessionRepository, StoreError};
use adminkit_core::{Clock, MfaToken, SessionId, SystemClock, UserId, remaining};

use crate::kv::{KeyValueStore, bounded};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStoreConfig {
    pub key_prefix: String,
    /// Upper bound on every backing-store call.
    pub op_timeout: Duration,
    /// Extra lifetime of the per-user index beyond its longest-lived session.
    pub index_ttl_extension: Duration,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "adminkit:".to_string(),
            op_timeout: Duration::from_secs(2),
            index_ttl_extension: Duration::from_secs(24 * 60 * 60),
        }
    }
}

pub struct SessionStore<S> {
    kv: S,
    config: SessionStoreConfig,
    clock: Arc<dyn Clock>,
}

impl<S> core::fmt::Debug for SessionStore<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionStore").field("config", &self.config).finish_non_exhaustive()
    }
}

impl<S> SessionStore<S>
where
    S: KeyValueStore,
{
    pub fn new(kv: S, config: SessionStoreConfig) -> Self {
        Self::with_clock(kv, config, Arc::new(SystemClock))
    }

    pub fn with_clock(kv: S, config: SessionStoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self { kv, config, clock }
    }

    pub fn config(&self) -> &SessionStoreConfig {
        &self.config
    }

    fn session_key(&self, session_id: &str) -> String {
        format!("{}session:{}", self.config.key_prefix, session_id)
    }

    fn index_key(&self, user_id: UserId) -> String {
        format!("{}user:sessions:{}", self.config.key_prefix, user_id)
    }

    fn mfa_key(&self, token: &MfaToken) -> String {
        format!("{}mfa:token:{}", self.config.key_prefix, token)
    }

    async fn put_json<T: Serialize + Sync>(
        &self,
        op: &'static str,
        key: &str,
        record: &T,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(record).map_err(|e| StoreError::Codec {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        bounded(self.config.op_timeout, op, key, self.kv.set(key, json, Some(ttl))).await
    }

    async fn get_json<T: DeserializeOwned>(&self, op: &'static str, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = bounded(self.config.op_timeout, op, key, self.kv.get(key)).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw).map(Some).map_err(|e| StoreError::Codec {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    async fn del(&self, op: &'static str, key: &str) -> Result<bool, StoreError> {
        bounded(self.config.op_timeout, op, key, self.kv.del(key)).await
    }

    async fn index_remove(&self, user_id: UserId, session_id: &SessionId) -> Result<(), StoreError> {
        let key = self.index_key(user_id);
        bounded(self.config.op_timeout, "srem", &key, self.kv.srem(&key, session_id.as_str())).await
    }

    /// TTL for a record expiring at `expires_at`, or `SessionExpired` when
    /// that instant has already passed.
    fn ttl_until(&self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<Duration, StoreError> {
        remaining(expires_at, now).ok_or(StoreError::SessionExpired)
    }

    async fn write_session(&self, op: &'static str, session: &SessionRecord, now: DateTime<Utc>) -> Result<(), StoreError> {
        let ttl = self.ttl_until(session.expires_at, now)?;
        let key = self.session_key(session.session_id.as_str());
        self.put_json(op, &key, session, ttl).await?;

        let index = self.index_key(session.user_id);
        bounded(
            self.config.op_timeout,
            "sadd",
            &index,
            self.kv.sadd(&index, session.session_id.as_str()),
        )
        .await?;
        let index_ttl = ttl.saturating_add(self.config.index_ttl_extension);
        bounded(
            self.config.op_timeout,
            "extend_expiry",
            &index,
            self.kv.extend_expiry(&index, index_ttl),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl<S> SessionRepository for SessionStore<S>
where
    S: KeyValueStore,
{
    #[instrument(skip(self, session), fields(session_id = %session.session_id, user_id = %session.user_id), err)]
    async fn create(&self, session: &SessionRecord) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.write_session("create", session, now).await?;
        debug!(expires_at = %session.expires_at, "session stored");
        Ok(())
    }

    async fn get(&self, session_id: &SessionId) -> Result<Option<SessionRecord>, StoreError> {
        self.get_json("get", &self.session_key(session_id.as_str())).await
    }

    #[instrument(skip(self, session), fields(session_id = %session.session_id), err)]
    async fn update(&self, session: &SessionRecord) -> Result<(), StoreError> {
        let key = self.session_key(session.session_id.as_str());
        let now = self.clock.now();
        if self.get_json::<SessionRecord>("update", &key).await?.is_none() {
            return Err(StoreError::SessionExpired);
        }
        if session.expires_at <= now {
            self.delete(&session.session_id).await?;
            return Err(StoreError::SessionExpired);
        }
        self.write_session("update", session, now).await
    }

    #[instrument(skip(self), err)]
    async fn refresh(
        &self,
        session_id: &SessionId,
        new_expires_at: DateTime<Utc>,
    ) -> Result<SessionRecord, StoreError> {
        let key = self.session_key(session_id.as_str());
        let now = self.clock.now();
        let Some(mut session) = self.get_json::<SessionRecord>("refresh", &key).await? else {
            return Err(StoreError::SessionExpired);
        };
        if new_expires_at <= now {
            return Err(StoreError::SessionExpired);
        }
        session.expires_at = new_expires_at;
        session.last_activity_at = now;
        self.write_session("refresh", &session, now).await?;
        Ok(session)
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, session_id: &SessionId) -> Result<(), StoreError> {
        let key = self.session_key(session_id.as_str());
        // The record names its owner; without it there is no index to prune.
        let existing = match self.get_json::<SessionRecord>("delete", &key).await {
            Ok(record) => record,
            Err(StoreError::Codec { .. }) => None,
            Err(err) => return Err(err),
        };
        self.del("delete", &key).await?;
        if let Some(session) = existing {
            self.index_remove(session.user_id, session_id).await?;
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn user_sessions(&self, user_id: UserId) -> Result<Vec<SessionRecord>, StoreError> {
        let index = self.index_key(user_id);
        let ids = bounded(self.config.op_timeout, "smembers", &index, self.kv.smembers(&index)).await?;

        let mut sessions = Vec::with_capacity(ids.len());
        for raw in ids {
            let session_id: SessionId = match raw.parse() {
                Ok(id) => id,
                Err(_) => continue,
            };
            match self.get(&session_id).await? {
                Some(session) => sessions.push(session),
                None => {
                    debug!(%session_id, "pruning stale index member");
                    self.index_remove(user_id, &session_id).await?;
                }
            }
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    #[instrument(skip(self), err)]
    async fn delete_all_user_sessions(&self, user_id: UserId) -> Result<usize, StoreError> {
        let index = self.index_key(user_id);
        let ids = bounded(self.config.op_timeout, "smembers", &index, self.kv.smembers(&index)).await?;
        // Members are removed one by one; a session indexed after SMEMBERS
        // keeps its entry.
        for raw in &ids {
            let key = self.session_key(raw);
            self.del("delete_all", &key).await?;
            bounded(self.config.op_timeout, "srem", &index, self.kv.srem(&index, raw)).await?;
        }
        info!(%user_id, count = ids.len(), "user sessions deleted");
        Ok(ids.len())
    }

    #[instrument(skip(self, token, pending), fields(user_id = %pending.user_id), err)]
    async fn store_mfa_token(&self, token: &MfaToken, pending: &MfaPendingRecord) -> Result<(), StoreError> {
        let ttl = self.ttl_until(pending.expires_at, self.clock.now())?;
        self.put_json("store_mfa_token", &self.mfa_key(token), pending, ttl).await
    }

    async fn get_mfa_token(&self, token: &MfaToken) -> Result<Option<MfaPendingRecord>, StoreError> {
        self.get_json("get_mfa_token", &self.mfa_key(token)).await
    }

    async fn delete_mfa_token(&self, token: &MfaToken) -> Result<bool, StoreError> {
        self.del("delete_mfa_token", &self.mfa_key(token)).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        bounded(self.config.op_timeout, "ping", "", self.kv.ping()).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        bounded(self.config.op_timeout, "close", "", self.kv.close()).await
    }
}

#[cfg(test)]
mod tests {
    use adminkit_auth::ClientInfo;
    use adminkit_core::{ManualClock, add_std};

    use super::*;
    use crate::kv::InMemoryKeyValueStore;

    struct Fixture {
        kv: Arc<InMemoryKeyValueStore>,
        clock: Arc<ManualClock>,
        store: SessionStore<Arc<InMemoryKeyValueStore>>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let kv = Arc::new(InMemoryKeyValueStore::with_clock(clock.clone()));
        let config = SessionStoreConfig {
            key_prefix: "t:".into(),
            ..SessionStoreConfig::default()
        };
        let store = SessionStore::with_clock(kv.clone(), config, clock.clone());
        Fixture { kv, clock, store }
    }

    fn session(f: &Fixture, user: i64, ttl_secs: u64) -> SessionRecord {
        SessionRecord::issue(
            UserId::new(user),
            "ops@example.com",
            &ClientInfo::new("127.0.0.1", "test"),
            f.clock.now(),
            Duration::from_secs(ttl_secs),
        )
    }

    #[tokio::test]
    async fn create_get_and_expire() {
        let f = fixture();
        let s = session(&f, 1, 60);
        f.store.create(&s).await.unwrap();

        assert_eq!(f.store.get(&s.session_id).await.unwrap(), Some(s.clone()));
        assert_eq!(f.kv.ttl(&format!("t:session:{}", s.session_id)), Some(Duration::from_secs(60)));
        assert_eq!(
            f.kv.ttl("t:user:sessions:1"),
            Some(Duration::from_secs(60 + 24 * 60 * 60))
        );

        f.clock.advance(Duration::from_secs(60));
        assert_eq!(f.store.get(&s.session_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn creating_an_expired_session_fails() {
        let f = fixture();
        let mut s = session(&f, 1, 60);
        s.expires_at = f.clock.now();
        assert_eq!(f.store.create(&s).await, Err(StoreError::SessionExpired));
        assert!(f.kv.keys().is_empty());
    }

    #[tokio::test]
    async fn refresh_slides_expiry_and_stamps_activity() {
        let f = fixture();
        let s = session(&f, 1, 60);
        f.store.create(&s).await.unwrap();

        f.clock.advance(Duration::from_secs(30));
        let new_expiry = add_std(f.clock.now(), Duration::from_secs(60));
        let refreshed = f.store.refresh(&s.session_id, new_expiry).await.unwrap();

        assert_eq!(refreshed.expires_at, new_expiry);
        assert_eq!(refreshed.last_activity_at, f.clock.now());
        assert_eq!(refreshed.created_at, s.created_at);

        f.clock.advance(Duration::from_secs(59));
        assert!(f.store.get(&s.session_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn refresh_or_update_of_missing_session_is_expired() {
        let f = fixture();
        let s = session(&f, 1, 60);
        let later = add_std(f.clock.now(), Duration::from_secs(120));

        assert_eq!(f.store.refresh(&s.session_id, later).await, Err(StoreError::SessionExpired));
        assert_eq!(f.store.update(&s).await, Err(StoreError::SessionExpired));
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_prunes_index() {
        let f = fixture();
        let a = session(&f, 1, 60);
        let b = session(&f, 1, 60);
        f.store.create(&a).await.unwrap();
        f.store.create(&b).await.unwrap();

        f.store.delete(&a.session_id).await.unwrap();
        f.store.delete(&a.session_id).await.unwrap();

        let members = f.kv.smembers("t:user:sessions:1").await.unwrap();
        assert_eq!(members, vec![b.session_id.to_string()]);
    }

    #[tokio::test]
    async fn listing_prunes_expired_members() {
        let f = fixture();
        let short = session(&f, 1, 10);
        let long = session(&f, 1, 100);
        f.store.create(&short).await.unwrap();
        f.store.create(&long).await.unwrap();

        f.clock.advance(Duration::from_secs(10));
        let live = f.store.user_sessions(UserId::new(1)).await.unwrap();
        assert_eq!(live, vec![long.clone()]);
        assert_eq!(
            f.kv.smembers("t:user:sessions:1").await.unwrap(),
            vec![long.session_id.to_string()]
        );
    }

    #[tokio::test]
    async fn delete_all_clears_sessions_and_index() {
        let f = fixture();
        for _ in 0..3 {
            f.store.create(&session(&f, 1, 60)).await.unwrap();
        }
        let other = session(&f, 2, 60);
        f.store.create(&other).await.unwrap();

        assert_eq!(f.store.delete_all_user_sessions(UserId::new(1)).await.unwrap(), 3);
        assert!(f.store.user_sessions(UserId::new(1)).await.unwrap().is_empty());
        assert_eq!(f.store.delete_all_user_sessions(UserId::new(1)).await.unwrap(), 0);
        assert_eq!(f.store.get(&other.session_id).await.unwrap(), Some(other));
    }

    #[tokio::test]
    async fn short_session_does_not_shorten_the_index() {
        let f = fixture();
        let long = session(&f, 1, 3 * 24 * 60 * 60);
        let short = session(&f, 1, 60);
        f.store.create(&long).await.unwrap();
        f.store.create(&short).await.unwrap();
        assert_eq!(
            f.kv.ttl("t:user:sessions:1"),
            Some(Duration::from_secs(4 * 24 * 60 * 60))
        );

        f.clock.advance(Duration::from_secs(2 * 24 * 60 * 60));
        assert_eq!(f.store.user_sessions(UserId::new(1)).await.unwrap(), vec![long.clone()]);
        assert_eq!(f.store.delete_all_user_sessions(UserId::new(1)).await.unwrap(), 1);
        assert_eq!(f.store.get(&long.session_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn session_indexed_during_delete_all_stays_listed() {
        let f = fixture();
        let old = session(&f, 1, 60);
        f.store.create(&old).await.unwrap();
        f.kv.set_latency(Duration::from_millis(5));

        let fresh = session(&f, 1, 60);
        let (removed, created) = tokio::join!(
            f.store.delete_all_user_sessions(UserId::new(1)),
            f.store.create(&fresh),
        );
        created.unwrap();
        assert_eq!(removed.unwrap(), 1);

        f.kv.set_latency(Duration::ZERO);
        assert_eq!(f.store.user_sessions(UserId::new(1)).await.unwrap(), vec![fresh]);
    }

    #[tokio::test]
    async fn mfa_tokens_are_separate_and_single_use() {
        let f = fixture();
        let token = MfaToken::generate();
        let pending = MfaPendingRecord::new(
            UserId::new(1),
            "ops@example.com",
            &ClientInfo::default(),
            f.clock.now(),
            Duration::from_secs(300),
        );
        f.store.store_mfa_token(&token, &pending).await.unwrap();

        assert_eq!(f.store.get_mfa_token(&token).await.unwrap(), Some(pending.clone()));
        assert_eq!(f.store.get_mfa_token(&token).await.unwrap(), Some(pending));
        assert!(f.store.delete_mfa_token(&token).await.unwrap());
        assert!(!f.store.delete_mfa_token(&token).await.unwrap());
        assert_eq!(f.store.get_mfa_token(&token).await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_record_is_a_codec_error() {
        let f = fixture();
        let id = SessionId::generate();
        let key = format!("t:session:{id}");
        f.kv.set(&key, "{not json".into(), None).await.unwrap();

        assert!(matches!(f.store.get(&id).await, Err(StoreError::Codec { key: k, .. }) if k == key));
        f.store.delete(&id).await.unwrap();
        assert_eq!(f.store.get(&id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn slow_backend_times_out_with_op_and_key() {
        let f = fixture();
        let store = SessionStore::with_clock(
            f.kv.clone(),
            SessionStoreConfig {
                key_prefix: "t:".into(),
                op_timeout: Duration::from_millis(20),
                ..SessionStoreConfig::default()
            },
            f.clock.clone(),
        );
        f.kv.set_latency(Duration::from_millis(200));

        let id = SessionId::generate();
        match store.get(&id).await {
            Err(StoreError::Timeout { op, key }) => {
                assert_eq!(op, "get");
                assert_eq!(key, format!("t:session:{id}"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_backend_reports_closed() {
        let f = fixture();
        f.store.close().await.unwrap();
        assert_eq!(f.store.ping().await, Err(StoreError::Closed));
    }
}
