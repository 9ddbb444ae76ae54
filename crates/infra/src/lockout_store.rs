//! Lockout state in the key-value store.
//!
//! Two keys per user:
//!
//! - `lockout:{user_id}:failures`: integer failure counter, bumped with an
//!   atomic increment so parallel attempts are all counted
//! - `lockout:{user_id}`: JSON [`LockoutState`] holding the active lock and
//!   the backoff count; written only when a lock is applied

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use adminkit_auth::{FailureOutcome, LockoutPolicy, LockoutState, LockoutStore, StoreError};
use adminkit_core::UserId;

use crate::kv::{KeyValueStore, bounded};

#[derive(Debug)]
pub struct KvLockoutStore<S> {
    kv: S,
    key_prefix: String,
    op_timeout: Duration,
}

impl<S> KvLockoutStore<S>
where
    S: KeyValueStore,
{
    pub fn new(kv: S, key_prefix: impl Into<String>, op_timeout: Duration) -> Self {
        Self {
            kv,
            key_prefix: key_prefix.into(),
            op_timeout,
        }
    }

    fn key(&self, user_id: UserId) -> String {
        format!("{}lockout:{}", self.key_prefix, user_id)
    }

    fn counter_key(&self, user_id: UserId) -> String {
        format!("{}lockout:{}:failures", self.key_prefix, user_id)
    }

    async fn read_state(&self, key: &str) -> Result<LockoutState, StoreError> {
        let Some(raw) = bounded(self.op_timeout, "lockout_load", key, self.kv.get(key)).await? else {
            return Ok(LockoutState::default());
        };
        serde_json::from_str(&raw).map_err(|e| StoreError::Codec {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    async fn read_counter(&self, key: &str) -> Result<Option<u32>, StoreError> {
        let Some(raw) = bounded(self.op_timeout, "lockout_load", key, self.kv.get(key)).await? else {
            return Ok(None);
        };
        raw.parse().map(Some).map_err(|_| StoreError::Codec {
            key: key.to_string(),
            message: format!("not a failure count: '{raw}'"),
        })
    }

    async fn write_state(&self, key: &str, state: &LockoutState, ttl: Duration) -> Result<(), StoreError> {
        let json = serde_json::to_string(state).map_err(|e| StoreError::Codec {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        let ttl = (!ttl.is_zero()).then_some(ttl);
        bounded(self.op_timeout, "lockout_save", key, self.kv.set(key, json, ttl)).await
    }
}

#[async_trait]
impl<S> LockoutStore for KvLockoutStore<S>
where
    S: KeyValueStore,
{
    async fn load(&self, user_id: UserId) -> Result<LockoutState, StoreError> {
        let mut state = self.read_state(&self.key(user_id)).await?;
        if let Some(failures) = self.read_counter(&self.counter_key(user_id)).await? {
            state.failed_attempts = failures;
        }
        Ok(state)
    }

    #[instrument(skip(self, policy), err)]
    async fn record_failure(
        &self,
        user_id: UserId,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, StoreError> {
        let counter = self.counter_key(user_id);
        let count = bounded(
            self.op_timeout,
            "lockout_incr",
            &counter,
            self.kv.incr(&counter, policy.counter_ttl),
        )
        .await?;

        let key = self.key(user_id);
        let mut state = self.read_state(&key).await?;
        // The counter restarts when a lock is applied, so an expired lock
        // carries no attempts forward.
        if state.locked_until.is_some_and(|until| until <= now) {
            state.locked_until = None;
        }
        state.failed_attempts = u32::try_from(count.saturating_sub(1)).unwrap_or(u32::MAX);

        let locked = policy.register_failure(&mut state, now);
        if locked {
            self.write_state(&key, &state, policy.retention(&state, now)).await?;
            bounded(self.op_timeout, "lockout_reset", &counter, self.kv.del(&counter)).await?;
            debug!(%user_id, lockout_count = state.lockout_count, "lock applied");
        }
        Ok(FailureOutcome { state, locked })
    }

    async fn clear(&self, user_id: UserId) -> Result<(), StoreError> {
        let key = self.key(user_id);
        let counter = self.counter_key(user_id);
        let had_lock = bounded(self.op_timeout, "lockout_clear", &key, self.kv.del(&key)).await?;
        let had_count = bounded(self.op_timeout, "lockout_clear", &counter, self.kv.del(&counter)).await?;
        if had_lock || had_count {
            debug!(%user_id, "lockout state cleared");
        }
        Ok(())
    }
}
