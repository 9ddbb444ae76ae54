//! Session and pending-MFA records, and the store contract behind them.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use adminkit_core::{MfaToken, SessionId, UserId, add_std};

/// Where a request came from. Copied onto sessions and audit records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip_address: String,
    pub user_agent: String,
}

impl ClientInfo {
    pub fn new(ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// An authenticated session.
///
/// Serialized as JSON with RFC 3339 timestamps; the stored form is what other
/// processes sharing the store read back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub email: String,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl SessionRecord {
    /// A fresh session with a random id, expiring `ttl` after `now`.
    pub fn issue(
        user_id: UserId,
        email: impl Into<String>,
        client: &ClientInfo,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            session_id: SessionId::generate(),
            user_id,
            email: email.into(),
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            created_at: now,
            expires_at: add_std(now, ttl),
            last_activity_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Short-lived marker between a correct password and a correct MFA code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MfaPendingRecord {
    pub user_id: UserId,
    pub email: String,
    pub ip_address: String,
    pub user_agent: String,
    pub expires_at: DateTime<Utc>,
}

impl MfaPendingRecord {
    pub fn new(
        user_id: UserId,
        email: impl Into<String>,
        client: &ClientInfo,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            user_id,
            email: email.into(),
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            expires_at: add_std(now, ttl),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The session disappeared (expired or revoked) while being refreshed.
    #[error("session expired")]
    SessionExpired,

    #[error("{op} timed out for key '{key}'")]
    Timeout { op: &'static str, key: String },

    #[error("{op} failed for key '{key}': {message}")]
    Backend {
        op: &'static str,
        key: String,
        message: String,
    },

    #[error("undecodable record at key '{key}': {message}")]
    Codec { key: String, message: String },

    #[error("store is closed")]
    Closed,
}

/// Persistence for sessions, the per-user session index and pending MFA
/// tokens.
///
/// Absence is `Ok(None)`, never an error. Implementations give each record a
/// TTL equal to its remaining lifetime so stale state ages out of the store on
/// its own.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Store a new session and add it to the user's index.
    async fn create(&self, session: &SessionRecord) -> Result<(), StoreError>;

    async fn get(&self, session_id: &SessionId) -> Result<Option<SessionRecord>, StoreError>;

    /// Overwrite an existing session, keeping its TTL aligned with `expires_at`.
    async fn update(&self, session: &SessionRecord) -> Result<(), StoreError>;

    /// Move the expiry to `new_expires_at` and stamp activity.
    ///
    /// Fails with [`StoreError::SessionExpired`] when the session is gone.
    async fn refresh(
        &self,
        session_id: &SessionId,
        new_expires_at: DateTime<Utc>,
    ) -> Result<SessionRecord, StoreError>;

    /// Remove a session and its index membership. Missing sessions are fine.
    async fn delete(&self, session_id: &SessionId) -> Result<(), StoreError>;

    /// Live sessions of a user. Index members whose record is gone are pruned.
    async fn user_sessions(&self, user_id: UserId) -> Result<Vec<SessionRecord>, StoreError>;

    /// Remove every session of a user. Returns how many index members existed.
    async fn delete_all_user_sessions(&self, user_id: UserId) -> Result<usize, StoreError>;

    async fn store_mfa_token(
        &self,
        token: &MfaToken,
        pending: &MfaPendingRecord,
    ) -> Result<(), StoreError>;

    async fn get_mfa_token(&self, token: &MfaToken) -> Result<Option<MfaPendingRecord>, StoreError>;

    /// Remove a pending token. Returns `true` only for the caller that
    /// actually removed it.
    async fn delete_mfa_token(&self, token: &MfaToken) -> Result<bool, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn close(&self) -> Result<(), StoreError>;
}
