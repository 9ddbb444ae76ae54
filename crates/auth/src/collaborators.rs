//! Contracts for the services the auth runtime consumes but does not own:
//! the credential directory, MFA code verification, backup codes and the
//! audit trail.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use adminkit_core::UserId;

use crate::account::{AccountCredentials, AccountStatus};
use crate::session::ClientInfo;

/// Failure of an external collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{collaborator} failed: {message}")]
pub struct CollaboratorError {
    pub collaborator: &'static str,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self {
            collaborator,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Lookup by normalized email.
    async fn find_by_email(&self, email: &str) -> Result<Option<AccountCredentials>, CollaboratorError>;

    async fn find_by_user_id(&self, user_id: UserId) -> Result<Option<AccountCredentials>, CollaboratorError>;

    /// Replace the password hash. The previous hash joins the history.
    async fn update_password_hash(&self, user_id: UserId, password_hash: &str) -> Result<(), CollaboratorError>;

    /// Up to `limit` previous hashes, newest first.
    async fn password_history(&self, user_id: UserId, limit: usize) -> Result<Vec<String>, CollaboratorError>;

    async fn set_status(&self, user_id: UserId, status: AccountStatus) -> Result<(), CollaboratorError>;

    /// `None` disables MFA.
    async fn set_mfa_secret(&self, user_id: UserId, secret: Option<&str>) -> Result<(), CollaboratorError>;
}

/// Time-based one-time code check.
pub trait MfaVerifier: Send + Sync {
    fn verify(&self, secret: &str, code: &str, at: DateTime<Utc>) -> bool;
}

#[async_trait]
pub trait BackupCodeStore: Send + Sync {
    /// Consume a single-use backup code. `false` if unknown or already used.
    async fn consume(&self, user_id: UserId, code: &str) -> Result<bool, CollaboratorError>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    LoginSucceeded,
    LoginFailed,
    AccountLocked,
    MfaChallengeIssued,
    MfaVerified,
    MfaFailed,
    BackupCodeUsed,
    Logout,
    LogoutAll,
    PasswordChanged,
    PasswordSet,
    AccountUnlocked,
    StatusChanged,
    MfaEnabled,
    MfaDisabled,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::LoginSucceeded => "login_succeeded",
            AuditAction::LoginFailed => "login_failed",
            AuditAction::AccountLocked => "account_locked",
            AuditAction::MfaChallengeIssued => "mfa_challenge_issued",
            AuditAction::MfaVerified => "mfa_verified",
            AuditAction::MfaFailed => "mfa_failed",
            AuditAction::BackupCodeUsed => "backup_code_used",
            AuditAction::Logout => "logout",
            AuditAction::LogoutAll => "logout_all",
            AuditAction::PasswordChanged => "password_changed",
            AuditAction::PasswordSet => "password_set",
            AuditAction::AccountUnlocked => "account_unlocked",
            AuditAction::StatusChanged => "status_changed",
            AuditAction::MfaEnabled => "mfa_enabled",
            AuditAction::MfaDisabled => "mfa_disabled",
        }
    }
}

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub user_id: Option<UserId>,
    pub email: Option<String>,
    pub ip_address: String,
    pub user_agent: String,
    pub occurred_at: DateTime<Utc>,
    pub detail: Option<String>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, client: &ClientInfo, occurred_at: DateTime<Utc>) -> Self {
        Self {
            action,
            user_id: None,
            email: None,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            occurred_at,
            detail: None,
        }
    }

    pub fn user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
