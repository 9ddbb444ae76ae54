//! Authentication orchestration.
//!
//! [`AuthService`] sequences credential checks, lockout, the MFA step,
//! session issuance and the administrative account operations. It owns no
//! storage: every effect goes through a collaborator trait, so instances are
//! stateless and any number of them can share one session store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use adminkit_core::{Clock, MfaToken, SessionId, UserId, add_std};

use crate::account::{AccountCredentials, AccountStatus, normalize_email};
use crate::collaborators::{
    AuditAction, AuditEvent, AuditSink, BackupCodeStore, CredentialStore, MfaVerifier,
};
use crate::error::AuthError;
use crate::lockout::{LockoutPolicy, LockoutStore};
use crate::password::{PasswordHasher, PasswordPolicy};
use crate::permission_cache::PermissionInvalidation;
use crate::session::{ClientInfo, MfaPendingRecord, SessionRecord, SessionRepository};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthConfig {
    pub session_ttl: Duration,
    pub mfa_token_ttl: Duration,
    /// Push the expiry forward on authenticated activity.
    pub sliding_sessions: bool,
    /// Minimum gap between two sliding refreshes of the same session.
    pub refresh_interval: Duration,
    pub lockout: LockoutPolicy,
    pub password: PasswordPolicy,
    /// A password change ends every other session of the user.
    pub revoke_sessions_on_password_change: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(24 * 60 * 60),
            mfa_token_ttl: Duration::from_secs(5 * 60),
            sliding_sessions: true,
            refresh_interval: Duration::from_secs(60),
            lockout: LockoutPolicy::default(),
            password: PasswordPolicy::default(),
            revoke_sessions_on_password_change: true,
        }
    }
}

/// Everything [`AuthService`] talks to.
#[derive(Clone)]
pub struct AuthCollaborators {
    pub credentials: Arc<dyn CredentialStore>,
    pub hasher: Arc<dyn PasswordHasher>,
    pub mfa: Arc<dyn MfaVerifier>,
    pub backup_codes: Arc<dyn BackupCodeStore>,
    pub sessions: Arc<dyn SessionRepository>,
    pub lockouts: Arc<dyn LockoutStore>,
    pub permissions: Arc<dyn PermissionInvalidation>,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated(SessionRecord),
    /// Password accepted; present `mfa_token` with a code to finish.
    MfaRequired {
        mfa_token: MfaToken,
        expires_at: DateTime<Utc>,
    },
}

impl LoginOutcome {
    pub fn requires_mfa(&self) -> bool {
        matches!(self, LoginOutcome::MfaRequired { .. })
    }

    pub fn session(&self) -> Option<&SessionRecord> {
        match self {
            LoginOutcome::Authenticated(session) => Some(session),
            LoginOutcome::MfaRequired { .. } => None,
        }
    }
}

pub struct AuthService {
    config: AuthConfig,
    deps: AuthCollaborators,
}

impl core::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthService").field("config", &self.config).finish_non_exhaustive()
    }
}

impl AuthService {
    pub fn new(config: AuthConfig, deps: AuthCollaborators) -> Self {
        Self { config, deps }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────
    // Login
    // ─────────────────────────────────────────────────────────────────────

    #[instrument(skip(self, email, password, client), fields(ip = %client.ip_address), err)]
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<LoginOutcome, AuthError> {
        let email = normalize_email(email);
        let now = self.deps.clock.now();

        let Some(account) = self.deps.credentials.find_by_email(&email).await? else {
            debug!("login for unknown identity");
            self.audit(
                AuditEvent::new(AuditAction::LoginFailed, client, now)
                    .email(&email)
                    .detail("unknown identity"),
            )
            .await;
            return Err(AuthError::CredentialsNotFound);
        };
        let user_id = account.user_id;

        let lockout = self.deps.lockouts.load(user_id).await?;
        if let Some(until) = lockout.locked_at(now) {
            self.audit(
                AuditEvent::new(AuditAction::LoginFailed, client, now)
                    .user(user_id)
                    .email(&email)
                    .detail("account locked"),
            )
            .await;
            return Err(AuthError::AccountLocked { until });
        }

        if !account.status.can_authenticate() {
            self.audit(
                AuditEvent::new(AuditAction::LoginFailed, client, now)
                    .user(user_id)
                    .email(&email)
                    .detail(format!("account {}", account.status)),
            )
            .await;
            return Err(AuthError::AccountNotActive);
        }

        if !self.deps.hasher.verify(password, &account.password_hash) {
            let outcome = self
                .deps
                .lockouts
                .record_failure(user_id, &self.config.lockout, now)
                .await?;
            let lockout = outcome.state;

            self.audit(
                AuditEvent::new(AuditAction::LoginFailed, client, now)
                    .user(user_id)
                    .email(&email)
                    .detail(format!("bad password ({} consecutive)", lockout.failed_attempts)),
            )
            .await;
            if outcome.locked {
                warn!(%user_id, until = ?lockout.locked_until, "account locked after repeated failures");
                self.deps.permissions.invalidate_user(user_id);
                self.audit(
                    AuditEvent::new(AuditAction::AccountLocked, client, now)
                        .user(user_id)
                        .email(&email),
                )
                .await;
            }
            return Err(AuthError::InvalidCredentials);
        }

        if !lockout.is_clean() {
            self.deps.lockouts.clear(user_id).await?;
        }

        if account.mfa_enabled() {
            let token = MfaToken::generate();
            let pending =
                MfaPendingRecord::new(user_id, &account.email, client, now, self.config.mfa_token_ttl);
            self.deps.sessions.store_mfa_token(&token, &pending).await?;
            info!(%user_id, "password accepted; MFA challenge issued");
            self.audit(
                AuditEvent::new(AuditAction::MfaChallengeIssued, client, now)
                    .user(user_id)
                    .email(&account.email),
            )
            .await;
            return Ok(LoginOutcome::MfaRequired {
                mfa_token: token,
                expires_at: pending.expires_at,
            });
        }

        let session = self.open_session(&account, client, now).await?;
        self.audit(
            AuditEvent::new(AuditAction::LoginSucceeded, client, now)
                .user(user_id)
                .email(&account.email),
        )
        .await;
        Ok(LoginOutcome::Authenticated(session))
    }

    /// Finish a login with a one-time code from the user's authenticator.
    #[instrument(skip(self, token, code, client), fields(ip = %client.ip_address), err)]
    pub async fn verify_mfa(
        &self,
        token: &MfaToken,
        code: &str,
        client: &ClientInfo,
    ) -> Result<SessionRecord, AuthError> {
        let now = self.deps.clock.now();
        let (account, secret) = self.pending_account(token, now).await?;

        if !self.deps.mfa.verify(&secret, code, now) {
            self.audit(
                AuditEvent::new(AuditAction::MfaFailed, client, now)
                    .user(account.user_id)
                    .email(&account.email),
            )
            .await;
            return Err(AuthError::InvalidMfaCode);
        }

        self.consume_pending(token).await?;
        let session = self.open_session(&account, client, now).await?;
        self.audit(
            AuditEvent::new(AuditAction::MfaVerified, client, now)
                .user(account.user_id)
                .email(&account.email),
        )
        .await;
        Ok(session)
    }

    /// Finish a login with a single-use backup code instead of a TOTP code.
    #[instrument(skip(self, token, code, client), fields(ip = %client.ip_address), err)]
    pub async fn verify_backup_code(
        &self,
        token: &MfaToken,
        code: &str,
        client: &ClientInfo,
    ) -> Result<SessionRecord, AuthError> {
        let now = self.deps.clock.now();
        let (account, _) = self.pending_account(token, now).await?;

        if !self.deps.backup_codes.consume(account.user_id, code).await? {
            self.audit(
                AuditEvent::new(AuditAction::MfaFailed, client, now)
                    .user(account.user_id)
                    .email(&account.email)
                    .detail("backup code rejected"),
            )
            .await;
            return Err(AuthError::InvalidMfaCode);
        }

        self.consume_pending(token).await?;
        let session = self.open_session(&account, client, now).await?;
        self.audit(
            AuditEvent::new(AuditAction::BackupCodeUsed, client, now)
                .user(account.user_id)
                .email(&account.email),
        )
        .await;
        Ok(session)
    }

    async fn pending_account(
        &self,
        token: &MfaToken,
        now: DateTime<Utc>,
    ) -> Result<(AccountCredentials, String), AuthError> {
        let pending = match self.deps.sessions.get_mfa_token(token).await? {
            Some(p) if !p.is_expired(now) => p,
            _ => return Err(AuthError::InvalidSession),
        };
        let account = self
            .deps
            .credentials
            .find_by_user_id(pending.user_id)
            .await?
            .ok_or(AuthError::InvalidSession)?;

        if !account.status.can_authenticate() {
            return Err(AuthError::AccountNotActive);
        }
        let secret = account.mfa_secret.clone().ok_or(AuthError::MfaNotEnabled)?;
        Ok((account, secret))
    }

    // Only the caller that actually removes the token may proceed.
    async fn consume_pending(&self, token: &MfaToken) -> Result<(), AuthError> {
        if self.deps.sessions.delete_mfa_token(token).await? {
            Ok(())
        } else {
            Err(AuthError::InvalidSession)
        }
    }

    async fn open_session(
        &self,
        account: &AccountCredentials,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord, AuthError> {
        let session =
            SessionRecord::issue(account.user_id, &account.email, client, now, self.config.session_ttl);
        self.deps.sessions.create(&session).await?;
        info!(user_id = %account.user_id, expires_at = %session.expires_at, "session opened");
        Ok(session)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────

    /// Resolve a presented session id to a live session, sliding its expiry
    /// when configured.
    pub async fn authenticate(&self, session_id: &SessionId) -> Result<SessionRecord, AuthError> {
        let now = self.deps.clock.now();
        let session = match self.deps.sessions.get(session_id).await? {
            Some(s) if !s.is_expired(now) => s,
            _ => return Err(AuthError::InvalidSession),
        };

        if !self.config.sliding_sessions
            || add_std(session.last_activity_at, self.config.refresh_interval) > now
        {
            return Ok(session);
        }

        let new_expiry = add_std(now, self.config.session_ttl);
        Ok(self.deps.sessions.refresh(session_id, new_expiry).await?)
    }

    /// End one session. Unknown ids succeed.
    #[instrument(skip(self, session_id, client), err)]
    pub async fn logout(&self, session_id: &SessionId, client: &ClientInfo) -> Result<(), AuthError> {
        let existing = self.deps.sessions.get(session_id).await?;
        self.deps.sessions.delete(session_id).await?;

        if let Some(session) = existing {
            info!(user_id = %session.user_id, "session closed");
            self.audit(
                AuditEvent::new(AuditAction::Logout, client, self.deps.clock.now())
                    .user(session.user_id)
                    .email(&session.email),
            )
            .await;
        }
        Ok(())
    }

    /// End every session of a user. Returns how many were removed.
    #[instrument(skip(self, client), err)]
    pub async fn logout_all(&self, user_id: UserId, client: &ClientInfo) -> Result<usize, AuthError> {
        let removed = self.deps.sessions.delete_all_user_sessions(user_id).await?;
        info!(%user_id, removed, "all sessions closed");
        self.audit(
            AuditEvent::new(AuditAction::LogoutAll, client, self.deps.clock.now())
                .user(user_id)
                .detail(format!("{removed} sessions")),
        )
        .await;
        Ok(removed)
    }

    pub async fn user_sessions(&self, user_id: UserId) -> Result<Vec<SessionRecord>, AuthError> {
        Ok(self.deps.sessions.user_sessions(user_id).await?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Passwords
    // ─────────────────────────────────────────────────────────────────────

    /// Self-service change. `keep` is the caller's own session, spared when
    /// other sessions are revoked.
    #[instrument(skip(self, current_password, new_password, keep, client), err)]
    pub async fn change_password(
        &self,
        user_id: UserId,
        current_password: &str,
        new_password: &str,
        keep: Option<&SessionId>,
        client: &ClientInfo,
    ) -> Result<(), AuthError> {
        let account = self.account(user_id).await?;
        if !self.deps.hasher.verify(current_password, &account.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }

        self.config.password.check(new_password)?;
        self.ensure_not_reused(&account, new_password).await?;
        let hash = self.deps.hasher.hash(new_password)?;
        self.deps.credentials.update_password_hash(user_id, &hash).await?;

        if self.config.revoke_sessions_on_password_change {
            let revoked = self.revoke_other_sessions(user_id, keep).await?;
            debug!(%user_id, revoked, "other sessions revoked after password change");
        }

        self.audit(
            AuditEvent::new(AuditAction::PasswordChanged, client, self.deps.clock.now())
                .user(user_id)
                .email(&account.email),
        )
        .await;
        Ok(())
    }

    /// Administrative reset. Ends every session of the user.
    #[instrument(skip(self, new_password, client), err)]
    pub async fn set_password(
        &self,
        user_id: UserId,
        new_password: &str,
        client: &ClientInfo,
    ) -> Result<(), AuthError> {
        let account = self.account(user_id).await?;
        self.config.password.check(new_password)?;
        let hash = self.deps.hasher.hash(new_password)?;
        self.deps.credentials.update_password_hash(user_id, &hash).await?;
        let revoked = self.deps.sessions.delete_all_user_sessions(user_id).await?;

        self.audit(
            AuditEvent::new(AuditAction::PasswordSet, client, self.deps.clock.now())
                .user(user_id)
                .email(&account.email)
                .detail(format!("{revoked} sessions revoked")),
        )
        .await;
        Ok(())
    }

    async fn ensure_not_reused(&self, account: &AccountCredentials, candidate: &str) -> Result<(), AuthError> {
        if self.deps.hasher.verify(candidate, &account.password_hash) {
            return Err(AuthError::PasswordReused);
        }
        let depth = self.config.password.history_depth;
        if depth == 0 {
            return Ok(());
        }
        let history = self.deps.credentials.password_history(account.user_id, depth).await?;
        if history.iter().any(|old| self.deps.hasher.verify(candidate, old)) {
            return Err(AuthError::PasswordReused);
        }
        Ok(())
    }

    async fn revoke_other_sessions(&self, user_id: UserId, keep: Option<&SessionId>) -> Result<usize, AuthError> {
        let mut revoked = 0;
        for session in self.deps.sessions.user_sessions(user_id).await? {
            if Some(&session.session_id) == keep {
                continue;
            }
            self.deps.sessions.delete(&session.session_id).await?;
            revoked += 1;
        }
        Ok(revoked)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Account administration
    // ─────────────────────────────────────────────────────────────────────

    #[instrument(skip(self, client), err)]
    pub async fn unlock_account(&self, user_id: UserId, client: &ClientInfo) -> Result<(), AuthError> {
        let account = self.account(user_id).await?;
        self.deps.lockouts.clear(user_id).await?;
        self.deps.permissions.invalidate_user(user_id);
        info!(%user_id, "account unlocked");

        self.audit(
            AuditEvent::new(AuditAction::AccountUnlocked, client, self.deps.clock.now())
                .user(user_id)
                .email(&account.email),
        )
        .await;
        Ok(())
    }

    /// Change an account's status. Leaving `Active` ends all its sessions.
    #[instrument(skip(self, client), err)]
    pub async fn update_user_status(
        &self,
        user_id: UserId,
        status: AccountStatus,
        client: &ClientInfo,
    ) -> Result<(), AuthError> {
        let account = self.account(user_id).await?;
        self.deps.credentials.set_status(user_id, status).await?;
        self.deps.permissions.invalidate_user(user_id);

        let mut detail = format!("{} -> {}", account.status, status);
        if !status.can_authenticate() {
            let revoked = self.deps.sessions.delete_all_user_sessions(user_id).await?;
            detail.push_str(&format!(", {revoked} sessions revoked"));
        }
        info!(%user_id, %status, "account status changed");

        self.audit(
            AuditEvent::new(AuditAction::StatusChanged, client, self.deps.clock.now())
                .user(user_id)
                .email(&account.email)
                .detail(detail),
        )
        .await;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // MFA enrolment
    // ─────────────────────────────────────────────────────────────────────

    /// Enable MFA once the user proves possession of `secret` with `code`.
    #[instrument(skip(self, secret, code, client), err)]
    pub async fn enable_mfa(
        &self,
        user_id: UserId,
        secret: &str,
        code: &str,
        client: &ClientInfo,
    ) -> Result<(), AuthError> {
        let account = self.account(user_id).await?;
        if account.mfa_enabled() {
            return Err(AuthError::MfaAlreadyEnabled);
        }
        let now = self.deps.clock.now();
        if !self.deps.mfa.verify(secret, code, now) {
            return Err(AuthError::InvalidMfaCode);
        }
        self.deps.credentials.set_mfa_secret(user_id, Some(secret)).await?;

        self.audit(
            AuditEvent::new(AuditAction::MfaEnabled, client, now)
                .user(user_id)
                .email(&account.email),
        )
        .await;
        Ok(())
    }

    #[instrument(skip(self, code, client), err)]
    pub async fn disable_mfa(&self, user_id: UserId, code: &str, client: &ClientInfo) -> Result<(), AuthError> {
        let account = self.account(user_id).await?;
        let secret = account.mfa_secret.as_deref().ok_or(AuthError::MfaNotEnabled)?;
        let now = self.deps.clock.now();
        if !self.deps.mfa.verify(secret, code, now) {
            return Err(AuthError::InvalidMfaCode);
        }
        self.deps.credentials.set_mfa_secret(user_id, None).await?;

        self.audit(
            AuditEvent::new(AuditAction::MfaDisabled, client, now)
                .user(user_id)
                .email(&account.email),
        )
        .await;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────

    async fn account(&self, user_id: UserId) -> Result<AccountCredentials, AuthError> {
        self.deps
            .credentials
            .find_by_user_id(user_id)
            .await?
            .ok_or(AuthError::CredentialsNotFound)
    }

    // Audit is best-effort: a failing sink never changes the outcome.
    async fn audit(&self, event: AuditEvent) {
        let action = event.action;
        if let Err(err) = self.deps.audit.record(event).await {
            warn!(%action, error = %err, "audit record failed");
        }
    }
}
