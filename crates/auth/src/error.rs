use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::collaborators::CollaboratorError;
use crate::session::StoreError;

/// Failures surfaced by [`AuthService`](crate::AuthService).
///
/// Variants are for the server side. What a client may see is
/// [`public_message`](AuthError::public_message), which folds the credential
/// failures together so responses do not reveal whether an account exists.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account locked until {until}")]
    AccountLocked { until: DateTime<Utc> },

    #[error("account is not active")]
    AccountNotActive,

    #[error("no credentials registered for this identity")]
    CredentialsNotFound,

    #[error("invalid MFA code")]
    InvalidMfaCode,

    #[error("invalid or expired session")]
    InvalidSession,

    #[error("MFA is not enabled")]
    MfaNotEnabled,

    #[error("MFA is already enabled")]
    MfaAlreadyEnabled,

    #[error("password too weak: {0}")]
    PasswordTooWeak(String),

    #[error("password was used recently")]
    PasswordReused,

    /// A store or collaborator failed; the request outcome is unknown.
    #[error("authentication backend unavailable: {0}")]
    Unavailable(String),
}

impl AuthError {
    /// Stable machine-readable name.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::AccountLocked { .. } => "account_locked",
            AuthError::AccountNotActive => "account_not_active",
            AuthError::CredentialsNotFound => "credentials_not_found",
            AuthError::InvalidMfaCode => "invalid_mfa_code",
            AuthError::InvalidSession => "invalid_session",
            AuthError::MfaNotEnabled => "mfa_not_enabled",
            AuthError::MfaAlreadyEnabled => "mfa_already_enabled",
            AuthError::PasswordTooWeak(_) => "password_too_weak",
            AuthError::PasswordReused => "password_reused",
            AuthError::Unavailable(_) => "unavailable",
        }
    }

    pub fn public_message(&self) -> String {
        match self {
            AuthError::InvalidCredentials | AuthError::CredentialsNotFound => {
                "invalid email or password".to_string()
            }
            AuthError::AccountLocked { until } => {
                format!("account temporarily locked until {}", until.to_rfc3339())
            }
            AuthError::Unavailable(_) => "service temporarily unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::SessionExpired => AuthError::InvalidSession,
            other => AuthError::Unavailable(other.to_string()),
        }
    }
}

impl From<CollaboratorError> for AuthError {
    fn from(value: CollaboratorError) -> Self {
        AuthError::Unavailable(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_account_and_bad_password_look_the_same() {
        assert_eq!(
            AuthError::CredentialsNotFound.public_message(),
            AuthError::InvalidCredentials.public_message()
        );
        assert_ne!(AuthError::CredentialsNotFound.kind(), AuthError::InvalidCredentials.kind());
    }

    #[test]
    fn backend_details_stay_internal() {
        let err: AuthError = StoreError::Timeout {
            op: "GET",
            key: "session:abc".into(),
        }
        .into();
        assert_eq!(err.kind(), "unavailable");
        assert!(err.to_string().contains("session:abc"));
        assert!(!err.public_message().contains("session:abc"));
    }

    #[test]
    fn vanished_session_maps_to_invalid_session() {
        assert_eq!(AuthError::from(StoreError::SessionExpired), AuthError::InvalidSession);
    }
}
