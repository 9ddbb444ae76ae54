use serde::{Deserialize, Serialize};

use adminkit_core::UserId;

/// Account status as recorded in the user directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// May authenticate.
    #[default]
    Active,
    /// Temporarily barred by an administrator.
    Suspended,
    /// Permanently barred.
    Disabled,
}

impl AccountStatus {
    pub fn can_authenticate(self) -> bool {
        matches!(self, AccountStatus::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Suspended => "suspended",
            AccountStatus::Disabled => "disabled",
        }
    }
}

impl core::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for AccountStatus {
    type Err = adminkit_core::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(AccountStatus::Active),
            "suspended" => Ok(AccountStatus::Suspended),
            "disabled" => Ok(AccountStatus::Disabled),
            other => Err(adminkit_core::DomainError::validation(format!(
                "unknown account status '{other}'"
            ))),
        }
    }
}

/// What the authentication path needs to know about an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountCredentials {
    pub user_id: UserId,
    /// Normalized (see [`normalize_email`]).
    pub email: String,
    pub password_hash: String,
    pub status: AccountStatus,
    /// Present iff MFA is enabled.
    pub mfa_secret: Option<String>,
}

impl AccountCredentials {
    pub fn mfa_enabled(&self) -> bool {
        self.mfa_secret.is_some()
    }
}

/// Canonical form used for lookups and stored records.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_active_accounts_authenticate() {
        assert!(AccountStatus::Active.can_authenticate());
        assert!(!AccountStatus::Suspended.can_authenticate());
        assert!(!AccountStatus::Disabled.can_authenticate());
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("Suspended".parse::<AccountStatus>().unwrap(), AccountStatus::Suspended);
        assert!("banned".parse::<AccountStatus>().is_err());
    }

    #[test]
    fn email_is_trimmed_and_lowercased() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }
}
