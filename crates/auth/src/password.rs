use crate::collaborators::CollaboratorError;
use crate::error::AuthError;

/// Password hashing is external; the runtime only hashes new passwords and
/// verifies candidates.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, CollaboratorError>;
    fn verify(&self, password: &str, hash: &str) -> bool;
}

/// Strength and reuse rules for new passwords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
    pub require_letter: bool,
    pub require_digit: bool,
    /// Previous passwords a new one may not repeat (current one included
    /// separately).
    pub history_depth: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_length: 128,
            require_letter: true,
            require_digit: true,
            history_depth: 5,
        }
    }
}

impl PasswordPolicy {
    pub fn check(&self, password: &str) -> Result<(), AuthError> {
        let len = password.chars().count();
        if len < self.min_length {
            return Err(AuthError::PasswordTooWeak(format!(
                "must be at least {} characters",
                self.min_length
            )));
        }
        if len > self.max_length {
            return Err(AuthError::PasswordTooWeak(format!(
                "must be at most {} characters",
                self.max_length
            )));
        }
        if self.require_letter && !password.chars().any(char::is_alphabetic) {
            return Err(AuthError::PasswordTooWeak("must contain a letter".into()));
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(AuthError::PasswordTooWeak("must contain a digit".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy() {
        let policy = PasswordPolicy::default();
        assert!(policy.check("correct9horse").is_ok());
        assert!(matches!(policy.check("short1"), Err(AuthError::PasswordTooWeak(_))));
        assert!(matches!(policy.check("12345678"), Err(AuthError::PasswordTooWeak(_))));
        assert!(matches!(policy.check("abcdefgh"), Err(AuthError::PasswordTooWeak(_))));
        assert!(policy.check(&"a1".repeat(65)).is_err());
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let policy = PasswordPolicy {
            require_digit: false,
            ..PasswordPolicy::default()
        };
        assert!(policy.check("ééééééé").is_err());
        assert!(policy.check("éééééééé").is_ok());
    }
}
