//! Runtime configuration from `ADMINKIT_*` environment variables.
//!
//! Every variable is optional; unset ones take the defaults of the component
//! they configure.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use adminkit_auth::AuthConfig;
use adminkit_cache::CacheConfig;

use crate::session_store::SessionStoreConfig;

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}='{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub redis_url: String,
    pub session_store: SessionStoreConfig,
    pub auth: AuthConfig,
    pub permission_cache: CacheConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            session_store: SessionStoreConfig::default(),
            auth: AuthConfig::default(),
            permission_cache: CacheConfig::permissions(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let mut config = Self::default();

        match env.raw("ADMINKIT_REDIS_URL") {
            Some(url) => config.redis_url = url,
            None => warn!(default = DEFAULT_REDIS_URL, "ADMINKIT_REDIS_URL not set; using default"),
        }
        if let Some(prefix) = env.raw("ADMINKIT_KEY_PREFIX") {
            config.session_store.key_prefix = prefix;
        }

        let store = &mut config.session_store;
        env.secs("ADMINKIT_INDEX_TTL_EXTENSION_SECS", &mut store.index_ttl_extension)?;
        env.millis("ADMINKIT_STORE_TIMEOUT_MS", &mut store.op_timeout)?;

        let auth = &mut config.auth;
        env.secs("ADMINKIT_SESSION_TTL_SECS", &mut auth.session_ttl)?;
        env.secs("ADMINKIT_MFA_TOKEN_TTL_SECS", &mut auth.mfa_token_ttl)?;
        env.parse("ADMINKIT_SLIDING_SESSIONS", &mut auth.sliding_sessions)?;
        env.secs("ADMINKIT_SESSION_REFRESH_INTERVAL_SECS", &mut auth.refresh_interval)?;
        env.parse(
            "ADMINKIT_REVOKE_SESSIONS_ON_PASSWORD_CHANGE",
            &mut auth.revoke_sessions_on_password_change,
        )?;
        env.parse("ADMINKIT_LOCKOUT_MAX_ATTEMPTS", &mut auth.lockout.max_failed_attempts)?;
        env.secs("ADMINKIT_LOCKOUT_BASE_SECS", &mut auth.lockout.base_lockout)?;
        env.secs("ADMINKIT_LOCKOUT_MAX_SECS", &mut auth.lockout.max_lockout)?;
        env.parse("ADMINKIT_PASSWORD_MIN_LENGTH", &mut auth.password.min_length)?;
        env.parse("ADMINKIT_PASSWORD_HISTORY", &mut auth.password.history_depth)?;

        let cache = &mut config.permission_cache;
        env.parse("ADMINKIT_PERMISSION_CACHE_MAX_SIZE", &mut cache.max_size)?;
        env.secs("ADMINKIT_PERMISSION_CACHE_TTL_SECS", &mut cache.ttl)?;
        env.secs("ADMINKIT_PERMISSION_CACHE_CLEANUP_SECS", &mut cache.cleanup_interval)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.permission_cache
            .validate()
            .map_err(|e| invalid("ADMINKIT_PERMISSION_CACHE_*", "", e.to_string()))?;
        if self.auth.session_ttl.is_zero() {
            return Err(invalid("ADMINKIT_SESSION_TTL_SECS", "0", "must be positive"));
        }
        if self.auth.mfa_token_ttl.is_zero() {
            return Err(invalid("ADMINKIT_MFA_TOKEN_TTL_SECS", "0", "must be positive"));
        }
        if self.auth.lockout.max_failed_attempts == 0 {
            return Err(invalid("ADMINKIT_LOCKOUT_MAX_ATTEMPTS", "0", "must be positive"));
        }
        if self.auth.lockout.max_lockout < self.auth.lockout.base_lockout {
            return Err(invalid(
                "ADMINKIT_LOCKOUT_MAX_SECS",
                self.auth.lockout.max_lockout.as_secs().to_string(),
                "must not be shorter than ADMINKIT_LOCKOUT_BASE_SECS",
            ));
        }
        if self.session_store.op_timeout.is_zero() {
            return Err(invalid("ADMINKIT_STORE_TIMEOUT_MS", "0", "must be positive"));
        }
        Ok(())
    }
}

fn invalid(var: &'static str, value: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.into(),
        reason: reason.into(),
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, var: &'static str, slot: &mut T) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: core::fmt::Display,
    {
        if let Some(value) = self.raw(var) {
            *slot = value.parse().map_err(|e: T::Err| invalid(var, value.clone(), e.to_string()))?;
        }
        Ok(())
    }

    fn secs(&self, var: &'static str, slot: &mut Duration) -> Result<(), ConfigError> {
        let mut secs = slot.as_secs();
        self.parse(var, &mut secs)?;
        *slot = Duration::from_secs(secs);
        Ok(())
    }

    fn millis(&self, var: &'static str, slot: &mut Duration) -> Result<(), ConfigError> {
        let mut ms = u64::try_from(slot.as_millis()).unwrap_or(u64::MAX);
        self.parse(var, &mut ms)?;
        *slot = Duration::from_millis(ms);
        Ok(())
    }
}
