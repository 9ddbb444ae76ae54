//! Failed-login counting and temporary account lockout.
//!
//! State lives in a shared store so every instance sees the same counters.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use adminkit_core::{UserId, add_std, remaining};

use crate::session::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Consecutive failures that trigger a lock.
    pub max_failed_attempts: u32,
    /// Length of the first lock. Each further lock doubles it.
    pub base_lockout: Duration,
    pub max_lockout: Duration,
    /// How long an idle failure counter is remembered.
    pub counter_ttl: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            base_lockout: Duration::from_secs(15 * 60),
            max_lockout: Duration::from_secs(24 * 60 * 60),
            counter_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl LockoutPolicy {
    /// Lock length for the `previous_locks + 1`-th lock.
    pub fn lock_duration(&self, previous_locks: u32) -> Duration {
        let factor = 2u32.checked_pow(previous_locks).unwrap_or(u32::MAX);
        self.base_lockout
            .checked_mul(factor)
            .unwrap_or(self.max_lockout)
            .min(self.max_lockout)
    }

    /// Record one failed attempt at `now`. Returns `true` when this failure
    /// locked the account.
    pub fn register_failure(&self, state: &mut LockoutState, now: DateTime<Utc>) -> bool {
        if state.locked_until.is_some_and(|until| until <= now) {
            state.locked_until = None;
            state.failed_attempts = 0;
        }

        state.failed_attempts = state.failed_attempts.saturating_add(1);
        state.last_failed_at = Some(now);

        if state.failed_attempts >= self.max_failed_attempts.max(1) && state.locked_until.is_none() {
            state.locked_until = Some(add_std(now, self.lock_duration(state.lockout_count)));
            state.lockout_count = state.lockout_count.saturating_add(1);
            return true;
        }
        false
    }

    /// Store TTL for `state`: the counter window, stretched to cover an
    /// active lock.
    pub fn retention(&self, state: &LockoutState, now: DateTime<Utc>) -> Duration {
        let lock_left = state
            .locked_until
            .and_then(|until| remaining(until, now))
            .unwrap_or(Duration::ZERO);
        self.counter_ttl.max(lock_left)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutState {
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    /// Locks applied since the last successful login; drives the backoff.
    pub lockout_count: u32,
    pub last_failed_at: Option<DateTime<Utc>>,
}

/// One recorded failure and where it left the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureOutcome {
    pub state: LockoutState,
    /// This failure is the one that locked the account.
    pub locked: bool,
}

impl LockoutState {
    /// The lock end, if a lock is active at `now`.
    pub fn locked_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.locked_until.filter(|until| *until > now)
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_at(now).is_some()
    }

    /// Nothing worth storing.
    pub fn is_clean(&self) -> bool {
        self.failed_attempts == 0 && self.locked_until.is_none() && self.lockout_count == 0
    }
}

#[async_trait]
pub trait LockoutStore: Send + Sync {
    /// Current state; a user with no record gets the default (clean) state.
    async fn load(&self, user_id: UserId) -> Result<LockoutState, StoreError>;

    /// Count one failed attempt and apply `policy`. The count is atomic in
    /// the store, so concurrent failures for one user are each counted.
    async fn record_failure(
        &self,
        user_id: UserId,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, StoreError>;

    async fn clear(&self, user_id: UserId) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap()
    }

    #[test]
    fn fifth_failure_locks_for_base_duration() {
        let policy = LockoutPolicy::default();
        let mut state = LockoutState::default();

        for _ in 0..4 {
            assert!(!policy.register_failure(&mut state, t0()));
        }
        assert!(!state.is_locked(t0()));

        assert!(policy.register_failure(&mut state, t0()));
        assert_eq!(state.locked_until, Some(t0() + chrono::Duration::minutes(15)));
        assert!(state.is_locked(t0() + chrono::Duration::minutes(14)));
        assert!(!state.is_locked(t0() + chrono::Duration::minutes(15)));
    }

    #[test]
    fn failures_during_a_lock_do_not_extend_it() {
        let policy = LockoutPolicy::default();
        let mut state = LockoutState::default();
        for _ in 0..5 {
            policy.register_failure(&mut state, t0());
        }
        let until = state.locked_until;

        assert!(!policy.register_failure(&mut state, t0() + chrono::Duration::minutes(1)));
        assert_eq!(state.locked_until, until);
        assert_eq!(state.lockout_count, 1);
    }

    #[test]
    fn repeated_locks_back_off_exponentially_up_to_cap() {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.lock_duration(0), Duration::from_secs(15 * 60));
        assert_eq!(policy.lock_duration(1), Duration::from_secs(30 * 60));
        assert_eq!(policy.lock_duration(2), Duration::from_secs(60 * 60));
        assert_eq!(policy.lock_duration(10), policy.max_lockout);
        assert_eq!(policy.lock_duration(u32::MAX), policy.max_lockout);

        let mut state = LockoutState::default();
        let mut now = t0();
        for _ in 0..5 {
            policy.register_failure(&mut state, now);
        }
        now += chrono::Duration::minutes(16);
        for _ in 0..5 {
            policy.register_failure(&mut state, now);
        }
        assert_eq!(state.lockout_count, 2);
        assert_eq!(state.locked_until, Some(now + chrono::Duration::minutes(30)));
    }

    #[test]
    fn retention_covers_active_lock() {
        let policy = LockoutPolicy {
            max_lockout: Duration::from_secs(48 * 3600),
            base_lockout: Duration::from_secs(36 * 3600),
            ..LockoutPolicy::default()
        };
        let mut state = LockoutState::default();
        assert_eq!(policy.retention(&state, t0()), policy.counter_ttl);

        for _ in 0..5 {
            policy.register_failure(&mut state, t0());
        }
        assert_eq!(policy.retention(&state, t0()), Duration::from_secs(36 * 3600));
    }

    #[test]
    fn clean_state() {
        assert!(LockoutState::default().is_clean());
        let mut state = LockoutState::default();
        LockoutPolicy::default().register_failure(&mut state, t0());
        assert!(!state.is_clean());
    }
}
