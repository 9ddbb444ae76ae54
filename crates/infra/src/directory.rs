//! In-memory user directory and audit sinks for tests/dev.
//!
//! The directory plays every read-side collaborator of the auth runtime:
//! credentials, backup codes and the role → permission model behind
//! [`PermissionLookup`]. Mutators that change effective permissions return
//! the [`PermissionChange`] the caller must hand to the permission cache.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::info;

use adminkit_auth::{
    AccountCredentials, AccountStatus, AuditEvent, AuditSink, BackupCodeStore, ChangeKind,
    CollaboratorError, CredentialStore, PermissionChange, PermissionLookup, normalize_email,
};
use adminkit_core::{RoleId, UserId};

const DIRECTORY: &str = "directory";

#[derive(Debug, Default)]
struct DirectoryState {
    accounts: HashMap<UserId, AccountCredentials>,
    by_email: HashMap<String, UserId>,
    /// Previous password hashes, newest first.
    history: HashMap<UserId, Vec<String>>,
    backup_codes: HashMap<UserId, HashSet<String>>,
    roles: HashMap<RoleId, BTreeSet<String>>,
    memberships: HashMap<UserId, BTreeSet<RoleId>>,
}

impl DirectoryState {
    fn members_of(&self, role_id: RoleId) -> Vec<UserId> {
        let mut members: Vec<UserId> = self
            .memberships
            .iter()
            .filter(|(_, roles)| roles.contains(&role_id))
            .map(|(user, _)| *user)
            .collect();
        members.sort_unstable();
        members
    }

    fn account_mut(&mut self, user_id: UserId) -> Result<&mut AccountCredentials, CollaboratorError> {
        self.accounts
            .get_mut(&user_id)
            .ok_or_else(|| CollaboratorError::new(DIRECTORY, format!("unknown user {user_id}")))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    inner: RwLock<DirectoryState>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, DirectoryState>, CollaboratorError> {
        self.inner
            .read()
            .map_err(|_| CollaboratorError::new(DIRECTORY, "lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, DirectoryState>, CollaboratorError> {
        self.inner
            .write()
            .map_err(|_| CollaboratorError::new(DIRECTORY, "lock poisoned"))
    }

    /// Register or replace an account. The email is normalized.
    pub fn upsert_account(&self, mut account: AccountCredentials) -> Result<(), CollaboratorError> {
        account.email = normalize_email(&account.email);
        let mut state = self.write()?;
        if let Some(previous) = state.accounts.get(&account.user_id) {
            let old_email = previous.email.clone();
            state.by_email.remove(&old_email);
        }
        state.by_email.insert(account.email.clone(), account.user_id);
        state.accounts.insert(account.user_id, account);
        Ok(())
    }

    pub fn set_backup_codes<I, C>(&self, user_id: UserId, codes: I) -> Result<(), CollaboratorError>
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        let mut state = self.write()?;
        state
            .backup_codes
            .insert(user_id, codes.into_iter().map(Into::into).collect());
        Ok(())
    }

    /// Create a role or replace its permission codes.
    pub fn define_role<I, C>(&self, role_id: RoleId, codes: I) -> Result<PermissionChange, CollaboratorError>
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        let mut state = self.write()?;
        let existed = state
            .roles
            .insert(role_id, codes.into_iter().map(Into::into).collect())
            .is_some();
        let members = state.members_of(role_id);
        Ok(if existed {
            PermissionChange::RolePermissionsReplaced {
                role_id,
                members: Some(members),
            }
        } else {
            PermissionChange::Role {
                role_id,
                kind: ChangeKind::Created,
                members: Some(members),
            }
        })
    }

    pub fn delete_role(&self, role_id: RoleId) -> Result<PermissionChange, CollaboratorError> {
        let mut state = self.write()?;
        let members = state.members_of(role_id);
        state.roles.remove(&role_id);
        for roles in state.memberships.values_mut() {
            roles.remove(&role_id);
        }
        Ok(PermissionChange::Role {
            role_id,
            kind: ChangeKind::Deleted,
            members: Some(members),
        })
    }

    pub fn assign_role(&self, user_id: UserId, role_id: RoleId) -> Result<PermissionChange, CollaboratorError> {
        let mut state = self.write()?;
        if !state.roles.contains_key(&role_id) {
            return Err(CollaboratorError::new(DIRECTORY, format!("unknown role {role_id}")));
        }
        state.memberships.entry(user_id).or_default().insert(role_id);
        Ok(PermissionChange::UserRoles { user_id })
    }

    pub fn revoke_role(&self, user_id: UserId, role_id: RoleId) -> Result<PermissionChange, CollaboratorError> {
        let mut state = self.write()?;
        if let Some(roles) = state.memberships.get_mut(&user_id) {
            roles.remove(&role_id);
        }
        Ok(PermissionChange::UserRoles { user_id })
    }

    pub fn account(&self, user_id: UserId) -> Option<AccountCredentials> {
        self.read().ok()?.accounts.get(&user_id).cloned()
    }
}

#[async_trait]
impl CredentialStore for InMemoryDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<AccountCredentials>, CollaboratorError> {
        let state = self.read()?;
        Ok(state
            .by_email
            .get(&normalize_email(email))
            .and_then(|id| state.accounts.get(id))
            .cloned())
    }

    async fn find_by_user_id(&self, user_id: UserId) -> Result<Option<AccountCredentials>, CollaboratorError> {
        Ok(self.read()?.accounts.get(&user_id).cloned())
    }

    async fn update_password_hash(&self, user_id: UserId, password_hash: &str) -> Result<(), CollaboratorError> {
        let mut state = self.write()?;
        let account = state.account_mut(user_id)?;
        let previous = std::mem::replace(&mut account.password_hash, password_hash.to_string());
        state.history.entry(user_id).or_default().insert(0, previous);
        Ok(())
    }

    async fn password_history(&self, user_id: UserId, limit: usize) -> Result<Vec<String>, CollaboratorError> {
        let state = self.read()?;
        Ok(state
            .history
            .get(&user_id)
            .map(|h| h.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn set_status(&self, user_id: UserId, status: AccountStatus) -> Result<(), CollaboratorError> {
        self.write()?.account_mut(user_id)?.status = status;
        Ok(())
    }

    async fn set_mfa_secret(&self, user_id: UserId, secret: Option<&str>) -> Result<(), CollaboratorError> {
        self.write()?.account_mut(user_id)?.mfa_secret = secret.map(str::to_string);
        Ok(())
    }
}

#[async_trait]
impl BackupCodeStore for InMemoryDirectory {
    async fn consume(&self, user_id: UserId, code: &str) -> Result<bool, CollaboratorError> {
        let mut state = self.write()?;
        Ok(state
            .backup_codes
            .get_mut(&user_id)
            .is_some_and(|codes| codes.remove(code.trim())))
    }
}

#[async_trait]
impl PermissionLookup for InMemoryDirectory {
    type Error = CollaboratorError;

    async fn user_permission_codes(&self, user_id: UserId) -> Result<Vec<String>, CollaboratorError> {
        let state = self.read()?;
        let Some(roles) = state.memberships.get(&user_id) else {
            return Ok(vec![]);
        };
        let codes: BTreeSet<&String> = roles
            .iter()
            .filter_map(|role| state.roles.get(role))
            .flatten()
            .collect();
        Ok(codes.into_iter().cloned().collect())
    }
}

/// Keeps every audit event in memory.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditLog {
    async fn record(&self, event: AuditEvent) -> Result<(), CollaboratorError> {
        self.events
            .write()
            .map_err(|_| CollaboratorError::new("audit", "lock poisoned"))?
            .push(event);
        Ok(())
    }
}

/// Emits audit events as structured `tracing` records on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), CollaboratorError> {
        info!(
            target: "audit",
            action = %event.action,
            user_id = ?event.user_id.map(|u| u.get()),
            email = event.email.as_deref().unwrap_or(""),
            ip = %event.ip_address,
            user_agent = %event.user_agent,
            occurred_at = %event.occurred_at,
            detail = event.detail.as_deref().unwrap_or(""),
            "audit"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: i64, email: &str) -> AccountCredentials {
        AccountCredentials {
            user_id: UserId::new(id),
            email: email.into(),
            password_hash: "h".into(),
            status: AccountStatus::Active,
            mfa_secret: None,
        }
    }

    #[tokio::test]
    async fn email_lookup_is_normalized() {
        let dir = InMemoryDirectory::new();
        dir.upsert_account(account(1, " Ops@Example.com")).unwrap();

        let found = dir.find_by_email("OPS@example.COM").await.unwrap().unwrap();
        assert_eq!(found.user_id, UserId::new(1));
        assert_eq!(found.email, "ops@example.com");
    }

    #[tokio::test]
    async fn password_history_is_newest_first() {
        let dir = InMemoryDirectory::new();
        dir.upsert_account(account(1, "a@x.io")).unwrap();
        dir.update_password_hash(UserId::new(1), "h2").await.unwrap();
        dir.update_password_hash(UserId::new(1), "h3").await.unwrap();

        assert_eq!(
            dir.password_history(UserId::new(1), 5).await.unwrap(),
            vec!["h2".to_string(), "h".to_string()]
        );
        assert_eq!(dir.password_history(UserId::new(1), 1).await.unwrap(), vec!["h2".to_string()]);
    }

    #[tokio::test]
    async fn permissions_union_roles_and_report_members() {
        let dir = InMemoryDirectory::new();
        let (admin, viewer) = (RoleId::new(1), RoleId::new(2));
        dir.define_role(admin, ["user.write", "user.read"]).unwrap();
        dir.define_role(viewer, ["user.read", "menu.read"]).unwrap();
        dir.assign_role(UserId::new(5), admin).unwrap();
        dir.assign_role(UserId::new(5), viewer).unwrap();

        assert_eq!(
            dir.user_permission_codes(UserId::new(5)).await.unwrap(),
            vec!["menu.read".to_string(), "user.read".to_string(), "user.write".to_string()]
        );
        assert!(dir.user_has_permission(UserId::new(5), "menu.read").await.unwrap());

        let change = dir.define_role(viewer, ["user.read"]).unwrap();
        assert_eq!(
            change,
            PermissionChange::RolePermissionsReplaced {
                role_id: viewer,
                members: Some(vec![UserId::new(5)]),
            }
        );
        assert!(dir.assign_role(UserId::new(5), RoleId::new(99)).is_err());
    }

    #[tokio::test]
    async fn backup_codes_are_single_use() {
        let dir = InMemoryDirectory::new();
        dir.set_backup_codes(UserId::new(1), ["aaaa-1111", "bbbb-2222"]).unwrap();

        assert!(dir.consume(UserId::new(1), "aaaa-1111").await.unwrap());
        assert!(!dir.consume(UserId::new(1), "aaaa-1111").await.unwrap());
        assert!(!dir.consume(UserId::new(2), "bbbb-2222").await.unwrap());
    }
}
