use std::borrow::{Borrow, Cow};

use serde::{Deserialize, Serialize};

use adminkit_core::{RoleId, UserId};

/// Permission code.
///
/// Permissions are opaque strings (e.g. `"user.read"`). Matching is exact:
/// there is no wildcard or hierarchy at this layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(code: impl Into<Cow<'static, str>>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

// Lets `HashSet<Permission>` answer lookups by `&str`.
impl Borrow<str> for Permission {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for Permission {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

impl From<&'static str> for Permission {
    fn from(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Change notifications
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// A committed write that can change some user's effective permissions.
///
/// Write paths hand one of these to the permission cache before acknowledging
/// the write. `members: None` means the affected users are unknown, which
/// widens the invalidation to every cached user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionChange {
    Role {
        role_id: RoleId,
        kind: ChangeKind,
        members: Option<Vec<UserId>>,
    },
    RolePermissionsReplaced {
        role_id: RoleId,
        members: Option<Vec<UserId>>,
    },
    Permission {
        code: String,
        kind: ChangeKind,
    },
    UserRoles {
        user_id: UserId,
    },
    UserStatus {
        user_id: UserId,
    },
    UserLock {
        user_id: UserId,
    },
}

/// Which cached users a change touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationScope<'a> {
    User(UserId),
    Users(&'a [UserId]),
    All,
}

impl PermissionChange {
    pub fn scope(&self) -> InvalidationScope<'_> {
        match self {
            PermissionChange::Role { members, .. }
            | PermissionChange::RolePermissionsReplaced { members, .. } => match members {
                Some(users) => InvalidationScope::Users(users),
                None => InvalidationScope::All,
            },
            // Definitions are shared by every role that references them.
            PermissionChange::Permission { .. } => InvalidationScope::All,
            PermissionChange::UserRoles { user_id }
            | PermissionChange::UserStatus { user_id }
            | PermissionChange::UserLock { user_id } => InvalidationScope::User(*user_id),
        }
    }
}
