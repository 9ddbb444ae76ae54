//! `adminkit-auth`: authentication and authorization runtime.
//!
//! Login (with an optional MFA step), session issuance, lockout and the
//! permission cache that answers every authorization check. Storage and
//! credential handling are reached through traits; `adminkit-infra` provides
//! the key-value backed implementations.

pub mod account;
pub mod collaborators;
pub mod error;
pub mod lockout;
pub mod password;
pub mod permission_cache;
pub mod permissions;
pub mod service;
pub mod session;

pub use account::{AccountCredentials, AccountStatus, normalize_email};
pub use collaborators::{
    AuditAction, AuditEvent, AuditSink, BackupCodeStore, CollaboratorError, CredentialStore,
    MfaVerifier,
};
pub use error::AuthError;
pub use lockout::{FailureOutcome, LockoutPolicy, LockoutState, LockoutStore};
pub use password::{PasswordHasher, PasswordPolicy};
pub use permission_cache::{
    PermissionCache, PermissionCacheStats, PermissionInvalidation, PermissionLookup,
};
pub use permissions::{ChangeKind, InvalidationScope, Permission, PermissionChange};
pub use service::{AuthCollaborators, AuthConfig, AuthService, LoginOutcome};
pub use session::{ClientInfo, MfaPendingRecord, SessionRecord, SessionRepository, StoreError};
