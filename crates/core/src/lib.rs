//! `adminkit-core`: shared primitives for the authentication runtime.
//!
//! Identifiers, the time source and the domain error live here so every other
//! crate can depend on them without pulling in storage or async concerns.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock, add_std, remaining};
pub use error::{DomainError, DomainResult};
pub use id::{MfaToken, RoleId, SessionId, UserId};
