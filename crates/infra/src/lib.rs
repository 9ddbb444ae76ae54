//! Infrastructure for the auth runtime: key-value backends, the session and
//! lockout stores built on them, in-memory collaborators and configuration.

pub mod config;
pub mod directory;
pub mod kv;
pub mod lockout_store;
pub mod session_store;


pub use config::{ConfigError, RuntimeConfig};
pub use directory::{InMemoryAuditLog, InMemoryDirectory, TracingAuditSink};
pub use kv::{InMemoryKeyValueStore, KeyValueStore, KvError};
#[cfg(feature = "redis")]
pub use kv::RedisKeyValueStore;
pub use lockout_store::KvLockoutStore;
pub use session_store::{SessionStore, SessionStoreConfig};
