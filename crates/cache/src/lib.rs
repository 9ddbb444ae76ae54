//! `adminkit-cache`: size-bounded, TTL-based in-memory cache.
//!
//! One engine serves every cache in the runtime (permission sets, domain
//! lookups). Entries expire lazily on read and eagerly through a background
//! sweeper owned by each cache instance.

pub mod config;
pub mod expiring;
pub mod stats;
mod sweeper;

pub use config::CacheConfig;
pub use expiring::{CacheEntry, ExpiringCache};
pub use stats::CacheStats;
