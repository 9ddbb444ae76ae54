//! Process-wide logging setup shared by the binaries.

/// Tracing subscriber configuration.
pub mod tracing;

pub use crate::tracing::LogFormat;

/// Initialize JSON logging filtered by `RUST_LOG` (default `info`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(LogFormat::Json);
}
