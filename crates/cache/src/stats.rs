use serde::Serialize;

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Resident entries (expired-but-unswept entries included).
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, `0.0` before the first read.
    pub ratio: f64,
}

impl CacheStats {
    pub(crate) fn new(size: usize, hits: u64, misses: u64) -> Self {
        let total = hits + misses;
        let ratio = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        Self {
            size,
            hits,
            misses,
            ratio,
        }
    }
}
