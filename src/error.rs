//! Error types for the cache
//!
//! The cache synthesizes no errors for normal hit/miss flows (a miss
//! is an `Option`, not an error) and replays caller load errors
//! verbatim; only the conflict case below is its own. Configuration
//! mistakes (duplicate lookups, unknown lookup names, a TTL below the
//! sweep resolution) are programmer errors and panic at the call site
//! instead.

use thiserror::Error;

// == Cache Error Enum ==
/// Errors produced by the cache itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// An insert-only operation found one of the value's derived keys
    /// already occupied. Callers should treat this as "someone else
    /// already cached it", not as a failure.
    #[error("lookup key already occupied: {0}")]
    Conflict(String),
}

// == Result Type Alias ==
/// Convenience Result type for cache-originated errors.
pub type Result<T> = std::result::Result<T, CacheError>;
