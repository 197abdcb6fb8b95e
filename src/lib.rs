//! Lookup Cache - a generic in-memory result cache
//!
//! Memoizes the outcome of fallible loads (e.g. database reads) under
//! multiple named lookup keys, with TTL expiration driven by a shared
//! background sweep task. Failed loads are cached too, so a repeated
//! miss against the backing store is as cheap as a hit.

pub mod cache;
pub mod config;
pub mod error;
pub mod mutex_map;
pub mod tasks;

pub use cache::{
    Cache, CacheBuilder, CacheStats, Entry, Key, KeyBuf, KeyPart, Lookup, TtlStore, MIN_TTL,
    SWEEP_RESOLUTION,
};
pub use config::CacheConfig;
pub use error::CacheError;
pub use mutex_map::{MutexMap, MutexMapGuard};
pub use tasks::Sweeper;
