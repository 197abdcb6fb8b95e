//! Configuration Module
//!
//! Cache and sweeper settings, loadable from environment variables by
//! an embedding application's composition root.

use std::env;
use std::time::Duration;

use crate::cache::SWEEP_RESOLUTION;

/// Cache configuration parameters.
///
/// All values can be set via environment variables with sensible
/// defaults.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Initial capacity hint for the primary store
    pub capacity: usize,
    /// Entry TTL; zero disables expiry
    pub ttl: Duration,
    /// Background sweep tick interval
    pub sweep_interval: Duration,
}

impl CacheConfig {
    /// Creates a CacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `LOOKUP_CACHE_CAPACITY` - initial capacity hint (default: 1000)
    /// - `LOOKUP_CACHE_TTL_SECS` - entry TTL in seconds, 0 = never
    ///   expire (default: 300)
    /// - `LOOKUP_CACHE_SWEEP_INTERVAL_MS` - sweep tick in milliseconds
    ///   (default: 100)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            capacity: env::var("LOOKUP_CACHE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.capacity),
            ttl: env::var("LOOKUP_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.ttl),
            sweep_interval: env::var("LOOKUP_CACHE_SWEEP_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.sweep_interval),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl: Duration::from_secs(300),
            sweep_interval: SWEEP_RESOLUTION,
        }
    }
}
