//! Cache Entry Module
//!
//! Defines the structure for individual TTL store entries.

use std::time::{Duration, Instant};

// == Entry ==
/// A single stored value together with its current expiry deadline.
///
/// `expires_at == None` means the entry never expires (TTL disabled).
#[derive(Debug, Clone)]
pub struct Entry<V> {
    /// The stored value
    pub value: V,
    /// Expiration deadline, None = no expiration
    pub expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    // == Constructor ==
    /// Creates a new entry expiring `ttl` from `now`.
    ///
    /// A zero `ttl` produces an entry that never expires.
    pub fn new(value: V, now: Instant, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: deadline(now, ttl),
        }
    }

    // == Is Expired ==
    /// Checks whether the entry has expired as of `now`.
    ///
    /// The boundary is inclusive: once `now` reaches the deadline the
    /// entry counts as expired.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    // == Refresh ==
    /// Extends the entry's lifetime to `now + ttl`.
    ///
    /// Called on every read and overwrite ("keep alive on access").
    /// A zero `ttl` clears the deadline entirely.
    pub fn refresh(&mut self, now: Instant, ttl: Duration) {
        self.expires_at = deadline(now, ttl);
    }

    // == Remaining ==
    /// Returns the remaining lifetime, or None if the entry never expires.
    ///
    /// Expired entries report a remaining lifetime of zero.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at
            .map(|deadline| deadline.saturating_duration_since(now))
    }
}

/// Computes the expiry deadline for a TTL, treating zero as "never".
fn deadline(now: Instant, ttl: Duration) -> Option<Instant> {
    if ttl.is_zero() {
        None
    } else {
        Some(now + ttl)
    }
}
