//! TTL Store Module
//!
//! Generic primary-key store with per-entry expiry, access-refreshed
//! lifetimes and batch expiry sweeps. This layer is plain data: it is
//! not internally locked, reports removals by returning the removed
//! values, and leaves index cleanup and user callbacks to the owner
//! holding the enclosing mutex.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use crate::cache::{CacheStats, Entry, MIN_TTL};

// == TTL Store ==
/// Maps primary keys to time-stamped entries.
///
/// A zero TTL disables expiry entirely: entries inserted under it are
/// never swept.
#[derive(Debug)]
pub struct TtlStore<K, V> {
    /// Key-entry storage
    entries: HashMap<K, Entry<V>>,
    /// Entry lifetime; zero = never expire
    ttl: Duration,
    /// Performance counters
    stats: CacheStats,
}

impl<K, V> TtlStore<K, V>
where
    K: Eq + Hash + Clone,
{
    // == Constructor ==
    /// Creates a store with the given initial capacity hint and TTL.
    ///
    /// # Panics
    /// Panics if `ttl` is nonzero but below [`MIN_TTL`]: such entries
    /// could expire before a sweep pass can ever observe them alive,
    /// which is a configuration defect, not a runtime condition.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        check_ttl(ttl);
        Self {
            entries: HashMap::with_capacity(capacity),
            ttl,
            stats: CacheStats::new(),
        }
    }

    // == Get ==
    /// Looks up an entry, extending its lifetime to `now + TTL`.
    ///
    /// Entries past their deadline but not yet swept are still
    /// returned; access revives them ("keep alive on access").
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let ttl = self.ttl;
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.refresh(Instant::now(), ttl);
                self.stats.record_hit();
                Some(&entry.value)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Records a miss observed by an enclosing index layer before the
    /// primary store was ever consulted.
    pub fn note_miss(&mut self) {
        self.stats.record_miss();
    }

    // == Peek ==
    /// Looks up an entry without refreshing its lifetime or touching
    /// the hit/miss counters.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Mutable no-refresh access, for in-place edits of a live entry.
    pub fn peek_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key).map(|entry| &mut entry.value)
    }

    // == Set ==
    /// Upserts an entry, (re)setting its expiry to `now + TTL`.
    ///
    /// Returns the displaced value when the key was already present so
    /// the owner can route it through its invalidation path.
    pub fn set(&mut self, key: K, value: V) -> Option<V> {
        let displaced = self
            .entries
            .insert(key, Entry::new(value, Instant::now(), self.ttl));
        if displaced.is_some() {
            self.stats.record_invalidation();
        }
        self.stats.set_total_entries(self.entries.len());
        displaced.map(|entry| entry.value)
    }

    // == Put ==
    /// Insert-only variant: a no-op returning `false` when the key is
    /// already present, so a racing insert is never clobbered.
    pub fn put(&mut self, key: K, value: V) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries
            .insert(key, Entry::new(value, Instant::now(), self.ttl));
        self.stats.set_total_entries(self.entries.len());
        true
    }

    // == Invalidate ==
    /// Removes an entry, returning its value if one was present.
    pub fn invalidate(&mut self, key: &K) -> Option<V> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.stats.record_invalidation();
        }
        self.stats.set_total_entries(self.entries.len());
        removed.map(|entry| entry.value)
    }

    // == Clear ==
    /// Removes every entry, returning them for invalidation routing.
    pub fn clear(&mut self) -> Vec<(K, V)> {
        let drained: Vec<(K, V)> = self
            .entries
            .drain()
            .map(|(key, entry)| (key, entry.value))
            .collect();
        for _ in &drained {
            self.stats.record_invalidation();
        }
        self.stats.set_total_entries(0);
        drained
    }

    // == Set TTL ==
    /// Changes the store TTL.
    ///
    /// With `update_existing`, live deadlines are shifted by the TTL
    /// delta rather than reset to `now + ttl`, preserving the relative
    /// remaining lifetime of already-aged entries. Switching to a zero
    /// TTL makes every entry immortal; switching from zero starts a
    /// fresh lifetime for all entries.
    ///
    /// # Panics
    /// Panics if `ttl` is nonzero but below [`MIN_TTL`].
    pub fn set_ttl(&mut self, ttl: Duration, update_existing: bool) {
        check_ttl(ttl);
        let old = self.ttl;
        self.ttl = ttl;

        if !update_existing || old == ttl {
            return;
        }

        let now = Instant::now();
        for entry in self.entries.values_mut() {
            entry.expires_at = match entry.expires_at {
                _ if ttl.is_zero() => None,
                None => Some(now + ttl),
                Some(deadline) => Some(shift_deadline(deadline, old, ttl, now)),
            };
        }
    }

    /// Returns the current TTL (zero = expiry disabled).
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // == Sweep ==
    /// Removes every entry whose deadline has passed `now`, returning
    /// the evicted pairs.
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<(K, V)> {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        let mut evicted = Vec::with_capacity(expired.len());
        for key in expired {
            if let Some(entry) = self.entries.remove(&key) {
                evicted.push((key, entry.value));
            }
        }

        self.stats.record_evictions(evicted.len() as u64);
        self.stats.set_total_entries(self.entries.len());
        evicted
    }

    // == Length ==
    /// Returns the current number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // == Stats ==
    /// Returns a snapshot of the performance counters.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }
}

/// Shifts a deadline by the TTL delta, saturating at `now` when the
/// shift would move it into the unrepresentable past.
fn shift_deadline(deadline: Instant, old: Duration, new: Duration, now: Instant) -> Instant {
    if new >= old {
        deadline + (new - old)
    } else {
        deadline.checked_sub(old - new).unwrap_or(now)
    }
}

/// Panics for a nonzero TTL within noise of the sweep tick resolution.
fn check_ttl(ttl: Duration) {
    assert!(
        ttl.is_zero() || ttl >= MIN_TTL,
        "nonzero TTL {:?} is below the minimum of {:?}",
        ttl,
        MIN_TTL
    );
}
