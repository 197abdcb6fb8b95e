//! Lookup Module
//!
//! Named secondary key spaces mapping derived keys back to primary
//! keys. Lookups are declared once at cache construction with an
//! explicit accessor closure deriving the key from a cached value's
//! fields; there is no runtime field reflection.

use std::collections::HashMap;

use crate::cache::{Key, PrimaryKey};

// == Lookup Id ==
/// Index of a registered lookup within its cache, resolved once from
/// the lookup's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct LookupId(pub(crate) usize);

// == Cached Key ==
/// Identifies which lookup and which serialized key a cached result is
/// indexed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CachedKey {
    pub(crate) lookup: LookupId,
    pub(crate) key: Key,
}

// == Lookup ==
/// Declares a named secondary key space for a cache.
///
/// The keyer derives the lookup key from a cached value; keys whose
/// parts are all zero values are skipped unless [`Lookup::allow_zero`]
/// was set, so absent/default fields never collide on one shared
/// bucket.
pub struct Lookup<V> {
    name: &'static str,
    keyer: Box<dyn Fn(&V) -> Key + Send + Sync>,
    allow_zero: bool,
}

impl<V> Lookup<V> {
    // == Constructor ==
    /// Declares a lookup deriving its key with the given accessor.
    pub fn new<F>(name: &'static str, keyer: F) -> Self
    where
        F: Fn(&V) -> Key + Send + Sync + 'static,
    {
        Self {
            name,
            keyer: Box::new(keyer),
            allow_zero: false,
        }
    }

    // == Allow Zero ==
    /// Accept and index zero-value keys for this lookup.
    pub fn allow_zero(mut self) -> Self {
        self.allow_zero = true;
        self
    }

    /// The lookup's registered name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<V> std::fmt::Debug for Lookup<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lookup")
            .field("name", &self.name)
            .field("allow_zero", &self.allow_zero)
            .finish()
    }
}

// == Lookup Set ==
/// The immutable, registration-time half of the lookup machinery:
/// descriptor storage, name resolution and key derivation.
pub(crate) struct LookupSet<V> {
    lookups: Box<[Lookup<V>]>,
    by_name: HashMap<&'static str, LookupId>,
}

impl<V> LookupSet<V> {
    // == Constructor ==
    /// Builds the set from the declared lookups.
    ///
    /// # Panics
    /// Panics when no lookups were declared or a name is declared
    /// twice; both are construction-time programmer errors.
    pub fn new(lookups: Vec<Lookup<V>>) -> Self {
        assert!(!lookups.is_empty(), "cache built with no lookups");

        let mut by_name = HashMap::with_capacity(lookups.len());
        for (i, lookup) in lookups.iter().enumerate() {
            let prev = by_name.insert(lookup.name, LookupId(i));
            assert!(
                prev.is_none(),
                "duplicate lookup registered: {}",
                lookup.name
            );
        }

        Self {
            lookups: lookups.into_boxed_slice(),
            by_name,
        }
    }

    // == Resolve ==
    /// Resolves a lookup name to its id.
    ///
    /// # Panics
    /// Panics for a name that was never registered: passing an unknown
    /// lookup is a code defect, not a recoverable miss.
    pub fn resolve(&self, name: &str) -> LookupId {
        match self.by_name.get(name) {
            Some(id) => *id,
            None => panic!("unknown lookup: {name}"),
        }
    }

    /// The registered name for an id.
    pub fn name(&self, id: LookupId) -> &'static str {
        self.lookups[id.0].name
    }

    /// Number of registered lookups.
    pub fn len(&self) -> usize {
        self.lookups.len()
    }

    // == Derive Keys ==
    /// Derives every cached key a value is indexed under, skipping
    /// zero-value keys for lookups that disallow them.
    pub fn derive_keys(&self, value: &V) -> Vec<CachedKey> {
        let mut keys = Vec::with_capacity(self.lookups.len());
        for (i, lookup) in self.lookups.iter().enumerate() {
            let key = (lookup.keyer)(value);
            if key.is_zero() && !lookup.allow_zero {
                continue;
            }
            keys.push(CachedKey {
                lookup: LookupId(i),
                key,
            });
        }
        keys
    }
}

// == Lookup Index ==
/// The mutable half: per-lookup maps from derived key to primary key.
/// Only ever touched inside the cache's critical section, together
/// with the TTL store.
#[derive(Debug)]
pub(crate) struct LookupIndex {
    maps: Box<[HashMap<Key, PrimaryKey>]>,
}

impl LookupIndex {
    /// Creates one empty map per registered lookup.
    pub fn new(lookups: usize) -> Self {
        Self {
            maps: (0..lookups).map(|_| HashMap::new()).collect(),
        }
    }

    /// Returns the primary key a cached key currently maps to.
    pub fn get(&self, lookup: LookupId, key: &Key) -> Option<PrimaryKey> {
        self.maps[lookup.0].get(key).copied()
    }

    /// Points a cached key at a primary key, returning any previous
    /// mapping it displaced.
    pub fn set(&mut self, lookup: LookupId, key: Key, pkey: PrimaryKey) -> Option<PrimaryKey> {
        self.maps[lookup.0].insert(key, pkey)
    }

    /// Removes a cached key's mapping.
    pub fn delete(&mut self, lookup: LookupId, key: &Key) -> Option<PrimaryKey> {
        self.maps[lookup.0].remove(key)
    }

    /// Removes every mapping belonging to a departing result.
    pub fn delete_all(&mut self, keys: &[CachedKey]) {
        for cached in keys {
            self.maps[cached.lookup.0].remove(&cached.key);
        }
    }

    /// Drops every mapping in every lookup.
    pub fn clear(&mut self) {
        for map in self.maps.iter_mut() {
            map.clear();
        }
    }
}
