//! Result Cache Module
//!
//! The public cache façade: memoizes the outcome of fallible loads
//! (value or error) under every lookup key derivable from the value,
//! coordinating the TTL store and the lookup index under one mutex.
//!
//! A load that fails is cached only under the single key it was
//! queried by, so repeated failing lookups are also served from cache
//! without a failure ever becoming reachable under keys it was never
//! asked for.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use crate::cache::{
    CacheStats, CachedKey, Key, KeyPart, Lookup, LookupId, LookupIndex, LookupSet, PrimaryKey,
    TtlStore,
};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::mutex_map::MutexMap;
use crate::tasks::SweepTarget;

type CopyFn<V> = Arc<dyn Fn(&V) -> V + Send + Sync>;
type HookFn<V> = Box<dyn Fn(&V) + Send + Sync>;
type IgnoreFn<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;

// == Cached Result ==
/// A memoized load outcome together with every lookup key it is
/// reachable by.
struct CachedResult<V, E> {
    outcome: Result<V, E>,
    keys: Vec<CachedKey>,
}

/// Key for the per-load serialization lock.
#[derive(Clone, PartialEq, Eq, Hash)]
struct LoadKey {
    lookup: LookupId,
    key: Key,
}

// == Cache ==
/// Generic result cache.
///
/// `V` is the cached value type, `E` the caller's load error type.
/// Cached errors are replayed to later callers by [`Clone`]; cached
/// values are passed through the caller-supplied copy function on
/// every write-in and read-out so no caller ever holds a reference
/// into the cache's own storage.
///
/// Cloning the handle is cheap and shares the underlying cache.
pub struct Cache<V, E> {
    shared: Arc<Shared<V, E>>,
}

pub(crate) struct Shared<V, E> {
    lookups: LookupSet<V>,
    copy: CopyFn<V>,
    on_evict: Option<HookFn<V>>,
    on_invalidate: Option<HookFn<V>>,
    ignore: Option<IgnoreFn<E>>,
    loading: MutexMap<LoadKey>,
    inner: Mutex<Inner<V, E>>,
}

/// Store and index live behind one mutex and only ever mutate
/// together: no thread can observe a result without its lookup keys or
/// a lookup key without its result.
struct Inner<V, E> {
    store: TtlStore<PrimaryKey, CachedResult<V, E>>,
    index: LookupIndex,
    next_key: PrimaryKey,
}

impl<V, E> Clone for Cache<V, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V, E> Cache<V, E> {
    /// Starts building a cache.
    pub fn builder() -> CacheBuilder<V, E> {
        CacheBuilder::new()
    }

    // == Load ==
    /// Resolves a value by lookup name and key parts, calling
    /// `load_fn` on a miss and memoizing its outcome (value or error).
    ///
    /// Concurrent loads of the same key are serialized through a keyed
    /// lock so `load_fn` runs once per genuine miss; the load itself
    /// executes outside the cache's critical section.
    ///
    /// # Panics
    /// Panics if `lookup` was never registered.
    pub fn load<F>(&self, lookup: &str, load_fn: F, key_parts: &[&dyn KeyPart]) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
        E: Clone,
    {
        let id = self.shared.lookups.resolve(lookup);
        let key = Key::from_parts(key_parts);

        // Fast path: already cached.
        {
            let mut inner = self.shared.inner.lock();
            if let Some(outcome) = self.shared.lookup_result(&mut inner, id, &key) {
                return outcome;
            }
        }

        // Serialize loads of this exact key. Whoever wins runs the
        // load; the rest block here and then hit the re-check below.
        let _load_guard = self.shared.loading.lock(LoadKey {
            lookup: id,
            key: key.clone(),
        });

        {
            let mut inner = self.shared.inner.lock();
            if let Some(outcome) = self.shared.lookup_result(&mut inner, id, &key) {
                return outcome;
            }
        }

        match load_fn() {
            Ok(value) => {
                let keys = self.shared.lookups.derive_keys(&value);
                let copied = (self.shared.copy)(&value);
                let result = CachedResult {
                    outcome: Ok(value),
                    keys,
                };
                let mut inner = self.shared.inner.lock();
                self.shared.store_result(&mut inner, result);
                Ok(copied)
            }
            Err(err) => {
                if let Some(ignore) = &self.shared.ignore {
                    if ignore(&err) {
                        // Not a cacheable error type.
                        return Err(err);
                    }
                }
                // A failure is indexed only under the queried key.
                let result = CachedResult {
                    outcome: Err(err.clone()),
                    keys: vec![CachedKey { lookup: id, key }],
                };
                let mut inner = self.shared.inner.lock();
                self.shared.store_result(&mut inner, result);
                Err(err)
            }
        }
    }

    // == Store ==
    /// Runs `store_fn` (e.g. a database insert) and, only on success,
    /// caches `value` as a fresh positive result under all its derived
    /// keys, then notifies the invalidate callback with it.
    pub fn store<F>(&self, value: V, store_fn: F) -> Result<(), E>
    where
        F: FnOnce() -> Result<(), E>,
    {
        store_fn()?;

        let keys = self.shared.lookups.derive_keys(&value);
        let result = CachedResult {
            outcome: Ok((self.shared.copy)(&value)),
            keys,
        };
        {
            let mut inner = self.shared.inner.lock();
            self.shared.store_result(&mut inner, result);
        }

        // Notify downstream caches of the written value.
        if let Some(hook) = &self.shared.on_invalidate {
            hook(&value);
        }
        Ok(())
    }

    // == Put ==
    /// Insert-only caching of a value.
    ///
    /// Fails with [`CacheError::Conflict`] when any derived key is
    /// already occupied, which callers should read as "someone else
    /// already cached it".
    pub fn put(&self, value: V) -> Result<(), CacheError> {
        let keys = self.shared.lookups.derive_keys(&value);
        let mut inner = self.shared.inner.lock();

        for cached in &keys {
            if inner.index.get(cached.lookup, &cached.key).is_some() {
                return Err(CacheError::Conflict(
                    self.shared.lookups.name(cached.lookup).to_string(),
                ));
            }
        }

        let pkey = next_primary_key(&mut inner);
        for cached in &keys {
            inner.index.set(cached.lookup, cached.key.clone(), pkey);
        }
        inner.store.put(
            pkey,
            CachedResult {
                outcome: Ok((self.shared.copy)(&value)),
                keys,
            },
        );
        Ok(())
    }

    // == Get ==
    /// Returns a copy of the cached positive value under the given
    /// lookup key, refreshing its lifetime. Cached errors read as a
    /// miss.
    pub fn get(&self, lookup: &str, key_parts: &[&dyn KeyPart]) -> Option<V> {
        let id = self.shared.lookups.resolve(lookup);
        let key = Key::from_parts(key_parts);

        let mut inner = self.shared.inner.lock();
        let Some(pkey) = inner.index.get(id, &key) else {
            inner.store.note_miss();
            return None;
        };
        let result = inner.store.get(&pkey)?;
        match &result.outcome {
            Ok(value) => Some((self.shared.copy)(value)),
            Err(_) => None,
        }
    }

    // == Has ==
    /// True only when a *positive* (non-error) result is cached under
    /// the given lookup key. Does not refresh the entry's lifetime.
    pub fn has(&self, lookup: &str, key_parts: &[&dyn KeyPart]) -> bool {
        let id = self.shared.lookups.resolve(lookup);
        let key = Key::from_parts(key_parts);

        let inner = self.shared.inner.lock();
        let Some(pkey) = inner.index.get(id, &key) else {
            return false;
        };
        matches!(
            inner.store.peek(&pkey),
            Some(CachedResult {
                outcome: Ok(_),
                ..
            })
        )
    }

    // == Invalidate ==
    /// Removes the result reachable under the given lookup key,
    /// detaching it from every other lookup it was registered under.
    /// Returns whether anything was removed.
    pub fn invalidate(&self, lookup: &str, key_parts: &[&dyn KeyPart]) -> bool {
        let id = self.shared.lookups.resolve(lookup);
        let key = Key::from_parts(key_parts);

        let mut inner = self.shared.inner.lock();
        self.shared.invalidate_key(&mut inner, id, &key)
    }

    /// Batch variant of [`Cache::invalidate`] over pre-built keys.
    /// Returns the number of results removed.
    pub fn invalidate_all(&self, lookup: &str, keys: &[Key]) -> usize {
        let id = self.shared.lookups.resolve(lookup);

        let mut inner = self.shared.inner.lock();
        keys.iter()
            .filter(|key| self.shared.invalidate_key(&mut inner, id, key))
            .count()
    }

    // == Clear ==
    /// Drops every cached result, notifying the invalidate callback
    /// for each positive one.
    pub fn clear(&self) {
        let mut inner = self.shared.inner.lock();
        let drained = inner.store.clear();
        inner.index.clear();
        for (_, result) in &drained {
            self.shared.fire_invalidate(result);
        }
    }

    // == Set TTL ==
    /// Changes the cache TTL; see [`TtlStore::set_ttl`] for the
    /// delta-shift semantics of `update_existing`.
    pub fn set_ttl(&self, ttl: Duration, update_existing: bool) {
        let mut inner = self.shared.inner.lock();
        inner.store.set_ttl(ttl, update_existing);
    }

    /// Number of live cached results (positive and negative).
    pub fn len(&self) -> usize {
        self.shared.inner.lock().store.len()
    }

    /// Returns true when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the cache's performance counters.
    pub fn stats(&self) -> CacheStats {
        self.shared.inner.lock().store.stats()
    }

    /// Type-erased weak handle for sweeper registration.
    pub(crate) fn sweep_handle(&self) -> Weak<dyn SweepTarget>
    where
        V: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        let target = Arc::clone(&self.shared) as Arc<dyn SweepTarget>;
        Arc::downgrade(&target)
    }
}

impl<V, E> Shared<V, E> {
    /// Fetches and unwraps the cached outcome for a lookup key,
    /// refreshing the entry's lifetime on hit.
    fn lookup_result(
        &self,
        inner: &mut Inner<V, E>,
        id: LookupId,
        key: &Key,
    ) -> Option<Result<V, E>>
    where
        E: Clone,
    {
        let Some(pkey) = inner.index.get(id, key) else {
            inner.store.note_miss();
            return None;
        };
        let result = inner.store.get(&pkey)?;
        Some(match &result.outcome {
            Ok(value) => Ok((self.copy)(value)),
            Err(err) => Err(err.clone()),
        })
    }

    /// Inserts a result under a fresh primary key, resolving key
    /// conflicts with pre-existing results first.
    ///
    /// A pre-existing result that overlaps any of the new keys is
    /// stale and is dropped outright, all of its keys included: were
    /// it left reachable under its non-overlapping keys, two live
    /// representations of the same entity could be served at once.
    /// Dropped results go through the evict callback.
    fn store_result(&self, inner: &mut Inner<V, E>, result: CachedResult<V, E>) {
        let pkey = next_primary_key(inner);

        let mut dropped = 0usize;
        for cached in &result.keys {
            if let Some(old_pkey) = inner.index.get(cached.lookup, &cached.key) {
                if let Some(old) = inner.store.invalidate(&old_pkey) {
                    inner.index.delete_all(&old.keys);
                    self.fire_evict(&old);
                    dropped += 1;
                }
            }
            inner.index.set(cached.lookup, cached.key.clone(), pkey);
        }

        if dropped > 0 {
            trace!(dropped, "stored result dropped overlapping stale results");
        }

        // The primary key is fresh, so this can never displace.
        inner.store.put(pkey, result);
    }

    /// Removes the result mapped under one lookup key, unhooking all
    /// of its other keys in the same critical section.
    fn invalidate_key(&self, inner: &mut Inner<V, E>, id: LookupId, key: &Key) -> bool {
        let Some(pkey) = inner.index.delete(id, key) else {
            return false;
        };
        match inner.store.invalidate(&pkey) {
            Some(result) => {
                inner.index.delete_all(&result.keys);
                self.fire_invalidate(&result);
                true
            }
            None => false,
        }
    }

    fn fire_evict(&self, result: &CachedResult<V, E>) {
        if let (Some(hook), Ok(value)) = (&self.on_evict, &result.outcome) {
            hook(value);
        }
    }

    fn fire_invalidate(&self, result: &CachedResult<V, E>) {
        if let (Some(hook), Ok(value)) = (&self.on_invalidate, &result.outcome) {
            hook(value);
        }
    }
}

/// Allocates the next monotonic primary key.
///
/// # Panics
/// Panics on counter wrap-around; at any realistic insertion rate this
/// is unreachable within a process lifetime.
fn next_primary_key<V, E>(inner: &mut Inner<V, E>) -> PrimaryKey {
    let pkey = inner.next_key;
    inner.next_key = inner
        .next_key
        .checked_add(1)
        .expect("primary key space exhausted");
    pkey
}

impl<V, E> SweepTarget for Shared<V, E>
where
    V: Send + Sync,
    E: Send + Sync,
{
    fn sweep(&self, force: bool) -> Option<usize> {
        let mut inner = if force {
            self.inner.lock()
        } else {
            self.inner.try_lock()?
        };

        let evicted = inner.store.sweep_expired(Instant::now());
        for (_, result) in &evicted {
            inner.index.delete_all(&result.keys);
            self.fire_evict(result);
        }
        Some(evicted.len())
    }
}

// == Builder ==
/// Configures and constructs a [`Cache`].
///
/// Lookups can only be declared here: once `build` has run the set is
/// immutable for the cache's lifetime.
pub struct CacheBuilder<V, E> {
    lookups: Vec<Lookup<V>>,
    copy: Option<CopyFn<V>>,
    capacity: usize,
    ttl: Duration,
    on_evict: Option<HookFn<V>>,
    on_invalidate: Option<HookFn<V>>,
    ignore: Option<IgnoreFn<E>>,
}

impl<V, E> CacheBuilder<V, E> {
    /// Creates a builder with the default capacity and TTL.
    pub fn new() -> Self {
        let defaults = CacheConfig::default();
        Self {
            lookups: Vec::new(),
            copy: None,
            capacity: defaults.capacity,
            ttl: defaults.ttl,
            on_evict: None,
            on_invalidate: None,
            ignore: None,
        }
    }

    /// Declares a named lookup.
    pub fn with_lookup(mut self, lookup: Lookup<V>) -> Self {
        self.lookups.push(lookup);
        self
    }

    /// Sets the value copy function, applied on every write-in and
    /// read-out.
    pub fn with_copy<F>(mut self, copy: F) -> Self
    where
        F: Fn(&V) -> V + Send + Sync + 'static,
    {
        self.copy = Some(Arc::new(copy));
        self
    }

    /// Sets the initial capacity hint for the primary store.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the entry TTL. Zero disables expiry.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Applies capacity and TTL from a [`CacheConfig`].
    pub fn with_config(mut self, config: &CacheConfig) -> Self {
        self.capacity = config.capacity;
        self.ttl = config.ttl;
        self
    }

    /// Callback invoked (inside the cache lock) with each positive
    /// value evicted by the TTL sweep or displaced by key conflicts.
    /// Must not call back into the cache.
    pub fn on_evict<F>(mut self, hook: F) -> Self
    where
        F: Fn(&V) + Send + Sync + 'static,
    {
        self.on_evict = Some(Box::new(hook));
        self
    }

    /// Callback invoked with each positive value removed by explicit
    /// invalidation or clear, and with values written through
    /// [`Cache::store`]. Must not call back into the cache.
    pub fn on_invalidate<F>(mut self, hook: F) -> Self
    where
        F: Fn(&V) + Send + Sync + 'static,
    {
        self.on_invalidate = Some(Box::new(hook));
        self
    }

    /// Predicate selecting load errors that should be returned but
    /// never cached (e.g. cancellations). By default every error is
    /// cached.
    pub fn ignore_errors<F>(mut self, ignore: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.ignore = Some(Box::new(ignore));
        self
    }

    // == Build ==
    /// Constructs the cache.
    ///
    /// # Panics
    /// Panics when no copy function was supplied, no lookup was
    /// declared, a lookup name was declared twice, or the TTL is
    /// nonzero but below the sweep resolution. All of these are
    /// construction-time programmer errors.
    pub fn build(self) -> Cache<V, E> {
        let copy = self.copy.expect("cache built without a copy function");
        let lookups = LookupSet::new(self.lookups);
        let index = LookupIndex::new(lookups.len());

        Cache {
            shared: Arc::new(Shared {
                lookups,
                copy,
                on_evict: self.on_evict,
                on_invalidate: self.on_invalidate,
                ignore: self.ignore,
                loading: MutexMap::new(),
                inner: Mutex::new(Inner {
                    store: TtlStore::new(self.capacity, self.ttl),
                    index,
                    next_key: 0,
                }),
            }),
        }
    }
}

impl<V, E> Default for CacheBuilder<V, E> {
    fn default() -> Self {
        Self::new()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct User {
        id: u64,
        name: String,
    }

    impl User {
        fn new(id: u64, name: &str) -> Self {
            Self {
                id,
                name: name.to_string(),
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum DbError {
        NotFound,
        Timeout,
    }

    fn user_cache() -> Cache<User, DbError> {
        Cache::builder()
            .with_lookup(Lookup::new("by_id", |u: &User| Key::from_parts(&[&u.id])))
            .with_lookup(Lookup::new("by_name", |u: &User| {
                Key::from_parts(&[&u.name])
            }))
            .with_copy(User::clone)
            .with_capacity(16)
            .with_ttl(Duration::from_secs(300))
            .build()
    }

    #[test]
    fn test_load_miss_then_hit() {
        let cache = user_cache();
        let calls = AtomicUsize::new(0);

        let load = |calls: &AtomicUsize| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(User::new(1, "alice"))
        };

        let first = cache.load("by_id", || load(&calls), &[&1u64]).unwrap();
        let second = cache.load("by_id", || load(&calls), &[&1u64]).unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "load ran once");
    }

    #[test]
    fn test_load_indexes_under_all_derived_keys() {
        let cache = user_cache();
        cache
            .load("by_id", || Ok(User::new(1, "alice")), &[&1u64])
            .unwrap();

        // Reachable by the other lookup without a second load.
        let by_name = cache
            .load(
                "by_name",
                || Err::<User, _>(DbError::NotFound),
                &[&"alice"],
            )
            .unwrap();
        assert_eq!(by_name, User::new(1, "alice"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_negative_result_cached_under_queried_key_only() {
        let cache = user_cache();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let err = cache
                .load(
                    "by_id",
                    || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<User, _>(DbError::NotFound)
                    },
                    &[&404u64],
                )
                .unwrap_err();
            assert_eq!(err, DbError::NotFound);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "failure was memoized");

        // The failure is not reachable by any other lookup.
        assert!(!cache.has("by_id", &[&404u64]), "negative result is not positive");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_ignored_errors_are_not_cached() {
        let cache: Cache<User, DbError> = Cache::builder()
            .with_lookup(Lookup::new("by_id", |u: &User| Key::from_parts(&[&u.id])))
            .with_copy(User::clone)
            .ignore_errors(|err: &DbError| matches!(err, DbError::Timeout))
            .build();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let err = cache
                .load(
                    "by_id",
                    || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<User, _>(DbError::Timeout)
                    },
                    &[&1u64],
                )
                .unwrap_err();
            assert_eq!(err, DbError::Timeout);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2, "timeout never memoized");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_store_warms_all_lookups() {
        let cache = user_cache();
        cache.store(User::new(1, "alice"), || Ok(())).unwrap();

        assert!(cache.has("by_id", &[&1u64]));
        assert!(cache.has("by_name", &[&"alice"]));
    }

    #[test]
    fn test_store_failure_caches_nothing() {
        let cache = user_cache();
        let err = cache
            .store(User::new(1, "alice"), || Err(DbError::Timeout))
            .unwrap_err();
        assert_eq!(err, DbError::Timeout);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_conflicting_store_replaces_and_cleans_up() {
        // Renaming a user: id key overlaps, old name key must die with
        // the old result.
        let cache = user_cache();
        cache.store(User::new(1, "a"), || Ok(())).unwrap();
        cache.store(User::new(1, "b"), || Ok(())).unwrap();

        assert_eq!(cache.len(), 1, "old result fully dropped");
        assert!(!cache.has("by_name", &[&"a"]));
        assert_eq!(cache.get("by_name", &[&"b"]).unwrap(), User::new(1, "b"));
        assert_eq!(cache.get("by_id", &[&1u64]).unwrap(), User::new(1, "b"));
    }

    #[test]
    fn test_partial_conflict_drops_stale_result_entirely() {
        // Only the name key overlaps, but the displaced result must go
        // dark under all of its keys, not just the overlapping one.
        let cache = user_cache();
        cache.store(User::new(1, "shared"), || Ok(())).unwrap();
        cache.store(User::new(2, "shared"), || Ok(())).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get("by_name", &[&"shared"]).unwrap(),
            User::new(2, "shared")
        );
        assert!(!cache.has("by_id", &[&1u64]));
        assert!(cache.has("by_id", &[&2u64]));
    }

    #[test]
    fn test_put_conflict() {
        let cache = user_cache();
        cache.put(User::new(1, "alice")).unwrap();

        let err = cache.put(User::new(1, "bob")).unwrap_err();
        assert!(matches!(err, CacheError::Conflict(_)));

        // Nothing was clobbered.
        assert_eq!(
            cache.get("by_id", &[&1u64]).unwrap(),
            User::new(1, "alice")
        );
    }

    #[test]
    fn test_invalidate_unhooks_every_lookup() {
        let cache = user_cache();
        cache.put(User::new(1, "alice")).unwrap();

        assert!(cache.invalidate("by_name", &[&"alice"]));
        assert!(!cache.has("by_id", &[&1u64]));
        assert!(!cache.has("by_name", &[&"alice"]));
        assert!(!cache.invalidate("by_name", &[&"alice"]), "second removal is a no-op");
    }

    #[test]
    fn test_invalidate_all() {
        let cache = user_cache();
        cache.put(User::new(1, "a")).unwrap();
        cache.put(User::new(2, "b")).unwrap();
        cache.put(User::new(3, "c")).unwrap();

        let removed = cache.invalidate_all(
            "by_id",
            &[
                Key::from_parts(&[&1u64]),
                Key::from_parts(&[&3u64]),
                Key::from_parts(&[&9u64]),
            ],
        );
        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.has("by_id", &[&2u64]));
    }

    #[test]
    fn test_clear() {
        let cache = user_cache();
        cache.put(User::new(1, "a")).unwrap();
        cache.put(User::new(2, "b")).unwrap();

        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.has("by_id", &[&1u64]));
    }

    #[test]
    fn test_copy_isolation() {
        let cache = user_cache();
        cache.put(User::new(1, "alice")).unwrap();

        let mut copy = cache.get("by_id", &[&1u64]).unwrap();
        copy.name.push_str("-mutated");

        assert_eq!(
            cache.get("by_id", &[&1u64]).unwrap(),
            User::new(1, "alice"),
            "caller mutation must not reach the cache"
        );
    }

    #[test]
    fn test_invalidate_callback_fires_for_positive_results() {
        let invalidated = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&invalidated);

        let cache: Cache<User, DbError> = Cache::builder()
            .with_lookup(Lookup::new("by_id", |u: &User| Key::from_parts(&[&u.id])))
            .with_copy(User::clone)
            .on_invalidate(move |u: &User| seen.lock().push(u.id))
            .build();

        cache.put(User::new(1, "a")).unwrap();
        cache.invalidate("by_id", &[&1u64]);

        // Negative results never reach the hook.
        let _ = cache.load("by_id", || Err::<User, _>(DbError::NotFound), &[&2u64]);
        cache.invalidate("by_id", &[&2u64]);

        assert_eq!(*invalidated.lock(), vec![1]);
    }

    #[test]
    fn test_evict_callback_fires_on_conflict_drop() {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&evicted);

        let cache: Cache<User, DbError> = Cache::builder()
            .with_lookup(Lookup::new("by_id", |u: &User| Key::from_parts(&[&u.id])))
            .with_copy(User::clone)
            .on_evict(move |u: &User| seen.lock().push(u.name.clone()))
            .build();

        cache.put(User::new(1, "old")).unwrap();
        cache.store(User::new(1, "new"), || Ok(())).unwrap();

        assert_eq!(*evicted.lock(), vec!["old".to_string()]);
    }

    #[test]
    fn test_zero_keys_not_indexed() {
        let cache = user_cache();
        cache.put(User::new(1, "")).unwrap();

        // The empty name was skipped; the zero name key stays free.
        assert!(!cache.has("by_name", &[&""]));
        assert!(cache.has("by_id", &[&1u64]));
        cache.put(User::new(2, "")).unwrap();
        assert_eq!(cache.len(), 2, "zero-name users never collide");
    }

    #[test]
    #[should_panic(expected = "unknown lookup")]
    fn test_unknown_lookup_panics() {
        let cache = user_cache();
        cache.get("by_email", &[&"x"]);
    }

    #[test]
    #[should_panic(expected = "without a copy function")]
    fn test_builder_requires_copy() {
        let _: Cache<User, DbError> = Cache::builder()
            .with_lookup(Lookup::new("by_id", |u: &User| Key::from_parts(&[&u.id])))
            .build();
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let cache = user_cache();
        cache.put(User::new(1, "a")).unwrap();

        let _ = cache.get("by_id", &[&1u64]); // hit
        let _ = cache.get("by_id", &[&2u64]); // miss

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 1);
    }

    #[test]
    fn test_concurrent_loads_single_flight() {
        let cache = Arc::new(user_cache());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(std::thread::spawn(move || {
                cache
                    .load(
                        "by_id",
                        || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(20));
                            Ok(User::new(1, "alice"))
                        },
                        &[&1u64],
                    )
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.join().unwrap(), User::new(1, "alice"));
        }
        assert_eq!(
            calls.load(Ordering::SeqCst),
            1,
            "identical-key loads were serialized into one call"
        );
    }
}
