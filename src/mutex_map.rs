//! Mutex Map Module
//!
//! A keyed read/write lock: per-key lock states created lazily on
//! first use and evicted automatically once the last holder releases.
//! The cache uses it to serialize concurrent loads of an identical
//! lookup key so the expensive load function runs once per genuine
//! miss, while loads for distinct keys proceed in parallel.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

// == Mutex Map ==
/// Map of independently lockable keys. Cloning yields another handle
/// to the same underlying map.
#[derive(Debug)]
pub struct MutexMap<K>
where
    K: Eq + Hash + Clone,
{
    inner: Arc<Inner<K>>,
}

#[derive(Debug)]
struct Inner<K> {
    states: Mutex<HashMap<K, LockState>>,
    cond: Condvar,
}

/// Per-key lock bookkeeping. `waiting` pins the state in the map while
/// any thread is still queued for it, so release-time eviction can
/// never drop a state another thread is about to re-check.
#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer: bool,
    waiting: usize,
}

impl LockState {
    fn idle(&self) -> bool {
        self.readers == 0 && !self.writer && self.waiting == 0
    }
}

impl<K> MutexMap<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty mutex map.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                states: Mutex::new(HashMap::new()),
                cond: Condvar::new(),
            }),
        }
    }

    // == Lock ==
    /// Acquires the exclusive lock for `key`, blocking while any other
    /// holder (reader or writer) is active on it.
    pub fn lock(&self, key: K) -> MutexMapGuard<K> {
        let mut states = self.inner.states.lock();
        states.entry(key.clone()).or_default().waiting += 1;

        loop {
            let state = states
                .get_mut(&key)
                .expect("lock state pinned by waiting count");
            if !state.writer && state.readers == 0 {
                state.writer = true;
                state.waiting -= 1;
                break;
            }
            self.inner.cond.wait(&mut states);
        }

        MutexMapGuard {
            inner: Arc::clone(&self.inner),
            key,
            write: true,
        }
    }

    // == RLock ==
    /// Acquires a shared lock for `key`, blocking only while a writer
    /// holds it.
    pub fn rlock(&self, key: K) -> MutexMapGuard<K> {
        let mut states = self.inner.states.lock();
        states.entry(key.clone()).or_default().waiting += 1;

        loop {
            let state = states
                .get_mut(&key)
                .expect("lock state pinned by waiting count");
            if !state.writer {
                state.readers += 1;
                state.waiting -= 1;
                break;
            }
            self.inner.cond.wait(&mut states);
        }

        MutexMapGuard {
            inner: Arc::clone(&self.inner),
            key,
            write: false,
        }
    }

    // == Length ==
    /// Number of keys with live lock state (held or queued).
    pub fn len(&self) -> usize {
        self.inner.states.lock().len()
    }

    /// Returns true if no key currently has lock state.
    pub fn is_empty(&self) -> bool {
        self.inner.states.lock().is_empty()
    }
}

impl<K> Clone for MutexMap<K>
where
    K: Eq + Hash + Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> Default for MutexMap<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

// == Guard ==
/// Releases its key's lock on drop, evicting the per-key state once no
/// holder or waiter remains.
#[derive(Debug)]
pub struct MutexMapGuard<K>
where
    K: Eq + Hash + Clone,
{
    inner: Arc<Inner<K>>,
    key: K,
    write: bool,
}

impl<K> Drop for MutexMapGuard<K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        let mut states = self.inner.states.lock();
        if let Some(state) = states.get_mut(&self.key) {
            if self.write {
                state.writer = false;
            } else {
                state.readers -= 1;
            }
            // Re-check under the map mutex before evicting the state.
            if state.idle() {
                states.remove(&self.key);
            }
        }
        drop(states);
        self.inner.cond.notify_all();
    }
}
