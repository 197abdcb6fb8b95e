//! TTL Sweep Task
//!
//! Background task that periodically evicts expired entries from every
//! registered cache. One sweeper (and one tokio task) serves any
//! number of cache instances; each instance's pass is try-lock based
//! so a busy cache never stalls the others, with a bounded escalation
//! to a forced lock so eviction cannot starve under sustained write
//! pressure.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::cache::{Cache, SWEEP_RESOLUTION};

/// Consecutive contended passes tolerated for one cache before the
/// sweeper takes its lock forcibly.
pub const MAX_LOCK_ATTEMPTS: u32 = 10;

// == Sweep Target ==
/// Type-erased hook into one cache instance's expiry machinery.
pub(crate) trait SweepTarget: Send + Sync {
    /// Attempts one expiry pass. Returns `None` when the cache lock
    /// was contended and `force` was not set, otherwise the number of
    /// entries evicted.
    fn sweep(&self, force: bool) -> Option<usize>;
}

/// One registered cache plus its contention bookkeeping.
struct Registered {
    target: Weak<dyn SweepTarget>,
    contended: u32,
}

// == Sweeper ==
/// Owns the shared sweep schedule: a registry of cache instances and
/// the single background task ticking over them.
///
/// Lifecycle is explicit: nothing runs until [`Sweeper::start`], and
/// [`Sweeper::stop`] (or drop) aborts the task deterministically.
pub struct Sweeper {
    interval: Duration,
    registry: Arc<Mutex<Vec<Registered>>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    // == Constructor ==
    /// Creates a stopped sweeper ticking at `interval`.
    ///
    /// # Panics
    /// Panics if `interval` is below [`SWEEP_RESOLUTION`]; cache TTL
    /// validation assumes sweep passes are no finer than this.
    pub fn new(interval: Duration) -> Self {
        assert!(
            interval >= SWEEP_RESOLUTION,
            "sweep interval {:?} is below the resolution of {:?}",
            interval,
            SWEEP_RESOLUTION
        );
        Self {
            interval,
            registry: Arc::new(Mutex::new(Vec::new())),
            handle: None,
        }
    }

    // == Register ==
    /// Adds a cache to the sweep schedule. The sweeper holds only a
    /// weak handle: dropping the cache unregisters it on the next
    /// pass.
    pub fn register<V, E>(&self, cache: &Cache<V, E>)
    where
        V: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        self.registry.lock().push(Registered {
            target: cache.sweep_handle(),
            contended: 0,
        });
    }

    /// Number of caches currently in the registry (dead handles are
    /// pruned by sweep passes, not by this accessor).
    pub fn registered(&self) -> usize {
        self.registry.lock().len()
    }

    // == Start ==
    /// Spawns the background sweep task. Returns `false` if already
    /// running. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> bool {
        if self.handle.is_some() {
            return false;
        }

        let registry = Arc::clone(&self.registry);
        let interval = self.interval;

        self.handle = Some(tokio::spawn(async move {
            info!(
                interval_ms = interval.as_millis() as u64,
                "starting TTL sweep task"
            );
            loop {
                tokio::time::sleep(interval).await;
                sweep_pass(&registry);
            }
        }));
        true
    }

    // == Stop ==
    /// Aborts the background task. Returns `false` if not running.
    pub fn stop(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                info!("TTL sweep task stopped");
                true
            }
            None => false,
        }
    }

    /// Whether the background task is currently scheduled.
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Default for Sweeper {
    fn default() -> Self {
        Self::new(crate::config::CacheConfig::default().sweep_interval)
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One tick: visit every registered cache, pruning dead handles and
/// escalating to a forced lock after repeated contention.
fn sweep_pass(registry: &Mutex<Vec<Registered>>) {
    let mut entries = registry.lock();
    let mut evicted_total = 0usize;

    entries.retain_mut(|entry| {
        let Some(target) = entry.target.upgrade() else {
            trace!("pruning dropped cache from sweep registry");
            return false;
        };

        let force = entry.contended >= MAX_LOCK_ATTEMPTS;
        match target.sweep(force) {
            Some(evicted) => {
                entry.contended = 0;
                evicted_total += evicted;
            }
            None => {
                entry.contended += 1;
                trace!(
                    attempts = entry.contended,
                    "cache lock contended, skipping sweep pass"
                );
            }
        }
        true
    });

    if evicted_total > 0 {
        debug!(evicted = evicted_total, "TTL sweep evicted expired entries");
    }
}
