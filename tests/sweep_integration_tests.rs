//! Integration tests for the cache together with the background
//! sweep task: TTL expiry, access refresh, and sweeper lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lookup_cache::{Cache, Key, Lookup, Sweeper};

#[derive(Debug, Clone, PartialEq)]
struct Session {
    id: u64,
    token: String,
}

impl Session {
    fn new(id: u64, token: &str) -> Self {
        Self {
            id,
            token: token.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct LoadFailed;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lookup_cache=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn session_cache(ttl: Duration, evictions: Arc<AtomicUsize>) -> Cache<Session, LoadFailed> {
    Cache::builder()
        .with_lookup(Lookup::new("by_id", |s: &Session| Key::from_parts(&[&s.id])))
        .with_lookup(Lookup::new("by_token", |s: &Session| {
            Key::from_parts(&[&s.token])
        }))
        .with_copy(Session::clone)
        .with_capacity(16)
        .with_ttl(ttl)
        .on_evict(move |_: &Session| {
            evictions.fetch_add(1, Ordering::SeqCst);
        })
        .build()
}

const SWEEP_EVERY: Duration = Duration::from_millis(100);
const SHORT_TTL: Duration = Duration::from_millis(300);

#[tokio::test]
async fn entries_expire_after_ttl_without_access() {
    init_tracing();
    let evictions = Arc::new(AtomicUsize::new(0));
    let cache = session_cache(SHORT_TTL, Arc::clone(&evictions));

    let mut sweeper = Sweeper::new(SWEEP_EVERY);
    sweeper.register(&cache);
    assert!(sweeper.start());

    cache.put(Session::new(1, "tok-1")).unwrap();
    assert!(cache.has("by_id", &[&1u64]));

    tokio::time::sleep(Duration::from_millis(700)).await;

    assert!(!cache.has("by_id", &[&1u64]));
    assert!(!cache.has("by_token", &[&"tok-1"]));
    assert!(cache.is_empty());
    assert_eq!(
        evictions.load(Ordering::SeqCst),
        1,
        "evict hook fires exactly once per entry"
    );
}

#[tokio::test]
async fn frequent_access_prevents_expiry() {
    init_tracing();
    let evictions = Arc::new(AtomicUsize::new(0));
    let cache = session_cache(SHORT_TTL, Arc::clone(&evictions));

    let mut sweeper = Sweeper::new(SWEEP_EVERY);
    sweeper.register(&cache);
    sweeper.start();

    cache.put(Session::new(1, "tok-1")).unwrap();

    // Touch the entry well inside the TTL for far longer than the TTL.
    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(
            cache.get("by_id", &[&1u64]).is_some(),
            "accessed entry must stay alive"
        );
    }

    // Stop touching it and let it age out.
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(cache.get("by_id", &[&1u64]).is_none());
    assert_eq!(evictions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn zero_ttl_entries_never_expire() {
    init_tracing();
    let evictions = Arc::new(AtomicUsize::new(0));
    let cache = session_cache(Duration::ZERO, Arc::clone(&evictions));

    let mut sweeper = Sweeper::new(SWEEP_EVERY);
    sweeper.register(&cache);
    sweeper.start();

    cache.put(Session::new(1, "tok-1")).unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert!(cache.has("by_id", &[&1u64]));
    assert_eq!(evictions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn disabling_ttl_rescues_live_entries() {
    init_tracing();
    let evictions = Arc::new(AtomicUsize::new(0));
    let cache = session_cache(SHORT_TTL, Arc::clone(&evictions));

    let mut sweeper = Sweeper::new(SWEEP_EVERY);
    sweeper.register(&cache);
    sweeper.start();

    cache.put(Session::new(1, "tok-1")).unwrap();
    cache.set_ttl(Duration::ZERO, true);

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(cache.has("by_id", &[&1u64]));
    assert_eq!(evictions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stopped_sweeper_evicts_nothing() {
    init_tracing();
    let evictions = Arc::new(AtomicUsize::new(0));
    let cache = session_cache(SHORT_TTL, Arc::clone(&evictions));

    let mut sweeper = Sweeper::new(SWEEP_EVERY);
    sweeper.register(&cache);
    sweeper.start();
    sweeper.stop();

    cache.put(Session::new(1, "tok-1")).unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    // No sweep ran; the aged entry is still present (`has` does not
    // refresh it).
    assert!(cache.has("by_id", &[&1u64]));
    assert_eq!(evictions.load(Ordering::SeqCst), 0);

    // Restarting the sweeper reaps it on the next pass.
    sweeper.start();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!cache.has("by_id", &[&1u64]));
    assert_eq!(evictions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dropped_caches_are_pruned_from_registry() {
    init_tracing();
    let evictions = Arc::new(AtomicUsize::new(0));
    let keep = session_cache(SHORT_TTL, Arc::clone(&evictions));
    let drop_me = session_cache(SHORT_TTL, Arc::clone(&evictions));

    let mut sweeper = Sweeper::new(SWEEP_EVERY);
    sweeper.register(&keep);
    sweeper.register(&drop_me);
    assert_eq!(sweeper.registered(), 2);

    sweeper.start();
    drop(drop_me);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(sweeper.registered(), 1);
}

#[tokio::test]
async fn one_sweeper_serves_many_caches() {
    init_tracing();
    let evictions = Arc::new(AtomicUsize::new(0));
    let first = session_cache(SHORT_TTL, Arc::clone(&evictions));
    let second = session_cache(SHORT_TTL, Arc::clone(&evictions));

    let mut sweeper = Sweeper::new(SWEEP_EVERY);
    sweeper.register(&first);
    sweeper.register(&second);
    sweeper.start();

    first.put(Session::new(1, "a")).unwrap();
    second.put(Session::new(2, "b")).unwrap();

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(first.is_empty());
    assert!(second.is_empty());
    assert_eq!(evictions.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn expired_negative_results_reload() {
    init_tracing();
    let evictions = Arc::new(AtomicUsize::new(0));
    let cache = session_cache(SHORT_TTL, Arc::clone(&evictions));

    let mut sweeper = Sweeper::new(SWEEP_EVERY);
    sweeper.register(&cache);
    sweeper.start();

    let calls = AtomicUsize::new(0);
    let failing = |calls: &AtomicUsize| {
        calls.fetch_add(1, Ordering::SeqCst);
        Err::<Session, _>(LoadFailed)
    };

    // Sticky within the TTL window.
    let _ = cache.load("by_id", || failing(&calls), &[&9u64]);
    let _ = cache.load("by_id", || failing(&calls), &[&9u64]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Swept out like any other entry, then loaded afresh; error
    // results never reach the evict hook.
    tokio::time::sleep(Duration::from_millis(700)).await;
    let _ = cache.load("by_id", || failing(&calls), &[&9u64]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(evictions.load(Ordering::SeqCst), 0);
}
