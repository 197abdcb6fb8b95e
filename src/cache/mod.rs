//! Cache Module
//!
//! Generic result caching with TTL expiration and named secondary
//! lookup indices.

use std::time::Duration;

mod entry;
mod key;
mod lookup;
mod result;
mod stats;
mod store;


// Re-export public types
pub use entry::Entry;
pub use key::{Key, KeyBuf, KeyPart};
pub use lookup::Lookup;
pub use result::{Cache, CacheBuilder};
pub use stats::CacheStats;
pub use store::TtlStore;

pub(crate) use lookup::{CachedKey, LookupId, LookupIndex, LookupSet};

/// Internal handle identifying one stored result; the join key between
/// the TTL store and every lookup index entry pointing at it.
pub(crate) type PrimaryKey = u64;

// == Public Constants ==
/// Granularity of the background sweep clock. Sweep intervals are
/// never finer than this.
pub const SWEEP_RESOLUTION: Duration = Duration::from_millis(100);

/// Smallest accepted nonzero TTL. Anything shorter is within noise of
/// the sweep clock and could expire before ever being observed alive.
pub const MIN_TTL: Duration = Duration::from_millis(200);
