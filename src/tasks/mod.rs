//! Background Tasks Module
//!
//! Contains the shared TTL sweep task that evicts expired entries
//! from every registered cache at a fixed interval.

mod sweep;

pub use sweep::{Sweeper, MAX_LOCK_ATTEMPTS};

pub(crate) use sweep::SweepTarget;
