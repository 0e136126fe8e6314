//! Measures how a single mutex-guarded hash table holds up under contention.
//!
//! The unit under test is [`ContendedHashTable`]: an ordinary hash table behind one lock, with a
//! get-or-insert operation in two flavors. [`get_or_insert`] hashes the key while holding the
//! lock; [`get_or_insert_with_hint`] hashes it before taking the lock, shortening the critical
//! section. How much that matters depends on key length, table size and the number of threads
//! fighting over the lock, and those are exactly the knobs a [`RunConfig`] exposes.
//!
//! A [`Driver`] [prepares](Driver::prepare) one configuration at a time, and the resulting
//! [`Prepared`] handle can be run as many times as the harness wants samples:
//!
//!  1. The configuration is [validated](RunConfig::validate). Configurations whose keys would need
//!     more than [`MAX_MEMORY`] bytes, or that ask for an empty table, are rejected before anything
//!     is allocated.
//!  2. On the first run, worker thread zero generates the baseline [`Storage`] (random fixed-length
//!     keys with random values) and resets a fresh table from it. Later runs reuse both.
//!  3. All workers wait on a barrier, so none of them can see a table that has not been reset yet.
//!  4. Each worker fills its own [`IndexBuffer`] with random positions into the storage and starts
//!     its stopwatch.
//!  5. Each iteration looks up the next (key, value) pair through the table. When the index buffer
//!     runs dry the stopwatch is paused while it is refilled.
//!
//! Each run's [`RunReport`] carries the time each worker spent in its timed loop, along with
//! the counters a harness should attach to its own statistics. Turning those into throughput
//! numbers is the harness's job; the `contended` bench target does that with Criterion over the
//! configurations of a [`Sweep`].
//!
//! # A note on the lock
//!
//! The single coarse lock is deliberate. There is no sharding, no reader/writer split and no
//! lock-free fast path: the point is to measure what lock hold time costs as contention grows.
//!
//! # Example
//!
//! ```
//! use contended::ContendedHashTable;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let table = Arc::new(ContendedHashTable::new());
//! let handles: Vec<_> = (0..4u64)
//!     .map(|t| {
//!         let table = Arc::clone(&table);
//!         thread::spawn(move || table.get_or_insert_with_hint(&"shared", t))
//!     })
//!     .collect();
//! let seen: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
//! // whoever got the lock first decided the value for everyone
//! assert!(seen.iter().all(|&v| v == seen[0]));
//! assert_eq!(table.len(), 1);
//! ```
//!
//! [`get_or_insert`]: ContendedHashTable::get_or_insert
//! [`get_or_insert_with_hint`]: ContendedHashTable::get_or_insert_with_hint
#![deny(
    missing_docs,
    missing_debug_implementations,
    unreachable_pub,
    rust_2018_idioms
)]

mod config;
mod driver;
mod error;
mod table;
pub mod workload;

pub use config::{Hint, RunConfig, Sweep, MAX_MEMORY};
pub use driver::{
    Driver, HintedLookup, Lookup, PlainLookup, Prepared, RunReport, Stopwatch, Table,
};
pub use error::ConfigError;
pub use table::ContendedHashTable;
pub use workload::{IndexBuffer, Storage};

/// Default hasher for [`ContendedHashTable`].
pub type DefaultHashBuilder = ahash::RandomState;
