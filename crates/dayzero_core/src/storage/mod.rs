//! Durable local key-value storage abstraction.
//!
//! This module defines the [`KeyValueStore`] trait, the crate's seam to
//! whatever bounded local storage the platform provides (localStorage or
//! IndexedDB on the web, a data directory on native). The operation queue,
//! document cache and counter action log each persist one serialized blob
//! through it.
//!
//! The store is bounded: `set` may fail with
//! [`DayzeroError::QuotaExceeded`](crate::error::DayzeroError::QuotaExceeded),
//! and consumers are expected to react (the document cache evicts its
//! oldest quarter and retries once).
//!
//! ## Object safety
//!
//! `KeyValueStore` is designed to be object-safe so it can be shared as
//! `Arc<dyn KeyValueStore>` between the queue, the cache and the action
//! log. All methods return boxed futures.

mod memory;

#[cfg(not(target_arch = "wasm32"))]
mod file;

pub use memory::MemoryKvStore;

#[cfg(not(target_arch = "wasm32"))]
pub use file::FileKvStore;

use crate::error::Result;
use std::future::Future;
use std::pin::Pin;

/// A boxed future for object-safe async methods.
///
/// On native targets, futures are `Send` for compatibility with
/// multi-threaded runtimes. On WASM there is no `Send` requirement since
/// JavaScript is single-threaded.
#[cfg(not(target_arch = "wasm32"))]
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A boxed future for object-safe async methods.
///
/// WASM version without `Send` requirement.
#[cfg(target_arch = "wasm32")]
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Async abstraction over a durable, bounded key-value store.
///
/// Implementations must make completed writes visible to later reads in
/// the same process and durable across process restarts; both the
/// operation queue and the document cache rely on that for crash
/// recovery.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, or `None` if absent.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>>;

    /// Write `value` under `key`, replacing any previous value.
    ///
    /// Fails with `QuotaExceeded` when the backing store is out of
    /// capacity; the previous value for `key` must be left intact in that
    /// case.
    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Remove the value stored under `key`. Removing an absent key is not
    /// an error.
    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;
}
