#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Document cache with tombstones and quota-aware eviction
pub mod cache;

/// Unified client facade
pub mod client;

/// Configuration options
pub mod config;

/// Connectivity monitoring (link flag + active probes)
pub mod connectivity;

/// Error (common error types)
pub mod error;

/// Authenticated-identity seam
pub mod identity;

/// Notification sink for sync lifecycle events
pub mod notify;

/// Durable queue of pending write operations
pub mod queue;

/// Remote document store abstraction
pub mod remote;

/// Durable local key-value storage abstraction
pub mod storage;

/// Offline-first document CRUD facade
pub mod store;

/// Sync engine and conflict fold
pub mod sync;

/// Counter domain logic (derived "days since" counter)
pub mod tracker;

#[cfg(test)]
pub mod test_utils;
