//! Shared types used across the transaction core.
//!
//! Scoped down to what the core itself needs: a transaction identifier and
//! the bounded, LRU-evicting map used by the key relationship analyzer's
//! memoization caches. Schema, catalog and storage-value types belong to the
//! record store, which is external to this core.

pub mod bounded_map;

pub use bounded_map::BoundedHashMap;

/// Unique identifier for a transaction, assigned by the transaction manager's
/// counter.
pub type TransactionId = u64;
