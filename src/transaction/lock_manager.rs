//! Flat per-key shared/exclusive lock manager.
//!
//! Implements Two-Phase Locking over a single key space: one entry per
//! record key holding a lock type (shared or exclusive) and its set of
//! holders. There is no intent-lock hierarchy or lock escalation here — the
//! concurrency core the lock manager feeds only ever asks for a shared or
//! exclusive lock on one opaque key at a time.
//!
//! # Example
//!
//! ```rust,ignore
//! let lm = LockManager::new();
//! lm.try_acquire(1, "table.row1", LockType::Shared);
//! lm.release_all_locks(1);
//! ```

use std::collections::{HashMap, HashSet};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::common::TransactionId;

use super::error::{TransactionError, TransactionResult};

/// Default granularity of the cooperative retry loop inside
/// [`LockManager::acquire_lock`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default per-call timeout for [`LockManager::acquire_lock`] when the
/// caller doesn't specify one.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// The two lock types this manager supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockType {
    Shared,
    Exclusive,
}

/// A single record key's lock state: its type and non-empty holder set.
/// The entry is removed from the table entirely once its holder set empties.
#[derive(Debug, Clone)]
struct LockEntry {
    lock_type: LockType,
    holders: HashSet<TransactionId>,
}

/// One row of [`LockStats::records_locked`].
#[derive(Debug, Clone)]
pub struct RecordLockInfo {
    pub record_key: String,
    pub lock_type: LockType,
    pub holders: Vec<TransactionId>,
}

/// Snapshot of the lock manager's current state.
#[derive(Debug, Clone)]
pub struct LockStats {
    pub total_locks: usize,
    pub shared_locks: usize,
    pub exclusive_locks: usize,
    pub unique_holders: usize,
    pub records_locked: Vec<RecordLockInfo>,
}

/// Owns the mapping from record key to `(lock type, holders)`.
///
/// Guarded by a single `RwLock` so that `try_acquire`, `release_lock` and
/// `release_all_locks` are each atomic end-to-end, per the single-logical-
/// monitor requirement on the lock table.
pub struct LockManager {
    table: RwLock<HashMap<String, LockEntry>>,
    poll_interval: Duration,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            poll_interval,
        }
    }

    /// Synchronous, total lock attempt. Creates the entry if absent;
    /// re-entrant for a sole existing holder; performs a SHARED->EXCLUSIVE
    /// upgrade iff `txn_id` is the unique holder; otherwise checks ordinary
    /// compatibility.
    pub fn try_acquire(&self, txn_id: TransactionId, key: &str, lock_type: LockType) -> bool {
        let mut table = self.table.write();
        match table.get_mut(key) {
            None => {
                let mut holders = HashSet::new();
                holders.insert(txn_id);
                table.insert(key.to_string(), LockEntry { lock_type, holders });
                true
            }
            Some(entry) => {
                let sole_holder = entry.holders.len() == 1 && entry.holders.contains(&txn_id);

                if entry.holders.contains(&txn_id) {
                    match (entry.lock_type, lock_type) {
                        (LockType::Shared, LockType::Exclusive) => {
                            if sole_holder {
                                entry.lock_type = LockType::Exclusive;
                                true
                            } else {
                                false
                            }
                        }
                        // Already holds Exclusive, or re-requesting the same
                        // type: compatible re-entry.
                        _ => true,
                    }
                } else {
                    match (entry.lock_type, lock_type) {
                        (LockType::Shared, LockType::Shared) => {
                            entry.holders.insert(txn_id);
                            true
                        }
                        _ => false,
                    }
                }
            }
        }
    }

    /// Polls [`Self::try_acquire`] at `poll_interval` granularity until it
    /// succeeds or `timeout` elapses.
    pub fn acquire_lock(
        &self,
        txn_id: TransactionId,
        key: &str,
        lock_type: LockType,
        timeout: Duration,
    ) -> TransactionResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_acquire(txn_id, key, lock_type) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(TransactionError::lock_timeout(txn_id, key));
            }
            thread::sleep(self.poll_interval.min(timeout));
        }
    }

    /// Removes `txn_id` from `key`'s holder set, destroying the entry if it
    /// becomes empty. Returns `false` if `txn_id` did not hold the lock.
    pub fn release_lock(&self, txn_id: TransactionId, key: &str) -> bool {
        let mut table = self.table.write();
        let Some(entry) = table.get_mut(key) else {
            return false;
        };
        if !entry.holders.remove(&txn_id) {
            return false;
        }
        if entry.holders.is_empty() {
            table.remove(key);
        }
        true
    }

    /// Releases every lock `txn_id` holds. Returns the count released.
    pub fn release_all_locks(&self, txn_id: TransactionId) -> usize {
        let mut table = self.table.write();
        let mut released = 0;
        table.retain(|_, entry| {
            if entry.holders.remove(&txn_id) {
                released += 1;
            }
            !entry.holders.is_empty()
        });
        released
    }

    pub fn holds_locks(&self, txn_id: TransactionId) -> bool {
        self.table
            .read()
            .values()
            .any(|entry| entry.holders.contains(&txn_id))
    }

    /// The set of keys currently held by `txn_id`.
    pub fn held_keys(&self, txn_id: TransactionId) -> HashSet<String> {
        self.table
            .read()
            .iter()
            .filter(|(_, entry)| entry.holders.contains(&txn_id))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn get_stats(&self) -> LockStats {
        let table = self.table.read();
        let mut shared_locks = 0;
        let mut exclusive_locks = 0;
        let mut unique_holders = HashSet::new();
        let mut records_locked = Vec::with_capacity(table.len());

        for (key, entry) in table.iter() {
            match entry.lock_type {
                LockType::Shared => shared_locks += 1,
                LockType::Exclusive => exclusive_locks += 1,
            }
            unique_holders.extend(entry.holders.iter().copied());
            let mut holders: Vec<_> = entry.holders.iter().copied().collect();
            holders.sort_unstable();
            records_locked.push(RecordLockInfo {
                record_key: key.clone(),
                lock_type: entry.lock_type,
                holders,
            });
        }

        LockStats {
            total_locks: table.len(),
            shared_locks,
            exclusive_locks,
            unique_holders: unique_holders.len(),
            records_locked,
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_locks_compose() {
        let lm = LockManager::new();
        assert!(lm.try_acquire(1, "k1", LockType::Shared));
        assert!(lm.try_acquire(2, "k1", LockType::Shared));
        let stats = lm.get_stats();
        assert_eq!(stats.shared_locks, 1);
        assert_eq!(stats.records_locked[0].holders.len(), 2);
    }

    #[test]
    fn exclusive_excludes_others() {
        let lm = LockManager::new();
        assert!(lm.try_acquire(1, "k1", LockType::Shared));
        assert!(lm.try_acquire(2, "k1", LockType::Shared));
        assert!(!lm.try_acquire(3, "k1", LockType::Exclusive));
    }

    #[test]
    fn upgrade_succeeds_only_for_sole_holder() {
        let lm = LockManager::new();
        assert!(lm.try_acquire(1, "k1", LockType::Shared));
        assert!(lm.try_acquire(1, "k1", LockType::Exclusive));

        let lm2 = LockManager::new();
        assert!(lm2.try_acquire(1, "k1", LockType::Shared));
        assert!(lm2.try_acquire(2, "k1", LockType::Shared));
        assert!(!lm2.try_acquire(1, "k1", LockType::Exclusive));
    }

    #[test]
    fn release_lock_destroys_empty_entry() {
        let lm = LockManager::new();
        lm.try_acquire(1, "k1", LockType::Exclusive);
        assert!(lm.release_lock(1, "k1"));
        assert_eq!(lm.get_stats().total_locks, 0);
        assert!(!lm.release_lock(1, "k1"));
    }

    #[test]
    fn release_all_locks_counts_and_clears() {
        let lm = LockManager::new();
        lm.try_acquire(1, "k1", LockType::Shared);
        lm.try_acquire(1, "k2", LockType::Exclusive);
        lm.try_acquire(2, "k2", LockType::Shared); // incompatible, fails silently in test
        assert_eq!(lm.release_all_locks(1), 2);
        assert!(!lm.holds_locks(1));
    }

    #[test]
    fn acquire_lock_times_out() {
        let lm = LockManager::with_poll_interval(Duration::from_millis(5));
        lm.try_acquire(1, "k1", LockType::Exclusive);
        let start = Instant::now();
        let result = lm.acquire_lock(2, "k1", LockType::Exclusive, Duration::from_millis(50));
        assert!(result.is_err());
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn acquire_lock_succeeds_once_released() {
        let lm = LockManager::with_poll_interval(Duration::from_millis(5));
        lm.try_acquire(1, "k1", LockType::Exclusive);
        lm.release_lock(1, "k1");
        assert!(lm
            .acquire_lock(2, "k1", LockType::Exclusive, Duration::from_millis(50))
            .is_ok());
    }
}
