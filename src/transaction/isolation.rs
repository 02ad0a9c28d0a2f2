//! Pre-commit isolation checks.
//!
//! Implements the four classical isolation levels as a cascade: each level
//! runs every check of the level below it, then adds its own. Called by the
//! transaction manager immediately before a transaction is marked
//! COMMITTED, with all of its write locks already held.

use std::sync::Arc;
use std::time::SystemTime;

use super::error::{TransactionError, TransactionResult};
use super::keys::KeyRelationshipAnalyzer;
use super::types::{IsolationLevel, SnapshotEntry, Transaction, TransactionState};

/// Validates a transaction against its peers according to its isolation
/// level. Stateless aside from the [`KeyRelationshipAnalyzer`] it shares
/// with the rest of the core.
pub struct IsolationValidator {
    analyzer: Arc<KeyRelationshipAnalyzer>,
}

impl IsolationValidator {
    pub fn new(analyzer: Arc<KeyRelationshipAnalyzer>) -> Self {
        Self { analyzer }
    }

    /// Runs the check appropriate to `txn`'s isolation level against
    /// `peers` (every other transaction in the registry, any state).
    pub fn validate(&self, txn: &Transaction, peers: &[&Transaction]) -> TransactionResult<()> {
        match txn.isolation_level {
            IsolationLevel::ReadUncommitted => Ok(()),
            IsolationLevel::ReadCommitted => self.check_read_committed(txn, peers),
            IsolationLevel::RepeatableRead => self.check_repeatable_read(txn, peers),
            IsolationLevel::Serializable => self.check_serializable(txn, peers),
        }
    }

    fn check_read_committed(&self, txn: &Transaction, peers: &[&Transaction]) -> TransactionResult<()> {
        for key in &txn.write_set {
            let conflict = peers.iter().any(|peer| {
                if peer.id == txn.id || !peer.write_set.contains(key) {
                    return false;
                }
                match peer.state {
                    TransactionState::Active => true,
                    // A peer that already committed a write to this key
                    // still conflicts if its lifetime overlapped self's —
                    // self read a value of `k` that is no longer the
                    // committed value by the time self tries to commit.
                    TransactionState::Committed => txn.overlaps_with(peer),
                    _ => false,
                }
            });
            if conflict {
                return Err(TransactionError::write_conflict(txn.id, key.clone()));
            }
        }
        Ok(())
    }

    fn check_repeatable_read(&self, txn: &Transaction, peers: &[&Transaction]) -> TransactionResult<()> {
        self.check_read_committed(txn, peers)?;

        for key in &txn.read_set {
            if self.has_read_set_conflict(txn, key, peers) {
                return Err(TransactionError::repeatable_read_violation(txn.id, key.clone()));
            }
        }

        for (snapshot_key, entry) in &txn.snapshot {
            self.check_phantom_read(txn, snapshot_key, entry, peers)?;
        }

        Ok(())
    }

    fn check_serializable(&self, txn: &Transaction, peers: &[&Transaction]) -> TransactionResult<()> {
        self.check_repeatable_read(txn, peers)?;

        for peer in peers {
            if peer.id == txn.id || peer.state != TransactionState::Active || !txn.overlaps_with(peer) {
                continue;
            }
            for key in &txn.read_set {
                if peer.write_set.contains(key) {
                    return Err(TransactionError::serialization_conflict(txn.id, key.clone()));
                }
            }
            for key in &txn.write_set {
                if peer.read_set.contains(key) {
                    return Err(TransactionError::serialization_conflict(txn.id, key.clone()));
                }
            }
        }

        Ok(())
    }

    /// `u != self`, COMMITTED, `k` in `u.writeSet`, `u.start > self.start`,
    /// `u.end < now`. The last clause is always true for a committed peer
    /// and is kept as a literal no-op rather than simplified away.
    fn has_read_set_conflict(&self, txn: &Transaction, key: &str, peers: &[&Transaction]) -> bool {
        let now = SystemTime::now();
        peers.iter().any(|peer| {
            peer.id != txn.id
                && peer.state == TransactionState::Committed
                && peer.write_set.contains(key)
                && peer
                    .start_time
                    .zip(txn.start_time)
                    .map(|(peer_start, self_start)| peer_start > self_start)
                    .unwrap_or(false)
                && peer.end_time.map(|end| end < now).unwrap_or(false)
        })
    }

    fn check_phantom_read(
        &self,
        txn: &Transaction,
        snapshot_key: &str,
        entry: &SnapshotEntry,
        peers: &[&Transaction],
    ) -> TransactionResult<()> {
        if self.has_read_set_conflict(txn, snapshot_key, peers) {
            return Err(TransactionError::phantom_read(txn.id, snapshot_key.to_string()));
        }

        let affected = peers.iter().any(|peer| {
            peer.id != txn.id
                && txn.overlaps_with(peer)
                && peer.operations.iter().any(|op| {
                    !op.op_type.is_read()
                        && (op.key == snapshot_key
                            || self
                                .analyzer
                                .is_key_in_snapshot_range(txn, &op.key, snapshot_key, &entry.expected_value))
                })
        });
        if affected {
            return Err(TransactionError::phantom_read(txn.id, snapshot_key.to_string()));
        }

        if self.has_serialization_anomaly(txn, snapshot_key, peers) {
            return Err(TransactionError::phantom_read(txn.id, snapshot_key.to_string()));
        }

        Ok(())
    }

    /// Write-skew or dependency-cycle anomaly between `self` and an ACTIVE,
    /// time-overlapping peer, anchored at `snapshot_key`.
    fn has_serialization_anomaly(&self, txn: &Transaction, snapshot_key: &str, peers: &[&Transaction]) -> bool {
        peers.iter().any(|peer| {
            if peer.id == txn.id || peer.state != TransactionState::Active || !txn.overlaps_with(peer) {
                return false;
            }

            let write_skew = txn
                .read_set
                .iter()
                .any(|k| self.analyzer.are_keys_related(k, snapshot_key))
                && peer
                    .read_set
                    .iter()
                    .any(|k| self.analyzer.are_keys_related(k, snapshot_key))
                && !txn.write_set.is_empty()
                && !peer.write_set.is_empty()
                && txn.write_set.is_disjoint(&peer.write_set);

            let dependency_cycle = txn.read_set.iter().any(|k| peer.write_set.contains(k))
                && peer.read_set.iter().any(|k| txn.write_set.contains(k));

            write_skew || dependency_cycle
        })
    }
}
