//! Transaction manager (coordinator).
//!
//! Owns the transaction registry, the lock manager, the key relationship
//! analyzer, the isolation validator and the statistics collector. This is
//! the only component permitted to mutate the registry or the lock table as
//! a unit; C3/C4/C5 only ever see read-only views or owned snapshots.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, RwLock};

use crate::common::TransactionId;

use super::deadlock::{self, DeadlockOptions, DeadlockReport};
use super::error::{TransactionError, TransactionResult};
use super::isolation::IsolationValidator;
use super::keys::KeyRelationshipAnalyzer;
use super::lock_manager::{LockManager, LockStats, LockType};
use super::statistics::{StatisticsSummary, TransactionStatistics};
use super::types::{Transaction, TransactionOptions, TransactionState, ValidationContext};

/// Default age after which `cleanup` reaps a terminated transaction if no
/// explicit `maxAge` is given by the caller.
pub const DEFAULT_CLEANUP_MAX_AGE: Duration = Duration::from_secs(3600);

/// `getStats()`'s merge of transaction and lock statistics.
#[derive(Debug, Clone)]
pub struct CombinedStats {
    pub transactions: StatisticsSummary,
    pub locks: LockStats,
}

/// `getSystemHealth()`'s derived metrics.
#[derive(Debug, Clone)]
pub struct SystemHealth {
    pub commit_rate: f64,
    pub average_duration: Duration,
    pub has_deadlocks: bool,
    pub suspected_deadlock_count: usize,
    pub timeout_victim_count: usize,
    pub total_locks: usize,
    pub lock_utilization: f64,
}

/// Coordinates transaction begin/commit/abort/cleanup and delegates to the
/// lock manager, isolation validator and deadlock detector.
pub struct TransactionManager {
    next_txn_id: Mutex<TransactionId>,
    registry: RwLock<HashMap<TransactionId, Transaction>>,
    lock_manager: Arc<LockManager>,
    isolation_validator: IsolationValidator,
    stats: TransactionStatistics,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::with_lock_manager(Arc::new(LockManager::new()))
    }

    pub fn with_lock_manager(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: Mutex::new(1),
            registry: RwLock::new(HashMap::new()),
            lock_manager,
            isolation_validator: IsolationValidator::new(Arc::new(KeyRelationshipAnalyzer::new())),
            stats: TransactionStatistics::new(),
        }
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    /// Constructs and registers a new ACTIVE transaction.
    pub fn begin(&self, opts: TransactionOptions) -> TransactionResult<TransactionId> {
        let id = {
            let mut next = self.next_txn_id.lock();
            let id = *next;
            *next += 1;
            id
        };

        let mut txn = Transaction::new(id, opts);
        txn.begin()?;
        self.registry.write().insert(id, txn);
        self.stats.record_begin();
        tracing::debug!(txn_id = id, "transaction begin");
        Ok(id)
    }

    /// Acquires exclusive locks on every write-set key, validates isolation
    /// against the current registry, marks the transaction COMMITTED, and
    /// unconditionally releases every lock the transaction holds. On any
    /// failure the transaction is aborted with the error's message before
    /// the error is returned.
    pub fn commit(&self, txn_id: TransactionId, context: &ValidationContext) -> TransactionResult<()> {
        let mut txn = self.take(txn_id)?;

        let result = self.commit_locked(&mut txn, context);
        self.lock_manager.release_all_locks(txn_id);

        match result {
            Ok(()) => {
                let duration = txn.get_duration().unwrap_or_default();
                self.stats.record_commit(duration);
                tracing::info!(txn_id, "transaction committed");
                self.registry.write().insert(txn_id, txn);
                Ok(())
            }
            Err(err) => {
                txn.abort(err.to_string());
                let duration = txn.get_duration().unwrap_or_default();
                self.stats.record_abort(duration);
                tracing::info!(txn_id, error = %err, "transaction aborted during commit");
                self.registry.write().insert(txn_id, txn);
                Err(err)
            }
        }
    }

    fn commit_locked(&self, txn: &mut Transaction, context: &ValidationContext) -> TransactionResult<()> {
        for key in txn.write_set.clone() {
            self.lock_manager
                .acquire_lock(txn.id, &key, LockType::Exclusive, txn.timeout)?;
        }

        {
            let registry = self.registry.read();
            let peers: Vec<&Transaction> = registry.values().filter(|peer| peer.id != txn.id).collect();
            self.isolation_validator.validate(txn, &peers)?;
        }

        txn.commit(context)
    }

    /// Transitions the transaction to ABORTED and releases its locks.
    pub fn abort(&self, txn_id: TransactionId, reason: impl Into<String>) -> TransactionResult<()> {
        let mut txn = self.take(txn_id)?;
        txn.abort(reason);
        self.lock_manager.release_all_locks(txn_id);
        let duration = txn.get_duration().unwrap_or_default();
        self.stats.record_abort(duration);
        tracing::info!(txn_id, "transaction aborted");
        self.registry.write().insert(txn_id, txn);
        Ok(())
    }

    fn take(&self, txn_id: TransactionId) -> TransactionResult<Transaction> {
        self.registry
            .write()
            .remove(&txn_id)
            .ok_or_else(|| TransactionError::not_found(txn_id))
    }

    /// Removes terminated transactions whose `endTime` is older than
    /// `max_age`. `max_age == Duration::ZERO` removes every terminated
    /// transaction regardless of age. Returns the count removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let now = SystemTime::now();
        let mut registry = self.registry.write();
        let before = registry.len();
        registry.retain(|_, txn| match txn.end_time {
            None => true,
            Some(end) => {
                if max_age.is_zero() {
                    false
                } else {
                    now.duration_since(end).map(|age| age <= max_age).unwrap_or(true)
                }
            }
        });
        before - registry.len()
    }

    pub fn get_active_transactions(&self) -> Vec<Transaction> {
        self.registry
            .read()
            .values()
            .filter(|txn| txn.state == TransactionState::Active)
            .cloned()
            .collect()
    }

    pub fn detect_deadlocks(&self, opts: &DeadlockOptions) -> DeadlockReport {
        let active = self.get_active_transactions();
        let report = deadlock::detect(&active, &self.lock_manager, opts);
        if !report.deadlocks.is_empty() || !report.suspected_deadlocks.is_empty() {
            tracing::warn!(
                deadlocks = report.deadlocks.len(),
                suspected = report.suspected_deadlocks.len(),
                "deadlock scan found issues"
            );
        }
        report
    }

    pub fn get_stats(&self) -> CombinedStats {
        CombinedStats {
            transactions: self.stats.get_summary(),
            locks: self.lock_manager.get_stats(),
        }
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    pub fn validate_transaction_isolation(&self, txn_id: TransactionId) -> TransactionResult<()> {
        let registry = self.registry.read();
        let txn = registry
            .get(&txn_id)
            .ok_or_else(|| TransactionError::not_found(txn_id))?;
        let peers: Vec<&Transaction> = registry.values().filter(|peer| peer.id != txn_id).collect();
        self.isolation_validator.validate(txn, &peers)
    }

    pub fn get_transaction_details(&self, txn_id: TransactionId) -> Option<Transaction> {
        self.registry.read().get(&txn_id).cloned()
    }

    pub fn get_system_health(&self) -> SystemHealth {
        let stats = self.stats.get_summary();
        let report = self.detect_deadlocks(&DeadlockOptions::default());
        let lock_stats = self.lock_manager.get_stats();
        let lock_utilization = if lock_stats.total_locks > 0 {
            lock_stats.unique_holders as f64 / lock_stats.total_locks as f64
        } else {
            0.0
        };

        SystemHealth {
            commit_rate: stats.commit_rate(),
            average_duration: stats.average_duration,
            has_deadlocks: !report.deadlocks.is_empty(),
            suspected_deadlock_count: report.suspected_deadlocks.len(),
            timeout_victim_count: report.timeout_victims.len(),
            total_locks: lock_stats.total_locks,
            lock_utilization,
        }
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::types::{IsolationLevel, OperationType};

    #[test]
    fn begin_commit_round_trip_releases_locks() {
        let manager = TransactionManager::new();
        let id = manager.begin(TransactionOptions::default()).unwrap();

        {
            let mut registry = manager.registry.write();
            let txn = registry.get_mut(&id).unwrap();
            txn.add_operation(OperationType::Set, "k1", None, Some(serde_json::json!(1)), None)
                .unwrap();
        }

        manager.commit(id, &serde_json::json!({})).unwrap();
        assert!(!manager.lock_manager.holds_locks(id));
        let txn = manager.get_transaction_details(id).unwrap();
        assert_eq!(txn.state, TransactionState::Committed);
    }

    #[test]
    fn commit_then_commit_conflicts_on_overlapping_write() {
        // A begins, writes k1. B begins, writes k1. commit(A) succeeds.
        // commit(B) must fail with a write-conflict on k1, even though A is
        // COMMITTED (not ACTIVE) by the time B validates.
        let manager = TransactionManager::new();
        let mut opts = TransactionOptions::default();
        opts.isolation_level = IsolationLevel::ReadCommitted;
        let a = manager.begin(opts.clone()).unwrap();
        let b = manager.begin(opts).unwrap();

        for id in [a, b] {
            let mut registry = manager.registry.write();
            let txn = registry.get_mut(&id).unwrap();
            txn.add_operation(OperationType::Set, "k1", None, Some(serde_json::json!(id)), None)
                .unwrap();
        }

        manager.commit(a, &serde_json::json!({})).unwrap();

        let err = manager.commit(b, &serde_json::json!({})).unwrap_err();
        assert!(matches!(err, TransactionError::Isolation { op: "write-conflict", .. }));
        let txn_b = manager.get_transaction_details(b).unwrap();
        assert_eq!(txn_b.state, TransactionState::Aborted);
    }

    #[test]
    fn commit_aborts_on_write_conflict() {
        // Two transactions concurrently active over the same key, under
        // READ COMMITTED: committing one while the other is still ACTIVE
        // must be rejected.
        let manager = TransactionManager::new();
        let mut opts = TransactionOptions::default();
        opts.isolation_level = IsolationLevel::ReadCommitted;
        let id1 = manager.begin(opts.clone()).unwrap();
        let id2 = manager.begin(opts).unwrap();

        for id in [id1, id2] {
            let mut registry = manager.registry.write();
            let txn = registry.get_mut(&id).unwrap();
            txn.add_operation(OperationType::Set, "k1", None, Some(serde_json::json!(id)), None)
                .unwrap();
        }

        let err = manager.commit(id2, &serde_json::json!({})).unwrap_err();
        assert!(matches!(err, TransactionError::Isolation { .. }));
        let txn2 = manager.get_transaction_details(id2).unwrap();
        assert_eq!(txn2.state, TransactionState::Aborted);
        assert!(!manager.lock_manager.holds_locks(id2));

        // id1 is unaffected and can still commit on its own.
        manager.commit(id1, &serde_json::json!({})).unwrap();
    }

    #[test]
    fn abort_unknown_transaction_fails() {
        let manager = TransactionManager::new();
        assert!(matches!(manager.abort(999, "nope"), Err(TransactionError::NotFound(999))));
    }

    #[test]
    fn cleanup_respects_zero_as_remove_all() {
        let manager = TransactionManager::new();
        let id = manager.begin(TransactionOptions::default()).unwrap();
        manager.abort(id, "done").unwrap();
        assert_eq!(manager.cleanup(Duration::ZERO), 1);
        assert!(manager.get_transaction_details(id).is_none());
    }

    #[test]
    fn cleanup_keeps_recent_terminated_transactions() {
        let manager = TransactionManager::new();
        let id = manager.begin(TransactionOptions::default()).unwrap();
        manager.abort(id, "done").unwrap();
        assert_eq!(manager.cleanup(Duration::from_secs(3600)), 0);
        assert!(manager.get_transaction_details(id).is_some());
    }

    #[test]
    fn system_health_reports_zero_utilization_without_locks() {
        let manager = TransactionManager::new();
        let health = manager.get_system_health();
        assert_eq!(health.lock_utilization, 0.0);
        assert!(!health.has_deadlocks);
    }
}
