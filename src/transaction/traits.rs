//! Extension points for the four load-bearing components.
//!
//! These traits let a caller swap in an alternative lock manager, isolation
//! validator, deadlock detector or transaction manager without retyping the
//! signature this core calls internally. Each trait is implemented below for
//! the concrete type that already does the real work (`LockManager`,
//! `IsolationValidator`, `TransactionManager`), so the trait boundary is
//! exercised by production code, not only by test mocks.

use std::time::Duration;

use crate::common::TransactionId;

use super::deadlock::{self, DeadlockOptions, DeadlockReport};
use super::error::TransactionResult;
use super::isolation::IsolationValidator;
use super::lock_manager::{LockManager, LockType};
use super::manager::TransactionManager;
use super::types::{Transaction, TransactionOptions, TransactionState, ValidationContext};

/// Trait for transaction lifecycle management.
pub trait TransactionLifecycle: Send + Sync {
    fn begin(&self, opts: TransactionOptions) -> TransactionResult<TransactionId>;
    fn commit(&self, txn_id: TransactionId, context: &ValidationContext) -> TransactionResult<()>;
    fn abort(&self, txn_id: TransactionId, reason: String) -> TransactionResult<()>;
    fn get_state(&self, txn_id: TransactionId) -> Option<TransactionState>;
    fn is_active(&self, txn_id: TransactionId) -> bool;
}

impl TransactionLifecycle for TransactionManager {
    fn begin(&self, opts: TransactionOptions) -> TransactionResult<TransactionId> {
        TransactionManager::begin(self, opts)
    }

    fn commit(&self, txn_id: TransactionId, context: &ValidationContext) -> TransactionResult<()> {
        TransactionManager::commit(self, txn_id, context)
    }

    fn abort(&self, txn_id: TransactionId, reason: String) -> TransactionResult<()> {
        TransactionManager::abort(self, txn_id, reason)
    }

    fn get_state(&self, txn_id: TransactionId) -> Option<TransactionState> {
        self.get_transaction_details(txn_id).map(|txn| txn.state)
    }

    fn is_active(&self, txn_id: TransactionId) -> bool {
        self.get_transaction_details(txn_id)
            .map(|txn| txn.state == TransactionState::Active)
            .unwrap_or(false)
    }
}

/// Trait for lock management.
pub trait LockManagement: Send + Sync {
    fn acquire_lock(
        &self,
        txn_id: TransactionId,
        resource: &str,
        lock_type: LockType,
        timeout: Duration,
    ) -> TransactionResult<()>;

    fn release_lock(&self, txn_id: TransactionId, resource: &str) -> bool;
    fn release_all_locks(&self, txn_id: TransactionId) -> usize;
    fn holds_locks(&self, txn_id: TransactionId) -> bool;
}

impl LockManagement for LockManager {
    fn acquire_lock(
        &self,
        txn_id: TransactionId,
        resource: &str,
        lock_type: LockType,
        timeout: Duration,
    ) -> TransactionResult<()> {
        LockManager::acquire_lock(self, txn_id, resource, lock_type, timeout)
    }

    fn release_lock(&self, txn_id: TransactionId, resource: &str) -> bool {
        LockManager::release_lock(self, txn_id, resource)
    }

    fn release_all_locks(&self, txn_id: TransactionId) -> usize {
        LockManager::release_all_locks(self, txn_id)
    }

    fn holds_locks(&self, txn_id: TransactionId) -> bool {
        LockManager::holds_locks(self, txn_id)
    }
}

/// Trait for deadlock detection.
pub trait DeadlockDetection: Send + Sync {
    fn detect(&self, transactions: &[Transaction], opts: &DeadlockOptions) -> DeadlockReport;
}

impl DeadlockDetection for TransactionManager {
    fn detect(&self, transactions: &[Transaction], opts: &DeadlockOptions) -> DeadlockReport {
        deadlock::detect(transactions, self.lock_manager(), opts)
    }
}

/// Trait for pre-commit isolation validation.
pub trait Validation: Send + Sync {
    fn validate(&self, txn: &Transaction, peers: &[&Transaction]) -> TransactionResult<()>;
}

impl Validation for IsolationValidator {
    fn validate(&self, txn: &Transaction, peers: &[&Transaction]) -> TransactionResult<()> {
        IsolationValidator::validate(self, txn, peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_manager_satisfies_transaction_lifecycle() {
        fn begin_and_commit(tm: &dyn TransactionLifecycle) -> TransactionId {
            let id = tm.begin(TransactionOptions::default()).unwrap();
            tm.commit(id, &serde_json::json!({})).unwrap();
            id
        }

        let manager = TransactionManager::new();
        let id = begin_and_commit(&manager);
        assert_eq!(
            TransactionLifecycle::get_state(&manager, id),
            Some(TransactionState::Committed)
        );
        assert!(!TransactionLifecycle::is_active(&manager, id));
    }

    #[test]
    fn lock_manager_satisfies_lock_management() {
        fn acquire_and_release(lm: &dyn LockManagement) {
            lm.acquire_lock(1, "k1", LockType::Exclusive, Duration::from_millis(50))
                .unwrap();
            assert!(lm.holds_locks(1));
            assert_eq!(lm.release_all_locks(1), 1);
        }

        let lock_manager = LockManager::new();
        acquire_and_release(&lock_manager);
    }

    #[test]
    fn isolation_validator_satisfies_validation() {
        use super::super::keys::KeyRelationshipAnalyzer;
        use std::sync::Arc;

        let validator = IsolationValidator::new(Arc::new(KeyRelationshipAnalyzer::new()));
        let mut txn = Transaction::new(1, TransactionOptions::default());
        txn.begin().unwrap();

        let dyn_validator: &dyn Validation = &validator;
        assert!(dyn_validator.validate(&txn, &[]).is_ok());
    }

    #[test]
    fn transaction_manager_satisfies_deadlock_detection() {
        let manager = TransactionManager::new();
        let report = DeadlockDetection::detect(&manager, &[], &DeadlockOptions::default());
        assert!(report.deadlocks.is_empty());
    }
}
