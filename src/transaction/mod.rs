//! Transaction concurrency core.
//!
//! Six cooperating components, built leaves-first:
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`types`] | `Transaction`, `IsolationLevel`, operation log, snapshot entries |
//! | [`error`] | Transaction-specific error taxonomy |
//! | [`keys`] | Key relationship analysis for phantom-read detection |
//! | [`lock_manager`] | Shared/exclusive record locking |
//! | [`isolation`] | Pre-commit isolation-level validation |
//! | [`deadlock`] | Wait-for-graph and resource-graph deadlock detection |
//! | [`statistics`] | Transaction lifecycle counters |
//! | [`traits`] | Extensibility traits for the above |
//! | [`manager`] | Coordinates all of the above |
//!
//! # Quick start
//!
//! ```rust,ignore
//! use rusty_db::transaction::{TransactionManager, TransactionOptions};
//!
//! let manager = TransactionManager::new();
//! let txn_id = manager.begin(TransactionOptions::default())?;
//! manager.commit(txn_id, &serde_json::json!({}))?;
//! ```

pub mod deadlock;
pub mod error;
pub mod isolation;
pub mod keys;
pub mod lock_manager;
pub mod manager;
pub mod statistics;
pub mod traits;
pub mod types;

pub use crate::common::TransactionId;

pub use deadlock::{
    DeadlockEntry, DeadlockOptions, DeadlockReport, ResourceGraph, SuspectedConflict, SuspectedDeadlock,
};
pub use error::{TransactionError, TransactionResult};
pub use isolation::IsolationValidator;
pub use keys::KeyRelationshipAnalyzer;
pub use lock_manager::{LockManager, LockStats, LockType, RecordLockInfo};
pub use manager::{CombinedStats, SystemHealth, TransactionManager};
pub use statistics::{ComponentStats, StatisticsSummary, TransactionStatistics};
pub use traits::{DeadlockDetection, LockManagement, TransactionLifecycle, Validation};
pub use types::{
    IsolationLevel, Operation, OperationType, SnapshotDescriptor, SnapshotEntry, Transaction,
    TransactionOptions, TransactionState, ValidationCallback, ValidationContext, ValidationOutcome,
};
