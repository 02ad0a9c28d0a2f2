//! Core transaction types and domain models.
//!
//! Defines the transaction state machine, its operation log, read/write
//! sets, and snapshot entries used for phantom-read detection. Values that
//! cross the boundary to the (external) record store are kept opaque as
//! [`serde_json::Value`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::common::TransactionId;

use super::error::{TransactionError, TransactionResult};

/// Isolation level for a transaction, ordered weakest to strongest so that
/// `level >= IsolationLevel::RepeatableRead` comparisons read naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_u8(self) -> u8 {
        match self {
            IsolationLevel::ReadUncommitted => 0,
            IsolationLevel::ReadCommitted => 1,
            IsolationLevel::RepeatableRead => 2,
            IsolationLevel::Serializable => 3,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(IsolationLevel::ReadUncommitted),
            1 => Some(IsolationLevel::ReadCommitted),
            2 => Some(IsolationLevel::RepeatableRead),
            3 => Some(IsolationLevel::Serializable),
            _ => None,
        }
    }
}

impl Default for IsolationLevel {
    fn default() -> Self {
        IsolationLevel::ReadCommitted
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationLevel::ReadUncommitted => write!(f, "READ UNCOMMITTED"),
            IsolationLevel::ReadCommitted => write!(f, "READ COMMITTED"),
            IsolationLevel::RepeatableRead => write!(f, "REPEATABLE READ"),
            IsolationLevel::Serializable => write!(f, "SERIALIZABLE"),
        }
    }
}

/// Transaction lifecycle state.
///
/// ```text
/// PENDING -> begin() -> ACTIVE -> commit() -> COMMITTED
///                               -> abort()  -> ABORTED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    Pending,
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::Aborted)
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }
}

/// The kind of an operation recorded in a transaction's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Set,
    Delete,
    Batch,
    Read,
}

impl OperationType {
    #[inline]
    pub fn is_read(&self) -> bool {
        matches!(self, OperationType::Read)
    }
}

/// An immutable entry in a transaction's operation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: u64,
    pub op_type: OperationType,
    pub key: String,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: SystemTime,
}

impl Operation {
    fn new(
        id: u64,
        op_type: OperationType,
        key: impl Into<String>,
        old_value: Option<serde_json::Value>,
        new_value: Option<serde_json::Value>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id,
            op_type,
            key: key.into(),
            old_value,
            new_value,
            metadata,
            timestamp: SystemTime::now(),
        }
    }
}

/// A tagged description of what a snapshot entry covers, replacing the
/// runtime-shape-branching the snapshot-range helpers originally used.
#[derive(Clone)]
pub enum SnapshotDescriptor {
    Range {
        min: Option<serde_json::Value>,
        max: Option<serde_json::Value>,
    },
    Prefix(String),
    Pattern(String),
    In(Vec<serde_json::Value>),
    IndexRange {
        fields: Vec<String>,
        values: Vec<serde_json::Value>,
    },
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl fmt::Debug for SnapshotDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotDescriptor::Range { min, max } => {
                f.debug_struct("Range").field("min", min).field("max", max).finish()
            }
            SnapshotDescriptor::Prefix(p) => f.debug_tuple("Prefix").field(p).finish(),
            SnapshotDescriptor::Pattern(p) => f.debug_tuple("Pattern").field(p).finish(),
            SnapshotDescriptor::In(v) => f.debug_tuple("In").field(v).finish(),
            SnapshotDescriptor::IndexRange { fields, values } => f
                .debug_struct("IndexRange")
                .field("fields", fields)
                .field("values", values)
                .finish(),
            SnapshotDescriptor::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// An entry in a transaction's snapshot map: the opaque expected value at
/// `key`, plus an optional descriptor for range/query/predicate/index-range
/// metadata (the `"<key>:range"`/`:query`/`:predicate`/`:index_range` side
/// entries).
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub expected_value: serde_json::Value,
    pub descriptor: Option<SnapshotDescriptor>,
}

/// The result of a caller-supplied validation callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    Invalid(String),
}

/// Opaque, caller-supplied context passed through to the validation
/// callback at commit time.
pub type ValidationContext = serde_json::Value;

/// A caller-supplied commit-time validation hook.
pub type ValidationCallback =
    Arc<dyn Fn(&Transaction, &ValidationContext) -> ValidationOutcome + Send + Sync>;

/// Options accepted by [`Transaction::new`] / the transaction manager's
/// `begin`.
#[derive(Clone)]
pub struct TransactionOptions {
    pub isolation_level: IsolationLevel,
    pub timeout: Duration,
    pub read_only: bool,
    pub validation_callback: Option<ValidationCallback>,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            isolation_level: IsolationLevel::default(),
            timeout: Duration::from_secs(60),
            read_only: false,
            validation_callback: None,
        }
    }
}

/// A single logical transaction: state machine, operation log, read/write
/// sets and snapshot map.
#[derive(Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub state: TransactionState,
    pub isolation_level: IsolationLevel,
    pub timeout: Duration,
    pub read_only: bool,
    pub start_time: Option<SystemTime>,
    pub end_time: Option<SystemTime>,
    pub abort_reason: Option<String>,
    pub operations: Vec<Operation>,
    pub read_set: BTreeSet<String>,
    pub write_set: BTreeSet<String>,
    pub snapshot: BTreeMap<String, SnapshotEntry>,
    pub validation_callback: Option<ValidationCallback>,
    next_op_id: u64,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("isolation_level", &self.isolation_level)
            .field("timeout", &self.timeout)
            .field("read_only", &self.read_only)
            .field("start_time", &self.start_time)
            .field("end_time", &self.end_time)
            .field("abort_reason", &self.abort_reason)
            .field("operations", &self.operations.len())
            .field("read_set", &self.read_set)
            .field("write_set", &self.write_set)
            .finish()
    }
}

impl Transaction {
    /// Creates a new transaction in the PENDING state. Call [`Self::begin`]
    /// to activate it.
    pub fn new(id: TransactionId, opts: TransactionOptions) -> Self {
        Self {
            id,
            state: TransactionState::Pending,
            isolation_level: opts.isolation_level,
            timeout: opts.timeout,
            read_only: opts.read_only,
            start_time: None,
            end_time: None,
            abort_reason: None,
            operations: Vec::new(),
            read_set: BTreeSet::new(),
            write_set: BTreeSet::new(),
            snapshot: BTreeMap::new(),
            validation_callback: opts.validation_callback,
            next_op_id: 0,
        }
    }

    /// Transitions PENDING -> ACTIVE and records `start_time`.
    pub fn begin(&mut self) -> TransactionResult<()> {
        if self.state != TransactionState::Pending {
            return Err(TransactionError::begin_state(self.id));
        }
        self.state = TransactionState::Active;
        self.start_time = Some(SystemTime::now());
        Ok(())
    }

    /// Appends an operation to the log and updates the read or write set.
    pub fn add_operation(
        &mut self,
        op_type: OperationType,
        key: impl Into<String>,
        old_value: Option<serde_json::Value>,
        new_value: Option<serde_json::Value>,
        metadata: Option<serde_json::Value>,
    ) -> TransactionResult<Operation> {
        if self.state != TransactionState::Active {
            return Err(TransactionError::inactive(self.id, "write"));
        }
        if self.read_only && !op_type.is_read() {
            return Err(TransactionError::readonly_write(self.id));
        }
        if let Some(start) = self.start_time {
            if SystemTime::now()
                .duration_since(start)
                .map(|elapsed| elapsed > self.timeout)
                .unwrap_or(false)
            {
                return Err(TransactionError::timed_out(self.id));
            }
        }

        let key = key.into();
        let id = self.next_op_id;
        self.next_op_id += 1;
        let op = Operation::new(id, op_type, key.clone(), old_value, new_value, metadata);

        if op_type.is_read() {
            self.read_set.insert(key);
        } else {
            self.write_set.insert(key);
        }
        self.operations.push(op.clone());
        Ok(op)
    }

    /// Records a snapshot entry used by the isolation validator's
    /// phantom-read check.
    pub fn add_snapshot_entry(
        &mut self,
        key: impl Into<String>,
        expected_value: serde_json::Value,
        descriptor: Option<SnapshotDescriptor>,
    ) {
        self.snapshot.insert(
            key.into(),
            SnapshotEntry {
                expected_value,
                descriptor,
            },
        );
    }

    /// Runs the validation callback (if any) and, on success, transitions to
    /// COMMITTED. Callers (the transaction manager) are expected to have
    /// already performed lock acquisition and isolation validation before
    /// calling this.
    pub fn commit(&mut self, context: &ValidationContext) -> TransactionResult<()> {
        if self.state != TransactionState::Active {
            return Err(TransactionError::inactive(self.id, "commit"));
        }
        if let Some(callback) = self.validation_callback.clone() {
            match callback(self, context) {
                ValidationOutcome::Valid => {}
                ValidationOutcome::Invalid(reason) => {
                    self.abort(reason.clone());
                    return Err(TransactionError::validation_failed(self.id, reason));
                }
            }
        }
        self.state = TransactionState::Committed;
        self.end_time = Some(SystemTime::now());
        Ok(())
    }

    /// Transitions to ABORTED. Idempotent: a second call on a terminal
    /// transaction is a no-op.
    pub fn abort(&mut self, reason: impl Into<String>) {
        if self.state.is_terminal() {
            return;
        }
        self.state = TransactionState::Aborted;
        self.end_time = Some(SystemTime::now());
        self.abort_reason = Some(reason.into());
    }

    /// Synthesizes rollback operations for every non-READ entry, in reverse
    /// log order.
    pub fn get_rollback_operations(&self) -> TransactionResult<Vec<Operation>> {
        let mut rollbacks = Vec::new();
        for op in self.operations.iter().rev() {
            match op.op_type {
                OperationType::Read => continue,
                OperationType::Set => {
                    if op.old_value.is_none() {
                        rollbacks.push(Operation::new(
                            0,
                            OperationType::Delete,
                            op.key.clone(),
                            op.new_value.clone(),
                            None,
                            op.metadata.clone(),
                        ));
                    } else {
                        rollbacks.push(Operation::new(
                            0,
                            OperationType::Set,
                            op.key.clone(),
                            op.new_value.clone(),
                            op.old_value.clone(),
                            op.metadata.clone(),
                        ));
                    }
                }
                OperationType::Delete => {
                    rollbacks.push(Operation::new(
                        0,
                        OperationType::Set,
                        op.key.clone(),
                        None,
                        op.old_value.clone(),
                        op.metadata.clone(),
                    ));
                }
                OperationType::Batch => {
                    return Err(TransactionError::rollback_unsupported(self.id, op.id));
                }
            }
        }
        Ok(rollbacks)
    }

    /// Elapsed time since `start_time`, using `end_time` if set, else now.
    /// `None` only if the transaction never began.
    pub fn get_duration(&self) -> Option<Duration> {
        let start = self.start_time?;
        let end = self.end_time.unwrap_or_else(SystemTime::now);
        Some(end.duration_since(start).unwrap_or(Duration::ZERO))
    }

    /// True if `other` and `self` have overlapping active time windows,
    /// treating an absent `end_time` as "now".
    pub fn overlaps_with(&self, other: &Transaction) -> bool {
        let (Some(a_start), Some(b_start)) = (self.start_time, other.start_time) else {
            return false;
        };
        let now = SystemTime::now();
        let a_end = self.end_time.unwrap_or(now);
        let b_end = other.end_time.unwrap_or(now);
        a_start < b_end && b_start < a_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_txn(id: TransactionId) -> Transaction {
        let mut txn = Transaction::new(id, TransactionOptions::default());
        txn.begin().unwrap();
        txn
    }

    #[test]
    fn begin_requires_pending() {
        let mut txn = active_txn(1);
        assert!(matches!(txn.begin(), Err(TransactionError::State { op: "begin", .. })));
    }

    #[test]
    fn add_operation_updates_correct_set() {
        let mut txn = active_txn(1);
        txn.add_operation(OperationType::Read, "k1", None, None, None).unwrap();
        txn.add_operation(OperationType::Set, "k2", None, Some(serde_json::json!(1)), None)
            .unwrap();
        assert!(txn.read_set.contains("k1"));
        assert!(txn.write_set.contains("k2"));
        assert!(!txn.write_set.contains("k1"));
    }

    #[test]
    fn readonly_transaction_rejects_writes() {
        let mut opts = TransactionOptions::default();
        opts.read_only = true;
        let mut txn = Transaction::new(1, opts);
        txn.begin().unwrap();
        let err = txn
            .add_operation(OperationType::Set, "k1", None, Some(serde_json::json!(1)), None)
            .unwrap_err();
        assert!(matches!(err, TransactionError::State { op: "write", .. }));
    }

    #[test]
    fn abort_is_idempotent() {
        let mut txn = active_txn(1);
        txn.abort("first");
        let end_time = txn.end_time;
        txn.abort("second");
        assert_eq!(txn.abort_reason.as_deref(), Some("first"));
        assert_eq!(txn.end_time, end_time);
    }

    #[test]
    fn commit_on_non_active_fails() {
        let mut txn = Transaction::new(1, TransactionOptions::default());
        let err = txn.commit(&serde_json::json!({})).unwrap_err();
        assert!(matches!(err, TransactionError::State { op: "commit", .. }));
    }

    #[test]
    fn rollback_of_delete_round_trips() {
        let mut txn = active_txn(1);
        txn.add_operation(
            OperationType::Delete,
            "u1",
            Some(serde_json::json!({"name": "x"})),
            None,
            None,
        )
        .unwrap();

        let rollback = txn.get_rollback_operations().unwrap();
        assert_eq!(rollback.len(), 1);
        assert_eq!(rollback[0].op_type, OperationType::Set);
        assert_eq!(rollback[0].old_value, None);
        assert_eq!(rollback[0].new_value, Some(serde_json::json!({"name": "x"})));

        // Feeding the rollback back through synthesis restores a DELETE.
        let mut replay = active_txn(2);
        replay
            .add_operation(
                rollback[0].op_type,
                rollback[0].key.clone(),
                rollback[0].old_value.clone(),
                rollback[0].new_value.clone(),
                None,
            )
            .unwrap();
        let re_rollback = replay.get_rollback_operations().unwrap();
        assert_eq!(re_rollback[0].op_type, OperationType::Delete);
        assert_eq!(re_rollback[0].old_value, Some(serde_json::json!({"name": "x"})));
    }

    #[test]
    fn rollback_of_set_swaps_old_and_new() {
        let mut txn = active_txn(1);
        txn.add_operation(
            OperationType::Set,
            "k1",
            Some(serde_json::json!(1)),
            Some(serde_json::json!(2)),
            None,
        )
        .unwrap();
        let rollback = txn.get_rollback_operations().unwrap();
        assert_eq!(rollback[0].old_value, Some(serde_json::json!(2)));
        assert_eq!(rollback[0].new_value, Some(serde_json::json!(1)));
    }

    #[test]
    fn rollback_of_insert_set_synthesizes_delete() {
        let mut txn = active_txn(1);
        txn.add_operation(OperationType::Set, "k1", None, Some(serde_json::json!(1)), None)
            .unwrap();
        let rollback = txn.get_rollback_operations().unwrap();
        assert_eq!(rollback[0].op_type, OperationType::Delete);
    }

    #[test]
    fn rollback_of_batch_fails() {
        let mut txn = active_txn(1);
        txn.add_operation(OperationType::Batch, "k1", None, None, None).unwrap();
        assert!(matches!(
            txn.get_rollback_operations(),
            Err(TransactionError::Rollback { .. })
        ));
    }

    #[test]
    fn duration_is_monotone_after_termination() {
        let mut txn = active_txn(1);
        txn.abort("done");
        let duration = txn.get_duration().unwrap();
        assert!(duration >= Duration::ZERO);
        assert!(txn.end_time.unwrap() >= txn.start_time.unwrap());
    }

    #[test]
    fn pending_transaction_has_no_duration() {
        let txn = Transaction::new(1, TransactionOptions::default());
        assert!(txn.get_duration().is_none());
    }
}
