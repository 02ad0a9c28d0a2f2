//! Transaction-specific error types.
//!
//! Structured error handling for the transaction subsystem via `thiserror`,
//! grouped the way the design's error taxonomy groups them: transaction-state
//! errors, validation errors, isolation errors, concurrency errors and
//! rollback-synthesis errors.

use thiserror::Error;

use crate::common::TransactionId;

/// Result type alias for transaction operations.
pub type TransactionResult<T> = std::result::Result<T, TransactionError>;

/// Comprehensive error type for transaction operations.
#[derive(Debug, Clone, Error)]
pub enum TransactionError {
    /// A lifecycle operation was attempted from an illegal state, or an
    /// operation violated a lifecycle rule (read-only write, wall-clock
    /// timeout). `op` names the lifecycle operation that failed: one of
    /// `"begin"`, `"write"`, `"timeout"`, `"commit"`.
    #[error("transaction {txn_id} state error during '{op}': {message}")]
    State {
        txn_id: TransactionId,
        op: &'static str,
        message: String,
    },

    /// The caller-supplied validation callback returned a non-true result
    /// during commit.
    #[error("transaction {txn_id} validation failed: {reason}")]
    Validation { txn_id: TransactionId, reason: String },

    /// A pre-commit isolation check failed. `op` names the violated clause:
    /// one of `"write-conflict"`, `"repeatable-read-violation"`,
    /// `"phantom-read"`, `"serialization-conflict"`,
    /// `"unknown-isolation-level"`.
    #[error(
        "transaction {txn_id} isolation violation during '{op}'{}",
        resource.as_deref().map(|r| format!(" on '{r}'")).unwrap_or_default()
    )]
    Isolation {
        txn_id: TransactionId,
        op: &'static str,
        resource: Option<String>,
    },

    /// Lock acquisition did not succeed within the requested timeout.
    #[error("transaction {txn_id} timed out acquiring a lock on '{resource}'")]
    Concurrency {
        txn_id: TransactionId,
        resource: String,
        op: &'static str,
    },

    /// Rollback synthesis encountered an operation type it cannot invert
    /// (batch operations are opaque).
    #[error("transaction {txn_id} rollback synthesis failed for operation {op_id}: unsupported operation type")]
    Rollback { txn_id: TransactionId, op_id: u64 },

    /// No transaction with this id is registered.
    #[error("transaction {0} not found")]
    NotFound(TransactionId),
}

impl TransactionError {
    pub fn begin_state(txn_id: TransactionId) -> Self {
        TransactionError::State {
            txn_id,
            op: "begin",
            message: "begin() is only legal from the PENDING state".to_string(),
        }
    }

    pub fn readonly_write(txn_id: TransactionId) -> Self {
        TransactionError::State {
            txn_id,
            op: "write",
            message: "transaction is read-only".to_string(),
        }
    }

    pub fn inactive(txn_id: TransactionId, op: &'static str) -> Self {
        TransactionError::State {
            txn_id,
            op,
            message: format!("transaction is not ACTIVE; '{op}' requires ACTIVE state"),
        }
    }

    pub fn timed_out(txn_id: TransactionId) -> Self {
        TransactionError::State {
            txn_id,
            op: "timeout",
            message: "transaction exceeded its wall-clock timeout".to_string(),
        }
    }

    pub fn validation_failed(txn_id: TransactionId, reason: impl Into<String>) -> Self {
        TransactionError::Validation {
            txn_id,
            reason: reason.into(),
        }
    }

    pub fn write_conflict(txn_id: TransactionId, resource: impl Into<String>) -> Self {
        TransactionError::Isolation {
            txn_id,
            op: "write-conflict",
            resource: Some(resource.into()),
        }
    }

    pub fn repeatable_read_violation(txn_id: TransactionId, resource: impl Into<String>) -> Self {
        TransactionError::Isolation {
            txn_id,
            op: "repeatable-read-violation",
            resource: Some(resource.into()),
        }
    }

    pub fn phantom_read(txn_id: TransactionId, resource: impl Into<String>) -> Self {
        TransactionError::Isolation {
            txn_id,
            op: "phantom-read",
            resource: Some(resource.into()),
        }
    }

    pub fn serialization_conflict(txn_id: TransactionId, resource: impl Into<String>) -> Self {
        TransactionError::Isolation {
            txn_id,
            op: "serialization-conflict",
            resource: Some(resource.into()),
        }
    }

    pub fn unknown_isolation_level(txn_id: TransactionId) -> Self {
        TransactionError::Isolation {
            txn_id,
            op: "unknown-isolation-level",
            resource: None,
        }
    }

    pub fn lock_timeout(txn_id: TransactionId, resource: impl Into<String>) -> Self {
        TransactionError::Concurrency {
            txn_id,
            resource: resource.into(),
            op: "lock",
        }
    }

    pub fn rollback_unsupported(txn_id: TransactionId, op_id: u64) -> Self {
        TransactionError::Rollback { txn_id, op_id }
    }

    pub fn not_found(txn_id: TransactionId) -> Self {
        TransactionError::NotFound(txn_id)
    }

    /// True for errors where a caller-driven retry is reasonable.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            TransactionError::Concurrency { .. } | TransactionError::Isolation { .. }
        )
    }

    /// True for the errors the deadlock detector's concerns overlap with
    /// (lock timeouts can be, but are not necessarily, deadlock symptoms).
    pub fn is_deadlock(&self) -> bool {
        matches!(self, TransactionError::Concurrency { op: "lock", .. })
    }

    pub fn is_lock_error(&self) -> bool {
        matches!(self, TransactionError::Concurrency { .. })
    }

    pub fn transaction_id(&self) -> TransactionId {
        match self {
            TransactionError::State { txn_id, .. } => *txn_id,
            TransactionError::Validation { txn_id, .. } => *txn_id,
            TransactionError::Isolation { txn_id, .. } => *txn_id,
            TransactionError::Concurrency { txn_id, .. } => *txn_id,
            TransactionError::Rollback { txn_id, .. } => *txn_id,
            TransactionError::NotFound(txn_id) => *txn_id,
        }
    }
}
