//! Crate-level error boundary.
//!
//! Wraps [`crate::transaction::error::TransactionError`] for callers who want
//! one error type at the top of the crate rather than reaching into
//! `transaction::error` directly.

use thiserror::Error;

use crate::transaction::error::TransactionError;

#[derive(Error, Debug, Clone)]
pub enum DbError {
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
