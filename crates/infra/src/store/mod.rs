//! Postgres access layer: row types, stores, and sqlx error mapping.

pub mod accounts;
pub mod events;
pub mod ledgers;
pub mod transactions;

use thiserror::Error;

pub use accounts::{AccountRecord, AccountStore, NewAccount};
pub use events::{EventRecord, NewEvent};
pub use ledgers::{LedgerRecord, LedgerStore, NewLedger};
pub use transactions::{PostingView, TransactionRecord, TransactionStore};

/// Storage-layer error.
///
/// Unique-constraint violations are split out because the write path turns
/// them into logical outcomes (idempotent replay) rather than failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated in {operation}: {message}")]
    UniqueViolation { operation: String, message: String },

    #[error("row not found in {operation}")]
    NotFound { operation: String },

    #[error("database error in {operation}: {message}")]
    Database { operation: String, message: String },

    #[error("invalid stored data in {operation}: {message}")]
    Corrupt { operation: String, message: String },
}

impl StoreError {
    pub fn corrupt(operation: &str, message: impl Into<String>) -> Self {
        Self::Corrupt {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }
}

/// PostgreSQL SQLSTATE for unique-constraint violations.
const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";

/// Map a sqlx error raised by `operation` to a [`StoreError`].
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_string();
            if db_err.code().as_deref() == Some(SQLSTATE_UNIQUE_VIOLATION) {
                StoreError::UniqueViolation {
                    operation: operation.to_string(),
                    message,
                }
            } else {
                StoreError::Database {
                    operation: operation.to_string(),
                    message,
                }
            }
        }
        sqlx::Error::RowNotFound => StoreError::NotFound {
            operation: operation.to_string(),
        },
        other => StoreError::Database {
            operation: operation.to_string(),
            message: other.to_string(),
        },
    }
}
