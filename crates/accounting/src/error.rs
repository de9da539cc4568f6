use rust_decimal::Decimal;
use thiserror::Error;

/// Deterministic command-validation failures, surfaced to the caller as
/// client errors. Nothing is written when any of these is raised.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("account '{code}' does not exist in this ledger")]
    UnknownAccount { code: String },

    #[error("unbalanced postings: debits {debits} != credits {credits}")]
    UnbalancedPostings { debits: Decimal, credits: Decimal },

    #[error("a transaction requires at least two postings (got {count})")]
    TooFewPostings { count: usize },

    #[error("invalid amount '{value}': {reason}")]
    InvalidAmount { value: String, reason: String },

    #[error("invalid direction '{value}': must be 'debit' or 'credit'")]
    InvalidDirection { value: String },

    #[error("an idempotency key is required by this ledger's posting policy")]
    MissingIdempotencyKey,
}
