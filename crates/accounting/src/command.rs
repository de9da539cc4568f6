use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::LedgerError;
use crate::posting::{parse_amount, Direction, Posting, PostingDraft};

/// Command: record one immutable double-entry transaction.
///
/// `postings` carries the caller's strings verbatim; they are what gets
/// embedded in the event payload. [`PostTransaction::validate`] is the only
/// admission gate for the double-entry law.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostTransaction {
    /// Deduplicates submissions per ledger. Empty = no deduplication.
    pub idempotency_key: String,
    /// Caller-side correlation id, stored but never interpreted.
    pub external_id: String,
    pub currency: String,
    /// Business time, supplied by the caller.
    pub occurred_at: DateTime<Utc>,
    pub postings: Vec<PostingDraft>,
}

/// The outcome of validation: typed postings plus the invariant totals.
///
/// `debit_total == credit_total` holds by construction; the value doubles as
/// the transaction amount recorded on the read model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTransaction {
    pub postings: Vec<Posting>,
    pub total: Decimal,
}

impl PostTransaction {
    /// Validate the double-entry invariants without touching storage.
    ///
    /// Account existence is checked by the write path under row locks; every
    /// other rule lives here.
    pub fn validate(&self) -> Result<ValidatedTransaction, LedgerError> {
        if self.postings.len() < 2 {
            return Err(LedgerError::TooFewPostings {
                count: self.postings.len(),
            });
        }

        let mut postings = Vec::with_capacity(self.postings.len());
        let mut debits = Decimal::ZERO;
        let mut credits = Decimal::ZERO;

        for draft in &self.postings {
            let direction = Direction::parse(&draft.direction)?;
            let amount = parse_amount(&draft.amount)?;

            match direction {
                Direction::Debit => debits += amount,
                Direction::Credit => credits += amount,
            }

            postings.push(Posting {
                account_code: draft.account_code.clone(),
                direction,
                amount,
            });
        }

        if debits != credits {
            return Err(LedgerError::UnbalancedPostings { debits, credits });
        }

        Ok(ValidatedTransaction {
            postings,
            total: debits,
        })
    }

    /// Distinct account codes in ascending order.
    ///
    /// This is the global lock-acquisition order for the write path; row
    /// locks taken in any other order can deadlock under concurrent postings
    /// that touch overlapping account sets.
    pub fn account_codes_sorted(&self) -> Vec<String> {
        let mut codes: Vec<String> = self
            .postings
            .iter()
            .map(|p| p.account_code.clone())
            .collect();
        codes.sort();
        codes.dedup();
        codes
    }
}
