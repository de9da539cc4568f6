use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tally_accounting::PostingDraft;
use tally_core::TransactionId;

use crate::event::Event;
use crate::time::rfc3339_nanos;
use crate::EVENT_TRANSACTION_POSTED;

/// One leg of the transaction exactly as the caller supplied it.
///
/// Strings are verbatim; the payload must not normalize amounts or
/// directions, otherwise replays and signature checks diverge from what the
/// caller sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingRecord {
    pub account_code: String,
    pub direction: String,
    pub amount: String,
}

impl From<PostingDraft> for PostingRecord {
    fn from(draft: PostingDraft) -> Self {
        Self {
            account_code: draft.account_code,
            direction: draft.direction,
            amount: draft.amount,
        }
    }
}

/// Payload of the `TransactionPosted` event (wire shape, stable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPosted {
    pub transaction_id: TransactionId,
    pub external_id: String,
    pub currency: String,
    #[serde(with = "rfc3339_nanos")]
    pub occurred_at: DateTime<Utc>,
    pub postings: Vec<PostingRecord>,
}

impl TransactionPosted {
    pub fn new(
        transaction_id: TransactionId,
        external_id: String,
        currency: String,
        occurred_at: DateTime<Utc>,
        postings: Vec<PostingDraft>,
    ) -> Self {
        Self {
            transaction_id,
            external_id,
            currency,
            occurred_at,
            postings: postings.into_iter().map(PostingRecord::from).collect(),
        }
    }
}

impl Event for TransactionPosted {
    fn event_type(&self) -> &'static str {
        EVENT_TRANSACTION_POSTED
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
