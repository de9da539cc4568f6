//! Wire DTOs. Request postings stay strings all the way into the domain so
//! the event payload records exactly what the caller sent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tally_accounting::{PostTransaction, PostingDraft};
use tally_infra::store::{AccountRecord, LedgerRecord, PostingView, TransactionRecord};
use tally_infra::webhooks::WebhookEndpoint;

#[derive(Debug, Deserialize)]
pub struct PostingDto {
    pub account_code: String,
    pub direction: String,
    pub amount: String,
}

#[derive(Debug, Deserialize)]
pub struct PostTransactionRequest {
    #[serde(default)]
    pub idempotency_key: String,
    #[serde(default)]
    pub external_id: String,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
    pub postings: Vec<PostingDto>,
}

impl PostTransactionRequest {
    pub fn into_command(self) -> PostTransaction {
        PostTransaction {
            idempotency_key: self.idempotency_key,
            external_id: self.external_id,
            currency: self.currency,
            occurred_at: self.occurred_at,
            postings: self
                .postings
                .into_iter()
                .map(|p| PostingDraft {
                    account_code: p.account_code,
                    direction: p.direction,
                    amount: p.amount,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PostTransactionResponse {
    pub transaction_id: String,
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct CreateLedgerRequest {
    pub name: String,
    pub currency: String,
}

#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    pub id: String,
    pub name: String,
    pub currency: String,
}

impl From<LedgerRecord> for LedgerResponse {
    fn from(record: LedgerRecord) -> Self {
        Self {
            id: record.id.to_string(),
            name: record.name,
            currency: record.currency,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    pub kind: String,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub code: String,
    pub name: String,
    pub kind: String,
    /// Decimal rendered as a string; clients must not touch it as a float.
    pub balance: String,
    pub created_at: DateTime<Utc>,
}

impl From<AccountRecord> for AccountResponse {
    fn from(record: AccountRecord) -> Self {
        Self {
            code: record.code,
            name: record.name,
            kind: record.kind.as_str().to_string(),
            balance: record.balance.to_string(),
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PostingResponse {
    pub account_code: String,
    pub direction: String,
    pub amount: String,
}

impl From<PostingView> for PostingResponse {
    fn from(view: PostingView) -> Self {
        Self {
            account_code: view.account_code,
            direction: view.direction.as_str().to_string(),
            amount: view.amount.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub transaction_id: String,
    pub external_id: String,
    pub currency: String,
    pub amount: String,
    pub occurred_at: DateTime<Utc>,
    pub postings: Vec<PostingResponse>,
}

impl TransactionResponse {
    pub fn new(record: TransactionRecord, postings: Vec<PostingView>) -> Self {
        Self {
            transaction_id: record.id.to_string(),
            external_id: record.external_id,
            currency: record.currency,
            amount: record.amount.to_string(),
            occurred_at: record.occurred_at,
            postings: postings.into_iter().map(PostingResponse::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub id: String,
    pub url: String,
    pub is_active: bool,
    /// Present only in the creation response; redacted everywhere else.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WebhookResponse {
    pub fn redacted(endpoint: WebhookEndpoint) -> Self {
        Self {
            id: endpoint.id.to_string(),
            url: endpoint.url,
            is_active: endpoint.is_active,
            secret: None,
            created_at: endpoint.created_at,
        }
    }

    pub fn with_secret(endpoint: WebhookEndpoint) -> Self {
        Self {
            id: endpoint.id.to_string(),
            url: endpoint.url,
            is_active: endpoint.is_active,
            secret: Some(endpoint.secret),
            created_at: endpoint.created_at,
        }
    }
}
