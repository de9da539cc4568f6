//! Transaction/posting read models, maintained by the projector and queried
//! by the read routes. No core invariant lives here.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use tally_accounting::Direction;
use tally_core::{LedgerId, TransactionId};

use super::{map_sqlx_error, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub ledger_id: LedgerId,
    pub external_id: String,
    pub currency: String,
    pub amount: Decimal,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: Uuid,
    ledger_id: Uuid,
    external_id: String,
    currency: String,
    amount: Decimal,
    occurred_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<TransactionRow> for TransactionRecord {
    fn from(row: TransactionRow) -> Self {
        TransactionRecord {
            id: TransactionId::from_uuid(row.id),
            ledger_id: LedgerId::from_uuid(row.ledger_id),
            external_id: row.external_id,
            currency: row.currency,
            amount: row.amount,
            occurred_at: row.occurred_at,
            created_at: row.created_at,
        }
    }
}

/// One projected posting, joined with its account code for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingView {
    pub account_code: String,
    pub direction: Direction,
    pub amount: Decimal,
}

#[derive(Debug, FromRow)]
struct PostingViewRow {
    account_code: String,
    direction: String,
    amount: Decimal,
}

impl PostingViewRow {
    fn into_view(self) -> Result<PostingView, StoreError> {
        let direction = Direction::parse(&self.direction).map_err(|_| {
            StoreError::corrupt("posting_view", format!("direction '{}'", self.direction))
        })?;
        Ok(PostingView {
            account_code: self.account_code,
            direction,
            amount: self.amount,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TransactionStore {
    pool: PgPool,
}

impl TransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(
        &self,
        ledger_id: LedgerId,
        id: TransactionId,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, ledger_id, external_id, currency, amount, occurred_at, created_at
            FROM transactions
            WHERE ledger_id = $1 AND id = $2
            "#,
        )
        .bind(ledger_id.as_uuid())
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_transaction", e))?;

        Ok(row.map(TransactionRecord::from))
    }

    pub async fn list(
        &self,
        ledger_id: LedgerId,
        limit: i64,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, ledger_id, external_id, currency, amount, occurred_at, created_at
            FROM transactions
            WHERE ledger_id = $1
            ORDER BY occurred_at DESC, id
            LIMIT $2
            "#,
        )
        .bind(ledger_id.as_uuid())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_transactions", e))?;

        Ok(rows.into_iter().map(TransactionRecord::from).collect())
    }

    pub async fn postings(
        &self,
        ledger_id: LedgerId,
        id: TransactionId,
    ) -> Result<Vec<PostingView>, StoreError> {
        let rows = sqlx::query_as::<_, PostingViewRow>(
            r#"
            SELECT a.code AS account_code, p.direction, p.amount
            FROM postings p
            JOIN accounts a ON a.id = p.account_id
            WHERE p.ledger_id = $1 AND p.transaction_id = $2
            ORDER BY p.id
            "#,
        )
        .bind(ledger_id.as_uuid())
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_transaction_postings", e))?;

        rows.into_iter().map(|r| r.into_view()).collect()
    }
}
