//! Ledger (tenant book) rows. Created by the administrative path; the core
//! only resolves them for scoping.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use tally_core::LedgerId;

use super::{map_sqlx_error, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LedgerRecord {
    pub id: Uuid,
    pub name: String,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerRecord {
    pub fn ledger_id(&self) -> LedgerId {
        LedgerId::from_uuid(self.id)
    }
}

#[derive(Debug, Clone)]
pub struct NewLedger {
    pub name: String,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct LedgerStore {
    pool: PgPool,
}

impl LedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self), fields(name = %ledger.name), err)]
    pub async fn create(&self, ledger: NewLedger) -> Result<LedgerRecord, StoreError> {
        sqlx::query_as::<_, LedgerRecord>(
            r#"
            INSERT INTO ledgers (id, name, currency)
            VALUES ($1, $2, $3)
            RETURNING id, name, currency, created_at
            "#,
        )
        .bind(LedgerId::new().as_uuid())
        .bind(&ledger.name)
        .bind(&ledger.currency)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_ledger", e))
    }

    pub async fn get(&self, id: LedgerId) -> Result<Option<LedgerRecord>, StoreError> {
        sqlx::query_as::<_, LedgerRecord>(
            "SELECT id, name, currency, created_at FROM ledgers WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_ledger", e))
    }
}
