//! Account rows: the chart of accounts and the running balances.
//!
//! The write path only ever locks account rows (the ordering discipline lives
//! in the command service); balances are mutated exclusively by the projector.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::instrument;
use uuid::Uuid;

use tally_accounting::AccountKind;
use tally_core::{AccountId, LedgerId};

use super::{map_sqlx_error, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub id: AccountId,
    pub ledger_id: LedgerId,
    pub code: String,
    pub name: String,
    pub kind: AccountKind,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct AccountRow {
    id: Uuid,
    ledger_id: Uuid,
    code: String,
    name: String,
    kind: String,
    balance: Decimal,
    created_at: DateTime<Utc>,
}

impl AccountRow {
    fn into_record(self, operation: &str) -> Result<AccountRecord, StoreError> {
        let kind: AccountKind = self
            .kind
            .parse()
            .map_err(|_| StoreError::corrupt(operation, format!("account kind '{}'", self.kind)))?;
        Ok(AccountRecord {
            id: AccountId::from_uuid(self.id),
            ledger_id: LedgerId::from_uuid(self.ledger_id),
            code: self.code,
            name: self.name,
            kind,
            balance: self.balance,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub code: String,
    pub name: String,
    pub kind: AccountKind,
}

#[derive(Debug, Clone)]
pub struct AccountStore {
    pool: PgPool,
}

impl AccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Administrative creation. Balance starts at zero; only the projector
    /// moves it afterwards.
    #[instrument(skip(self), fields(ledger_id = %ledger_id, code = %account.code), err)]
    pub async fn create(
        &self,
        ledger_id: LedgerId,
        account: NewAccount,
    ) -> Result<AccountRecord, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            INSERT INTO accounts (id, ledger_id, code, name, kind)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, ledger_id, code, name, kind, balance, created_at
            "#,
        )
        .bind(AccountId::new().as_uuid())
        .bind(ledger_id.as_uuid())
        .bind(&account.code)
        .bind(&account.name)
        .bind(account.kind.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_account", e))?;

        row.into_record("create_account")
    }

    pub async fn get_by_code(
        &self,
        ledger_id: LedgerId,
        code: &str,
    ) -> Result<Option<AccountRecord>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, ledger_id, code, name, kind, balance, created_at
            FROM accounts
            WHERE ledger_id = $1 AND code = $2
            "#,
        )
        .bind(ledger_id.as_uuid())
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_account", e))?;

        row.map(|r| r.into_record("get_account")).transpose()
    }

    pub async fn list(&self, ledger_id: LedgerId) -> Result<Vec<AccountRecord>, StoreError> {
        let rows = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, ledger_id, code, name, kind, balance, created_at
            FROM accounts
            WHERE ledger_id = $1
            ORDER BY code
            "#,
        )
        .bind(ledger_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_accounts", e))?;

        rows.into_iter()
            .map(|r| r.into_record("list_accounts"))
            .collect()
    }
}

/// Acquire a row lock on one account within the caller's transaction.
///
/// Callers must invoke this in ascending code order across the accounts they
/// touch; that ordering is the global deadlock-avoidance discipline.
pub async fn lock_by_code(
    tx: &mut Transaction<'_, Postgres>,
    ledger_id: LedgerId,
    code: &str,
) -> Result<Option<AccountRecord>, StoreError> {
    let row = sqlx::query_as::<_, AccountRow>(
        r#"
        SELECT id, ledger_id, code, name, kind, balance, created_at
        FROM accounts
        WHERE ledger_id = $1 AND code = $2
        FOR UPDATE
        "#,
    )
    .bind(ledger_id.as_uuid())
    .bind(code)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_account", e))?;

    row.map(|r| r.into_record("lock_account")).transpose()
}

/// Apply a signed balance delta (credit positive, debit negative).
pub async fn add_to_balance(
    tx: &mut Transaction<'_, Postgres>,
    ledger_id: LedgerId,
    account_id: AccountId,
    delta: Decimal,
) -> Result<(), StoreError> {
    let result =
        sqlx::query("UPDATE accounts SET balance = balance + $3 WHERE ledger_id = $1 AND id = $2")
            .bind(ledger_id.as_uuid())
            .bind(account_id.as_uuid())
            .bind(delta)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("add_to_balance", e))?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound {
            operation: "add_to_balance".to_string(),
        });
    }
    Ok(())
}
