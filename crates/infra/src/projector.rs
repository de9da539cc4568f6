//! The projector: single ordered consumer of the event log.
//!
//! Each pass runs in one database transaction: read the durable offset under
//! lock, apply a batch of `TransactionPosted` events onto the read models,
//! advance the offset, commit. A crash between apply and commit replays the
//! batch; the transaction-row insert is the idempotency gate that prevents
//! double-counting.

use std::time::Duration;

use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use tally_accounting::Direction;
use tally_core::{EventId, LedgerId, TransactionId};
use tally_events::{TransactionPosted, EVENT_TRANSACTION_POSTED};

use crate::store::{accounts, events, map_sqlx_error, EventRecord, StoreError};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The committed payload does not deserialize or carries values the
    /// command path could never have accepted. Blocks the offset; needs an
    /// operator.
    #[error("event {event_id}: invalid payload: {reason}")]
    InvalidPayload { event_id: EventId, reason: String },

    /// An account referenced by a committed event no longer resolves.
    /// Accounts are never deleted while events reference them, so this also
    /// blocks the offset for an operator.
    #[error("event {event_id}: account '{code}' missing at projection time")]
    UnknownAccount { event_id: EventId, code: String },
}

#[derive(Debug, Clone)]
pub struct ProjectorConfig {
    /// Offset-row identity. One logical consumer per identity; shard by
    /// ledger hash if horizontal scale is ever needed, never by time.
    pub identity: String,
    /// Events applied per pass. Bounds recovery work and lock duration.
    pub batch_size: i64,
    /// Poll cadence when the log is drained.
    pub poll_interval: Duration,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            identity: "ledger".to_string(),
            batch_size: 100,
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Projector {
    pool: PgPool,
    config: ProjectorConfig,
}

impl Projector {
    pub fn new(pool: PgPool, config: ProjectorConfig) -> Self {
        Self { pool, config }
    }

    /// Endless tail loop. Returns when `shutdown` flips to true; an in-flight
    /// pass commits or rolls back normally first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.config.poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender means the process is going away too.
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(projector = %self.config.identity, "projector stopping");
                        return;
                    }
                }
                _ = tick.tick() => {
                    // Drain full batches before going back to sleep.
                    loop {
                        match self.run_once().await {
                            Ok(applied) => {
                                if applied > 0 {
                                    debug!(
                                        projector = %self.config.identity,
                                        applied,
                                        "projected events"
                                    );
                                }
                                if (applied as i64) < self.config.batch_size {
                                    break;
                                }
                            }
                            Err(e) => {
                                // Offset did not advance; next tick retries.
                                warn!(
                                    projector = %self.config.identity,
                                    error = %e,
                                    "projection pass failed"
                                );
                                break;
                            }
                        }
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        }
    }

    /// One pass: apply up to `batch_size` events in one transaction.
    /// Returns how many events were applied.
    #[instrument(skip(self), fields(projector = %self.config.identity), err)]
    pub async fn run_once(&self) -> Result<usize, ProjectionError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_projection_pass", e))?;

        let offset = self.lock_offset(&mut tx).await?;

        let batch = events::fetch_after(
            &mut tx,
            EVENT_TRANSACTION_POSTED,
            offset,
            self.config.batch_size,
        )
        .await?;

        if batch.is_empty() {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback_empty_pass", e))?;
            return Ok(0);
        }

        for event in &batch {
            apply_transaction_posted(&mut tx, event).await?;
        }

        let last = batch[batch.len() - 1].id;
        self.advance_offset(&mut tx, last).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_projection_pass", e))?;

        Ok(batch.len())
    }

    /// How far projection trails the log: the primary health metric.
    pub async fn lag(&self) -> Result<i64, ProjectionError> {
        let head = events::max_event_id(&self.pool, EVENT_TRANSACTION_POSTED).await?;
        let offset: Option<i64> =
            sqlx::query_scalar("SELECT last_event_id FROM projector_offsets WHERE projector = $1")
                .bind(&self.config.identity)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("read_offset", e))?;

        Ok(head.as_i64() - offset.unwrap_or(0))
    }

    /// Read the offset row under lock, seeding it on first run.
    async fn lock_offset(
        &self,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<EventId, ProjectionError> {
        sqlx::query(
            r#"
            INSERT INTO projector_offsets (projector, last_event_id)
            VALUES ($1, 0)
            ON CONFLICT (projector) DO NOTHING
            "#,
        )
        .bind(&self.config.identity)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("seed_offset", e))?;

        let offset: i64 = sqlx::query_scalar(
            "SELECT last_event_id FROM projector_offsets WHERE projector = $1 FOR UPDATE",
        )
        .bind(&self.config.identity)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_offset", e))?;

        Ok(EventId::from_i64(offset))
    }

    async fn advance_offset(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        to: EventId,
    ) -> Result<(), ProjectionError> {
        sqlx::query(
            r#"
            UPDATE projector_offsets
            SET last_event_id = $2, updated_at = NOW()
            WHERE projector = $1
            "#,
        )
        .bind(&self.config.identity)
        .bind(to.as_i64())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("advance_offset", e))?;

        Ok(())
    }
}

/// Apply one `TransactionPosted` event onto the read models.
async fn apply_transaction_posted(
    tx: &mut Transaction<'_, Postgres>,
    event: &EventRecord,
) -> Result<(), ProjectionError> {
    let payload: TransactionPosted =
        serde_json::from_value(event.payload.clone()).map_err(|e| {
            ProjectionError::InvalidPayload {
                event_id: event.id,
                reason: e.to_string(),
            }
        })?;

    let postings = parse_postings(event.id, &payload)?;
    let mut total = Decimal::ZERO;
    for (_, direction, amount) in &postings {
        if *direction == Direction::Debit {
            total += *amount;
        }
    }

    // The transaction-row insert is the per-event idempotency gate. When a
    // previous pass already applied this event (crash between apply and
    // commit), the insert is a no-op and the postings are skipped, which
    // prevents double-counting balances.
    let inserted = sqlx::query(
        r#"
        INSERT INTO transactions (id, ledger_id, external_id, currency, amount, occurred_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (id, ledger_id) DO NOTHING
        "#,
    )
    .bind(payload.transaction_id.as_uuid())
    .bind(event.ledger_id.as_uuid())
    .bind(&payload.external_id)
    .bind(&payload.currency)
    .bind(total)
    .bind(payload.occurred_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_transaction", e))?;

    if inserted.rows_affected() == 0 {
        return Ok(());
    }

    for (code, direction, amount) in postings {
        let account = accounts::lock_by_code(tx, event.ledger_id, &code)
            .await?
            .ok_or_else(|| ProjectionError::UnknownAccount {
                event_id: event.id,
                code: code.clone(),
            })?;

        insert_posting(
            tx,
            payload.transaction_id,
            event.ledger_id,
            account.id,
            direction,
            amount,
        )
        .await?;

        // Credit adds, debit subtracts.
        let delta = match direction {
            Direction::Credit => amount,
            Direction::Debit => -amount,
        };
        accounts::add_to_balance(tx, event.ledger_id, account.id, delta).await?;
    }

    Ok(())
}

fn parse_postings(
    event_id: EventId,
    payload: &TransactionPosted,
) -> Result<Vec<(String, Direction, Decimal)>, ProjectionError> {
    payload
        .postings
        .iter()
        .map(|p| {
            let direction =
                Direction::parse(&p.direction).map_err(|e| ProjectionError::InvalidPayload {
                    event_id,
                    reason: e.to_string(),
                })?;
            let amount = Decimal::from_str_exact(&p.amount).map_err(|e| {
                ProjectionError::InvalidPayload {
                    event_id,
                    reason: format!("amount '{}': {}", p.amount, e),
                }
            })?;
            Ok((p.account_code.clone(), direction, amount))
        })
        .collect()
}

async fn insert_posting(
    tx: &mut Transaction<'_, Postgres>,
    transaction_id: TransactionId,
    ledger_id: LedgerId,
    account_id: tally_core::AccountId,
    direction: Direction,
    amount: Decimal,
) -> Result<(), ProjectionError> {
    sqlx::query(
        r#"
        INSERT INTO postings (transaction_id, ledger_id, account_id, direction, amount)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(transaction_id.as_uuid())
    .bind(ledger_id.as_uuid())
    .bind(account_id.as_uuid())
    .bind(direction.as_str())
    .bind(amount)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_posting", e))?;

    Ok(())
}
