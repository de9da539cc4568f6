//! The ledger command service: the transactional write path.
//!
//! One database transaction covers the idempotency probe, account locking,
//! double-entry validation, event append, and outbox enqueue. Either the
//! event and its delivery job commit together or nothing is written.

use sqlx::PgPool;
use thiserror::Error;
use tracing::instrument;

use tally_accounting::{LedgerError, PostTransaction};
use tally_core::{LedgerId, TransactionId};
use tally_events::{Event, TransactionPosted, AGGREGATE_TRANSACTION};

use crate::jobs::{NewOutboxJob, OutboxQueue, QueueError};
use crate::store::{accounts, events, map_sqlx_error, NewEvent, StoreError};

#[derive(Debug, Error)]
pub enum CommandError {
    /// Deterministic client error; nothing was written.
    #[error(transparent)]
    Rejected(#[from] LedgerError),

    /// Infrastructure fault; the transaction rolled back and the caller may
    /// retry with the same idempotency key.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<QueueError> for CommandError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Store(e) => CommandError::Store(e),
            QueueError::JobNotFound(id) => CommandError::Store(StoreError::NotFound {
                operation: format!("outbox job {id}"),
            }),
        }
    }
}

/// Result of an accepted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostTransactionOutcome {
    pub transaction_id: TransactionId,
    /// True when an earlier submission with the same key won; callers cannot
    /// observe the difference on the wire, but metrics and logs can.
    pub deduplicated: bool,
}

/// Posting policy knobs.
#[derive(Debug, Clone, Default)]
pub struct CommandConfig {
    /// Reject commands without an idempotency key.
    pub require_idempotency_key: bool,
}

#[derive(Debug, Clone)]
pub struct LedgerCommandService {
    pool: PgPool,
    queue: OutboxQueue,
    config: CommandConfig,
}

impl LedgerCommandService {
    pub fn new(pool: PgPool, queue: OutboxQueue, config: CommandConfig) -> Self {
        Self {
            pool,
            queue,
            config,
        }
    }

    /// Validate and commit one transaction.
    ///
    /// Replays with a previously committed idempotency key return the
    /// original transaction id; the response is indistinguishable from a
    /// fresh accept.
    #[instrument(
        skip(self, cmd),
        fields(ledger_id = %ledger_id, postings = cmd.postings.len()),
        err
    )]
    pub async fn post_transaction(
        &self,
        ledger_id: LedgerId,
        cmd: PostTransaction,
    ) -> Result<PostTransactionOutcome, CommandError> {
        if self.config.require_idempotency_key && cmd.idempotency_key.is_empty() {
            return Err(LedgerError::MissingIdempotencyKey.into());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_post_transaction", e))?;

        // Idempotency probe: a committed event under this key wins outright.
        if !cmd.idempotency_key.is_empty() {
            if let Some(existing) =
                events::find_by_idempotency_key(&mut *tx, ledger_id, &cmd.idempotency_key).await?
            {
                rollback(tx).await;
                return Ok(PostTransactionOutcome {
                    transaction_id: TransactionId::from_uuid(existing.aggregate_id),
                    deduplicated: true,
                });
            }
        }

        // Lock referenced accounts in ascending code order. Concurrent
        // commands over overlapping account sets serialize here; any other
        // order risks deadlock.
        for code in cmd.account_codes_sorted() {
            if accounts::lock_by_code(&mut tx, ledger_id, &code)
                .await?
                .is_none()
            {
                rollback(tx).await;
                return Err(LedgerError::UnknownAccount { code }.into());
            }
        }

        // Double-entry gate. The projector later recomputes totals from the
        // committed payload; nothing unvalidated can reach it.
        if let Err(e) = cmd.validate() {
            rollback(tx).await;
            return Err(e.into());
        }

        let transaction_id = TransactionId::new();
        let payload = TransactionPosted::new(
            transaction_id,
            cmd.external_id.clone(),
            cmd.currency.clone(),
            cmd.occurred_at,
            cmd.postings.clone(),
        );
        let payload_json = serde_json::to_value(&payload)
            .map_err(|e| StoreError::corrupt("encode_payload", e.to_string()))?;

        let appended = events::append(
            &mut tx,
            NewEvent {
                ledger_id,
                aggregate_type: AGGREGATE_TRANSACTION,
                aggregate_id: *transaction_id.as_uuid(),
                event_type: payload.event_type(),
                payload: payload_json,
                idempotency_key: (!cmd.idempotency_key.is_empty())
                    .then(|| cmd.idempotency_key.clone()),
                occurred_at: cmd.occurred_at,
            },
        )
        .await;

        let event = match appended {
            Ok(event) => event,
            Err(e) if e.is_unique_violation() && !cmd.idempotency_key.is_empty() => {
                // Concurrent duplicate: the insert waited on the competing
                // transaction and lost. The winner is committed by now; hand
                // back its transaction id.
                rollback(tx).await;
                return self.resolve_duplicate(ledger_id, &cmd.idempotency_key).await;
            }
            Err(e) => {
                rollback(tx).await;
                return Err(e.into());
            }
        };

        // Same transaction handle: the job is durable iff the event is.
        if let Err(e) = self
            .queue
            .insert_tx(&mut tx, NewOutboxJob {
                event_id: event.id,
                ledger_id,
            })
            .await
        {
            rollback(tx).await;
            return Err(e.into());
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_post_transaction", e))?;

        Ok(PostTransactionOutcome {
            transaction_id,
            deduplicated: false,
        })
    }

    async fn resolve_duplicate(
        &self,
        ledger_id: LedgerId,
        key: &str,
    ) -> Result<PostTransactionOutcome, CommandError> {
        let existing = events::find_by_idempotency_key(&self.pool, ledger_id, key)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                operation: format!("event for idempotency key '{key}'"),
            })?;

        Ok(PostTransactionOutcome {
            transaction_id: TransactionId::from_uuid(existing.aggregate_id),
            deduplicated: true,
        })
    }
}

async fn rollback(tx: sqlx::Transaction<'_, sqlx::Postgres>) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, "rollback failed");
    }
}
