//! Durable outbox queue on Postgres.
//!
//! Jobs are enqueued in the same transaction as the event they announce, so
//! either both are durable or neither is. Workers claim with
//! `FOR UPDATE SKIP LOCKED`, retry with exponential backoff, and park jobs as
//! `discarded` once attempts run out.

mod queue;
mod types;

pub use queue::{OutboxQueue, QueueConfig, QueueError};
pub use types::{JobState, NewOutboxJob, OutboxJob, RetryPolicy};
