//! Infrastructure layer: the Postgres substrate and everything that runs on
//! top of it: the transactional write path, the projector, the outbox queue,
//! and the webhook delivery engine.
//!
//! The database is the only authoritative shared resource. Every component
//! here works through transactional operations on it; no in-memory state
//! survives a crash.

pub mod commands;
pub mod jobs;
pub mod projector;
pub mod store;
pub mod webhooks;

/// Embedded schema migrations (applied by the binary at startup and by
/// `#[sqlx::test]` harnesses automatically).
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
