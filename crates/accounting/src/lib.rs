//! Pure accounting domain: account kinds, posting directions, and the
//! double-entry validation applied to every `PostTransaction` command.
//!
//! Nothing in this crate performs I/O; the write path in `tally-infra` calls
//! into it with the caller-supplied command and persists the result.

mod account;
mod command;
mod error;
mod posting;

pub use account::AccountKind;
pub use command::{PostTransaction, ValidatedTransaction};
pub use error::LedgerError;
pub use posting::{Direction, Posting, PostingDraft};
