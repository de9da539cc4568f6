use chrono::{DateTime, Utc};

/// A domain event: an immutable fact recorded in the ledger's event log.
///
/// Events are append-only and replayable; the projector and the webhook
/// worker both consume them long after commit. Implementations must be
/// serializable to JSON with a stable field layout, because the serialized
/// payload is what subscribers sign-check.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event type identifier (e.g. "TransactionPosted").
    ///
    /// Never change an identifier once events carrying it exist; historical
    /// payloads are deserialized by it.
    fn event_type(&self) -> &'static str;

    /// When the event occurred (business time, caller-supplied).
    ///
    /// Distinct from commit time: the projector orders by commit time, while
    /// business time is what reporting and subscribers care about.
    fn occurred_at(&self) -> DateTime<Utc>;
}
