//! Webhook delivery engine: subscriber endpoints, the HMAC signature, the
//! append-only delivery log, and the worker pool that drains outbox jobs.

mod deliveries;
mod endpoints;
pub mod signature;
mod worker;

pub use deliveries::{DeliveryLog, DeliveryStatus, NewDelivery, WebhookDelivery};
pub use endpoints::{EndpointStore, NewEndpoint, WebhookEndpoint};
pub use worker::{DeliveryError, WebhookWorker, WorkerConfig};
