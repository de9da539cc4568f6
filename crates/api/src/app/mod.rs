//! Router construction and shared application state.

pub mod dto;
pub mod errors;
mod routes;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;

use tally_auth::Hs256TokenValidator;
use tally_infra::commands::{CommandConfig, LedgerCommandService};
use tally_infra::jobs::{OutboxQueue, QueueConfig};
use tally_infra::store::{AccountStore, LedgerStore, TransactionStore};
use tally_infra::webhooks::EndpointStore;

use crate::middleware::AuthState;

/// Everything handlers need: the command service and the thin stores.
/// All members share one connection pool and are cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub commands: LedgerCommandService,
    pub ledgers: LedgerStore,
    pub accounts: AccountStore,
    pub transactions: TransactionStore,
    pub endpoints: EndpointStore,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        let queue = OutboxQueue::new(pool.clone(), QueueConfig::default());
        Self {
            commands: LedgerCommandService::new(
                pool.clone(),
                queue,
                CommandConfig::default(),
            ),
            ledgers: LedgerStore::new(pool.clone()),
            accounts: AccountStore::new(pool.clone()),
            transactions: TransactionStore::new(pool.clone()),
            endpoints: EndpointStore::new(pool),
        }
    }
}

/// Build the full router.
///
/// Ledger creation is an operator path and sits outside bearer auth, next to
/// the health probe; everything ledger-scoped requires a token resolving to
/// that ledger's principal.
pub fn build_app(pool: PgPool, jwt_secret: String) -> Router {
    let auth_state = AuthState {
        validator: Arc::new(Hs256TokenValidator::new(jwt_secret.into_bytes())),
    };
    let state = AppState::new(pool);

    let protected = Router::new()
        .route("/v1/transactions", post(routes::transactions::post_transaction))
        .route("/v1/transactions/:id", get(routes::transactions::get_transaction))
        .route(
            "/v1/accounts",
            post(routes::accounts::create_account).get(routes::accounts::list_accounts),
        )
        .route("/v1/accounts/:code", get(routes::accounts::get_account))
        .route(
            "/v1/webhooks",
            post(routes::webhooks::create_endpoint).get(routes::webhooks::list_endpoints),
        )
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            crate::middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/v1/ledgers", post(routes::ledgers::create_ledger))
        .merge(protected)
        .with_state(state)
}
