use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};

use tally_auth::Principal;
use tally_core::TransactionId;

use crate::app::dto::{PostTransactionRequest, PostTransactionResponse, TransactionResponse};
use crate::app::errors::{command_error_to_response, json_error, store_error_to_response};
use crate::app::AppState;

/// `POST /v1/transactions`: the command path.
///
/// Acceptance means the event and its outbox job are committed; projection
/// and delivery happen asynchronously. Replays with the same idempotency key
/// return the original transaction id with the same `accepted` status.
pub async fn post_transaction(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<PostTransactionRequest>,
) -> axum::response::Response {
    let outcome = match state
        .commands
        .post_transaction(principal.ledger_id(), body.into_command())
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => return command_error_to_response(e),
    };

    (
        StatusCode::OK,
        Json(PostTransactionResponse {
            transaction_id: outcome.transaction_id.to_string(),
            status: "accepted",
        }),
    )
        .into_response()
}

/// `GET /v1/transactions/:id`: read model, eventually consistent.
pub async fn get_transaction(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: TransactionId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid transaction id")
        }
    };

    let record = match state.transactions.get(principal.ledger_id(), id).await {
        Ok(Some(record)) => record,
        Ok(None) => return json_error(StatusCode::NOT_FOUND, "not_found", "transaction not found"),
        Err(e) => return store_error_to_response(e),
    };

    let postings = match state.transactions.postings(principal.ledger_id(), id).await {
        Ok(postings) => postings,
        Err(e) => return store_error_to_response(e),
    };

    (
        StatusCode::OK,
        Json(TransactionResponse::new(record, postings)),
    )
        .into_response()
}
