use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use tally_infra::store::NewLedger;

use crate::app::dto::{CreateLedgerRequest, LedgerResponse};
use crate::app::errors::{json_error, store_error_to_response};
use crate::app::AppState;

/// `POST /v1/ledgers`: operator path to provision a tenant book. Credentials
/// for the new ledger are minted out of band.
pub async fn create_ledger(
    State(state): State<AppState>,
    Json(body): Json<CreateLedgerRequest>,
) -> axum::response::Response {
    if body.name.trim().is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "invalid_name", "name must not be empty");
    }
    if body.currency.trim().is_empty() {
        return json_error(
            StatusCode::BAD_REQUEST,
            "invalid_currency",
            "currency must not be empty",
        );
    }

    match state
        .ledgers
        .create(NewLedger {
            name: body.name,
            currency: body.currency,
        })
        .await
    {
        Ok(record) => (StatusCode::CREATED, Json(LedgerResponse::from(record))).into_response(),
        Err(e) => store_error_to_response(e),
    }
}
