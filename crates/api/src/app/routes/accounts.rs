use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};

use tally_accounting::AccountKind;
use tally_auth::Principal;
use tally_infra::store::NewAccount;

use crate::app::dto::{AccountResponse, CreateAccountRequest};
use crate::app::errors::{json_error, store_error_to_response};
use crate::app::AppState;

/// `POST /v1/accounts`: administrative account creation.
pub async fn create_account(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<CreateAccountRequest>,
) -> axum::response::Response {
    let kind: AccountKind = match body.kind.parse() {
        Ok(kind) => kind,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, "invalid_account_kind", e.to_string()),
    };

    if body.code.trim().is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "invalid_code", "code must not be empty");
    }

    let account = NewAccount {
        name: body.name.unwrap_or_else(|| body.code.clone()),
        code: body.code,
        kind,
    };

    match state.accounts.create(principal.ledger_id(), account).await {
        Ok(record) => (StatusCode::CREATED, Json(AccountResponse::from(record))).into_response(),
        Err(e) => store_error_to_response(e),
    }
}

/// `GET /v1/accounts`: all accounts with projected balances.
pub async fn list_accounts(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> axum::response::Response {
    match state.accounts.list(principal.ledger_id()).await {
        Ok(records) => {
            let accounts: Vec<AccountResponse> =
                records.into_iter().map(AccountResponse::from).collect();
            (StatusCode::OK, Json(accounts)).into_response()
        }
        Err(e) => store_error_to_response(e),
    }
}

/// `GET /v1/accounts/:code`
pub async fn get_account(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(code): Path<String>,
) -> axum::response::Response {
    match state.accounts.get_by_code(principal.ledger_id(), &code).await {
        Ok(Some(record)) => (StatusCode::OK, Json(AccountResponse::from(record))).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "not_found", "account not found"),
        Err(e) => store_error_to_response(e),
    }
}
