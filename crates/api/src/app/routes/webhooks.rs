use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};

use tally_auth::Principal;
use tally_infra::webhooks::NewEndpoint;

use crate::app::dto::{CreateWebhookRequest, WebhookResponse};
use crate::app::errors::{json_error, store_error_to_response};
use crate::app::AppState;

/// `POST /v1/webhooks`: register a subscriber endpoint.
///
/// The HMAC secret is generated server-side from a CSPRNG and returned in
/// this response only; store it, it cannot be fetched again.
pub async fn create_endpoint(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<CreateWebhookRequest>,
) -> axum::response::Response {
    if !body.url.starts_with("http://") && !body.url.starts_with("https://") {
        return json_error(
            StatusCode::BAD_REQUEST,
            "invalid_url",
            "url must be http(s)",
        );
    }

    match state
        .endpoints
        .create(principal.ledger_id(), NewEndpoint { url: body.url })
        .await
    {
        Ok(endpoint) => (
            StatusCode::CREATED,
            Json(WebhookResponse::with_secret(endpoint)),
        )
            .into_response(),
        Err(e) => store_error_to_response(e),
    }
}

/// `GET /v1/webhooks`: list endpoints, secrets redacted.
pub async fn list_endpoints(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> axum::response::Response {
    match state.endpoints.list(principal.ledger_id()).await {
        Ok(endpoints) => {
            let endpoints: Vec<WebhookResponse> = endpoints
                .into_iter()
                .map(WebhookResponse::redacted)
                .collect();
            (StatusCode::OK, Json(endpoints)).into_response()
        }
        Err(e) => store_error_to_response(e),
    }
}
