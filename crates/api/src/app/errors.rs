use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use tally_infra::commands::CommandError;
use tally_infra::store::StoreError;

/// Map a command-path failure onto the wire contract: deterministic
/// rejections are 400 with the validation message; infrastructure faults are
/// 500 and safe to retry with the same idempotency key.
pub fn command_error_to_response(err: CommandError) -> axum::response::Response {
    match err {
        CommandError::Rejected(e) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
        }
        CommandError::Store(e) => {
            tracing::error!(error = %e, "command path store failure");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_error",
                "transient storage failure; retry with the same idempotency key",
            )
        }
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::UniqueViolation { .. } => {
            json_error(StatusCode::CONFLICT, "conflict", "resource already exists")
        }
        StoreError::NotFound { .. } => {
            json_error(StatusCode::NOT_FOUND, "not_found", "not found")
        }
        other => {
            tracing::error!(error = %other, "store failure");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_error",
                "storage failure",
            )
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
