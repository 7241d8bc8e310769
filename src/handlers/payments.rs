use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::json;
use tracing::info;

use crate::{errors::ServiceError, AppState};

/// Header the gateway puts its HMAC-SHA256 hex digest in.
pub const SIGNATURE_HEADER: &str = "x-signature";

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook", post(payment_webhook))
}

// The gateway retries on any non-200, so transient failures surface as
// retryable errors while replays acknowledge idempotently.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Event processed or idempotently acknowledged"),
        (status = 400, description = "Invalid signature or payload; nothing was mutated", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(ServiceError::InvalidSignature)?;

    let outcome = state
        .services
        .payment_events
        .on_payment_confirmed(&body, signature)
        .await?;

    info!(outcome = ?outcome, "payment webhook processed");
    Ok((StatusCode::OK, Json(json!({ "status": "ok" }))))
}
