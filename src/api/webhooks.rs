use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};

use crate::api::AppState;
use crate::services::error::ReconciliationError;

/// POST /webhooks/{provider}
///
/// Answers 200 as soon as the callback is durably recorded; settlement runs
/// in the background and failed attempts are picked up by the retry worker.
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    body: String,
) -> impl IntoResponse {
    info!(provider = %provider, "Received webhook");

    let payload: JsonValue = match serde_json::from_str(&body) {
        Ok(p) => p,
        Err(e) => {
            error!(provider = %provider, error = %e, "Invalid JSON payload");
            return (StatusCode::BAD_REQUEST, "Invalid JSON").into_response();
        }
    };

    let key = match state.intake.record(&provider, &payload).await {
        Ok(key) => key,
        Err(ReconciliationError::Validation(message)) => {
            warn!(provider = %provider, "Webhook without correlation key");
            return (StatusCode::BAD_REQUEST, message).into_response();
        }
        Err(e) => {
            error!(provider = %provider, error = %e, "Webhook could not be recorded");
            return (StatusCode::SERVICE_UNAVAILABLE, "Not recorded").into_response();
        }
    };

    let intake = state.intake.clone();
    let spawned_key = key.clone();
    tokio::spawn(async move {
        match intake.process_key(&spawned_key).await {
            Ok(outcome) if outcome.already_processed => {
                info!(key = %spawned_key, "Webhook already processed");
            }
            Ok(outcome) => {
                info!(key = %spawned_key, settlement = ?outcome.settlement, "Webhook processed");
            }
            Err(e) => {
                warn!(key = %spawned_key, error = %e, "Webhook processing deferred to retry worker");
            }
        }
    });

    (
        StatusCode::OK,
        Json(serde_json::json!({"status": "ok", "key": key})),
    )
        .into_response()
}
