//! HTTP surface: provider callbacks, transaction status and admin overrides.

pub mod transactions;
pub mod webhooks;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::health::{HealthChecker, HealthState, HealthStatus};
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::orchestrator::ReconciliationOrchestrator;
use crate::services::webhook_intake::WebhookIntake;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ReconciliationOrchestrator>,
    pub intake: Arc<WebhookIntake>,
    pub health: HealthChecker,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/{provider}", post(webhooks::handle_webhook))
        .route("/transactions/{reference}", get(transactions::get_transaction))
        .route(
            "/transactions/{reference}/check",
            post(transactions::check_transaction),
        )
        .route(
            "/admin/transactions/{reference}/status",
            post(transactions::admin_set_status),
        )
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let status = state.health.check_health().await;
    let code = match status.status {
        HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
    };
    (code, Json(status))
}
