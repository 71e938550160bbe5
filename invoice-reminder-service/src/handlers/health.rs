use crate::services::get_metrics;
use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Liveness probe.
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "invoice-reminder-service",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Ready once the scheduler loop is running.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.engine.scheduler().is_running() {
        StatusCode::OK
    } else {
        tracing::warn!("Readiness check failed - scheduler not running");
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Metrics endpoint for Prometheus scraping.
pub async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
