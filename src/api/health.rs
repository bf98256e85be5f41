// src/api/health.rs

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::app::App;
use crate::health::HealthReport;

/// `200` when every component is reachable, `500` otherwise; the body is the
/// same report either way.
pub async fn health(State(app): State<App>) -> (StatusCode, Json<HealthReport>) {
    let report = app.health();
    let status = if report.healthy {
        StatusCode::OK
    } else {
        tracing::warn!(components = ?report.components, "health check failed");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(report))
}
