//! Health check endpoint handlers

use axum::{extract::State, http::StatusCode, Json};

use crate::api::{models::HealthResponse, routes::AppState};

/// Handler for GET /health
///
/// Liveness only; the registry database is not touched.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::new("ok", "unknown"))
}

/// Handler for GET /api/v1/system/health
///
/// Returns 503 when the registry database does not answer.
pub async fn health_detailed(State(app_state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match app_state.db.health_check().await {
        Ok(()) => (StatusCode::OK, Json(HealthResponse::new("ok", "connected"))),
        Err(e) => {
            tracing::warn!("Registry database health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse::new("error", "error")),
            )
        }
    }
}
