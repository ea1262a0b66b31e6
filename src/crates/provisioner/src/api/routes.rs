//! API route definitions

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::api::{handlers, middleware::logging_layer};
use crate::db::DatabaseConnection;
use crate::services::CreatorServiceImpl;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub creator: Arc<CreatorServiceImpl>,
}

/// Build the complete API router
pub fn create_router(db: DatabaseConnection, creator: Arc<CreatorServiceImpl>) -> Router {
    let app_state = AppState { db, creator };

    Router::new()
        // Health check endpoints
        .route("/health", get(handlers::health))
        .route("/api/v1/system/health", get(handlers::health_detailed))
        // Provisioning
        .route("/api/v1/databases", post(handlers::create_database))
        .layer(logging_layer())
        .with_state(app_state)
}
