//! Database provisioning endpoint handler

use axum::{extract::State, http::StatusCode, Json};

use crate::api::{error::ApiResult, routes::AppState};
use crate::proto::creator::{creator_service_server::CreatorService, CreateDbRequest, CreateDbResponse};

/// Handler for POST /api/v1/databases
///
/// Returns 201 with the connection string, either freshly provisioned or
/// reused from an earlier call with the same credentials.
pub async fn create_database(
    State(app_state): State<AppState>,
    Json(request): Json<CreateDbRequest>,
) -> ApiResult<(StatusCode, Json<CreateDbResponse>)> {
    let response = app_state
        .creator
        .create_db(tonic::Request::new(request))
        .await?;

    Ok((StatusCode::CREATED, Json(response.into_inner())))
}
