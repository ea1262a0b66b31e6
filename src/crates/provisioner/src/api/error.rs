//! API error types and HTTP response conversion
//!
//! Provisioning failures arrive as `tonic::Status` from the creator service;
//! their codes map to HTTP statuses here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tonic::Code;

/// API error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Error code for programmatic handling
    pub code: String,
}

impl ApiErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            code: code.into(),
        }
    }
}

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

/// Custom API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request data
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Credentials do not match
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Retryable infrastructure failure
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The request was cancelled before completing
    #[error("Request cancelled")]
    Cancelled,

    /// Internal server error
    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// nginx's "client closed request"
const CLIENT_CLOSED_REQUEST: u16 = 499;

impl ApiError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Cancelled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code identifier
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::Cancelled => "CANCELLED",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Get the error type name
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::Forbidden(_) => "Forbidden",
            ApiError::ServiceUnavailable(_) => "ServiceUnavailable",
            ApiError::Cancelled => "Cancelled",
            ApiError::InternalError(_) => "InternalError",
        }
    }
}

impl From<tonic::Status> for ApiError {
    fn from(status: tonic::Status) -> Self {
        let message = status.message().to_string();
        match status.code() {
            Code::InvalidArgument => ApiError::BadRequest(message),
            Code::PermissionDenied => ApiError::Forbidden(message),
            Code::Unavailable => ApiError::ServiceUnavailable(message),
            Code::Cancelled => ApiError::Cancelled,
            _ => ApiError::InternalError(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ApiErrorResponse::new(self.error_type(), self.to_string(), self.code());

        if status.is_server_error() {
            tracing::error!(error = %self, "API error");
        } else {
            tracing::debug!(code = %body.code, "API error");
        }

        (status, Json(body)).into_response()
    }
}
