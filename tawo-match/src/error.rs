//! Error types for tawo-match
//!
//! Every handler error renders as `{"error": {"code", "message"}}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::{DispatchError, MatchingError, UploadError};

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - e.g., matching pass already running
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Upstream service failed (502)
    #[error("Bad gateway: {0}")]
    BadGateway(String),

    /// Upstream service timed out (504)
    #[error("Gateway timeout: {0}")]
    GatewayTimeout(String),

    /// Upstream non-2xx status, passed through as-is
    #[error("{message}")]
    Upstream { status: u16, message: String },

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// tawo-common error
    #[error("Common error: {0}")]
    Common(#[from] tawo_common::Error),
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::NoDataset | DispatchError::RowOutOfRange(_) => ApiError::NotFound(err.to_string()),
            DispatchError::Busy => ApiError::Conflict(err.to_string()),
            DispatchError::InvalidSelection(_)
            | DispatchError::ReasonRequired(_)
            | DispatchError::ReadOnlyColumn(_)
            | DispatchError::UnknownColumn(_) => ApiError::BadRequest(err.to_string()),
            DispatchError::Storage(_) | DispatchError::DriverGone => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<MatchingError> for ApiError {
    fn from(err: MatchingError) -> Self {
        match err {
            MatchingError::Timeout(_) => ApiError::GatewayTimeout(err.to_string()),
            MatchingError::Status(status, _) => ApiError::Upstream {
                status,
                message: format!("Webhook returned status {}", status),
            },
            MatchingError::Network(_) | MatchingError::Parse(_) => ApiError::BadGateway(err.to_string()),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Timeout(_) => ApiError::GatewayTimeout(err.to_string()),
            UploadError::Status(status) => ApiError::Upstream {
                status,
                message: err.to_string(),
            },
            UploadError::Network(_) | UploadError::Parse(_) | UploadError::NoRows => {
                ApiError::BadGateway(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Upstream { status, message } = self {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            return (status, Json(json!({ "error": message }))).into_response();
        }

        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "BAD_GATEWAY", msg),
            ApiError::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "GATEWAY_TIMEOUT", msg),
            ApiError::Internal(msg) | ApiError::Upstream { message: msg, .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
            }
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
