//! Unified error handling for Gatehouse

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
///
/// Each admission gate rejects with its own stable variant; the
/// client-facing body never carries internal detail.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("No established session")]
    SessionMissing,

    #[error("CSRF token missing or invalid")]
    CsrfMismatch,

    #[error("Storage connection failed: {0}")]
    StorageConnection(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            AppError::RateLimitExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Rate limit exceeded".to_string(),
            ),
            AppError::SessionMissing => (
                StatusCode::FORBIDDEN,
                "session_missing",
                "No active session".to_string(),
            ),
            AppError::CsrfMismatch => (
                StatusCode::FORBIDDEN,
                "csrf_mismatch",
                "Invalid or missing CSRF token".to_string(),
            ),
            AppError::StorageConnection(detail) => {
                tracing::error!("Storage connection error: {}", detail);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "storage_unavailable",
                    "Service unavailable".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        let mut response = (status, body).into_response();

        if let AppError::RateLimitExceeded { retry_after_secs } = self {
            response
                .headers_mut()
                .insert("Retry-After", retry_after_secs.to_string().parse().unwrap());
        }

        response
    }
}
