use axum::{Json,
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse
};
use serde_json::json;
use thiserror::Error;

use crate::{storage::StorageError, store::StoreError};

/// Failures of the transfer lifecycle, independent of HTTP.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("{0}")]
    Validation(String),

    #[error("File size {size} exceeds maximum limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("Invalid or expired code")]
    NotFoundOrExpired,

    #[error("Link has expired")]
    LinkExpired,

    #[error("No free transfer code after {0} attempts")]
    CodeSpaceExhausted(u32),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Gone: {0}")]
    Gone(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Multipart error: {0}")]
    MultipartError(String),

    #[error("Rate limit exceeded: {message}")]
    RateLimited { retry_after_secs: u64, message: String },
}

impl From<TransferError> for AppError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Validation(msg) => AppError::BadRequest(msg),
            TransferError::PayloadTooLarge { .. } => AppError::PayloadTooLarge(err.to_string()),
            TransferError::NotFoundOrExpired => AppError::NotFound(err.to_string()),
            TransferError::LinkExpired => AppError::Gone(err.to_string()),
            TransferError::CodeSpaceExhausted(_) | TransferError::UploadFailed(_) => {
                tracing::error!("Upload Error: {}", err);
                AppError::InternalServerError("Failed to upload file".to_string())
            }
            TransferError::Store(e) => {
                tracing::error!("Store Error: {}", e);
                AppError::InternalServerError("Internal server error".to_string())
            }
            TransferError::Storage(e) => {
                tracing::error!("Storage Error: {}", e);
                AppError::InternalServerError("Could not read file".to_string())
            }
        }
    }
}

/// Convert `AppError` into an HTTP response.
impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        // Map application errors to HTTP status codes and messages
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Gone(msg) => (StatusCode::GONE, msg),
            AppError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            AppError::MultipartError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::RateLimited { retry_after_secs, message } => {
                let body = Json(json!({"error": "Rate limit exceeded", "message": message}));
                let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                response.headers_mut().insert(
                    header::RETRY_AFTER,
                    HeaderValue::from(retry_after_secs),
                );
                return response;
            }
        };

        // Return standardized JSON error response
        let body = Json(json!({"error": error_message}));
        (status, body).into_response()
    }
}
