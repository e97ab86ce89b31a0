use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while building the admission engine.
///
/// Only construction can fail. Once an `AdmissionService` exists, every
/// internal failure degrades into an allow/deny decision instead.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("Invalid rate limit policy: {0}")]
    InvalidPolicy(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed configuration file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bucket store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, AdmissionError>;

/// Failures talking to the durable bucket store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Failed to encode or decode bucket record: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Errors surfaced by the HTTP handlers.
#[derive(Debug, Clone, Serialize, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_api_error(err: &ApiError) -> Self {
        match err {
            ApiError::InvalidRequest(msg) => Self::new("bad_request", msg, 400),
            ApiError::ValidationError(msg) => Self::new("validation_error", msg, 422),
            ApiError::InternalServerError(msg) => Self::new("internal_error", msg, 500),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from_api_error(&self);
        let status =
            StatusCode::from_u16(body.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_codes() {
        let err = ApiError::ValidationError("identity: length".to_string());
        let body = ErrorResponse::from_api_error(&err);
        assert_eq!(body.code, 422);
        assert_eq!(body.error, "validation_error");

        let err = ApiError::InvalidRequest("missing body".to_string());
        assert_eq!(ErrorResponse::from_api_error(&err).code, 400);
    }

    #[test]
    fn test_api_error_into_response_status() {
        let response = ApiError::InternalServerError("boom".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_store_error_converts_into_admission_error() {
        let err: AdmissionError = StoreError::Unavailable("connection refused".into()).into();
        assert_eq!(
            err.to_string(),
            "Bucket store error: Store unavailable: connection refused"
        );
    }
}
