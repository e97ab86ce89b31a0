use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, LazyLock};
use validator::Validate;

use crate::admission::AdmissionService;
use crate::error::ApiError;
use crate::health::HealthChecker;
use crate::middleware::too_many_requests;
use crate::response::RateLimitResponse;

static IDENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9@._:\-]+$").expect("identity pattern is valid"));

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AdmissionService>,
    pub health: HealthChecker,
}

impl AppState {
    pub fn new(service: Arc<AdmissionService>) -> Self {
        Self {
            health: HealthChecker::new(Arc::clone(&service)),
            service,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckRequest {
    #[validate(length(min = 1, max = 256), regex(path = *IDENTITY_RE))]
    pub identity: String,
    #[validate(length(min = 1, max = 2048))]
    pub endpoint: String,
}

/// Run an admission check on behalf of another service.
pub async fn check_admission(
    State(state): State<AppState>,
    Json(payload): Json<CheckRequest>,
) -> Result<Response, ApiError> {
    payload.validate()?;

    let service = Arc::clone(&state.service);
    let decision =
        tokio::task::spawn_blocking(move || service.check(&payload.identity, &payload.endpoint))
            .await
            .map_err(|e| ApiError::InternalServerError(format!("Admission check failed: {}", e)))?;

    if decision.allowed {
        Ok(Json(RateLimitResponse::from_decision(&decision)).into_response())
    } else {
        Ok(too_many_requests(&decision))
    }
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.health.clone();
    match tokio::task::spawn_blocking(move || health.check_health()).await {
        Ok(status) => (StatusCode::OK, Json(serde_json::to_value(status).unwrap_or_default())),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "unhealthy", "error": e.to_string() })),
        ),
    }
}

/// Readiness check endpoint
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let service = Arc::clone(&state.service);
    let store_connected = tokio::task::spawn_blocking(move || service.store_available())
        .await
        .unwrap_or(false);

    if store_connected {
        (StatusCode::OK, Json(serde_json::json!({
            "status": "ready",
            "bucket_store": "connected"
        })))
    } else {
        (StatusCode::OK, Json(serde_json::json!({
            "status": "ready",
            "bucket_store": "disconnected",
            "note": "Running on local bucket state only"
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_request_validation() {
        let valid = CheckRequest {
            identity: "user-123@example.com".to_string(),
            endpoint: "/api/plaid".to_string(),
        };
        assert!(valid.validate().is_ok());

        let empty = CheckRequest {
            identity: String::new(),
            endpoint: "/api/plaid".to_string(),
        };
        assert!(empty.validate().is_err());

        let bad_chars = CheckRequest {
            identity: "user 123!".to_string(),
            endpoint: "/api/plaid".to_string(),
        };
        assert!(bad_chars.validate().is_err());

        let no_endpoint = CheckRequest {
            identity: "u1".to_string(),
            endpoint: String::new(),
        };
        assert!(no_endpoint.validate().is_err());
    }
}
