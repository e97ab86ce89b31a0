use crate::admission::{AdmissionService, Decision};
use crate::identity::{client_ip, IdentitySource};
use crate::response::RateLimitResponse;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

pub const RETRY_AFTER: &str = "retry-after";
pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";
pub const REQUEST_ID: &str = "x-request-id";

/// State for [`admission_middleware`].
#[derive(Clone)]
pub struct AdmissionState {
    pub service: Arc<AdmissionService>,
    pub identity: IdentitySource,
}

impl AdmissionState {
    pub fn new(service: Arc<AdmissionService>) -> Self {
        Self {
            service,
            identity: IdentitySource::default(),
        }
    }

    pub fn with_identity(mut self, identity: IdentitySource) -> Self {
        self.identity = identity;
        self
    }
}

fn peer_addr(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Admission gate for a router.
///
/// Denied requests are answered with `429 Too Many Requests`; admitted ones
/// carry the policy limit. There is no remaining-count header because the
/// engine does not track an exact cluster-wide remainder.
pub async fn admission_middleware(
    State(state): State<AdmissionState>,
    request: Request,
    next: Next,
) -> Response {
    let identity = state
        .identity
        .extract(request.headers(), peer_addr(&request))
        .unwrap_or_default();
    let endpoint = request.uri().path().to_string();

    // A cache miss may read the bucket store.
    let service = Arc::clone(&state.service);
    let (id, ep) = (identity.clone(), endpoint.clone());
    let decision = match tokio::task::spawn_blocking(move || service.check(&id, &ep)).await {
        Ok(decision) => decision,
        Err(e) => {
            error!(identity = %identity, endpoint = %endpoint, error = %e, "Admission check failed, denying request");
            let policy = state.service.policy_for(&endpoint);
            Decision {
                allowed: false,
                limit: policy.capacity,
                retry_after: Some(policy.window),
            }
        }
    };

    if !decision.allowed {
        info!(
            target: "admission::middleware",
            identity = %identity,
            endpoint = %endpoint,
            "Request rate limited"
        );
        return too_many_requests(&decision);
    }

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    response
}

/// 429 response with retry headers.
pub fn too_many_requests(decision: &Decision) -> Response {
    let body = RateLimitResponse::from_decision(decision);

    let mut headers = HeaderMap::new();
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    if let Some(retry_after) = body.retry_after {
        headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    }
    if let Some(reset) = body.reset_time {
        headers.insert(RATE_LIMIT_RESET, HeaderValue::from(reset));
    }

    (StatusCode::TOO_MANY_REQUESTS, headers, Json(body)).into_response()
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip =
        client_ip(request.headers(), peer_addr(&request)).unwrap_or_else(|| "unknown".to_string());
    let request_id = Uuid::new_v4();

    info!(
        target: "admission::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let mut response = next.run(request).await;

    let status = response.status();
    info!(
        target: "admission::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %status,
        "Request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID, value);
    }
    response
}
