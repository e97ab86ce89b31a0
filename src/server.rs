use crate::admission::AdmissionService;
use crate::config::ServerConfig;
use crate::handlers::{check_admission, health_check, readiness_check, AppState};
use crate::middleware::logging_middleware;
use crate::redis::RedisBucketStore;
use crate::store::{BucketStore, InMemoryBucketStore};
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the admission API router around `service`.
pub fn create_app(service: Arc<AdmissionService>) -> Router {
    Router::new()
        .route("/v1/admission/check", post(check_admission))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .with_state(AppState::new(service))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
}

impl Server {
    pub fn new(config: &ServerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let admission_config = config.admission_config()?;

        let store: Arc<dyn BucketStore> = match &config.redis_url {
            Some(url) => Arc::new(RedisBucketStore::new(url)?),
            None => {
                tracing::warn!("REDIS_URL not set, bucket state is local to this instance");
                Arc::new(InMemoryBucketStore::new())
            }
        };

        let service = Arc::new(AdmissionService::new(admission_config, store)?);

        Ok(Self {
            app: create_app(service),
            bind_addr: config.bind_addr,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("Admission server listening on {}", self.bind_addr);
        tracing::info!("Health check available at /health");
        tracing::info!("Readiness check available at /ready");

        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
