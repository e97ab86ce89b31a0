use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::admission::AdmissionService;
use crate::stats::StatsSnapshot;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub admission_enabled: bool,
    pub cached_buckets: usize,
    pub max_cache_size: usize,
    pub stats: StatsSnapshot,
    pub dependencies: DependencyStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub bucket_store: ServiceStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub status: String,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

static START_TIME: std::sync::LazyLock<SystemTime> = std::sync::LazyLock::new(SystemTime::now);

#[derive(Clone)]
pub struct HealthChecker {
    service: Arc<AdmissionService>,
}

impl HealthChecker {
    pub fn new(service: Arc<AdmissionService>) -> Self {
        // Pin the uptime origin to the first checker, not the first probe.
        std::sync::LazyLock::force(&START_TIME);
        Self { service }
    }

    /// Probes the bucket store, which may block on network I/O.
    pub fn check_health(&self) -> HealthStatus {
        let now = SystemTime::now();
        let uptime = now.duration_since(*START_TIME).unwrap_or_default().as_secs();

        let store_status = self.check_store();

        // Decisions keep flowing without the store; only convergence suffers.
        let overall_status = if store_status.status == "healthy" {
            "healthy"
        } else {
            "degraded"
        };

        HealthStatus {
            status: overall_status.to_string(),
            timestamp: now
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime,
            admission_enabled: self.service.is_enabled(),
            cached_buckets: self.service.cached_buckets(),
            max_cache_size: self.service.cache_capacity(),
            stats: self.service.stats(),
            dependencies: DependencyStatus {
                bucket_store: store_status,
            },
        }
    }

    fn check_store(&self) -> ServiceStatus {
        let start = Instant::now();
        let available = self.service.store_available();
        let response_time_ms = start.elapsed().as_millis() as u64;

        if available {
            ServiceStatus {
                status: "healthy".to_string(),
                response_time_ms,
                error: None,
            }
        } else {
            ServiceStatus {
                status: "unavailable".to_string(),
                response_time_ms,
                error: Some("Bucket store not reachable".to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdmissionConfig;
    use crate::store::InMemoryBucketStore;

    #[test]
    fn test_health_with_in_memory_store() {
        let service = AdmissionService::new(
            AdmissionConfig::default(),
            Arc::new(InMemoryBucketStore::new()),
        )
        .unwrap();
        service.is_allowed("u1", "/api/plaid");

        let health = HealthChecker::new(Arc::new(service)).check_health();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.cached_buckets, 1);
        assert_eq!(health.max_cache_size, 50_000);
        assert_eq!(health.stats.allowed, 1);
        assert!(health.dependencies.bucket_store.error.is_none());
    }

    #[test]
    fn test_health_status_serialization() {
        let status = HealthStatus {
            status: "healthy".to_string(),
            timestamp: 1234567890,
            version: "1.0.0".to_string(),
            uptime_seconds: 3600,
            admission_enabled: true,
            cached_buckets: 0,
            max_cache_size: 100,
            stats: StatsSnapshot::default(),
            dependencies: DependencyStatus {
                bucket_store: ServiceStatus {
                    status: "healthy".to_string(),
                    response_time_ms: 5,
                    error: None,
                },
            },
        };

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("1234567890"));
        assert!(json.contains("bucket_store"));
    }
}
