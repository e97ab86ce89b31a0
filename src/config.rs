use crate::config_validator::ConfigValidator;
use crate::error::AdmissionError;
use crate::rate_limit_config::{PolicyTable, RateLimitPolicy};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Service settings, read from flags or the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "admission", version, about = "Per-identity admission control service")]
pub struct ServerConfig {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Redis connection URL; bucket state stays in-process when unset
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// JSON file with the admission policy table
    #[arg(long, env = "ADMISSION_POLICY_FILE")]
    pub policy_file: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), AdmissionError> {
        if let Some(url) = &self.redis_url {
            ConfigValidator::validate_redis_url(url)?;
        }
        Ok(())
    }

    /// Load the admission config named by `policy_file`, or the defaults.
    pub fn admission_config(&self) -> Result<AdmissionConfig, AdmissionError> {
        match &self.policy_file {
            Some(path) => AdmissionConfig::from_file(path),
            None => Ok(AdmissionConfig::default()),
        }
    }
}

/// Admission engine configuration. Loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// When false every request is admitted.
    pub enabled: bool,
    pub default_policy: RateLimitPolicy,
    /// Endpoint prefix to policy.
    pub policies: BTreeMap<String, RateLimitPolicy>,
    pub max_cache_size: usize,
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
    /// Lifetime of mirrored records in the durable store.
    #[serde(with = "humantime_serde")]
    pub record_ttl: Duration,
    pub write_queue_capacity: usize,
}

const MINUTE: Duration = Duration::from_secs(60);

impl Default for AdmissionConfig {
    fn default() -> Self {
        let policy = |capacity| RateLimitPolicy {
            capacity,
            window: MINUTE,
        };

        let mut policies = BTreeMap::new();
        policies.insert("/api/auth/login".to_string(), policy(1_000));
        policies.insert("/api/auth/signup".to_string(), policy(500));
        policies.insert("/api/plaid".to_string(), policy(50_000));
        policies.insert("/api/transactions".to_string(), policy(500_000));
        policies.insert("/api/analytics".to_string(), policy(100_000));

        Self {
            enabled: true,
            default_policy: policy(500_000),
            policies,
            max_cache_size: 50_000,
            cleanup_interval: Duration::from_secs(300),
            record_ttl: Duration::from_secs(3600),
            write_queue_capacity: 1024,
        }
    }
}

impl AdmissionConfig {
    pub fn from_file(path: &Path) -> Result<Self, AdmissionError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, AdmissionError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the policy table with `policies`.
    pub fn with_policies(
        mut self,
        default_policy: RateLimitPolicy,
        policies: impl IntoIterator<Item = (String, RateLimitPolicy)>,
    ) -> Self {
        self.default_policy = default_policy;
        self.policies = policies.into_iter().collect();
        self
    }

    pub fn validate(&self) -> Result<(), AdmissionError> {
        ConfigValidator::validate_admission_config(self)
    }

    pub fn policy_table(&self) -> Result<PolicyTable, AdmissionError> {
        PolicyTable::from_map(&self.policies, self.default_policy)
    }
}
