use crate::cache::BucketCache;
use crate::clock::{Clock, SystemClock};
use crate::config::AdmissionConfig;
use crate::error::Result;
use crate::rate_limit_config::{PolicyTable, RateLimitPolicy};
use crate::stats::{AdmissionStats, StatsSnapshot};
use crate::store::{BucketStore, DurableBucketStore};
use crate::token_bucket::AccountingKey;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Capacity of the policy that governed the request.
    pub limit: u32,
    /// Set on denial.
    pub retry_after: Option<Duration>,
}

/// Per-identity admission control.
///
/// Decisions are made against an in-process bucket cache. The durable store
/// is read on a cache miss and written, in the background, whenever a request
/// is denied. Instances therefore converge on scarcity but do not share an
/// exact count: with N instances an identity can be admitted up to roughly
/// N times the capacity per window.
#[derive(Debug)]
pub struct AdmissionService {
    enabled: bool,
    policies: PolicyTable,
    cache: BucketCache,
    store: DurableBucketStore,
    stats: Arc<AdmissionStats>,
}

impl AdmissionService {
    /// Create a service on the system clock.
    pub fn new(config: AdmissionConfig, store: Arc<dyn BucketStore>) -> Result<Self> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: AdmissionConfig,
        store: Arc<dyn BucketStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let policies = config.policy_table()?;
        let stats = Arc::new(AdmissionStats::default());

        let store = DurableBucketStore::new(
            store,
            config.record_ttl,
            config.write_queue_capacity,
            Arc::clone(&clock),
            Arc::clone(&stats),
        )?;

        // Another instance may already have provisioned the store.
        match store.provision() {
            Ok(()) => info!("Bucket store provisioned"),
            Err(e) => warn!(error = %e, "Failed to provision bucket store"),
        }

        let cache = BucketCache::new(config.max_cache_size, config.cleanup_interval, clock);

        info!(
            enabled = config.enabled,
            policies = config.policies.len(),
            max_cache_size = config.max_cache_size,
            "Admission service ready"
        );

        Ok(Self {
            enabled: config.enabled,
            policies,
            cache,
            store,
            stats,
        })
    }

    /// Decide whether `identity` may call `endpoint` now, consuming a token
    /// if so. Empty input is denied.
    pub fn is_allowed(&self, identity: &str, endpoint: &str) -> bool {
        if !self.enabled {
            return true;
        }
        if identity.is_empty() {
            warn!(endpoint = %endpoint, "Identity is empty, denying request");
            self.stats.record_rejected_input();
            return false;
        }
        if endpoint.is_empty() {
            warn!(identity = %identity, "Endpoint is empty, denying request");
            self.stats.record_rejected_input();
            return false;
        }

        self.cache.sweep_if_due();

        let key = AccountingKey::new(identity, endpoint);
        let policy = *self.policies.resolve(endpoint);
        let allowed = self.admit(key, policy);
        self.stats.record_decision(allowed);
        allowed
    }

    fn admit(&self, key: AccountingKey, policy: RateLimitPolicy) -> bool {
        let bucket = match self.cache.get(&key) {
            Some(bucket) if !bucket.is_expired() => bucket,
            _ => {
                let loaded = Arc::new(self.store.load_or_create(&key, policy));
                self.cache.put(key.clone(), loaded)
            }
        };

        if bucket.try_consume() {
            return true;
        }

        debug!(key = %key, "Bucket exhausted, denying request");
        self.store.save(&key, bucket.snapshot());
        false
    }

    /// How long the caller should wait before retrying.
    ///
    /// Only the local cache is consulted; without a live bucket the full
    /// policy window is returned.
    pub fn retry_after(&self, identity: &str, endpoint: &str) -> Duration {
        let policy = self.policies.resolve(endpoint);
        if identity.is_empty() || endpoint.is_empty() {
            return policy.window;
        }

        match self.cache.get(&AccountingKey::new(identity, endpoint)) {
            Some(bucket) if !bucket.is_expired() => bucket.time_until_refill(),
            _ => policy.window,
        }
    }

    /// `is_allowed` plus the retry hint on denial.
    pub fn check(&self, identity: &str, endpoint: &str) -> Decision {
        let allowed = self.is_allowed(identity, endpoint);
        Decision {
            allowed,
            limit: self.policies.resolve(endpoint).capacity,
            retry_after: (!allowed).then(|| self.retry_after(identity, endpoint)),
        }
    }

    pub fn policy_for(&self, endpoint: &str) -> &RateLimitPolicy {
        self.policies.resolve(endpoint)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn cached_buckets(&self) -> usize {
        self.cache.len()
    }

    /// Upper bound on `cached_buckets`.
    pub fn cache_capacity(&self) -> usize {
        self.cache.max_size()
    }

    pub fn store_available(&self) -> bool {
        self.store.is_available()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}
