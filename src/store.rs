use crate::clock::Clock;
use crate::error::{AdmissionError, StoreError};
use crate::rate_limit_config::RateLimitPolicy;
use crate::stats::AdmissionStats;
use crate::token_bucket::{AccountingKey, BucketState, TokenBucket};
use crate::write_behind::WriteBehind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::error;

/// Bucket state as persisted in the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableRecord {
    pub tokens: u32,
    pub last_refill_ms: u64,
    /// Epoch seconds after which the record is abandoned.
    pub expires_at: u64,
}

impl DurableRecord {
    pub fn new(state: BucketState, now_ms: u64, ttl: Duration) -> Self {
        Self {
            tokens: state.tokens,
            last_refill_ms: state.last_refill_ms,
            expires_at: (now_ms / 1000).saturating_add(ttl.as_secs()),
        }
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms / 1000 >= self.expires_at
    }

    pub fn state(&self) -> BucketState {
        BucketState {
            tokens: self.tokens,
            last_refill_ms: self.last_refill_ms,
        }
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Key/value backend that mirrors bucket state across instances.
pub trait BucketStore: Send + Sync + std::fmt::Debug + 'static {
    /// Create whatever the backend needs before first use.
    fn provision(&self) -> Result<(), StoreError>;

    fn load(&self, key: &str) -> Result<Option<DurableRecord>, StoreError>;

    /// Overwrite `key`. The backend should reclaim the record `ttl` after
    /// the write, which is when `record.expires_at` falls due.
    fn save(&self, key: &str, record: &DurableRecord, ttl: Duration) -> Result<(), StoreError>;

    /// Cheap reachability probe.
    fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Process-local store. Honors record expiry on read.
#[derive(Debug)]
pub struct InMemoryBucketStore {
    records: Mutex<HashMap<String, DurableRecord>>,
    clock: Option<Arc<dyn Clock>>,
}

impl Default for InMemoryBucketStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBucketStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            clock: None,
        }
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            clock: Some(clock),
        }
    }

    /// Raw record for `key`, ignoring expiry.
    pub fn record(&self, key: &str) -> Option<DurableRecord> {
        self.records.lock().ok()?.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn now_millis(&self) -> u64 {
        match &self.clock {
            Some(clock) => clock.now_millis(),
            None => crate::clock::SystemClock.now_millis(),
        }
    }
}

impl BucketStore for InMemoryBucketStore {
    fn provision(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<DurableRecord>, StoreError> {
        let now = self.now_millis();
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        match records.get(key).copied() {
            Some(record) if record.is_expired_at(now) => {
                records.remove(key);
                Ok(None)
            }
            other => Ok(other),
        }
    }

    fn save(&self, key: &str, record: &DurableRecord, _ttl: Duration) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records.insert(key.to_string(), *record);
        Ok(())
    }
}

/// Adapter between the admission service and a [`BucketStore`].
///
/// The store only helps instances converge; it is never required for a
/// decision. Read failures fall back to a fresh bucket and writes happen off
/// the request path.
#[derive(Debug)]
pub struct DurableBucketStore {
    store: Arc<dyn BucketStore>,
    writer: WriteBehind,
    record_ttl: Duration,
    clock: Arc<dyn Clock>,
    stats: Arc<AdmissionStats>,
}

impl DurableBucketStore {
    pub fn new(
        store: Arc<dyn BucketStore>,
        record_ttl: Duration,
        write_queue_capacity: usize,
        clock: Arc<dyn Clock>,
        stats: Arc<AdmissionStats>,
    ) -> Result<Self, AdmissionError> {
        let writer = WriteBehind::spawn(Arc::clone(&store), write_queue_capacity, Arc::clone(&stats))?;
        Ok(Self {
            store,
            writer,
            record_ttl,
            clock,
            stats,
        })
    }

    pub fn provision(&self) -> Result<(), StoreError> {
        self.store.provision()
    }

    /// Rehydrate the bucket for `key`, or start a fresh one.
    pub fn load_or_create(&self, key: &AccountingKey, policy: RateLimitPolicy) -> TokenBucket {
        let storage_key = key.storage_key();
        match self.store.load(&storage_key) {
            Ok(Some(record)) if !record.is_expired_at(self.clock.now_millis()) => {
                TokenBucket::from_state(policy, record.state(), Arc::clone(&self.clock))
            }
            Ok(_) => TokenBucket::new(policy, Arc::clone(&self.clock)),
            Err(e) => {
                self.stats.record_store_read_failure();
                error!(key = %storage_key, error = %e, "Failed to load bucket state, starting fresh");
                TokenBucket::new(policy, Arc::clone(&self.clock))
            }
        }
    }

    /// Mirror `state` to the store in the background.
    pub fn save(&self, key: &AccountingKey, state: BucketState) {
        let record = DurableRecord::new(state, self.clock.now_millis(), self.record_ttl);
        self.writer.enqueue(key.storage_key(), record, self.record_ttl);
    }

    pub fn is_available(&self) -> bool {
        self.store.ping().is_ok()
    }
}
