use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-local admission counters.
#[derive(Debug, Default)]
pub struct AdmissionStats {
    allowed: AtomicU64,
    denied: AtomicU64,
    rejected_input: AtomicU64,
    store_read_failures: AtomicU64,
    store_write_failures: AtomicU64,
    dropped_writes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub allowed: u64,
    pub denied: u64,
    pub rejected_input: u64,
    pub store_read_failures: u64,
    pub store_write_failures: u64,
    pub dropped_writes: u64,
}

impl AdmissionStats {
    pub fn record_decision(&self, allowed: bool) {
        if allowed {
            self.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_rejected_input(&self) {
        self.rejected_input.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_read_failure(&self) {
        self.store_read_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_write_failure(&self) {
        self.store_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_write(&self) {
        self.dropped_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            rejected_input: self.rejected_input.load(Ordering::Relaxed),
            store_read_failures: self.store_read_failures.load(Ordering::Relaxed),
            store_write_failures: self.store_write_failures.load(Ordering::Relaxed),
            dropped_writes: self.dropped_writes.load(Ordering::Relaxed),
        }
    }
}
