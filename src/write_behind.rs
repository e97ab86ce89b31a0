//! Bounded background writer for durable bucket records.
//!
//! Request threads hand records to a fixed-size queue and return
//! immediately; a single writer thread drains the queue into the store.

use crate::error::AdmissionError;
use crate::stats::AdmissionStats;
use crate::store::{BucketStore, DurableRecord};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};

#[derive(Debug)]
struct PendingWrite {
    key: String,
    record: DurableRecord,
    ttl: Duration,
}

/// Handle used to enqueue writes. Dropping it stops the writer thread once
/// the queue drains.
#[derive(Debug)]
pub struct WriteBehind {
    sender: mpsc::Sender<PendingWrite>,
    stats: Arc<AdmissionStats>,
}

impl WriteBehind {
    pub fn spawn(
        store: Arc<dyn BucketStore>,
        capacity: usize,
        stats: Arc<AdmissionStats>,
    ) -> Result<Self, AdmissionError> {
        let (sender, mut receiver) = mpsc::channel::<PendingWrite>(capacity.max(1));
        let writer_stats = Arc::clone(&stats);

        thread::Builder::new()
            .name("admission-store-writer".to_string())
            .spawn(move || {
                while let Some(write) = receiver.blocking_recv() {
                    match store.save(&write.key, &write.record, write.ttl) {
                        Ok(()) => debug!(key = %write.key, tokens = write.record.tokens, "Mirrored bucket state"),
                        Err(e) => {
                            writer_stats.record_store_write_failure();
                            error!(key = %write.key, error = %e, "Failed to mirror bucket state");
                        }
                    }
                }
                debug!("Bucket store writer stopped");
            })?;

        Ok(Self { sender, stats })
    }

    /// Queue a write without blocking. Writes are dropped when the queue is
    /// full.
    pub fn enqueue(&self, key: String, record: DurableRecord, ttl: Duration) {
        match self.sender.try_send(PendingWrite { key, record, ttl }) {
            Ok(()) => {}
            Err(TrySendError::Full(write)) => {
                self.stats.record_dropped_write();
                warn!(key = %write.key, "Bucket write queue full, dropping write");
            }
            Err(TrySendError::Closed(write)) => {
                self.stats.record_dropped_write();
                warn!(key = %write.key, "Bucket store writer has stopped, dropping write");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryBucketStore;
    use std::time::Instant;

    fn record(tokens: u32) -> DurableRecord {
        DurableRecord {
            tokens,
            last_refill_ms: 1_000,
            expires_at: u64::MAX,
        }
    }

    #[test]
    fn test_enqueued_write_reaches_store() {
        let store = Arc::new(InMemoryBucketStore::new());
        let stats = Arc::new(AdmissionStats::default());
        let writer = WriteBehind::spawn(store.clone(), 8, stats).unwrap();

        writer.enqueue("admission:u1:/api".to_string(), record(0), Duration::from_secs(60));

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.record("admission:u1:/api").is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(store.record("admission:u1:/api").unwrap().tokens, 0);
    }
}
