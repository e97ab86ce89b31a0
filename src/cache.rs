use crate::clock::Clock;
use crate::token_bucket::{AccountingKey, TokenBucket};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Bounded in-process map from accounting key to bucket.
///
/// This is the hot path of every admission decision. Expired buckets are
/// swept lazily from the request path on a cooldown, so no timer thread is
/// needed.
#[derive(Debug)]
pub struct BucketCache {
    buckets: DashMap<AccountingKey, Arc<TokenBucket>>,
    max_size: usize,
    cleanup_interval_ms: u64,
    last_cleanup: AtomicU64,
    cleanup_lock: Mutex<()>,
    // Serializes the size check with the insert on the miss path.
    insert_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl BucketCache {
    pub fn new(max_size: usize, cleanup_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_millis();
        Self {
            buckets: DashMap::new(),
            max_size: max_size.max(1),
            cleanup_interval_ms: u64::try_from(cleanup_interval.as_millis()).unwrap_or(u64::MAX),
            last_cleanup: AtomicU64::new(now),
            cleanup_lock: Mutex::new(()),
            insert_lock: Mutex::new(()),
            clock,
        }
    }

    pub fn get(&self, key: &AccountingKey) -> Option<Arc<TokenBucket>> {
        self.buckets.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Insert `bucket` under `key`, evicting first if the cache is full.
    ///
    /// If another caller already cached a live bucket for the key, that one is
    /// kept and returned so concurrent misses share a single bucket.
    pub fn put(&self, key: AccountingKey, bucket: Arc<TokenBucket>) -> Arc<TokenBucket> {
        let _guard = self
            .insert_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if !self.buckets.contains_key(&key) {
            while self.buckets.len() >= self.max_size {
                if !self.evict_one() {
                    break;
                }
            }
        }

        match self.buckets.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(Arc::clone(&bucket));
                    bucket
                } else {
                    Arc::clone(occupied.get())
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&bucket));
                bucket
            }
        }
    }

    // Evicts whichever entry the map yields first.
    fn evict_one(&self) -> bool {
        let victim = self.buckets.iter().next().map(|entry| entry.key().clone());
        match victim {
            Some(key) => {
                debug!(key = %key, "Evicting bucket from full cache");
                self.buckets.remove(&key).is_some()
            }
            None => false,
        }
    }

    /// Sweep expired buckets if the cleanup interval has passed.
    ///
    /// Returns the number of buckets removed, `0` when no sweep ran.
    pub fn sweep_if_due(&self) -> usize {
        let now = self.clock.now_millis();
        if !self.sweep_due(now) {
            return 0;
        }

        // Another caller is already sweeping.
        let Ok(_guard) = self.cleanup_lock.try_lock() else {
            return 0;
        };
        if !self.sweep_due(now) {
            return 0;
        }

        let removed = self.remove_expired();
        self.last_cleanup.store(now, Ordering::Release);
        removed
    }

    fn sweep_due(&self, now: u64) -> bool {
        now.saturating_sub(self.last_cleanup.load(Ordering::Acquire)) > self.cleanup_interval_ms
    }

    /// Remove every expired bucket unconditionally.
    pub fn remove_expired(&self) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| !bucket.is_expired());
        let removed = before.saturating_sub(self.buckets.len());
        debug!(removed, remaining = self.buckets.len(), "Swept expired buckets");
        removed
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rate_limit_config::RateLimitPolicy;

    const WINDOW: Duration = Duration::from_secs(60);

    fn setup(max_size: usize) -> (BucketCache, ManualClock, Arc<dyn Clock>) {
        let clock = ManualClock::new(1_700_000_000_000);
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let cache = BucketCache::new(max_size, Duration::from_secs(300), Arc::clone(&shared));
        (cache, clock, shared)
    }

    fn fresh(clock: &Arc<dyn Clock>, capacity: u32) -> Arc<TokenBucket> {
        let policy = RateLimitPolicy::new(capacity, WINDOW).unwrap();
        Arc::new(TokenBucket::new(policy, Arc::clone(clock)))
    }

    #[test]
    fn test_get_and_put() {
        let (cache, _clock, shared) = setup(10);
        let key = AccountingKey::new("u1", "/api/plaid");
        assert!(cache.get(&key).is_none());

        cache.put(key.clone(), fresh(&shared, 3));
        let cached = cache.get(&key).unwrap();
        assert_eq!(cached.policy().capacity, 3);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_size_never_exceeds_max() {
        let (cache, _clock, shared) = setup(10);
        for i in 0..25 {
            cache.put(AccountingKey::new(format!("user-{}", i), "/api"), fresh(&shared, 1));
            assert!(cache.len() <= 10);
        }
        assert_eq!(cache.len(), 10);
    }

    #[test]
    fn test_concurrent_puts_respect_max_size() {
        let (cache, _clock, shared) = setup(4);
        let threads = 32;

        for round in 0..50 {
            let barrier = std::sync::Barrier::new(threads);
            std::thread::scope(|scope| {
                for t in 0..threads {
                    let (cache, shared, barrier) = (&cache, &shared, &barrier);
                    scope.spawn(move || {
                        barrier.wait();
                        let key = AccountingKey::new(format!("user-{}-{}", round, t), "/api");
                        cache.put(key, fresh(shared, 1));
                    });
                }
            });
            assert!(cache.len() <= cache.max_size(), "cache grew to {}", cache.len());
        }
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_put_keeps_live_bucket_on_race() {
        let (cache, _clock, shared) = setup(10);
        let key = AccountingKey::new("u1", "/api");

        let first = cache.put(key.clone(), fresh(&shared, 2));
        assert!(first.try_consume());

        let second = cache.put(key.clone(), fresh(&shared, 2));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.get(&key).unwrap().available_tokens(), 1);
    }

    #[test]
    fn test_put_replaces_expired_bucket() {
        let (cache, clock, shared) = setup(10);
        let key = AccountingKey::new("u1", "/api");

        let old = cache.put(key.clone(), fresh(&shared, 2));
        clock.advance(WINDOW * 3);
        assert!(old.is_expired());

        let replacement = cache.put(key.clone(), fresh(&shared, 2));
        assert!(!Arc::ptr_eq(&old, &replacement));
    }

    #[test]
    fn test_replacing_existing_key_does_not_evict() {
        let (cache, clock, shared) = setup(2);
        let a = AccountingKey::new("a", "/api");
        let b = AccountingKey::new("b", "/api");
        cache.put(a.clone(), fresh(&shared, 1));
        cache.put(b.clone(), fresh(&shared, 1));

        clock.advance(WINDOW * 3);
        cache.put(a.clone(), fresh(&shared, 1));
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_some());
    }

    #[test]
    fn test_sweep_waits_for_interval() {
        let (cache, clock, shared) = setup(10);
        cache.put(AccountingKey::new("idle", "/api"), fresh(&shared, 1));

        clock.advance(WINDOW * 3);
        assert_eq!(cache.sweep_if_due(), 0);
        assert_eq!(cache.len(), 1);

        clock.advance(Duration::from_secs(121));
        assert_eq!(cache.sweep_if_due(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweep_keeps_active_buckets() {
        let (cache, clock, shared) = setup(10);
        cache.put(AccountingKey::new("idle", "/api"), fresh(&shared, 1));

        clock.advance(Duration::from_secs(301));
        let active = AccountingKey::new("active", "/api");
        cache.put(active.clone(), fresh(&shared, 1));

        assert_eq!(cache.sweep_if_due(), 1);
        assert!(cache.get(&active).is_some());

        // Cooldown restarts after a sweep.
        clock.advance(WINDOW * 3);
        assert_eq!(cache.sweep_if_due(), 0);
    }
}
