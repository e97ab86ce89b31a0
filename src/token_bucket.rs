use crate::clock::Clock;
use crate::rate_limit_config::RateLimitPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Identifies one bucket: an identity on one endpoint class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountingKey {
    identity: String,
    endpoint_class: String,
}

impl AccountingKey {
    pub fn new(identity: impl Into<String>, endpoint_class: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            endpoint_class: endpoint_class.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn endpoint_class(&self) -> &str {
        &self.endpoint_class
    }

    /// Key under which the bucket is mirrored in the durable store.
    pub fn storage_key(&self) -> String {
        format!("admission:{}:{}", self.identity, self.endpoint_class)
    }
}

impl fmt::Display for AccountingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.identity, self.endpoint_class)
    }
}

/// Point-in-time view of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketState {
    pub tokens: u32,
    pub last_refill_ms: u64,
}

/// Lock-free token bucket with fixed-window burst refill.
///
/// Every `window` the bucket is credited `capacity` tokens per elapsed
/// window, capped at `capacity`. An idle bucket therefore jumps straight back
/// to full instead of trickling.
#[derive(Debug)]
pub struct TokenBucket {
    policy: RateLimitPolicy,
    tokens: AtomicU32,
    last_refill: AtomicU64,
    refilling: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// Fresh bucket at full capacity.
    pub fn new(policy: RateLimitPolicy, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_millis();
        Self {
            policy,
            tokens: AtomicU32::new(policy.capacity),
            last_refill: AtomicU64::new(now),
            refilling: AtomicBool::new(false),
            clock,
        }
    }

    /// Rehydrate a bucket from previously observed state.
    pub fn from_state(policy: RateLimitPolicy, state: BucketState, clock: Arc<dyn Clock>) -> Self {
        let bucket = Self {
            policy,
            tokens: AtomicU32::new(state.tokens.min(policy.capacity)),
            last_refill: AtomicU64::new(state.last_refill_ms),
            refilling: AtomicBool::new(false),
            clock,
        };
        bucket.refill(bucket.clock.now_millis());
        bucket
    }

    /// Refill, then take one token if any is left.
    pub fn try_consume(&self) -> bool {
        self.refill(self.clock.now_millis());
        self.tokens
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            })
            .is_ok()
    }

    fn refill(&self, now: u64) {
        let window = self.policy.window_millis();
        loop {
            let last = self.last_refill.load(Ordering::Acquire);
            if now.saturating_sub(last) < window {
                return;
            }

            // A refill is in flight; its credit lands before the timestamp moves.
            if self
                .refilling
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                std::hint::spin_loop();
                continue;
            }

            let last = self.last_refill.load(Ordering::Acquire);
            let elapsed = now.saturating_sub(last);
            if elapsed >= window {
                let windows = elapsed / window;
                let capacity = self.policy.capacity;
                let credit = windows
                    .saturating_mul(u64::from(capacity))
                    .min(u64::from(capacity)) as u32;
                let _ = self
                    .tokens
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                        Some(current.saturating_add(credit).min(capacity))
                    });
                self.last_refill.store(
                    last.saturating_add(windows.saturating_mul(window)),
                    Ordering::Release,
                );
            }

            self.refilling.store(false, Ordering::Release);
            return;
        }
    }

    /// Time until the next window opens, in whole seconds, never below one.
    pub fn time_until_refill(&self) -> Duration {
        let now = self.clock.now_millis();
        let next_refill = self
            .last_refill
            .load(Ordering::Acquire)
            .saturating_add(self.policy.window_millis());
        let secs = next_refill.saturating_sub(now) / 1000;
        Duration::from_secs(secs.max(1))
    }

    /// Idle for more than two windows; equivalent to a fresh bucket.
    pub fn is_expired(&self) -> bool {
        let now = self.clock.now_millis();
        let idle = now.saturating_sub(self.last_refill.load(Ordering::Acquire));
        idle > self.policy.window_millis().saturating_mul(2)
    }

    pub fn available_tokens(&self) -> u32 {
        self.tokens.load(Ordering::Acquire)
    }

    pub fn last_refill_ms(&self) -> u64 {
        self.last_refill.load(Ordering::Acquire)
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn snapshot(&self) -> BucketState {
        BucketState {
            tokens: self.available_tokens(),
            last_refill_ms: self.last_refill_ms(),
        }
    }
}
