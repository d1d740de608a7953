//! Admission control for model gateway calls.
//!
//! A keyed GCRA token bucket: each key (a model ID, or the global key when
//! none is given) holds `burst` tokens and regains one every
//! `1 / per_second` seconds. Replenishment depends only on elapsed time, so
//! the admission schedule is deterministic for a given call sequence.
//! Cache hits never pass through here.

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use parking_lot::RwLock;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const GLOBAL_KEY: &str = "__global__";

pub struct ScoringRateLimiter {
    quota: Quota,
    limiter: RwLock<Arc<DefaultKeyedRateLimiter<String>>>,
    waiting: Arc<AtomicUsize>,
}

/// Decrements the waiting gauge when a queued acquisition ends or is dropped.
struct WaitingSlot(Arc<AtomicUsize>);

impl WaitingSlot {
    fn enter(gauge: &Arc<AtomicUsize>) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self(gauge.clone())
    }
}

impl Drop for WaitingSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScoringRateLimiter {
    /// Zero values are raised to 1.
    pub fn new(per_second: u32, burst: u32) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        Self::with_quota(Quota::per_second(per_second).allow_burst(burst))
    }

    pub fn with_quota(quota: Quota) -> Self {
        Self {
            quota,
            limiter: RwLock::new(Arc::new(RateLimiter::keyed(quota))),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn current(&self) -> Arc<DefaultKeyedRateLimiter<String>> {
        self.limiter.read().clone()
    }

    fn key_for(key: Option<&str>) -> String {
        key.unwrap_or(GLOBAL_KEY).to_string()
    }

    /// Takes a token for `key` if one is available.
    pub fn try_acquire(&self, key: Option<&str>) -> bool {
        let admitted = self.current().check_key(&Self::key_for(key)).is_ok();
        if !admitted {
            tracing::warn!("Rate limit exhausted for {}", key.unwrap_or(GLOBAL_KEY));
        }
        admitted
    }

    /// Waits up to `max_wait` for a token. Queued callers show up in
    /// [`waiting`](Self::waiting) until they are admitted or give up.
    pub async fn acquire_within(&self, key: Option<&str>, max_wait: Duration) -> bool {
        let limiter = self.current();
        let bucket = Self::key_for(key);
        if limiter.check_key(&bucket).is_ok() {
            return true;
        }
        if max_wait.is_zero() {
            return false;
        }

        let _slot = WaitingSlot::enter(&self.waiting);
        tracing::debug!("Queueing for rate limit token on {}", bucket);
        match tokio::time::timeout(max_wait, limiter.until_key_ready(&bucket)).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    "Gave up waiting {}ms for rate limit token on {}",
                    max_wait.as_millis(),
                    bucket
                );
                false
            }
        }
    }

    /// Starts a fresh window: every bucket is full again.
    pub fn reset(&self) {
        *self.limiter.write() = Arc::new(RateLimiter::keyed(self.quota));
        tracing::info!("Rate limiter window reset");
    }

    /// Callers currently queued for a token.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slow_limiter(burst: u32) -> ScoringRateLimiter {
        // One token per hour: nothing replenishes during a test
        let quota = Quota::per_hour(NonZeroU32::new(1).unwrap())
            .allow_burst(NonZeroU32::new(burst).unwrap());
        ScoringRateLimiter::with_quota(quota)
    }

    #[test]
    fn test_burst_then_reject() {
        let limiter = slow_limiter(2);
        assert!(limiter.try_acquire(Some("m1")));
        assert!(limiter.try_acquire(Some("m1")));
        assert!(!limiter.try_acquire(Some("m1")));
    }

    #[test]
    fn test_keys_have_independent_buckets() {
        let limiter = slow_limiter(1);
        assert!(limiter.try_acquire(Some("m1")));
        assert!(limiter.try_acquire(Some("m2")));
        assert!(limiter.try_acquire(None));
        assert!(!limiter.try_acquire(Some("m1")));
        assert!(!limiter.try_acquire(None));
    }

    #[test]
    fn test_reset_refills_buckets() {
        let limiter = slow_limiter(1);
        assert!(limiter.try_acquire(Some("m1")));
        assert!(!limiter.try_acquire(Some("m1")));

        limiter.reset();
        assert!(limiter.try_acquire(Some("m1")));
    }

    #[tokio::test]
    async fn test_queued_acquire_times_out() {
        let limiter = slow_limiter(1);
        assert!(limiter.acquire_within(Some("m1"), Duration::from_millis(10)).await);
        assert!(!limiter.acquire_within(Some("m1"), Duration::from_millis(20)).await);
        assert_eq!(limiter.waiting(), 0);
    }

    #[tokio::test]
    async fn test_queued_acquire_waits_for_replenishment() {
        // 20 tokens per second, burst 1: the next token is ~50ms away
        let limiter = ScoringRateLimiter::new(20, 1);
        assert!(limiter.try_acquire(Some("m1")));
        assert!(limiter.acquire_within(Some("m1"), Duration::from_secs(1)).await);
    }
}
