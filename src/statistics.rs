//! Request telemetry and health evaluation.
//!
//! Counters live in a single aggregation window guarded by a short mutex;
//! in-flight and queued gauges are atomics released by RAII guards so a
//! cancelled task can never leak a count.

use crate::config::HealthThresholds;
use crate::models::{HealthState, HealthStatus, ScoringStatistics, TimeRange};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How a logical scoring attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
    /// Rejected by the rate limiter. Counts toward neither rate.
    Throttled,
}

/// Whether the attempt consulted the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    Hit,
    Miss,
    /// Cache read bypassed (`use_cache = false`) or never reached.
    Skipped,
}

#[derive(Debug)]
struct Window {
    start: DateTime<Utc>,
    started: Instant,
    successes: u64,
    errors: u64,
    throttled: u64,
    cache_hits: u64,
    cache_misses: u64,
    total_latency: Duration,
}

impl Window {
    fn new() -> Self {
        Self {
            start: Utc::now(),
            started: Instant::now(),
            successes: 0,
            errors: 0,
            throttled: 0,
            cache_hits: 0,
            cache_misses: 0,
            total_latency: Duration::ZERO,
        }
    }

    fn completed(&self) -> u64 {
        self.successes + self.errors
    }
}

/// Live gauges sampled into a health report.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gauges {
    pub cache_size: u64,
    pub queue_length: usize,
    pub active_requests: usize,
}

pub struct StatisticsCollector {
    window_len: Duration,
    window: Mutex<Window>,
    thresholds: HealthThresholds,
    started: Instant,
    active: Arc<AtomicUsize>,
    queued: Arc<AtomicUsize>,
}

/// Held for the duration of a scoring attempt.
pub struct ActiveRequest(Arc<AtomicUsize>);

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Held while a deferred batch item waits for a worker slot.
pub struct QueuedItem(Arc<AtomicUsize>);

impl Drop for QueuedItem {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StatisticsCollector {
    pub fn new(window_len: Duration, thresholds: HealthThresholds) -> Self {
        Self {
            window_len,
            window: Mutex::new(Window::new()),
            thresholds,
            started: Instant::now(),
            active: Arc::new(AtomicUsize::new(0)),
            queued: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn roll_if_due(&self, window: &mut Window) {
        if window.started.elapsed() >= self.window_len {
            tracing::info!(
                "Statistics window rolled over after {} completed request(s)",
                window.completed()
            );
            *window = Window::new();
        }
    }

    /// Records one logical attempt. Call exactly once per attempt.
    pub fn record_outcome(&self, outcome: Outcome, latency: Duration, lookup: CacheLookup) {
        let mut window = self.window.lock();
        self.roll_if_due(&mut window);

        match outcome {
            Outcome::Success => window.successes += 1,
            Outcome::Error => window.errors += 1,
            Outcome::Throttled => window.throttled += 1,
        }
        if outcome != Outcome::Throttled {
            window.total_latency += latency;
        }
        match lookup {
            CacheLookup::Hit => window.cache_hits += 1,
            CacheLookup::Miss => window.cache_misses += 1,
            CacheLookup::Skipped => {}
        }
    }

    pub fn snapshot(&self) -> ScoringStatistics {
        let mut window = self.window.lock();
        self.roll_if_due(&mut window);

        let completed = window.completed();
        let (success_rate, error_rate, average_response_time) = if completed == 0 {
            (0.0, 0.0, 0.0)
        } else {
            (
                window.successes as f64 / completed as f64,
                window.errors as f64 / completed as f64,
                window.total_latency.as_secs_f64() * 1_000.0 / completed as f64,
            )
        };
        let lookups = window.cache_hits + window.cache_misses;
        let cache_hit_rate = if lookups == 0 {
            0.0
        } else {
            window.cache_hits as f64 / lookups as f64
        };

        ScoringStatistics {
            total_requests: completed + window.throttled,
            successful_requests: window.successes,
            failed_requests: window.errors,
            throttled_requests: window.throttled,
            success_rate,
            error_rate,
            average_response_time,
            cache_hits: window.cache_hits,
            cache_misses: window.cache_misses,
            cache_hit_rate,
            time_range: TimeRange {
                start: window.start,
                end: Utc::now(),
            },
        }
    }

    /// Starts a new, empty window.
    pub fn reset(&self) {
        *self.window.lock() = Window::new();
    }

    pub fn begin_request(&self) -> ActiveRequest {
        self.active.fetch_add(1, Ordering::SeqCst);
        ActiveRequest(self.active.clone())
    }

    pub fn enqueue(&self) -> QueuedItem {
        self.queued.fetch_add(1, Ordering::SeqCst);
        QueuedItem(self.queued.clone())
    }

    pub fn active_requests(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn queued_items(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Evaluates the thresholds against the current window and `gauges`.
    ///
    /// - error rate ≥ `unhealthy_error_rate` ⇒ unhealthy
    /// - error rate ≥ `degraded_error_rate` ⇒ degraded
    /// - throttled share ≥ `degraded_throttle_rate` ⇒ degraded
    /// - queue ≥ `max_queue_length` ⇒ unhealthy; ≥ half of it ⇒ degraded
    ///
    /// Rate rules wait for `min_samples` requests.
    pub fn health(&self, gauges: Gauges) -> HealthStatus {
        let stats = self.snapshot();
        let t = &self.thresholds;
        let mut status = HealthState::Healthy;
        let mut reasons = Vec::new();

        let completed = stats.successful_requests + stats.failed_requests;
        if completed >= t.min_samples && completed > 0 {
            if stats.error_rate >= t.unhealthy_error_rate {
                status = worse(status, HealthState::Unhealthy);
                reasons.push(format!("error rate {:.2} at or above {:.2}", stats.error_rate, t.unhealthy_error_rate));
            } else if stats.error_rate >= t.degraded_error_rate {
                status = worse(status, HealthState::Degraded);
                reasons.push(format!("error rate {:.2} at or above {:.2}", stats.error_rate, t.degraded_error_rate));
            }
        }

        if stats.total_requests >= t.min_samples && stats.total_requests > 0 {
            let throttle_rate = stats.throttled_requests as f64 / stats.total_requests as f64;
            if throttle_rate >= t.degraded_throttle_rate {
                status = worse(status, HealthState::Degraded);
                reasons.push(format!("{:.0}% of requests throttled", throttle_rate * 100.0));
            }
        }

        if t.max_queue_length > 0 {
            if gauges.queue_length >= t.max_queue_length {
                status = worse(status, HealthState::Unhealthy);
                reasons.push(format!("queue length {} at or above {}", gauges.queue_length, t.max_queue_length));
            } else if gauges.queue_length > 0 && gauges.queue_length >= t.max_queue_length / 2 {
                status = worse(status, HealthState::Degraded);
                reasons.push(format!("queue length {} at or above {}", gauges.queue_length, t.max_queue_length / 2));
            }
        }

        HealthStatus {
            status,
            uptime_secs: self.uptime().as_secs(),
            cache_size: gauges.cache_size,
            queue_length: gauges.queue_length,
            active_requests: gauges.active_requests,
            last_updated: Utc::now(),
            reasons,
        }
    }
}

fn severity(state: HealthState) -> u8 {
    match state {
        HealthState::Healthy => 0,
        HealthState::Degraded => 1,
        HealthState::Unhealthy => 2,
    }
}

fn worse(a: HealthState, b: HealthState) -> HealthState {
    if severity(b) > severity(a) {
        b
    } else {
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> StatisticsCollector {
        StatisticsCollector::new(
            Duration::from_secs(3_600),
            HealthThresholds {
                min_samples: 4,
                ..HealthThresholds::default()
            },
        )
    }

    #[test]
    fn test_rates_sum_to_one() {
        let stats = collector();
        stats.record_outcome(Outcome::Success, Duration::from_millis(10), CacheLookup::Miss);
        stats.record_outcome(Outcome::Success, Duration::from_millis(2), CacheLookup::Hit);
        stats.record_outcome(Outcome::Error, Duration::from_millis(30), CacheLookup::Skipped);

        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 3);
        assert!((snap.success_rate + snap.error_rate - 1.0).abs() < 1e-9);
        assert!((snap.average_response_time - 14.0).abs() < 1e-6);
        assert!((snap.cache_hit_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_throttled_counted_separately() {
        let stats = collector();
        stats.record_outcome(Outcome::Success, Duration::from_millis(5), CacheLookup::Miss);
        stats.record_outcome(Outcome::Throttled, Duration::from_millis(1), CacheLookup::Miss);

        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.throttled_requests, 1);
        assert_eq!(snap.success_rate, 1.0);
        assert_eq!(snap.error_rate, 0.0);
        assert!((snap.average_response_time - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_window_rollover_resets_counters() {
        let stats = StatisticsCollector::new(Duration::from_millis(20), HealthThresholds::default());
        stats.record_outcome(Outcome::Success, Duration::from_millis(1), CacheLookup::Hit);
        let before = stats.snapshot();
        assert_eq!(before.total_requests, 1);

        std::thread::sleep(Duration::from_millis(40));
        let after = stats.snapshot();
        assert_eq!(after.total_requests, 0);
        assert!(after.time_range.start > before.time_range.start);
    }

    #[test]
    fn test_health_defaults_to_healthy() {
        let health = collector().health(Gauges::default());
        assert_eq!(health.status, HealthState::Healthy);
        assert!(health.reasons.is_empty());
    }

    #[test]
    fn test_health_needs_min_samples() {
        let stats = collector();
        for _ in 0..3 {
            stats.record_outcome(Outcome::Error, Duration::from_millis(1), CacheLookup::Miss);
        }
        assert_eq!(stats.health(Gauges::default()).status, HealthState::Healthy);

        stats.record_outcome(Outcome::Error, Duration::from_millis(1), CacheLookup::Miss);
        assert_eq!(stats.health(Gauges::default()).status, HealthState::Unhealthy);
    }

    #[test]
    fn test_health_degrades_on_error_rate() {
        let stats = collector();
        for _ in 0..8 {
            stats.record_outcome(Outcome::Success, Duration::from_millis(1), CacheLookup::Miss);
        }
        stats.record_outcome(Outcome::Error, Duration::from_millis(1), CacheLookup::Miss);
        stats.record_outcome(Outcome::Error, Duration::from_millis(1), CacheLookup::Miss);

        let health = stats.health(Gauges::default());
        assert_eq!(health.status, HealthState::Degraded);
        assert_eq!(health.reasons.len(), 1);
    }

    #[test]
    fn test_health_queue_thresholds() {
        let stats = collector();
        let degraded = stats.health(Gauges {
            queue_length: 500,
            ..Gauges::default()
        });
        assert_eq!(degraded.status, HealthState::Degraded);

        let unhealthy = stats.health(Gauges {
            queue_length: 1_000,
            ..Gauges::default()
        });
        assert_eq!(unhealthy.status, HealthState::Unhealthy);
    }

    #[test]
    fn test_guards_release_gauges() {
        let stats = collector();
        {
            let _a = stats.begin_request();
            let _q = stats.enqueue();
            assert_eq!(stats.active_requests(), 1);
            assert_eq!(stats.queued_items(), 1);
        }
        assert_eq!(stats.active_requests(), 0);
        assert_eq!(stats.queued_items(), 0);
    }
}
