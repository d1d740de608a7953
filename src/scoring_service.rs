//! Scoring facade.
//!
//! One attempt moves through: cache check → [hit: respond] | [miss: fetch
//! profile → rate limit → gateway (with retry) → cache store → respond].
//! Statistics are recorded exactly once per attempt, after its outcome is
//! known, and the cache is only written on success.

use crate::config::ScoringConfig;
use crate::errors::ScoringError;
use crate::insights::{derive_insights, score_summary};
use crate::lead_provider::LeadDataProvider;
use crate::model_gateway::{ModelRegistry, Prediction, RegisteredModel};
use crate::models::{
    BatchScoringResult, HealthStatus, LeadFeatures, LeadId, LeadInsights, MLLeadScore,
    ScoreComparison, ScoringStatistics,
};
use crate::rate_limiter::ScoringRateLimiter;
use crate::score_cache::ScoreCache;
use crate::statistics::{CacheLookup, Gauges, Outcome, StatisticsCollector};
use chrono::Utc;
use failsafe::CircuitBreaker;
use moka::future::Cache;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use uuid::Uuid;

/// How an attempt behaves when the rate limiter is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    FailFast,
    Queue(Duration),
}

pub(crate) struct ServiceInner {
    pub(crate) config: ScoringConfig,
    pub(crate) registry: ModelRegistry,
    pub(crate) leads: Arc<dyn LeadDataProvider>,
    pub(crate) cache: ScoreCache,
    pub(crate) limiter: ScoringRateLimiter,
    pub(crate) stats: StatisticsCollector,
    /// Batch results by request ID, retained for an hour.
    pub(crate) batches: Cache<Uuid, Arc<watch::Sender<BatchScoringResult>>>,
}

/// Real-time lead scoring service.
///
/// Cheap to clone; clones share cache, limiter and statistics.
#[derive(Clone)]
pub struct LeadScoringService {
    pub(crate) inner: Arc<ServiceInner>,
}

impl LeadScoringService {
    pub fn new(
        config: ScoringConfig,
        registry: ModelRegistry,
        leads: Arc<dyn LeadDataProvider>,
    ) -> Self {
        let cache = ScoreCache::new(config.cache_ttl, config.cache_max_entries);
        let limiter = ScoringRateLimiter::new(config.rate_limit_per_second, config.rate_limit_burst);
        let stats = StatisticsCollector::new(config.stats_window, config.health.clone());
        let batches = Cache::builder()
            .time_to_live(Duration::from_secs(3_600))
            .max_capacity(10_000)
            .build();

        tracing::info!(
            "Lead scoring service ready: models {:?}, default {}, cache TTL {}s",
            registry.model_ids(),
            registry.default_model_id(),
            config.cache_ttl.as_secs()
        );

        Self {
            inner: Arc::new(ServiceInner {
                config,
                registry,
                leads,
                cache,
                limiter,
                stats,
                batches,
            }),
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.inner.config
    }

    /// Scores one lead.
    ///
    /// With `use_cache = false` the cache is not read, but the fresh score
    /// still replaces the cached one.
    pub async fn score_lead(
        &self,
        lead_id: LeadId,
        model_id: Option<&str>,
        use_cache: bool,
    ) -> Result<MLLeadScore, ScoringError> {
        self.score_tracked(lead_id, model_id, use_cache, Admission::FailFast)
            .await
    }

    /// Scores the lead (through the cache) and derives fresh insights.
    pub async fn get_lead_insights(
        &self,
        lead_id: LeadId,
        model_id: Option<&str>,
    ) -> Result<LeadInsights, ScoringError> {
        let score = self
            .score_tracked(lead_id, model_id, true, Admission::FailFast)
            .await?;
        Ok(derive_insights(&score))
    }

    pub fn scoring_statistics(&self) -> ScoringStatistics {
        self.inner.stats.snapshot()
    }

    pub async fn health_status(&self) -> HealthStatus {
        let gauges = Gauges {
            cache_size: self.inner.cache.len().await,
            queue_length: self.inner.stats.queued_items() + self.inner.limiter.waiting(),
            active_requests: self.inner.stats.active_requests(),
        };
        self.inner.stats.health(gauges)
    }

    /// Drops the cached scores of one lead across all models.
    pub async fn clear_lead_cache(&self, lead_id: LeadId) -> usize {
        self.inner.cache.invalidate(lead_id).await
    }

    /// Drops every cached score of one model, e.g. after it was retrained.
    pub async fn clear_model_cache(&self, model_id: &str) -> usize {
        self.inner.cache.invalidate_model(model_id).await
    }

    /// Operational reset: cache, statistics, limiter window and batch results.
    pub async fn clear_all_caches(&self) {
        self.inner.cache.clear().await;
        self.inner.batches.invalidate_all();
        self.inner.stats.reset();
        self.inner.limiter.reset();
        tracing::info!("All scoring caches and statistics cleared");
    }

    /// Sets the TTL for entries written from now on.
    pub fn update_cache_settings(&self, ttl_ms: u64) -> Result<(), ScoringError> {
        if ttl_ms == 0 {
            return Err(ScoringError::InvalidSettings(
                "cache TTL must be greater than 0ms".to_string(),
            ));
        }
        self.inner.cache.set_ttl(Duration::from_millis(ttl_ms));
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        self.inner.cache.ttl()
    }

    pub fn registered_models(&self) -> Vec<String> {
        self.inner.registry.model_ids()
    }

    pub fn default_model_id(&self) -> &str {
        self.inner.registry.default_model_id()
    }

    /// One logical attempt, recorded in the statistics exactly once.
    pub(crate) async fn score_tracked(
        &self,
        lead_id: LeadId,
        model_id: Option<&str>,
        use_cache: bool,
        admission: Admission,
    ) -> Result<MLLeadScore, ScoringError> {
        let _active = self.inner.stats.begin_request();
        let started = Instant::now();

        let (result, lookup) = self
            .score_attempt(lead_id, model_id, use_cache, admission)
            .await;

        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(e) if e.is_throttled() => Outcome::Throttled,
            Err(_) => Outcome::Error,
        };
        self.inner
            .stats
            .record_outcome(outcome, started.elapsed(), lookup);

        result
    }

    async fn score_attempt(
        &self,
        lead_id: LeadId,
        model_id: Option<&str>,
        use_cache: bool,
        admission: Admission,
    ) -> (Result<MLLeadScore, ScoringError>, CacheLookup) {
        if lead_id <= 0 {
            return (Err(ScoringError::LeadNotFound(lead_id)), CacheLookup::Skipped);
        }
        let (model_id, model) = match self.inner.registry.resolve(model_id) {
            Ok(resolved) => resolved,
            Err(e) => return (Err(e), CacheLookup::Skipped),
        };

        if use_cache {
            let loaded = self
                .inner
                .cache
                .get_or_try_insert_with(
                    lead_id,
                    &model_id,
                    self.compute_score(lead_id, &model_id, &model, admission, None),
                )
                .await;
            return match loaded {
                Ok((score, true)) => {
                    tracing::debug!("Cache hit for lead {} / model {}", lead_id, model_id);
                    (Ok(score), CacheLookup::Hit)
                }
                Ok((score, false)) => (Ok(score), CacheLookup::Miss),
                Err(e) => (Err(e), CacheLookup::Miss),
            };
        }

        let previous = self.inner.cache.get(lead_id, &model_id).await;
        match self
            .compute_score(lead_id, &model_id, &model, admission, previous.as_ref())
            .await
        {
            Ok(score) => {
                self.inner.cache.put(lead_id, &model_id, score.clone()).await;
                (Ok(score), CacheLookup::Skipped)
            }
            Err(e) => (Err(e), CacheLookup::Skipped),
        }
    }

    /// Fetches the profile, passes admission and asks the model.
    async fn compute_score(
        &self,
        lead_id: LeadId,
        model_id: &str,
        model: &RegisteredModel,
        admission: Admission,
        previous: Option<&MLLeadScore>,
    ) -> Result<MLLeadScore, ScoringError> {
        let profile = self
            .inner
            .leads
            .fetch_lead_profile(lead_id)
            .await?
            .ok_or(ScoringError::LeadNotFound(lead_id))?;

        self.admit(model_id, admission).await?;

        let prediction = self
            .predict_with_retry(model_id, model, &profile.features())
            .await?;

        if !prediction.raw_score.is_finite() || !prediction.confidence.is_finite() {
            return Err(ScoringError::Internal(format!(
                "model {} returned a non-finite prediction for lead {}",
                model_id, lead_id
            )));
        }
        if prediction.model_id != model_id {
            tracing::warn!(
                "Gateway for {} answered as {}; keeping the requested model id",
                model_id,
                prediction.model_id
            );
        }

        let score = prediction.raw_score.clamp(0.0, 1.0);
        let confidence = prediction.confidence.clamp(0.0, 1.0);
        tracing::info!(
            "Scored lead {} with {}: score {:.3}, confidence {:.3}",
            lead_id,
            model_id,
            score,
            confidence
        );

        Ok(MLLeadScore {
            lead_id,
            score,
            confidence,
            model_id: model_id.to_string(),
            scored_at: Utc::now(),
            insights: score_summary(score, confidence, &prediction.factors),
            data_quality: Some(profile.data_quality()),
            comparison: previous.map(|p| ScoreComparison::between(p, score)),
        })
    }

    async fn admit(&self, model_id: &str, admission: Admission) -> Result<(), ScoringError> {
        let admitted = match admission {
            Admission::FailFast => self.inner.limiter.try_acquire(Some(model_id)),
            Admission::Queue(max_wait) => {
                self.inner
                    .limiter
                    .acquire_within(Some(model_id), max_wait)
                    .await
            }
        };
        if admitted {
            Ok(())
        } else {
            Err(ScoringError::RateLimited(format!(
                "model {} is at capacity",
                model_id
            )))
        }
    }

    /// Retries `ModelUnavailable` with exponential backoff.
    async fn predict_with_retry(
        &self,
        model_id: &str,
        model: &RegisteredModel,
        features: &LeadFeatures,
    ) -> Result<Prediction, ScoringError> {
        let attempts = self.inner.config.model_max_retries + 1;
        let mut backoff = self.inner.config.model_retry_backoff;
        let mut attempt = 1;

        loop {
            match Self::call_gateway(model_id, model, features).await {
                Ok(prediction) => return Ok(prediction),
                Err(e) if e.is_transient() && attempt < attempts => {
                    tracing::warn!(
                        "Model {} unavailable (attempt {}/{}), retrying in {}ms: {}",
                        model_id,
                        attempt,
                        attempts,
                        backoff.as_millis(),
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        "Model {} failed for lead {}: {}",
                        model_id,
                        features.lead_id,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn call_gateway(
        model_id: &str,
        model: &RegisteredModel,
        features: &LeadFeatures,
    ) -> Result<Prediction, ScoringError> {
        if !model.breaker.is_call_permitted() {
            return Err(ScoringError::ModelUnavailable(format!(
                "circuit open for model {}",
                model_id
            )));
        }

        let outcome = model.gateway.predict(features).await;
        match model
            .breaker
            .call_with(|e: &ScoringError| e.is_transient(), || outcome)
        {
            Ok(prediction) => Ok(prediction),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => Err(ScoringError::ModelUnavailable(format!(
                "circuit open for model {}",
                model_id
            ))),
        }
    }
}
