//! Keyed score cache with per-entry TTL.
//!
//! Entries are keyed by `(lead_id, model_id)` and carry the TTL that was in
//! force when they were written, so changing the TTL at runtime never
//! stretches or shortens entries that already exist.

use crate::models::{LeadId, MLLeadScore};
use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::ops::compute::Op;
use moka::Expiry;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScoreKey {
    pub lead_id: LeadId,
    pub model_id: String,
}

impl ScoreKey {
    pub fn new(lead_id: LeadId, model_id: impl Into<String>) -> Self {
        Self {
            lead_id,
            model_id: model_id.into(),
        }
    }
}

/// A cached score together with its expiry.
#[derive(Debug, Clone)]
pub struct ScoringCacheEntry {
    pub value: MLLeadScore,
    pub ttl: Duration,
    pub expires_at: DateTime<Utc>,
}

impl ScoringCacheEntry {
    fn new(value: MLLeadScore, ttl: Duration) -> Self {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        Self {
            value,
            ttl,
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Expires each entry after the TTL it was written with.
struct EntryTtl;

impl Expiry<ScoreKey, ScoringCacheEntry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &ScoreKey,
        value: &ScoringCacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    // An overwrite starts a fresh TTL.
    fn expire_after_update(
        &self,
        _key: &ScoreKey,
        value: &ScoringCacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Process-wide score cache. Cheap to clone; clones share storage.
#[derive(Clone)]
pub struct ScoreCache {
    entries: Cache<ScoreKey, ScoringCacheEntry>,
    ttl_ms: Arc<AtomicU64>,
}

impl ScoreCache {
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(EntryTtl)
            .build();

        Self {
            entries,
            ttl_ms: Arc::new(AtomicU64::new(duration_to_ms(ttl))),
        }
    }

    /// TTL applied to entries written from now on.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms.load(Ordering::Relaxed))
    }

    pub fn set_ttl(&self, ttl: Duration) {
        self.ttl_ms.store(duration_to_ms(ttl), Ordering::Relaxed);
        tracing::info!("Score cache TTL set to {}ms", duration_to_ms(ttl));
    }

    /// Returns the live score for the key, or `None` on a miss.
    pub async fn get(&self, lead_id: LeadId, model_id: &str) -> Option<MLLeadScore> {
        let key = ScoreKey::new(lead_id, model_id);
        let entry = self.entries.get(&key).await?;
        if entry.is_expired() {
            self.evict_if_expired(key).await;
            return None;
        }
        Some(entry.value)
    }

    /// Removes the entry under `key` only while it is still expired, so a
    /// write landing between the read and the eviction is kept.
    async fn evict_if_expired(&self, key: ScoreKey) {
        let _ = self
            .entries
            .entry(key)
            .and_compute_with(|current| {
                let op = match current {
                    Some(entry) if entry.value().is_expired() => Op::Remove,
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
    }

    /// Stores `score` with the current TTL, replacing any previous entry.
    pub async fn put(&self, lead_id: LeadId, model_id: &str, score: MLLeadScore) {
        self.put_with_ttl(lead_id, model_id, score, self.ttl()).await;
    }

    pub async fn put_with_ttl(
        &self,
        lead_id: LeadId,
        model_id: &str,
        score: MLLeadScore,
        ttl: Duration,
    ) {
        let key = ScoreKey::new(lead_id, model_id);
        tracing::debug!(
            "Caching score for lead {} / model {} ({}ms)",
            lead_id,
            model_id,
            ttl.as_millis()
        );
        self.entries
            .insert(key, ScoringCacheEntry::new(score, ttl))
            .await;
    }

    /// Returns the cached score or runs `load` to produce and store one.
    ///
    /// Concurrent callers missing on the same key share a single `load`.
    /// The returned flag is `true` only when a live entry was already
    /// there; a caller that joined another caller's load still missed.
    /// Errors are not cached.
    pub async fn get_or_try_insert_with<F, E>(
        &self,
        lead_id: LeadId,
        model_id: &str,
        load: F,
    ) -> Result<(MLLeadScore, bool), E>
    where
        F: Future<Output = Result<MLLeadScore, E>>,
        E: Clone + Send + Sync + 'static,
    {
        if let Some(hit) = self.get(lead_id, model_id).await {
            return Ok((hit, true));
        }

        let key = ScoreKey::new(lead_id, model_id);
        let ttl = self.ttl();
        let entry = self
            .entries
            .try_get_with(key, async move {
                load.await.map(|score| ScoringCacheEntry::new(score, ttl))
            })
            .await
            .map_err(|e: Arc<E>| (*e).clone())?;

        Ok((entry.value, false))
    }

    /// Drops every entry for `lead_id`, across all models.
    pub async fn invalidate(&self, lead_id: LeadId) -> usize {
        let keys: Vec<ScoreKey> = self
            .entries
            .iter()
            .filter(|(k, _)| k.lead_id == lead_id)
            .map(|(k, _)| (*k).clone())
            .collect();
        for key in &keys {
            self.entries.invalidate(key).await;
        }
        tracing::debug!("Invalidated {} cached score(s) for lead {}", keys.len(), lead_id);
        keys.len()
    }

    /// Drops every entry scored by `model_id`, e.g. after a retrain.
    pub async fn invalidate_model(&self, model_id: &str) -> usize {
        let keys: Vec<ScoreKey> = self
            .entries
            .iter()
            .filter(|(k, _)| k.model_id == model_id)
            .map(|(k, _)| (*k).clone())
            .collect();
        for key in &keys {
            self.entries.invalidate(key).await;
        }
        tracing::info!("Invalidated {} cached score(s) for model {}", keys.len(), model_id);
        keys.len()
    }

    pub async fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
    }

    /// Number of live entries; pending evictions are flushed first.
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn duration_to_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
