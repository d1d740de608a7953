//! Batch scoring.
//!
//! High-priority batches are awaited and returned complete. Medium and
//! low batches run in the background; callers poll with
//! [`LeadScoringService::batch_result`] or block on
//! [`LeadScoringService::wait_for_batch`]. Every lead in a batch ends up in
//! exactly one of `results` or `errors`, even when the batch times out.

use crate::config::RateLimitPolicy;
use crate::errors::ScoringError;
use crate::models::{BatchScoringResult, LeadId, MLLeadScore, Priority};
use crate::scoring_service::{Admission, LeadScoringService};
use crate::statistics::{CacheLookup, Outcome};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use uuid::Uuid;

type BatchSink = Arc<watch::Sender<BatchScoringResult>>;

impl LeadScoringService {
    /// Scores `lead_ids` with one model.
    ///
    /// Rejects duplicate IDs and batches above the configured maximum. An
    /// empty batch completes immediately.
    pub async fn score_leads_batch(
        &self,
        lead_ids: Vec<LeadId>,
        model_id: Option<String>,
        priority: Priority,
    ) -> Result<BatchScoringResult, ScoringError> {
        if let Err(e) = self.validate_batch(&lead_ids, model_id.as_deref()) {
            tracing::warn!("Rejected batch of {} lead(s): {}", lead_ids.len(), e);
            self.inner
                .stats
                .record_outcome(Outcome::Error, Duration::ZERO, CacheLookup::Skipped);
            return Err(e);
        }

        let request_id = Uuid::new_v4();
        let mut result =
            BatchScoringResult::new(request_id, priority, model_id.clone(), lead_ids.len());
        if lead_ids.is_empty() {
            result.complete(0);
            return Ok(result);
        }

        tracing::info!(
            "Batch {} accepted: {} lead(s), priority {:?}",
            request_id,
            lead_ids.len(),
            priority
        );

        let (sink, _) = watch::channel(result);
        let sink: BatchSink = Arc::new(sink);
        self.inner.batches.insert(request_id, sink.clone()).await;

        // Runs on its own task so a dropped caller cannot cancel the batch.
        let snapshot = sink.borrow().clone();
        let runner = {
            let service = self.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                service.run_batch(lead_ids, model_id, priority, sink).await;
            })
        };
        if priority.is_deferred() {
            return Ok(snapshot);
        }

        runner
            .await
            .map_err(|e| ScoringError::Internal(format!("batch {} runner failed: {}", request_id, e)))?;
        let finished = sink.borrow().clone();
        Ok(finished)
    }

    /// Current state of a batch, `None` once it is unknown or expired.
    pub async fn batch_result(&self, request_id: Uuid) -> Option<BatchScoringResult> {
        let sink = self.inner.batches.get(&request_id).await?;
        let current = sink.borrow().clone();
        Some(current)
    }

    /// Waits up to `timeout` for the batch to complete and returns its state
    /// at that point.
    pub async fn wait_for_batch(
        &self,
        request_id: Uuid,
        timeout: Duration,
    ) -> Option<BatchScoringResult> {
        let sink = self.inner.batches.get(&request_id).await?;
        let mut updates = sink.subscribe();

        let completed = match tokio::time::timeout(timeout, updates.wait_for(|r| r.is_complete())).await
        {
            Ok(Ok(result)) => Some(BatchScoringResult::clone(&result)),
            _ => None,
        };
        completed.or_else(|| Some(sink.borrow().clone()))
    }

    fn validate_batch(
        &self,
        lead_ids: &[LeadId],
        model_id: Option<&str>,
    ) -> Result<(), ScoringError> {
        let max = self.inner.config.batch_max_size;
        if lead_ids.len() > max {
            return Err(ScoringError::InvalidBatchInput(format!(
                "batch of {} leads exceeds the maximum of {}",
                lead_ids.len(),
                max
            )));
        }

        let mut seen = HashSet::with_capacity(lead_ids.len());
        if let Some(duplicate) = lead_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(ScoringError::InvalidBatchInput(format!(
                "lead {} appears more than once",
                duplicate
            )));
        }

        self.inner.registry.resolve(model_id).map(|_| ())
    }

    async fn run_batch(
        &self,
        lead_ids: Vec<LeadId>,
        model_id: Option<String>,
        priority: Priority,
        sink: BatchSink,
    ) {
        let started = Instant::now();
        let config = &self.inner.config;

        let concurrency = match priority {
            Priority::Low => (config.batch_concurrency / 4).max(1),
            _ => config.batch_concurrency.max(1),
        };
        let admission = match (priority.is_deferred(), config.rate_limit_policy) {
            (true, RateLimitPolicy::Queue) => Admission::Queue(config.queue_max_wait),
            _ => Admission::FailFast,
        };

        let permits = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();
        for &lead_id in &lead_ids {
            let service = self.clone();
            let permits = permits.clone();
            let model_id = model_id.clone();
            let queued = priority.is_deferred().then(|| self.inner.stats.enqueue());

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                drop(queued);
                let outcome = service
                    .score_tracked(lead_id, model_id.as_deref(), true, admission)
                    .await;
                (lead_id, outcome)
            });
        }

        let deadline = tokio::time::Instant::now() + config.batch_timeout;
        let mut timed_out = false;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(joined)) => collect(&sink, joined),
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }

        if timed_out {
            tracing::warn!(
                "Batch {} timed out after {}s with {} task(s) outstanding",
                sink.borrow().request_id,
                config.batch_timeout.as_secs(),
                tasks.len()
            );
            tasks.abort_all();
            while let Some(joined) = tasks.join_next().await {
                collect(&sink, joined);
            }
        }

        // Leads whose task was aborted or panicked before recording anything.
        let missing: Vec<LeadId> = {
            let current = sink.borrow();
            lead_ids
                .iter()
                .copied()
                .filter(|id| !current.has_outcome(*id))
                .collect()
        };
        for _ in &missing {
            self.inner
                .stats
                .record_outcome(Outcome::Error, started.elapsed(), CacheLookup::Skipped);
        }
        let reason = if timed_out {
            format!(
                "Batch timed out after {}ms",
                config.batch_timeout.as_millis()
            )
        } else {
            "Scoring task failed".to_string()
        };

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        sink.send_modify(|result| {
            for lead_id in &missing {
                result.record_failure(*lead_id, reason.clone());
            }
            result.complete(elapsed_ms);
        });

        let current = sink.borrow();
        tracing::info!(
            "Batch {} completed in {}ms: {} scored, {} failed",
            current.request_id,
            elapsed_ms,
            current.results.len(),
            current.errors.len()
        );
    }
}

fn collect(
    sink: &BatchSink,
    joined: Result<(LeadId, Result<MLLeadScore, ScoringError>), JoinError>,
) {
    match joined {
        Ok((_, Ok(score))) => sink.send_modify(|result| result.record_success(score)),
        Ok((lead_id, Err(e))) => {
            sink.send_modify(|result| result.record_failure(lead_id, e.to_string()))
        }
        Err(e) if e.is_cancelled() => {}
        Err(e) => tracing::error!("Batch scoring task panicked: {}", e),
    }
}
