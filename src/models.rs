use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// CRM lead identifier.
pub type LeadId = i64;

// ============ Lead Data ============

/// Lead attributes used as model input.
///
/// Owned by the CRM; the scoring service only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadProfile {
    /// CRM lead identifier.
    pub lead_id: LeadId,
    /// Customer name, if known.
    pub name: Option<String>,
    /// Acquisition channel (e.g. "Google Ads", "Portal").
    pub source: Option<String>,
    /// Numeric behavioral and engagement attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, f64>,
    /// Categorical attributes (property type, neighborhood, ...).
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Last recorded interaction with the lead.
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl LeadProfile {
    pub fn new(lead_id: LeadId) -> Self {
        Self {
            lead_id,
            name: None,
            source: None,
            attributes: BTreeMap::new(),
            tags: BTreeMap::new(),
            last_activity_at: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: f64) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_last_activity(mut self, at: DateTime<Utc>) -> Self {
        self.last_activity_at = Some(at);
        self
    }

    /// Feature vector sent to the model gateway.
    ///
    /// Non-finite numeric attributes are dropped.
    pub fn features(&self) -> LeadFeatures {
        LeadFeatures {
            lead_id: self.lead_id,
            numeric: self
                .attributes
                .iter()
                .filter(|(_, v)| v.is_finite())
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            categorical: self.tags.clone(),
        }
    }

    /// Fraction of the profile sections that are populated, in `[0, 1]`.
    pub fn data_quality(&self) -> f64 {
        let checks = [
            self.name.as_deref().is_some_and(|n| !n.trim().is_empty()),
            self.source.is_some(),
            !self.attributes.is_empty(),
            !self.tags.is_empty(),
            self.last_activity_at.is_some(),
        ];
        let present = checks.iter().filter(|c| **c).count();
        present as f64 / checks.len() as f64
    }
}

/// Model input derived from a [`LeadProfile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadFeatures {
    pub lead_id: LeadId,
    pub numeric: BTreeMap<String, f64>,
    pub categorical: BTreeMap<String, String>,
}

// ============ Scores ============

/// Result of one scoring attempt. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MLLeadScore {
    pub lead_id: LeadId,
    /// Conversion score in `[0, 1]`.
    pub score: f64,
    /// Model confidence in `[0, 1]`.
    pub confidence: f64,
    pub model_id: String,
    pub scored_at: DateTime<Utc>,
    /// Human-readable notes, most relevant first.
    pub insights: Vec<String>,
    /// Share of the lead profile that was populated when scored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_quality: Option<f64>,
    /// Present when a forced refresh replaced a cached score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<ScoreComparison>,
}

/// Difference between a refreshed score and the cached one it replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreComparison {
    pub previous_score: f64,
    pub delta: f64,
}

impl ScoreComparison {
    pub fn between(previous: &MLLeadScore, current_score: f64) -> Self {
        Self {
            previous_score: previous.score,
            delta: current_score - previous.score,
        }
    }
}

// ============ Batch Scoring ============

/// Scheduling hint for batch scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Runs to completion before the call returns.
    High,
    /// Continues in the background.
    #[default]
    Medium,
    /// Continues in the background with reduced fan-out.
    Low,
}

impl Priority {
    pub fn is_deferred(self) -> bool {
        !matches!(self, Priority::High)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Processing,
    Completed,
}

/// A batch item that could not be scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemError {
    pub lead_id: LeadId,
    pub error: String,
}

/// Outcome of a batch scoring request.
///
/// `processed_leads` always equals `results.len()`; once completed,
/// `processed_leads + errors.len() == total_leads`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchScoringResult {
    pub request_id: Uuid,
    pub status: BatchStatus,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub total_leads: usize,
    pub processed_leads: usize,
    pub results: Vec<MLLeadScore>,
    pub errors: Vec<BatchItemError>,
    /// Elapsed milliseconds (so far, while processing).
    #[serde(rename = "processingTime")]
    pub processing_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchScoringResult {
    pub fn new(
        request_id: Uuid,
        priority: Priority,
        model_id: Option<String>,
        total_leads: usize,
    ) -> Self {
        Self {
            request_id,
            status: BatchStatus::Processing,
            priority,
            model_id,
            total_leads,
            processed_leads: 0,
            results: Vec::with_capacity(total_leads),
            errors: Vec::new(),
            processing_time_ms: 0,
            completed_at: None,
        }
    }

    pub fn record_success(&mut self, score: MLLeadScore) {
        self.results.push(score);
        self.processed_leads = self.results.len();
    }

    pub fn record_failure(&mut self, lead_id: LeadId, error: impl Into<String>) {
        self.errors.push(BatchItemError {
            lead_id,
            error: error.into(),
        });
    }

    /// Whether `lead_id` already has an outcome in this batch.
    pub fn has_outcome(&self, lead_id: LeadId) -> bool {
        self.results.iter().any(|r| r.lead_id == lead_id)
            || self.errors.iter().any(|e| e.lead_id == lead_id)
    }

    pub fn outcomes(&self) -> usize {
        self.results.len() + self.errors.len()
    }

    pub fn complete(&mut self, processing_time_ms: u64) {
        self.status = BatchStatus::Completed;
        self.processing_time_ms = processing_time_ms;
        self.completed_at = Some(Utc::now());
    }

    pub fn is_complete(&self) -> bool {
        self.status == BatchStatus::Completed
    }
}

// ============ Insights ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeToAction {
    pub urgent: bool,
    pub recommended: String,
    /// Always after the score's `scored_at`.
    pub deadline: DateTime<Utc>,
}

/// Recommendations derived from a current score. Never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadInsights {
    pub lead_id: LeadId,
    pub model_id: String,
    pub overall_score: f64,
    pub conversion_probability: f64,
    pub risk_level: RiskLevel,
    pub recommended_actions: Vec<String>,
    pub key_factors: Vec<String>,
    pub time_to_action: TimeToAction,
}

// ============ Telemetry ============

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Counters for the current aggregation window.
///
/// Rates are over completed requests (success + error); throttled requests
/// are counted separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringStatistics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub throttled_requests: u64,
    pub success_rate: f64,
    pub error_rate: f64,
    /// Milliseconds, over completed requests.
    pub average_response_time: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub time_range: TimeRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Point-in-time service health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: HealthState,
    /// Seconds since the service was built.
    #[serde(rename = "uptime")]
    pub uptime_secs: u64,
    pub cache_size: u64,
    pub queue_length: usize,
    pub active_requests: usize,
    pub last_updated: DateTime<Utc>,
    /// Threshold checks that demoted the status; empty when healthy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}
