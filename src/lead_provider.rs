use crate::errors::{ResultExt, ScoringError};
use crate::models::{LeadId, LeadProfile};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Source of lead profiles.
#[async_trait]
pub trait LeadDataProvider: Send + Sync {
    /// Returns `Ok(None)` when the lead does not exist.
    async fn fetch_lead_profile(&self, lead_id: LeadId) -> Result<Option<LeadProfile>, ScoringError>;
}

#[derive(Debug, Deserialize)]
struct CrmLeadEnvelope {
    data: CrmLeadData,
}

#[derive(Debug, Deserialize)]
struct CrmLeadData {
    attributes: CrmLeadAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct CrmLeadAttributes {
    #[serde(default)]
    customer: Option<CrmCustomer>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    engagement: BTreeMap<String, f64>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    last_activity_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CrmCustomer {
    #[serde(default)]
    name: Option<String>,
}

/// Client for reading leads from the CRM integration API.
#[derive(Clone)]
pub struct CrmLeadClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl CrmLeadClient {
    /// Creates a new `CrmLeadClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the CRM API.
    /// * `token` - The API token for authentication.
    pub fn new(base_url: String, token: String) -> Result<Self, ScoringError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ScoringError::Internal(format!("Failed to create CRM client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }
}

#[async_trait]
impl LeadDataProvider for CrmLeadClient {
    /// Fetches a lead from the CRM and maps its JSON:API attributes to a profile.
    async fn fetch_lead_profile(&self, lead_id: LeadId) -> Result<Option<LeadProfile>, ScoringError> {
        let url = format!("{}/integration/leads/{}", self.base_url, lead_id);
        tracing::debug!("Fetching lead {} from CRM: {}", lead_id, url);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await
            .with_context(|| format!("CRM request for lead {} failed", lead_id))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ScoringError::ExternalApi(format!(
                "CRM returned {}: {}",
                status, error_text
            )));
        }

        let envelope: CrmLeadEnvelope = response
            .json()
            .await
            .with_context(|| format!("Failed to parse CRM lead {}", lead_id))?;
        let attrs = envelope.data.attributes;

        Ok(Some(LeadProfile {
            lead_id,
            name: attrs.customer.and_then(|c| c.name),
            source: attrs.source,
            attributes: attrs.engagement,
            tags: attrs.tags,
            last_activity_at: attrs.last_activity_at,
        }))
    }
}

/// Lead profiles held in memory.
#[derive(Default)]
pub struct InMemoryLeadProvider {
    leads: RwLock<HashMap<LeadId, LeadProfile>>,
}

impl InMemoryLeadProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: impl IntoIterator<Item = LeadProfile>) -> Self {
        let provider = Self::new();
        for profile in profiles {
            provider.insert(profile);
        }
        provider
    }

    pub fn insert(&self, profile: LeadProfile) {
        self.leads.write().insert(profile.lead_id, profile);
    }

    pub fn remove(&self, lead_id: LeadId) -> Option<LeadProfile> {
        self.leads.write().remove(&lead_id)
    }
}

#[async_trait]
impl LeadDataProvider for InMemoryLeadProvider {
    async fn fetch_lead_profile(&self, lead_id: LeadId) -> Result<Option<LeadProfile>, ScoringError> {
        Ok(self.leads.read().get(&lead_id).cloned())
    }
}
