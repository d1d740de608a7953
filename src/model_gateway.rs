//! Boundary to the trained lead-conversion models.
//!
//! A [`ModelGateway`] wraps one model version. The [`ModelRegistry`] maps
//! model IDs to gateways and gives each one its own circuit breaker.

use crate::circuit_breaker::{create_gateway_circuit_breaker, GatewayBreaker};
use crate::errors::ScoringError;
use crate::models::LeadFeatures;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Raw model output for one lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub raw_score: f64,
    pub confidence: f64,
    pub model_id: String,
    /// Most influential inputs, strongest first.
    #[serde(default)]
    pub factors: Vec<String>,
}

#[async_trait]
pub trait ModelGateway: Send + Sync {
    fn model_id(&self) -> &str;

    /// Fails with `ModelUnavailable` (transient) or `InvalidFeatures`.
    async fn predict(&self, features: &LeadFeatures) -> Result<Prediction, ScoringError>;
}

/// Client for a remote model runtime.
///
/// `POST {base_url}/models/{model_id}/predict` with the feature vector as
/// JSON; the response body is a [`Prediction`].
#[derive(Clone)]
pub struct HttpModelGateway {
    client: reqwest::Client,
    base_url: String,
    model_id: String,
}

impl HttpModelGateway {
    pub fn new(base_url: String, model_id: String, timeout: Duration) -> Result<Self, ScoringError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ScoringError::Internal(format!("Failed to create model gateway client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model_id,
        })
    }
}

#[async_trait]
impl ModelGateway for HttpModelGateway {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn predict(&self, features: &LeadFeatures) -> Result<Prediction, ScoringError> {
        let url = format!("{}/models/{}/predict", self.base_url, self.model_id);
        tracing::debug!("Requesting prediction for lead {} from {}", features.lead_id, url);

        let response = self
            .client
            .post(&url)
            .json(features)
            .send()
            .await
            .map_err(|e| ScoringError::ModelUnavailable(format!("{} request failed: {}", self.model_id, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("Model {} returned {}: {}", self.model_id, status, error_text);

            return Err(if status.is_server_error() || status.as_u16() == 429 {
                ScoringError::ModelUnavailable(format!(
                    "{} returned {}: {}",
                    self.model_id, status, error_text
                ))
            } else if status.as_u16() == 404 {
                ScoringError::UnknownModel(self.model_id.clone())
            } else {
                ScoringError::InvalidFeatures(format!(
                    "{} rejected lead {}: {}",
                    self.model_id, features.lead_id, error_text
                ))
            });
        }

        let prediction: Prediction = response.json().await.map_err(|e| {
            ScoringError::Internal(format!("Failed to parse {} prediction: {}", self.model_id, e))
        })?;

        Ok(prediction)
    }
}

/// Fixed-weight logistic model evaluated in process.
///
/// Serves as the model runtime when no remote gateway is configured.
#[derive(Debug, Clone)]
pub struct LinearModel {
    model_id: String,
    bias: f64,
    weights: BTreeMap<String, f64>,
}

impl LinearModel {
    pub fn new(model_id: impl Into<String>, bias: f64, weights: BTreeMap<String, f64>) -> Self {
        Self {
            model_id: model_id.into(),
            bias,
            weights,
        }
    }

    /// Weights over the engagement attributes the CRM records for leads.
    pub fn lead_conversion(model_id: impl Into<String>) -> Self {
        let weights = [
            ("site_visits", 0.15),
            ("property_views", 0.12),
            ("email_opens", 0.08),
            ("messages_replied", 0.25),
            ("budget_match", 1.2),
            ("pre_approved", 1.5),
            ("days_since_last_contact", -0.06),
        ]
        .into_iter()
        .map(|(k, w)| (k.to_string(), w))
        .collect();

        Self::new(model_id, -1.5, weights)
    }
}

#[async_trait]
impl ModelGateway for LinearModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn predict(&self, features: &LeadFeatures) -> Result<Prediction, ScoringError> {
        let mut contributions: Vec<(&str, f64)> = self
            .weights
            .iter()
            .filter_map(|(name, w)| features.numeric.get(name).map(|x| (name.as_str(), w * x)))
            .collect();

        if contributions.is_empty() {
            return Err(ScoringError::InvalidFeatures(format!(
                "lead {} has none of the {} model inputs",
                features.lead_id, self.model_id
            )));
        }

        let z = self.bias + contributions.iter().map(|(_, c)| c).sum::<f64>();
        let raw_score = 1.0 / (1.0 + (-z).exp());
        let coverage = contributions.len() as f64 / self.weights.len() as f64;

        contributions.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        let factors = contributions
            .iter()
            .take(3)
            .map(|(name, c)| {
                if *c >= 0.0 {
                    format!("{} raises conversion likelihood", name)
                } else {
                    format!("{} lowers conversion likelihood", name)
                }
            })
            .collect();

        Ok(Prediction {
            raw_score,
            confidence: 0.5 + 0.45 * coverage,
            model_id: self.model_id.clone(),
            factors,
        })
    }
}

/// A gateway and the breaker guarding it.
pub struct RegisteredModel {
    pub gateway: Arc<dyn ModelGateway>,
    pub breaker: GatewayBreaker,
}

/// Active models, keyed by ID.
pub struct ModelRegistry {
    default_model_id: String,
    models: HashMap<String, Arc<RegisteredModel>>,
}

impl ModelRegistry {
    pub fn new(default_model_id: impl Into<String>) -> Self {
        Self {
            default_model_id: default_model_id.into(),
            models: HashMap::new(),
        }
    }

    pub fn with_model(mut self, gateway: Arc<dyn ModelGateway>) -> Self {
        self.register(gateway);
        self
    }

    pub fn register(&mut self, gateway: Arc<dyn ModelGateway>) {
        let id = gateway.model_id().to_string();
        tracing::info!("Registered model {}", id);
        self.models.insert(
            id,
            Arc::new(RegisteredModel {
                gateway,
                breaker: create_gateway_circuit_breaker(),
            }),
        );
    }

    pub fn default_model_id(&self) -> &str {
        &self.default_model_id
    }

    /// Looks up `model_id`, or the default model when `None`.
    pub fn resolve(&self, model_id: Option<&str>) -> Result<(String, Arc<RegisteredModel>), ScoringError> {
        let id = model_id.unwrap_or(&self.default_model_id);
        self.models
            .get(id)
            .map(|m| (id.to_string(), m.clone()))
            .ok_or_else(|| ScoringError::UnknownModel(id.to_string()))
    }

    pub fn model_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.models.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Fails when the default model is not registered.
    pub fn validate(&self) -> Result<(), ScoringError> {
        self.resolve(None).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LeadProfile;

    #[tokio::test]
    async fn test_linear_model_scores_in_unit_interval() {
        let model = LinearModel::lead_conversion("v1");
        let profile = LeadProfile::new(1)
            .with_attribute("site_visits", 4.0)
            .with_attribute("pre_approved", 1.0)
            .with_attribute("days_since_last_contact", 2.0);

        let prediction = model.predict(&profile.features()).await.unwrap();
        assert!((0.0..=1.0).contains(&prediction.raw_score));
        assert!((0.0..=1.0).contains(&prediction.confidence));
        assert_eq!(prediction.model_id, "v1");
        assert_eq!(prediction.factors[0], "pre_approved raises conversion likelihood");
    }

    #[tokio::test]
    async fn test_linear_model_rejects_empty_features() {
        let model = LinearModel::lead_conversion("v1");
        let err = model
            .predict(&LeadProfile::new(1).features())
            .await
            .unwrap_err();
        assert!(matches!(err, ScoringError::InvalidFeatures(_)));
    }

    #[test]
    fn test_registry_resolves_default_and_named_models() {
        let registry = ModelRegistry::new("m1")
            .with_model(Arc::new(LinearModel::lead_conversion("m1")))
            .with_model(Arc::new(LinearModel::lead_conversion("m2")));

        assert!(registry.validate().is_ok());
        assert_eq!(registry.resolve(None).unwrap().0, "m1");
        assert_eq!(registry.resolve(Some("m2")).unwrap().0, "m2");
        assert_eq!(
            registry.resolve(Some("m3")).err(),
            Some(ScoringError::UnknownModel("m3".to_string()))
        );
        assert_eq!(registry.model_ids(), vec!["m1", "m2"]);
    }

    #[test]
    fn test_registry_without_default_is_invalid() {
        let registry =
            ModelRegistry::new("missing").with_model(Arc::new(LinearModel::lead_conversion("m1")));
        assert!(registry.validate().is_err());
    }
}
