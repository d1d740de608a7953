//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use rust_lead_scoring::config::ScoringConfig;
use rust_lead_scoring::errors::ScoringError;
use rust_lead_scoring::lead_provider::InMemoryLeadProvider;
use rust_lead_scoring::model_gateway::{ModelGateway, ModelRegistry, Prediction};
use rust_lead_scoring::models::{LeadFeatures, LeadProfile};
use rust_lead_scoring::LeadScoringService;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Succeed,
    /// `ModelUnavailable` for the first n calls, then success.
    FailTransient(usize),
    AlwaysUnavailable,
    RejectFeatures,
}

/// Gateway that counts calls and answers a slightly higher score each time,
/// so a fresh computation is distinguishable from a cached one.
pub struct TestGateway {
    model_id: String,
    behavior: Behavior,
    delay: Duration,
    calls: AtomicUsize,
}

impl TestGateway {
    pub fn new(model_id: &str, behavior: Behavior) -> Self {
        Self {
            model_id: model_id.to_string(),
            behavior,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelGateway for TestGateway {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn predict(&self, features: &LeadFeatures) -> Result<Prediction, ScoringError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.behavior {
            Behavior::AlwaysUnavailable => {
                return Err(ScoringError::ModelUnavailable("gateway down".to_string()))
            }
            Behavior::FailTransient(n) if call <= n => {
                return Err(ScoringError::ModelUnavailable("warming up".to_string()))
            }
            Behavior::RejectFeatures => {
                return Err(ScoringError::InvalidFeatures(format!(
                    "lead {} rejected",
                    features.lead_id
                )))
            }
            _ => {}
        }

        Ok(Prediction {
            raw_score: (0.5 + 0.01 * call as f64).min(0.99),
            confidence: 0.8,
            model_id: self.model_id.clone(),
            factors: vec!["site_visits raises conversion likelihood".to_string()],
        })
    }
}

/// Leads 1..=20 plus 123 and 124 exist; 99999 does not.
pub fn lead_provider() -> InMemoryLeadProvider {
    InMemoryLeadProvider::with_profiles(
        (1..=20)
            .chain([123, 124])
            .map(|id| {
                LeadProfile::new(id)
                    .with_name(format!("Lead {}", id))
                    .with_source("website")
                    .with_attribute("site_visits", (id % 10) as f64)
                    .with_attribute("pre_approved", 1.0)
            }),
    )
}

pub fn fast_config() -> ScoringConfig {
    ScoringConfig {
        default_model_id: "m1".to_string(),
        model_retry_backoff: Duration::from_millis(1),
        ..ScoringConfig::default()
    }
}

pub fn service_with(config: ScoringConfig, gateways: Vec<Arc<dyn ModelGateway>>) -> LeadScoringService {
    let mut registry = ModelRegistry::new(config.default_model_id.clone());
    for gateway in gateways {
        registry.register(gateway);
    }
    LeadScoringService::new(config, registry, Arc::new(lead_provider()))
}

/// Service with models `m1` and `m2`, returning the `m1` gateway for call counting.
pub fn service() -> (LeadScoringService, Arc<TestGateway>) {
    let m1 = Arc::new(TestGateway::new("m1", Behavior::Succeed));
    let m2 = Arc::new(TestGateway::new("m2", Behavior::Succeed));
    let svc = service_with(fast_config(), vec![m1.clone() as Arc<dyn ModelGateway>, m2]);
    (svc, m1)
}
