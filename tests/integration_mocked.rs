/// Integration tests with mocked external APIs
/// Exercises the CRM client and the HTTP model gateway without real services
use rust_lead_scoring::config::ScoringConfig;
use rust_lead_scoring::errors::ScoringError;
use rust_lead_scoring::lead_provider::{CrmLeadClient, LeadDataProvider};
use rust_lead_scoring::model_gateway::{HttpModelGateway, ModelGateway, ModelRegistry};
use rust_lead_scoring::models::LeadProfile;
use rust_lead_scoring::LeadScoringService;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn crm_lead_body() -> serde_json::Value {
    serde_json::json!({
        "data": {
            "id": "123",
            "type": "lead",
            "attributes": {
                "customer": { "name": "Ana Souza", "email": "ana@example.com" },
                "source": "website",
                "engagement": {
                    "site_visits": 6,
                    "property_views": 3,
                    "pre_approved": 1
                },
                "tags": { "segment": "premium" },
                "last_activity_at": "2026-10-01T12:00:00Z"
            }
        }
    })
}

fn gateway(base_url: String) -> HttpModelGateway {
    HttpModelGateway::new(base_url, "m1".to_string(), Duration::from_secs(2)).unwrap()
}

fn features() -> rust_lead_scoring::models::LeadFeatures {
    LeadProfile::new(123)
        .with_attribute("site_visits", 6.0)
        .features()
}

#[tokio::test]
async fn test_crm_lead_is_mapped_to_profile() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/integration/leads/123"))
        .and(header("Authorization", "Bearer test_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(crm_lead_body()))
        .mount(&mock_server)
        .await;

    let client = CrmLeadClient::new(mock_server.uri(), "test_token".to_string()).unwrap();
    let profile = client.fetch_lead_profile(123).await.unwrap().unwrap();

    assert_eq!(profile.lead_id, 123);
    assert_eq!(profile.name.as_deref(), Some("Ana Souza"));
    assert_eq!(profile.source.as_deref(), Some("website"));
    assert_eq!(profile.attributes.get("site_visits"), Some(&6.0));
    assert_eq!(profile.tags.get("segment").map(String::as_str), Some("premium"));
    assert!(profile.last_activity_at.is_some());
    assert_eq!(profile.data_quality(), 1.0);
}

#[tokio::test]
async fn test_crm_missing_lead_is_none() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/integration/leads/99999"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let client = CrmLeadClient::new(mock_server.uri(), "test_token".to_string()).unwrap();
    assert!(client.fetch_lead_profile(99999).await.unwrap().is_none());
}

#[tokio::test]
async fn test_crm_server_error_is_external_api_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/integration/leads/123"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database offline"))
        .mount(&mock_server)
        .await;

    let client = CrmLeadClient::new(mock_server.uri(), "test_token".to_string()).unwrap();
    let err = client.fetch_lead_profile(123).await.unwrap_err();

    assert!(matches!(err, ScoringError::ExternalApi(_)));
    assert!(err.to_string().contains("database offline"));
}

#[tokio::test]
async fn test_gateway_prediction() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/m1/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "rawScore": 0.87,
            "confidence": 0.92,
            "modelId": "m1",
            "factors": ["site_visits raises conversion likelihood"]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let prediction = gateway(mock_server.uri()).predict(&features()).await.unwrap();
    assert_eq!(prediction.raw_score, 0.87);
    assert_eq!(prediction.confidence, 0.92);
    assert_eq!(prediction.factors.len(), 1);
}

#[tokio::test]
async fn test_gateway_status_mapping() {
    let cases = [
        (503, "unavailable"),
        (429, "unavailable"),
        (404, "unknown"),
        (422, "invalid"),
    ];

    for (status, expected) in cases {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/m1/predict"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&mock_server)
            .await;

        let err = gateway(mock_server.uri()).predict(&features()).await.unwrap_err();
        let matched = match expected {
            "unavailable" => matches!(err, ScoringError::ModelUnavailable(_)),
            "unknown" => matches!(err, ScoringError::UnknownModel(_)),
            _ => matches!(err, ScoringError::InvalidFeatures(_)),
        };
        assert!(matched, "status {} mapped to {:?}", status, err);
    }
}

#[tokio::test]
async fn test_gateway_malformed_body_is_internal() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/m1/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&mock_server)
        .await;

    let err = gateway(mock_server.uri()).predict(&features()).await.unwrap_err();
    assert!(matches!(err, ScoringError::Internal(_)));
}

#[tokio::test]
async fn test_service_retries_flaky_gateway_end_to_end() {
    let crm = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/integration/leads/123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(crm_lead_body()))
        .mount(&crm)
        .await;

    let models = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/m1/predict"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&models)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/m1/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "rawScore": 1.3,
            "confidence": 0.9,
            "modelId": "m1"
        })))
        .expect(1)
        .mount(&models)
        .await;

    let registry = ModelRegistry::new("m1").with_model(Arc::new(gateway(models.uri())));
    let leads = CrmLeadClient::new(crm.uri(), "test_token".to_string()).unwrap();
    let svc = LeadScoringService::new(
        ScoringConfig {
            default_model_id: "m1".to_string(),
            model_retry_backoff: Duration::from_millis(1),
            ..ScoringConfig::default()
        },
        registry,
        Arc::new(leads),
    );

    let score = svc.score_lead(123, None, true).await.unwrap();
    // out-of-range gateway scores are clamped
    assert_eq!(score.score, 1.0);
    assert_eq!(score.data_quality, Some(1.0));

    // cached: no further gateway traffic
    svc.score_lead(123, None, true).await.unwrap();
}
