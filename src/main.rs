use axum::{routing::get, Router};
use rust_lead_scoring::config::Config;
use rust_lead_scoring::handlers::{self, AppState};
use rust_lead_scoring::lead_provider::CrmLeadClient;
use rust_lead_scoring::model_gateway::{HttpModelGateway, LinearModel, ModelGateway, ModelRegistry};
use rust_lead_scoring::LeadScoringService;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Builds the model registry: remote gateways when `MODEL_GATEWAY_URL` is
/// set, in-process linear models otherwise.
fn build_registry(config: &Config) -> anyhow::Result<ModelRegistry> {
    let mut registry = ModelRegistry::new(config.scoring.default_model_id.clone());

    for model_id in &config.model_ids {
        let gateway: Arc<dyn ModelGateway> = match config.model_gateway_url {
            Some(ref base_url) => Arc::new(HttpModelGateway::new(
                base_url.clone(),
                model_id.clone(),
                Duration::from_secs(5),
            )?),
            None => Arc::new(LinearModel::lead_conversion(model_id.clone())),
        };
        registry.register(gateway);
    }

    registry.validate()?;
    Ok(registry)
}

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - Model registry and CRM client.
/// - HTTP routes and middleware (CORS, Rate Limiting).
///
/// It then starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_lead_scoring=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    let registry = build_registry(&config)?;
    tracing::info!("Model registry ready: {:?}", registry.model_ids());

    let crm = CrmLeadClient::new(config.crm_base_url.clone(), config.crm_token.clone())?;
    tracing::info!("✓ CRM client initialized: {}", config.crm_base_url);

    let service = LeadScoringService::new(config.scoring.clone(), registry, Arc::new(crm));
    let app_state = Arc::new(AppState { service });

    // Per-IP request limiting: 20 req/sec, burst of 40
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(20)
            .burst_size(40)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid request rate limit configuration"))?,
    );

    let protected_routes = handlers::api_routes().layer(
        ServiceBuilder::new()
            // Batch bodies are ID lists; 1MB is plenty
            .layer(RequestBodyLimitLayer::new(1024 * 1024))
            .layer(GovernorLayer {
                config: governor_conf,
            }),
    );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
