//! Real-time lead scoring service.
//!
//! Scores CRM leads with registered conversion models, caches scores per
//! `(lead, model)`, throttles model traffic, runs prioritized batches and
//! keeps request statistics for health monitoring.
//!
//! # Modules
//!
//! - `api`: HTTP surface.
//! - `core`: Scoring logic, caches and telemetry.
//! - `integrations`: Model gateways and lead data providers.
//! - `batch`: Prioritized batch scoring.
//! - `circuit_breaker`: Breakers guarding each model gateway.
//! - `config`: Configuration management.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `insights`: Recommendations derived from scores.
//! - `lead_provider`: Lead profile sources (CRM, in-memory).
//! - `model_gateway`: Model boundary and registry.
//! - `models`: Core data models.
//! - `rate_limiter`: Per-model admission control.
//! - `score_cache`: TTL cache of scores.
//! - `scoring_service`: The `LeadScoringService` facade.
//! - `statistics`: Request statistics and health.

pub mod api;
pub mod core;
pub mod integrations;

pub mod batch;
pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod insights;
pub mod lead_provider;
pub mod model_gateway;
pub mod models;
pub mod rate_limiter;
pub mod score_cache;
pub mod scoring_service;
pub mod statistics;

pub use errors::ScoringError;
pub use scoring_service::LeadScoringService;
