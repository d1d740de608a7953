use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

/// What happens to a deferred batch item when the rate limiter is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitPolicy {
    /// Wait for a token (up to `queue_max_wait`) before giving up.
    Queue,
    /// Reject immediately with `RateLimited`.
    FailFast,
}

impl FromStr for RateLimitPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queue" => Ok(RateLimitPolicy::Queue),
            "fail_fast" | "fail-fast" => Ok(RateLimitPolicy::FailFast),
            other => anyhow::bail!("RATE_LIMIT_POLICY must be 'queue' or 'fail_fast', got '{}'", other),
        }
    }
}

/// Thresholds that demote the reported health status.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthThresholds {
    /// Completed requests required before error-rate rules apply.
    pub min_samples: u64,
    pub degraded_error_rate: f64,
    pub unhealthy_error_rate: f64,
    /// Share of throttled requests that demotes to degraded.
    pub degraded_throttle_rate: f64,
    /// Queue length that demotes to unhealthy; half of it demotes to degraded.
    pub max_queue_length: usize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            min_samples: 10,
            degraded_error_rate: 0.1,
            unhealthy_error_rate: 0.5,
            degraded_throttle_rate: 0.25,
            max_queue_length: 1_000,
        }
    }
}

/// Tuning knobs of the scoring service.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    pub default_model_id: String,
    pub cache_ttl: Duration,
    pub cache_max_entries: u64,
    pub rate_limit_per_second: u32,
    pub rate_limit_burst: u32,
    pub rate_limit_policy: RateLimitPolicy,
    pub queue_max_wait: Duration,
    pub batch_max_size: usize,
    pub batch_concurrency: usize,
    pub batch_timeout: Duration,
    pub model_max_retries: u32,
    pub model_retry_backoff: Duration,
    pub stats_window: Duration,
    pub health: HealthThresholds,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            default_model_id: "lead-conversion-v1".to_string(),
            cache_ttl: Duration::from_secs(300),
            cache_max_entries: 50_000,
            rate_limit_per_second: 50,
            rate_limit_burst: 100,
            rate_limit_policy: RateLimitPolicy::Queue,
            queue_max_wait: Duration::from_millis(2_000),
            batch_max_size: 500,
            batch_concurrency: 16,
            batch_timeout: Duration::from_secs(30),
            model_max_retries: 2,
            model_retry_backoff: Duration::from_millis(50),
            stats_window: Duration::from_secs(3_600),
            health: HealthThresholds::default(),
        }
    }
}

impl ScoringConfig {
    /// Rejects values the service cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_model_id.trim().is_empty() {
            anyhow::bail!("default model id cannot be empty");
        }
        if self.cache_ttl.is_zero() {
            anyhow::bail!("SCORE_CACHE_TTL_SECS must be greater than 0");
        }
        if self.rate_limit_per_second == 0 || self.rate_limit_burst == 0 {
            anyhow::bail!("RATE_LIMIT_PER_SECOND and RATE_LIMIT_BURST must be greater than 0");
        }
        if self.batch_max_size == 0 || self.batch_concurrency == 0 {
            anyhow::bail!("BATCH_MAX_SIZE and BATCH_CONCURRENCY must be greater than 0");
        }
        if self.batch_timeout.is_zero() {
            anyhow::bail!("BATCH_TIMEOUT_SECS must be greater than 0");
        }
        if self.stats_window.is_zero() {
            anyhow::bail!("STATS_WINDOW_SECS must be greater than 0");
        }
        Ok(())
    }
}

/// Process configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub crm_base_url: String,
    pub crm_token: String,
    /// Remote model runtime. `None` serves the in-process linear models.
    pub model_gateway_url: Option<String>,
    /// Registered model IDs; the first one is the default.
    pub model_ids: Vec<String>,
    pub scoring: ScoringConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let model_ids: Vec<String> = std::env::var("MODEL_IDS")
            .unwrap_or_else(|_| "lead-conversion-v1".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if model_ids.is_empty() {
            anyhow::bail!("MODEL_IDS must name at least one model");
        }

        let scoring = ScoringConfig {
            default_model_id: model_ids[0].clone(),
            cache_ttl: Duration::from_secs(env_or("SCORE_CACHE_TTL_SECS", 300)?),
            cache_max_entries: env_or("SCORE_CACHE_MAX_ENTRIES", 50_000)?,
            rate_limit_per_second: env_or("RATE_LIMIT_PER_SECOND", 50)?,
            rate_limit_burst: env_or("RATE_LIMIT_BURST", 100)?,
            rate_limit_policy: env_or("RATE_LIMIT_POLICY", RateLimitPolicy::Queue)?,
            queue_max_wait: Duration::from_millis(env_or("RATE_LIMIT_QUEUE_WAIT_MS", 2_000)?),
            batch_max_size: env_or("BATCH_MAX_SIZE", 500)?,
            batch_concurrency: env_or("BATCH_CONCURRENCY", 16)?,
            batch_timeout: Duration::from_secs(env_or("BATCH_TIMEOUT_SECS", 30)?),
            model_max_retries: env_or("MODEL_MAX_RETRIES", 2)?,
            model_retry_backoff: Duration::from_millis(env_or("MODEL_RETRY_BACKOFF_MS", 50)?),
            stats_window: Duration::from_secs(env_or("STATS_WINDOW_SECS", 3_600)?),
            health: HealthThresholds {
                min_samples: env_or("HEALTH_MIN_SAMPLES", 10)?,
                degraded_error_rate: env_or("HEALTH_DEGRADED_ERROR_RATE", 0.1)?,
                unhealthy_error_rate: env_or("HEALTH_UNHEALTHY_ERROR_RATE", 0.5)?,
                degraded_throttle_rate: env_or("HEALTH_DEGRADED_THROTTLE_RATE", 0.25)?,
                max_queue_length: env_or("HEALTH_MAX_QUEUE_LENGTH", 1_000)?,
            },
        };
        scoring.validate()?;

        let config = Self {
            port: env_or("PORT", 3000)
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            crm_base_url: required_url("CRM_BASE_URL")?,
            crm_token: std::env::var("CRM_TOKEN")
                .map_err(|_| anyhow::anyhow!("CRM_TOKEN environment variable required"))
                .and_then(|token| {
                    if token.trim().is_empty() {
                        anyhow::bail!("CRM_TOKEN cannot be empty");
                    }
                    Ok(token)
                })?,
            model_gateway_url: match std::env::var("MODEL_GATEWAY_URL") {
                Ok(url) if !url.trim().is_empty() => Some(validate_url("MODEL_GATEWAY_URL", url)?),
                _ => None,
            },
            model_ids,
            scoring,
        };

        // Never log the CRM token
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("CRM Base URL: {}", config.crm_base_url);
        match config.model_gateway_url {
            Some(ref gateway) => tracing::info!("Model gateway URL configured: {}", gateway),
            None => tracing::warn!("MODEL_GATEWAY_URL not set, serving in-process linear models"),
        }
        tracing::debug!("Models: {:?}", config.model_ids);
        tracing::debug!("Scoring config: {:?}", config.scoring);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}

/// Reads `name`, falling back to `default` when unset or blank.
fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", name, raw)),
        _ => Ok(default),
    }
}

fn required_url(name: &str) -> anyhow::Result<String> {
    let raw = std::env::var(name)
        .map_err(|_| anyhow::anyhow!("{} environment variable required", name))?;
    validate_url(name, raw)
}

fn validate_url(name: &str, raw: String) -> anyhow::Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        anyhow::bail!("{} cannot be empty", name);
    }
    let parsed = url::Url::parse(trimmed)
        .map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", name, e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}
