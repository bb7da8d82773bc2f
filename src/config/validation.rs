use crate::config::types::{CacheConfig, Config, RateControlConfig, ServiceConfig};
use crate::ConfigError;
use reqwest::header::HeaderName;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_rate_control(&config.rate_control)?;
    validate_cache(&config.cache)?;
    validate_service(&config.service)?;
    Ok(())
}

/// Validates pacing and backoff settings
fn validate_rate_control(config: &RateControlConfig) -> Result<(), ConfigError> {
    let paced = config.requests_per_tick > 0 || config.bytes_per_tick > 0;
    if paced && config.tick_ms == 0 {
        return Err(ConfigError::Validation(
            "tick-ms must be > 0 when requests-per-tick or bytes-per-tick is set".to_string(),
        ));
    }

    if config.backoff_steps == 0 {
        return Err(ConfigError::Validation(
            "backoff-steps must be >= 1".to_string(),
        ));
    }

    for code in &config.backoff_status_codes {
        if !(100..=599).contains(code) {
            return Err(ConfigError::Validation(format!(
                "backoff-status-codes contains invalid HTTP status {}",
                code
            )));
        }
    }

    if let Some(header) = &config.reset_header {
        HeaderName::from_bytes(header.as_bytes()).map_err(|_| {
            ConfigError::Validation(format!("reset-header is not a valid header name: '{}'", header))
        })?;
    }

    Ok(())
}

/// Validates the cache layout
fn validate_cache(config: &CacheConfig) -> Result<(), ConfigError> {
    if config.downloads.is_empty() {
        return Err(ConfigError::Validation(
            "downloads cannot be empty".to_string(),
        ));
    }

    if config.checkpoint.is_empty() {
        return Err(ConfigError::Validation(
            "checkpoint cannot be empty".to_string(),
        ));
    }

    if !(1..=16).contains(&config.sharding_prefix_len) {
        return Err(ConfigError::Validation(format!(
            "sharding-prefix-len must be between 1 and 16, got {}",
            config.sharding_prefix_len
        )));
    }

    if config.concurrency == 0 {
        return Err(ConfigError::Validation(
            "concurrency must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates the service endpoint and crawl window
fn validate_service(config: &ServiceConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.service_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid service-url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "service-url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if let Some(end) = config.end_date {
        if end < config.start_date {
            return Err(ConfigError::Validation(format!(
                "end-date {} is before start-date {}",
                end, config.start_date
            )));
        }
    }

    Ok(())
}
