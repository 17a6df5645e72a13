use crate::config::types::{
    ChallengeConfig, Config, CrawlConfig, DetectionConfig, ExtractionConfig, FetchConfig,
    OutputConfig, RetryConfig, TargetConfig,
};
use crate::ConfigError;
use scraper::Selector;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_target_config(&config.target)?;
    validate_crawl_config(&config.crawl)?;
    validate_fetch_config(&config.fetch)?;
    validate_retry_config(&config.retry)?;
    validate_detection_config(&config.detection)?;
    validate_challenge_config(&config.challenge)?;
    validate_extraction_config(&config.extraction)?;
    validate_output_config(&config.output)?;

    if config.progress.interval_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "progress interval-ms must be >= 100ms, got {}ms",
            config.progress.interval_ms
        )));
    }

    Ok(())
}

/// Validates the listing target
fn validate_target_config(config: &TargetConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url '{}' must use http or https",
            config.base_url
        )));
    }

    if !config.listing_path.contains("{page}") {
        return Err(ConfigError::Validation(format!(
            "listing-path must contain the {{page}} placeholder, got '{}'",
            config.listing_path
        )));
    }

    validate_selector("item-link-selector", &config.item_link_selector)?;
    if let Some(selector) = &config.next_page_selector {
        validate_selector("next-page-selector", selector)?;
    }

    if config.items_per_page < 1 {
        return Err(ConfigError::Validation(
            "items-per-page must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates crawl scope
fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    if config.collection_key.trim().is_empty() {
        return Err(ConfigError::Validation(
            "collection-key cannot be empty".to_string(),
        ));
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max-pages must be >= 1, got {}",
            config.max_pages
        )));
    }

    if config.max_items == Some(0) {
        return Err(ConfigError::Validation(
            "max-items must be >= 1 when set".to_string(),
        ));
    }

    if config.start_page == Some(0) {
        return Err(ConfigError::Validation(
            "start-page is 1-based and must be >= 1".to_string(),
        ));
    }

    if config.persist_every < 1 {
        return Err(ConfigError::Validation(
            "persist-every must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates session and strategy settings
fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "request-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.user_agents.iter().any(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "user-agents cannot contain empty entries".to_string(),
        ));
    }

    let pooled = &config.pooled;
    if pooled.max_concurrent_sessions < 1 || pooled.max_concurrent_sessions > 32 {
        return Err(ConfigError::Validation(format!(
            "max-concurrent-sessions must be between 1 and 32, got {}",
            pooled.max_concurrent_sessions
        )));
    }

    if pooled.max_requests_per_minute < 1 {
        return Err(ConfigError::Validation(
            "max-requests-per-minute must be >= 1".to_string(),
        ));
    }

    if pooled.session_max_uses < 1 {
        return Err(ConfigError::Validation(
            "session-max-uses must be >= 1".to_string(),
        ));
    }

    let isolated = &config.isolated;
    validate_range("isolated delay", isolated.min_delay_ms, isolated.max_delay_ms)?;
    validate_range("isolated dwell", isolated.dwell_min_ms, isolated.dwell_max_ms)?;
    validate_range(
        "isolated scroll pause",
        isolated.scroll_pause_min_ms,
        isolated.scroll_pause_max_ms,
    )?;

    Ok(())
}

/// Validates retry/backoff settings
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_retries > 20 {
        return Err(ConfigError::Validation(format!(
            "max-retries must be <= 20, got {}",
            config.max_retries
        )));
    }

    Ok(())
}

/// Validates the detector marker sets
fn validate_detection_config(config: &DetectionConfig) -> Result<(), ConfigError> {
    if config
        .challenge_markers
        .iter()
        .chain(config.rate_limit_markers.iter())
        .any(|m| m.trim().is_empty())
    {
        return Err(ConfigError::Validation(
            "detection markers cannot be empty strings".to_string(),
        ));
    }

    for selector in &config.challenge_selectors {
        validate_selector("challenge-selectors", selector)?;
    }

    Ok(())
}

/// Validates challenge mitigation settings
fn validate_challenge_config(config: &ChallengeConfig) -> Result<(), ConfigError> {
    validate_range(
        "passive backoff",
        config.passive_backoff_min_ms,
        config.passive_backoff_max_ms,
    )?;

    if let Some(endpoint) = &config.solver_endpoint {
        Url::parse(endpoint)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid solver-endpoint: {}", e)))?;

        if config.solver_timeout_secs < 1 {
            return Err(ConfigError::Validation(
                "solver-timeout-secs must be >= 1".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates extraction selectors
fn validate_extraction_config(config: &ExtractionConfig) -> Result<(), ConfigError> {
    validate_selector("title-selector", &config.title_selector)?;

    if let Some(selector) = &config.image_selector {
        validate_selector("image-selector", selector)?;
    }

    for (name, selector) in &config.fields {
        validate_selector(name, selector)?;
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.image_dir.is_empty() {
        return Err(ConfigError::Validation(
            "image-dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Checks that a CSS selector parses
fn validate_selector(name: &str, selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector).map_err(|e| {
        ConfigError::InvalidSelector(format!("{} '{}': {:?}", name, selector, e))
    })?;
    Ok(())
}

/// Checks that a min/max pair is ordered
fn validate_range(name: &str, min: u64, max: u64) -> Result<(), ConfigError> {
    if min > max {
        return Err(ConfigError::Validation(format!(
            "{} minimum ({}ms) exceeds maximum ({}ms)",
            name, min, max
        )));
    }
    Ok(())
}
