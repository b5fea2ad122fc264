use crate::config::types::{Config, CrawlerConfig, SiteConfig, StorageConfig};
use crate::ConfigError;
use regex::Regex;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_storage_config(&config.storage)?;

    if let Some(stations) = &config.stations {
        validate_http_url(&stations.endpoint, "stations endpoint")?;
        if stations.max_stations == 0 {
            return Err(ConfigError::Validation(
                "max-stations must be >= 1".to_string(),
            ));
        }
    }

    if config.geocoding.attempts == 0 {
        return Err(ConfigError::Validation(
            "geocoding attempts must be >= 1".to_string(),
        ));
    }

    validate_sites(&config.sites)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.batch_size < 1 || config.batch_size > 100 {
        return Err(ConfigError::Validation(format!(
            "batch-size must be between 1 and 100, got {}",
            config.batch_size
        )));
    }

    if config.effective_pool_size() < 1 {
        return Err(ConfigError::Validation(
            "pool-size must be >= 1".to_string(),
        ));
    }

    if config.max_consecutive_failures < 1 {
        return Err(ConfigError::Validation(format!(
            "max-consecutive-failures must be >= 1, got {}",
            config.max_consecutive_failures
        )));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "request-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.backup_dir.is_empty() {
        return Err(ConfigError::Validation(
            "backup-dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates every site entry and checks names and collections are unique
fn validate_sites(sites: &[SiteConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    let mut collections = HashSet::new();

    for site in sites {
        if site.name.is_empty() {
            return Err(ConfigError::Validation(
                "site name cannot be empty".to_string(),
            ));
        }
        if !names.insert(site.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate site name '{}'",
                site.name
            )));
        }
        if site.collection.is_empty() {
            return Err(ConfigError::Validation(format!(
                "site '{}' must name a collection",
                site.name
            )));
        }
        if !collections.insert(site.collection.as_str()) {
            return Err(ConfigError::Validation(format!(
                "collection '{}' is used by more than one site",
                site.collection
            )));
        }

        validate_site(site)?;
    }

    Ok(())
}

fn validate_site(site: &SiteConfig) -> Result<(), ConfigError> {
    if !site.listing_url.contains("{page}") {
        return Err(ConfigError::Validation(format!(
            "listing-url of site '{}' must contain a {{page}} placeholder",
            site.name
        )));
    }
    validate_http_url(&site.listing_url.replace("{page}", "1"), "listing-url")?;

    validate_selector(&site.item_selector)?;
    if let Some(selector) = &site.max_page_selector {
        validate_selector(selector)?;
    }

    if site.id_base < 1 {
        return Err(ConfigError::Validation(format!(
            "id-base of site '{}' must be >= 1",
            site.name
        )));
    }

    if site.default_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "default-pages of site '{}' must be >= 1",
            site.name
        )));
    }

    for pattern in &site.strip_patterns {
        validate_pattern(pattern)?;
    }
    for rule in &site.fields {
        validate_capturing_pattern(&rule.pattern, &rule.name)?;
    }
    for rule in &site.images {
        validate_capturing_pattern(&rule.pattern, &rule.category)?;
    }
    if let Some(amenities) = &site.amenities {
        validate_capturing_pattern(&amenities.pattern, "amenities")?;
    }

    Ok(())
}

fn validate_http_url(raw: &str, what: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", what, raw, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use http or https",
            what, raw
        )));
    }

    Ok(())
}

fn validate_selector(selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidPattern(format!("selector '{}': {:?}", selector, e)))
}

fn validate_pattern(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern(format!("'{}': {}", pattern, e)))
}

/// Field and image rules read capture group 1, so the pattern must have one
fn validate_capturing_pattern(pattern: &str, owner: &str) -> Result<(), ConfigError> {
    let regex = validate_pattern(pattern)?;
    if regex.captures_len() < 2 {
        return Err(ConfigError::InvalidPattern(format!(
            "pattern for '{}' needs a capture group",
            owner
        )));
    }
    Ok(())
}
