use crate::config::types::{Config, CrawlerConfig, OutputConfig, RegistryConfig, RetryConfig};
use crate::model::{Modality, PageSize};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_registry_config(&config.registry)?;
    validate_retry_config(&config.retry)?;
    validate_crawler_config(&config.crawler)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates registry endpoints and request parameters
fn validate_registry_config(config: &RegistryConfig) -> Result<(), ConfigError> {
    validate_base_url("consulta-url", &config.consulta_url)?;
    validate_base_url("pncp-url", &config.pncp_url)?;

    if config.timeout_secs < 1 || config.timeout_secs > 300 {
        return Err(ConfigError::Validation(format!(
            "timeout-secs must be between 1 and 300, got {}",
            config.timeout_secs
        )));
    }

    PageSize::try_from(config.page_size)
        .map_err(|e| ConfigError::Validation(format!("page-size: {}", e)))?;

    Modality::from_code(config.modality)
        .map_err(|e| ConfigError::Validation(format!("modality: {}", e)))?;

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates a base URL: must parse and use http(s)
fn validate_base_url(key: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", key, value, e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use http or https",
            key, value
        )));
    }

    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' cannot be used as a base URL",
            key, value
        )));
    }

    Ok(())
}

/// Validates retry configuration
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max-attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.base_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "base-delay-ms ({}) cannot exceed max-delay-ms ({})",
            config.base_delay_ms, config.max_delay_ms
        )));
    }

    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_pages < 1 || config.max_concurrent_pages > 100 {
        return Err(ConfigError::Validation(format!(
            "max-concurrent-pages must be between 1 and 100, got {}",
            config.max_concurrent_pages
        )));
    }

    if config.max_page_retries < 1 {
        return Err(ConfigError::Validation(format!(
            "max-page-retries must be >= 1, got {}",
            config.max_page_retries
        )));
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

    if config.flush_every < 1 {
        return Err(ConfigError::Validation(format!(
            "flush-every must be >= 1, got {}",
            config.flush_every
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_base_url() {
        assert!(validate_base_url("x", "https://pncp.gov.br/api/consulta").is_ok());
        assert!(validate_base_url("x", "http://127.0.0.1:8080").is_ok());

        assert!(validate_base_url("x", "").is_err());
        assert!(validate_base_url("x", "ftp://pncp.gov.br").is_err());
        assert!(validate_base_url("x", "mailto:someone@pncp.gov.br").is_err());
    }

    #[test]
    fn test_validate_registry_config() {
        assert!(validate_registry_config(&RegistryConfig::default()).is_ok());

        let config = RegistryConfig {
            page_size: 20,
            ..RegistryConfig::default()
        };
        assert!(matches!(
            validate_registry_config(&config),
            Err(ConfigError::Validation(_))
        ));

        let config = RegistryConfig {
            modality: 14,
            ..RegistryConfig::default()
        };
        assert!(validate_registry_config(&config).is_err());

        let config = RegistryConfig {
            timeout_secs: 0,
            ..RegistryConfig::default()
        };
        assert!(validate_registry_config(&config).is_err());
    }

    #[test]
    fn test_validate_retry_config() {
        assert!(validate_retry_config(&RetryConfig::default()).is_ok());

        let config = RetryConfig {
            base_delay_ms: 20_000,
            ..RetryConfig::default()
        };
        assert!(validate_retry_config(&config).is_err());

        let config = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };
        assert!(validate_retry_config(&config).is_err());
    }

    #[test]
    fn test_validate_crawler_config() {
        assert!(validate_crawler_config(&CrawlerConfig::default()).is_ok());

        let config = CrawlerConfig {
            max_concurrent_pages: 0,
            ..CrawlerConfig::default()
        };
        assert!(validate_crawler_config(&config).is_err());

        let config = CrawlerConfig {
            max_page_retries: 0,
            ..CrawlerConfig::default()
        };
        assert!(validate_crawler_config(&config).is_err());
    }
}
