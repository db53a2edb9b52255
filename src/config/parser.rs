use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads, parses and validates a configuration file
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Stored with every run so the ledger shows which settings produced it.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(hash_content(&content))
}

/// Loads a configuration and returns both the config and its hash
///
/// The file is read once, so the hash always matches the parsed content.
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    Ok((config, hash_content(&content)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_full_config() {
        let config_content = r#"
[registry]
consulta-url = "http://127.0.0.1:9000/consulta"
pncp-url = "http://127.0.0.1:9000/pncp"
timeout-secs = 5
page-size = 10
modality = 8
user-agent = "test-agent"

[retry]
max-attempts = 2
base-delay-ms = 10
max-delay-ms = 50

[crawler]
max-concurrent-pages = 4
cooldown-secs = 1
max-page-retries = 2

[output]
database-path = "./test.db"
flush-every = 10
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.registry.page_size, 10);
        assert_eq!(config.registry.modality, 8);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.crawler.max_concurrent_pages, 4);
        assert_eq!(config.output.flush_every, 10);
    }

    #[test]
    fn test_defaults_apply_to_missing_sections() {
        let config_content = r#"
[output]
database-path = "./pncp.db"
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.registry.consulta_url, "https://pncp.gov.br/api/consulta");
        assert_eq!(config.registry.timeout_secs, 20);
        assert_eq!(config.registry.page_size, 50);
        assert_eq!(config.registry.modality, 6);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 4000);
        assert_eq!(config.retry.max_delay_ms, 10_000);
        assert_eq!(config.crawler.max_concurrent_pages, 20);
        assert_eq!(config.crawler.cooldown_secs, 180);
        assert_eq!(config.crawler.max_page_retries, 5);
        assert_eq!(config.output.flush_every, 100);
    }

    #[test]
    fn test_missing_output_section() {
        let file = create_temp_config("[registry]\npage-size = 50\n");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let config_content = r#"
[crawler]
max-concurrent-pages = 0

[output]
database-path = "./test.db"
"#;

        let file = create_temp_config(config_content);
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_load_config_with_hash() {
        let config_content = "[output]\ndatabase-path = \"./a.db\"\n";
        let file = create_temp_config(config_content);

        let (config, hash) = load_config_with_hash(file.path()).unwrap();
        assert_eq!(config.output.database_path, "./a.db");
        assert_eq!(hash, compute_config_hash(file.path()).unwrap());
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        let hash1 = compute_config_hash(file1.path()).unwrap();
        let hash2 = compute_config_hash(file2.path()).unwrap();

        assert_ne!(hash1, hash2);
    }
}
