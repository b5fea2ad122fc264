use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
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

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Hex SHA-256 of configuration text
///
/// Stamped on every run record so that runs made with different extraction
/// rules can be told apart.
pub fn hash_config_text(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Computes the hash of a configuration file on disk
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(hash_config_text(&content))
}

/// Loads a configuration and returns both the config and its hash
///
/// The file is read once, so the hash always matches the parsed content.
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    Ok((config, hash_config_text(&content)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const VALID: &str = r#"
[crawler]
batch-size = 10
max-consecutive-failures = 5
batch-delay-ms = 500

[storage]
database-path = "./test.db"

[stations]
endpoint = "https://stations.example.com/api"

[[site]]
name = "mitsui"
collection = "room_mitsui"
id-base = 11000000
listing-url = "https://www.example.co.jp/rf/result?page={page}"
item-selector = "tr.room-row"
link-attribute = "data-room-link"
max-links-per-page = 3

[site.default-fields]
credit_card = "Y"
fire_insurance = 20000

[[site.field]]
name = "monthly_rent"
pattern = '賃料</dt>\s*<dd[^>]*>(.*?)</dd>'
kind = "integer"

[[site.field]]
name = "building_name_ja"
pattern = '<h1[^>]*>(.*?)</h1>'

[[site.image]]
category = "floorplan"
pattern = 'floorplan\s*=\s*"([^"]+)"'
limit = 1
"#;

    #[test]
    fn test_load_valid_config() {
        let file = create_temp_config(VALID);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.crawler.batch_size, 10);
        assert_eq!(config.crawler.effective_pool_size(), 10);
        assert_eq!(config.crawler.max_consecutive_failures, 5);
        assert_eq!(
            config.crawler.staleness_window(),
            std::time::Duration::from_secs(172_800)
        );
        assert_eq!(config.storage.backup_dir, "data/backups");
        assert_eq!(config.stations.as_ref().unwrap().max_stations, 5);
        assert_eq!(config.geocoding.attempts, 2);

        let site = config.site("mitsui").unwrap();
        assert_eq!(site.id_base, 11_000_000);
        assert_eq!(site.link_attribute, "data-room-link");
        assert_eq!(site.max_links_per_page, Some(3));
        assert_eq!(site.default_fields.len(), 2);
        assert_eq!(site.fields[0].kind, FieldKind::Integer);
        assert_eq!(site.fields[1].kind, FieldKind::Text);
        assert_eq!(site.images[0].limit, Some(1));
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
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let content = VALID.replace("batch-size = 10", "batch-size = 0");
        let result = parse_config(&content);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_hash_matches_loaded_content() {
        let file = create_temp_config(VALID);

        let (_, hash) = load_config_with_hash(file.path()).unwrap();

        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_config_text(VALID));
        assert_eq!(hash, compute_config_hash(file.path()).unwrap());
    }

    #[test]
    fn test_edited_rules_change_the_hash() {
        let edited = VALID.replace("limit = 1", "limit = 2");
        assert_ne!(hash_config_text(VALID), hash_config_text(&edited));
    }
}
