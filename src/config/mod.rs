//! Configuration module
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use chintai_crawler::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! println!("Batch size: {}", config.crawler.batch_size);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    AmenitiesConfig, Config, CrawlerConfig, FieldKind, FieldRuleConfig, GeocodingConfig,
    ImageRuleConfig, ReferenceConfig, SiteConfig, StationsConfig, StorageConfig,
};

// Re-export parser functions
pub use parser::{
    compute_config_hash, hash_config_text, load_config, load_config_with_hash, parse_config,
};
