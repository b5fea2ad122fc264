//! Chintai crawler: batched listing harvester for Japanese rental sites
//!
//! This crate crawls listing pages from a small, fixed set of property
//! management sites, extracts structured attributes through a configurable
//! hook pipeline, reconciles them against previously stored listings and
//! upserts them batch by batch into a SQLite document store.

pub mod config;
pub mod crawler;
pub mod extract;
pub mod output;
pub mod pool;
pub mod reconcile;
pub mod record;
pub mod reference;
pub mod storage;

use thiserror::Error;

/// Main error type for crawler operations
#[derive(Debug, Error)]
pub enum ChintaiError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Resource pool error: {0}")]
    Pool(String),

    #[error("Reference data error: {0}")]
    Reference(String),

    #[error("Unknown site: {0}")]
    UnknownSite(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// Result type alias for crawler operations
pub type Result<T> = std::result::Result<T, ChintaiError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{BatchCrawler, Coordinator, PageResult};
pub use extract::{Pipeline, PipelineFactory};
pub use pool::ResourcePool;
pub use record::ListingRecord;
