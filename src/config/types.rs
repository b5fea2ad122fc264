use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Main configuration structure for the crawler
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub reference: Option<ReferenceConfig>,
    #[serde(default)]
    pub stations: Option<StationsConfig>,
    #[serde(default)]
    pub geocoding: GeocodingConfig,
    #[serde(default, rename = "site")]
    pub sites: Vec<SiteConfig>,
}

impl Config {
    /// Looks up a site by name
    pub fn site(&self, name: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|s| s.name == name)
    }
}

/// Crawl orchestration settings shared by every site
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Number of URLs fetched concurrently per batch
    pub batch_size: usize,

    /// Number of pooled HTTP clients (defaults to the batch size)
    #[serde(default)]
    pub pool_size: Option<usize>,

    /// Consecutive per-URL failures that abort a crawl
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Pause between batches (milliseconds)
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Per-request timeout (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum age of a stored listing before it is crawled again (seconds)
    #[serde(default = "default_staleness_window_secs")]
    pub staleness_window_secs: u64,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl CrawlerConfig {
    pub fn effective_pool_size(&self) -> usize {
        self.pool_size.unwrap_or(self.batch_size)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn staleness_window(&self) -> Duration {
        Duration::from_secs(self.staleness_window_secs)
    }
}

/// Document store settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    /// Path to the SQLite database file
    pub database_path: String,

    /// Directory that receives JSON collection backups
    #[serde(default = "default_backup_dir")]
    pub backup_dir: String,
}

/// Reference data used for district lookups
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReferenceConfig {
    pub districts_path: String,
}

/// Nearby-station API settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StationsConfig {
    pub endpoint: String,

    #[serde(default = "default_max_stations")]
    pub max_stations: usize,

    #[serde(default = "default_station_timeout_secs")]
    pub timeout_secs: u64,
}

/// Caller-side budget for the external geocoder
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GeocodingConfig {
    #[serde(default = "default_geocode_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_geocode_attempts")]
    pub attempts: u32,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_geocode_timeout_secs(),
            attempts: default_geocode_attempts(),
        }
    }
}

/// One listing site and the rules used to extract its pages
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SiteConfig {
    /// Short name used on the command line and in logs
    pub name: String,

    /// Collection the site's listings are stored in
    pub collection: String,

    /// Lowest identifier handed out for this collection
    #[serde(default = "default_id_base")]
    pub id_base: i64,

    /// Listing index URL with a `{page}` placeholder
    pub listing_url: String,

    /// CSS selector matching one listing entry on an index page
    pub item_selector: String,

    /// Attribute of the matched element holding the detail URL
    #[serde(default = "default_link_attribute")]
    pub link_attribute: String,

    /// CSS selector for pagination links, the last one names the final page
    #[serde(default)]
    pub max_page_selector: Option<String>,

    /// Page count used when pagination cannot be detected
    #[serde(default = "default_pages")]
    pub default_pages: u32,

    /// Cap on detail links taken from a single index page
    #[serde(default)]
    pub max_links_per_page: Option<usize>,

    #[serde(default = "default_max_images")]
    pub max_images: usize,

    /// Resolve coordinates from the address through the geocoder
    #[serde(default)]
    pub geocode: bool,

    /// Back up and empty the collection before crawling
    #[serde(default)]
    pub reset_before_crawl: bool,

    /// Regexes removed from the page before extraction
    #[serde(default)]
    pub strip_patterns: Vec<String>,

    /// Constant fields written onto every record
    #[serde(default)]
    pub default_fields: BTreeMap<String, toml::Value>,

    #[serde(default, rename = "field")]
    pub fields: Vec<FieldRuleConfig>,

    #[serde(default, rename = "image")]
    pub images: Vec<ImageRuleConfig>,

    #[serde(default)]
    pub amenities: Option<AmenitiesConfig>,
}

/// A single regex-driven field
#[derive(Debug, Clone, Deserialize)]
pub struct FieldRuleConfig {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub kind: FieldKind,
}

/// How a captured field value is converted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Text,
    Integer,
    Number,
    Months,
    Area,
    Flag,
    /// `3階/10階建` style text, written to `floor_no` and `floors`
    Floor,
}

/// A regex collecting image URLs of one category
#[derive(Debug, Clone, Deserialize)]
pub struct ImageRuleConfig {
    pub category: String,
    pub pattern: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Keyword flags read from the amenities section of a page
#[derive(Debug, Clone, Deserialize)]
pub struct AmenitiesConfig {
    pub pattern: String,
    pub keywords: BTreeMap<String, String>,
}

fn default_max_consecutive_failures() -> u32 {
    30
}

fn default_batch_delay_ms() -> u64 {
    2000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_staleness_window_secs() -> u64 {
    172_800
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

fn default_backup_dir() -> String {
    "data/backups".to_string()
}

fn default_max_stations() -> usize {
    5
}

fn default_station_timeout_secs() -> u64 {
    10
}

fn default_geocode_timeout_secs() -> u64 {
    25
}

fn default_geocode_attempts() -> u32 {
    2
}

fn default_id_base() -> i64 {
    1
}

fn default_link_attribute() -> String {
    "href".to_string()
}

fn default_pages() -> u32 {
    1
}

fn default_max_images() -> usize {
    16
}
