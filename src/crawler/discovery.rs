//! Listing URL discovery
//!
//! Walks a site's paginated search results and collects the detail page URL
//! of every advertised listing. Page 1 is also used to detect how many result
//! pages exist; when that fails the site's configured page count is used.
//! Result pages that cannot be loaded are reported, so callers can tell a
//! partial URL set from a complete one.

use crate::config::SiteConfig;
use crate::ConfigError;
use crate::crawler::fetcher::{fetch_page, FetchResult};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

lazy_static! {
    static ref PAGE_NUMBER_REGEX: Regex = Regex::new(r"page[=:/](\d+)").unwrap();
}

/// Links found on one result page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveredPage {
    pub urls: Vec<String>,
    /// Last result page, only when detection was requested and succeeded
    pub max_pages: Option<u32>,
}

/// A result page that could not be loaded
#[derive(Debug, Clone, PartialEq, Error)]
#[error("result page {page}: {reason}")]
pub struct PageError {
    pub page: u32,
    pub reason: String,
}

/// Every listing URL found on a site
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Discovery {
    pub urls: Vec<String>,
    /// Result pages that failed to load, in page order
    pub failed_pages: Vec<u32>,
}

impl Discovery {
    /// True when every result page was read
    pub fn is_complete(&self) -> bool {
        self.failed_pages.is_empty()
    }
}

/// A source of listing URLs, one result page at a time
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetches result page `page`, detecting the page count when asked
    async fn page_urls(&self, page: u32, detect_max_pages: bool)
        -> Result<DiscoveredPage, PageError>;
}

/// Discovers listings on a site whose search results are paginated by URL
pub struct PaginatedSource {
    client: Client,
    listing_url: String,
    item_selector: Selector,
    link_attribute: String,
    max_page_selector: Option<Selector>,
    max_links_per_page: Option<usize>,
}

impl PaginatedSource {
    /// Builds the source from a site's configuration
    pub fn from_site(client: Client, site: &SiteConfig) -> Result<Self, ConfigError> {
        let item_selector = parse_selector(&site.item_selector)?;
        let max_page_selector = site
            .max_page_selector
            .as_deref()
            .map(parse_selector)
            .transpose()?;

        Ok(Self {
            client,
            listing_url: site.listing_url.clone(),
            item_selector,
            link_attribute: site.link_attribute.clone(),
            max_page_selector,
            max_links_per_page: site.max_links_per_page,
        })
    }

    fn page_url(&self, page: u32) -> String {
        self.listing_url.replace("{page}", &page.to_string())
    }

    /// Extracts listing links (and optionally the page count) from a page
    fn parse(&self, body: &str, base: &str, detect_max_pages: bool) -> DiscoveredPage {
        let document = Html::parse_document(body);
        let base = Url::parse(base).ok();

        let mut urls = Vec::new();
        for element in document.select(&self.item_selector) {
            let Some(href) = element.value().attr(&self.link_attribute) else {
                continue;
            };
            let href = href.trim();
            if href.is_empty() {
                continue;
            }

            match resolve(base.as_ref(), href) {
                Some(url) => urls.push(url),
                None => debug!("Skipping unresolvable link {}", href),
            }

            if self
                .max_links_per_page
                .map_or(false, |limit| urls.len() >= limit)
            {
                break;
            }
        }

        let max_pages = if detect_max_pages {
            self.max_page_selector
                .as_ref()
                .and_then(|selector| detect_page_count(&document, selector))
        } else {
            None
        };

        DiscoveredPage { urls, max_pages }
    }
}

#[async_trait]
impl ListingSource for PaginatedSource {
    async fn page_urls(
        &self,
        page: u32,
        detect_max_pages: bool,
    ) -> Result<DiscoveredPage, PageError> {
        let url = self.page_url(page);

        match fetch_page(&self.client, &url).await {
            FetchResult::Success {
                final_url, body, ..
            } => {
                let discovered = self.parse(&body, &final_url, detect_max_pages);
                info!("Page {}: found {} listings", page, discovered.urls.len());
                Ok(discovered)
            }
            other => Err(PageError {
                page,
                reason: other.error_message().unwrap_or_default(),
            }),
        }
    }
}

/// Collects every listing URL of a source
///
/// Fetches page 1 with page-count detection, then pages 2 through the
/// detected count (or `default_pages`). Duplicates are dropped, keeping
/// discovery order. Pages that fail are skipped and listed in
/// `Discovery::failed_pages`.
pub async fn collect_urls<S: ListingSource + ?Sized>(source: &S, default_pages: u32) -> Discovery {
    let mut discovery = Discovery::default();
    let mut seen = HashSet::new();

    let first = match source.page_urls(1, true).await {
        Ok(page) => page,
        Err(e) => {
            warn!("Error loading {}", e);
            discovery.failed_pages.push(1);
            DiscoveredPage::default()
        }
    };

    let max_pages = match first.max_pages {
        Some(detected) => {
            info!("Detected {} result pages", detected);
            detected
        }
        None => {
            info!(
                "Could not detect result pages, using default of {}",
                default_pages
            );
            default_pages
        }
    };

    discovery
        .urls
        .extend(first.urls.into_iter().filter(|url| seen.insert(url.clone())));

    for page in 2..=max_pages {
        match source.page_urls(page, false).await {
            Ok(discovered) => discovery.urls.extend(
                discovered
                    .urls
                    .into_iter()
                    .filter(|url| seen.insert(url.clone())),
            ),
            Err(e) => {
                warn!("Error loading {}", e);
                discovery.failed_pages.push(page);
            }
        }
    }

    if discovery.is_complete() {
        info!("Collected {} listing URLs", discovery.urls.len());
    } else {
        warn!(
            "Collected {} listing URLs, result pages {:?} could not be loaded",
            discovery.urls.len(),
            discovery.failed_pages
        );
    }
    discovery
}

fn parse_selector(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector)
        .map_err(|e| ConfigError::InvalidPattern(format!("selector '{}': {:?}", selector, e)))
}

fn resolve(base: Option<&Url>, href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Url::parse(href).ok().map(String::from);
    }
    base?.join(href).ok().map(String::from)
}

/// Reads the page count from the last pagination link
///
/// The number is taken from a `page:N` / `page=N` marker in the link's href,
/// falling back to the link text.
fn detect_page_count(document: &Html, selector: &Selector) -> Option<u32> {
    let last = document.select(selector).last()?;

    let from_href = last
        .value()
        .attr("href")
        .and_then(|href| PAGE_NUMBER_REGEX.captures(href))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok());

    from_href.or_else(|| last.text().collect::<String>().trim().parse().ok())
}
