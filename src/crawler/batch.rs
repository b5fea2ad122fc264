//! Batch crawl orchestration
//!
//! URLs are processed in consecutive batches. Every URL of a batch is
//! fetched and extracted concurrently, results are collected in submission
//! order and handed to a `BatchSink` before the next batch starts, so a
//! crash loses at most the batch in flight.
//!
//! A run of consecutive failures, counted across batch boundaries, aborts
//! the crawl: the current batch is truncated at the failure that tripped the
//! limit, persisted, and no further URLs are dispatched.

use crate::config::CrawlerConfig;
use crate::record::ListingRecord;
use crate::Result;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Outcome of processing one URL
#[derive(Debug, Clone, PartialEq)]
pub enum PageResult {
    /// The page was fetched and extracted
    Listing(ListingRecord),
    /// The listing no longer exists on the site
    Gone { url: String },
    /// Fetch or extraction failed
    Failed { url: String, error: String },
}

impl PageResult {
    /// Whether this result counts toward the consecutive-failure limit
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Listing(record) => record.link(),
            Self::Gone { url } | Self::Failed { url, .. } => Some(url),
        }
    }

    pub fn as_listing(&self) -> Option<&ListingRecord> {
        match self {
            Self::Listing(record) => Some(record),
            _ => None,
        }
    }
}

/// Fetches and extracts a single URL
#[async_trait]
pub trait PageProcessor: Send + Sync + 'static {
    /// Never fails: problems are reported as `PageResult::Failed`
    async fn process(&self, url: String) -> PageResult;
}

/// Receives each batch once it is complete
#[async_trait]
pub trait BatchSink: Send {
    /// Called once per batch, in order, with `batch_number` starting at 1
    ///
    /// An error is logged by the crawler and never stops the crawl.
    async fn on_batch_complete(
        &mut self,
        results: &[PageResult],
        batch_number: usize,
        total_batches: usize,
    ) -> Result<()>;
}

/// Counts failures since the last non-failure result
#[derive(Debug, Clone)]
pub struct FailureStreak {
    count: u32,
    limit: u32,
}

impl FailureStreak {
    pub fn new(limit: u32) -> Self {
        Self {
            count: 0,
            limit: limit.max(1),
        }
    }

    /// Records a result and reports whether the limit has been reached
    pub fn record(&mut self, result: &PageResult) -> bool {
        if result.is_failure() {
            self.count += 1;
        } else {
            self.count = 0;
        }
        self.tripped()
    }

    pub fn tripped(&self) -> bool {
        self.count >= self.limit
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Tunables of a batch crawl
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub max_consecutive_failures: u32,
    /// Pause between batches, not applied after the last one
    pub batch_delay: Duration,
}

impl From<&CrawlerConfig> for BatchOptions {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_consecutive_failures: config.max_consecutive_failures,
            batch_delay: config.batch_delay(),
        }
    }
}

/// What a crawl did
#[derive(Debug, Clone, Default)]
pub struct CrawlOutcome {
    /// Every result, batches in order, URLs in submission order
    pub results: Vec<PageResult>,
    pub total_urls: usize,
    pub processed_urls: usize,
    /// Batches handed to the sink
    pub batches_completed: usize,
    pub total_batches: usize,
    /// True when the consecutive-failure limit stopped the crawl
    pub aborted: bool,
    /// Batches whose sink call returned an error
    pub sink_failures: usize,
}

impl CrawlOutcome {
    pub fn listings(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, PageResult::Listing(_)))
            .count()
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| r.is_failure()).count()
    }

    pub fn gone(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, PageResult::Gone { .. }))
            .count()
    }
}

/// Drives a `PageProcessor` over a URL list in batches
pub struct BatchCrawler<P: PageProcessor> {
    processor: Arc<P>,
    options: BatchOptions,
}

impl<P: PageProcessor> BatchCrawler<P> {
    pub fn new(processor: P, options: BatchOptions) -> Self {
        Self {
            processor: Arc::new(processor),
            options,
        }
    }

    /// Crawls `urls`, handing every completed batch to `sink`
    ///
    /// # Arguments
    ///
    /// * `urls` - URLs to process, in order
    /// * `sink` - Receives each batch's results before the next batch starts
    ///
    /// # Returns
    ///
    /// The accumulated results and counters. Aborting on the failure limit
    /// is reported through `CrawlOutcome::aborted`, not as an error.
    pub async fn crawl<S: BatchSink + ?Sized>(&self, urls: &[String], sink: &mut S) -> CrawlOutcome {
        let batch_size = self.options.batch_size.max(1);
        let total_batches = urls.len().div_ceil(batch_size);
        let mut streak = FailureStreak::new(self.options.max_consecutive_failures);

        let mut outcome = CrawlOutcome {
            total_urls: urls.len(),
            total_batches,
            ..CrawlOutcome::default()
        };

        info!(
            "Crawling {} listings in {} batches of {}",
            urls.len(),
            total_batches,
            batch_size
        );

        for (index, chunk) in urls.chunks(batch_size).enumerate() {
            let batch_number = index + 1;
            info!(
                "Processing batch {}/{} ({} URLs)",
                batch_number,
                total_batches,
                chunk.len()
            );

            let handles = chunk.iter().map(|url| {
                let processor = Arc::clone(&self.processor);
                let url = url.clone();
                tokio::spawn(async move { processor.process(url).await })
            });
            let joined = join_all(handles).await;

            let mut batch = Vec::with_capacity(chunk.len());
            for (url, result) in chunk.iter().zip(joined) {
                let result = result.unwrap_or_else(|e| PageResult::Failed {
                    url: url.clone(),
                    error: format!("task failed: {}", e),
                });

                if let PageResult::Failed { url, error } = &result {
                    warn!("Failed {}: {}", url, error);
                }

                let tripped = streak.record(&result);
                batch.push(result);

                if tripped {
                    outcome.aborted = true;
                    break;
                }
            }

            outcome.processed_urls += batch.len();

            if let Err(e) = sink
                .on_batch_complete(&batch, batch_number, total_batches)
                .await
            {
                error!(
                    "Batch {}/{} could not be persisted: {}",
                    batch_number, total_batches, e
                );
                outcome.sink_failures += 1;
            }
            outcome.batches_completed += 1;
            outcome.results.extend(batch);

            if outcome.aborted {
                warn!(
                    "Stopping after {} consecutive failures ({}/{} URLs processed)",
                    streak.count(),
                    outcome.processed_urls,
                    outcome.total_urls
                );
                break;
            }

            if batch_number < total_batches && !self.options.batch_delay.is_zero() {
                tokio::time::sleep(self.options.batch_delay).await;
            }
        }

        outcome
    }
}
