//! Fetch and extract a single listing
//!
//! Each URL borrows a pooled HTTP client only for the fetch itself, then
//! runs a freshly built extraction pipeline over the page.

use crate::crawler::batch::{PageProcessor, PageResult};
use crate::crawler::fetcher::{fetch_page, FetchResult};
use crate::extract::{Extraction, PipelineFactory};
use crate::pool::{ClientFactory, ResourcePool};
use crate::record::ERROR_KEY;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, info};

/// Processes listing pages with pooled clients and per-page pipelines
pub struct ListingProcessor<F: ClientFactory<Client = Client>> {
    pool: Arc<ResourcePool<F>>,
    pipelines: PipelineFactory,
}

impl<F: ClientFactory<Client = Client>> ListingProcessor<F> {
    pub fn new(pool: Arc<ResourcePool<F>>, pipelines: PipelineFactory) -> Self {
        Self { pool, pipelines }
    }

    async fn fetch(&self, url: &str) -> FetchResult {
        let client = match self.pool.acquire().await {
            Ok(client) => client,
            Err(e) => {
                return FetchResult::NetworkError {
                    error: e.to_string(),
                }
            }
        };
        fetch_page(&client, url).await
    }
}

#[async_trait]
impl<F: ClientFactory<Client = Client>> PageProcessor for ListingProcessor<F> {
    async fn process(&self, url: String) -> PageResult {
        info!("Crawling {}", url);

        let body = match self.fetch(&url).await {
            FetchResult::Success { body, .. } => body,
            FetchResult::Gone { status_code } => {
                info!("Listing {} is gone (HTTP {})", url, status_code);
                return PageResult::Gone { url };
            }
            other => {
                return PageResult::Failed {
                    error: other.error_message().unwrap_or_default(),
                    url,
                }
            }
        };

        let pipeline = (self.pipelines)();
        let Extraction {
            mut record,
            warnings,
        } = pipeline.run(&url, &body).await;

        if !warnings.is_empty() {
            debug!("{} extraction warnings for {}", warnings.len(), url);
        }

        if record.is_error() {
            let error = record
                .get(ERROR_KEY)
                .map(|value| match value.as_str() {
                    Some(s) => s.to_string(),
                    None => value.to_string(),
                })
                .unwrap_or_default();
            return PageResult::Failed { url, error };
        }

        record.flatten_collections();
        record.drop_nulls();
        PageResult::Listing(record)
    }
}
