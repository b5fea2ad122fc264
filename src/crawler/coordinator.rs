//! Crawler coordinator - per-site crawl orchestration
//!
//! For every configured site the coordinator:
//! - Discovers the listing URLs currently advertised
//! - Reconciles them with the stored collection (purge, freshness, ids)
//! - Crawls the remaining URLs in batches through a client pool
//! - Persists each batch and records the run

use crate::config::{Config, SiteConfig};
use crate::crawler::batch::{BatchCrawler, BatchOptions};
use crate::crawler::discovery::{collect_urls, Discovery, PaginatedSource};
use crate::crawler::fetcher::build_http_client;
use crate::crawler::processor::ListingProcessor;
use crate::crawler::sink::PersistSink;
use crate::extract::{pipeline_factory, ExtractionServices, Geocoder};
use crate::output::{clean_collection, SiteReport};
use crate::pool::{HttpClientFactory, ResourcePool};
use crate::reconcile::{reconcile, ReconcilePlan};
use crate::storage::{
    epoch_now, open_storage, ListingStore, RunRecord, RunStatus, SqliteStore, StorageError,
};
use crate::{ChintaiError, Result};
use reqwest::Client;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{error, info, warn};

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    config_hash: String,
    storage: Arc<Mutex<SqliteStore>>,
    services: ExtractionServices,
    client: Client,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// Opens the database and loads the shared extraction services
    /// (reference data, station API client).
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `config_hash` - Hash of the configuration file, stored with each run
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(ChintaiError)` - Failed to initialize
    pub fn new(config: Config, config_hash: impl Into<String>) -> Result<Self> {
        let storage = open_storage(Path::new(&config.storage.database_path))?;
        let services = ExtractionServices::from_config(&config)?;
        let client = build_http_client(
            &config.crawler.user_agent,
            config.crawler.request_timeout(),
        )?;

        Ok(Self {
            config: Arc::new(config),
            config_hash: config_hash.into(),
            storage: Arc::new(Mutex::new(storage)),
            services,
            client,
        })
    }

    /// Supplies the geocoder used by sites with geocoding enabled
    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.services = self.services.with_geocoder(geocoder);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared handle to the listing store
    pub fn storage(&self) -> Arc<Mutex<SqliteStore>> {
        Arc::clone(&self.storage)
    }

    fn lock_storage(&self) -> std::result::Result<MutexGuard<'_, SqliteStore>, StorageError> {
        self.storage.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn site(&self, name: &str) -> Result<&SiteConfig> {
        self.config
            .site(name)
            .ok_or_else(|| ChintaiError::UnknownSite(name.to_string()))
    }

    /// Collects the listing URLs a site currently advertises
    pub async fn discover(&self, site: &SiteConfig) -> Result<Discovery> {
        let source = PaginatedSource::from_site(self.client.clone(), site)?;
        Ok(collect_urls(&source, site.default_pages).await)
    }

    /// Crawls the named sites, or every site when `names` is empty
    ///
    /// Sites run one after another. A site that fails is logged and the
    /// remaining sites still run.
    pub async fn run_all(&self, names: &[String]) -> Result<Vec<SiteReport>> {
        let sites: Vec<&SiteConfig> = if names.is_empty() {
            self.config.sites.iter().collect()
        } else {
            names
                .iter()
                .map(|name| self.site(name))
                .collect::<Result<Vec<_>>>()?
        };

        let mut reports = Vec::with_capacity(sites.len());
        for site in sites {
            match self.run_site(site).await {
                Ok(report) => reports.push(report),
                Err(e) => error!("Site {} failed: {}", site.name, e),
            }
        }
        Ok(reports)
    }

    /// Runs a complete crawl of one site
    ///
    /// 1. Discover listing URLs (an empty result stops here, purging nothing)
    /// 2. Optionally back up and clear the collection
    /// 3. Reconcile with the stored collection, purging only when every
    ///    result page was read
    /// 4. Crawl the URLs that need it, persisting batch by batch
    /// 5. Record the run
    pub async fn run_site(&self, site: &SiteConfig) -> Result<SiteReport> {
        let started = Instant::now();
        let mut run = RunRecord::new(&site.name, &site.collection, &self.config_hash);
        let mut report = SiteReport::new(&site.name, &site.collection);

        info!("Starting {} crawl", site.name);

        let discovery = self.discover(site).await?;
        let complete = discovery.is_complete();
        let urls = discovery.urls;
        report.total_urls = urls.len();
        report.failed_pages = discovery.failed_pages;
        run.total_urls = urls.len();

        if urls.is_empty() {
            warn!(
                "No listing URLs found for {}, leaving collection untouched",
                site.name
            );
            return self.finish(run, report, RunStatus::Completed, started);
        }

        if site.reset_before_crawl && !complete {
            warn!(
                "Discovery of {} was incomplete, not resetting {}",
                site.name, site.collection
            );
        } else if site.reset_before_crawl {
            let backup_dir = Path::new(&self.config.storage.backup_dir);
            let mut store = self.lock_storage()?;
            clean_collection(&mut *store, backup_dir, &site.collection, true)?;
        }

        let plan = self.plan(site, &urls, complete)?;
        report.fresh = plan.fresh;
        report.purged = plan.purged.len();
        report.to_crawl = plan.to_crawl.len();
        report.identifiers_allocated = plan.identifiers.remaining();
        run.purged = plan.purged.len();

        if plan.to_crawl.is_empty() {
            info!("Every listing of {} is fresh, nothing to crawl", site.name);
            return self.finish(run, report, RunStatus::Completed, started);
        }

        let pipelines = pipeline_factory(site, &self.services)?;

        let crawler_config = &self.config.crawler;
        let factory = HttpClientFactory::new(
            crawler_config.user_agent.clone(),
            crawler_config.request_timeout(),
        );
        let pool = Arc::new(ResourcePool::new(
            factory,
            crawler_config.effective_pool_size(),
        ));
        if pool.initialize().await == 0 {
            self.finish(run, report, RunStatus::Failed, started)?;
            return Err(ChintaiError::Pool(format!(
                "no HTTP clients could be created for {}",
                site.name
            )));
        }

        let crawler = BatchCrawler::new(
            ListingProcessor::new(Arc::clone(&pool), pipelines),
            BatchOptions::from(crawler_config),
        );
        let mut sink = PersistSink::new(
            self.storage(),
            site.collection.clone(),
            plan.identifiers,
        );

        let outcome = {
            let crawler = &crawler;
            let urls = &plan.to_crawl;
            let sink = &mut sink;
            pool.scoped(move |_| crawler.crawl(urls, sink)).await
        };

        let totals = sink.totals();
        report.processed = outcome.processed_urls;
        report.gone = outcome.gone();
        report.failures = outcome.failures();
        report.inserted = totals.inserted;
        report.updated = totals.updated;
        report.rejected = totals.rejected;
        report.batches_persisted = sink.batches_persisted();
        report.total_batches = outcome.total_batches;
        report.identifiers_used = sink.identifiers().issued();

        run.processed_urls = outcome.processed_urls;
        run.inserted = totals.inserted;
        run.updated = totals.updated;
        run.rejected = totals.rejected;
        run.batches_persisted = sink.batches_persisted();

        let status = if outcome.aborted {
            RunStatus::Aborted
        } else {
            RunStatus::Completed
        };
        self.finish(run, report, status, started)
    }

    /// Reconciles a site's collection, crawling everything if that fails
    fn plan(&self, site: &SiteConfig, urls: &[String], complete: bool) -> Result<ReconcilePlan> {
        let mut store = self.lock_storage()?;
        let staleness =
            i64::try_from(self.config.crawler.staleness_window().as_secs()).unwrap_or(i64::MAX);

        let planned = reconcile(
            &mut *store,
            &site.collection,
            urls,
            complete,
            staleness,
            site.id_base,
            epoch_now(),
        );

        match planned {
            Ok(plan) => Ok(plan),
            Err(e) => {
                error!(
                    "Reconciliation of {} failed, crawling every URL: {}",
                    site.collection, e
                );
                Ok(ReconcilePlan::crawl_all(urls, site.id_base))
            }
        }
    }

    fn finish(
        &self,
        mut run: RunRecord,
        mut report: SiteReport,
        status: RunStatus,
        started: Instant,
    ) -> Result<SiteReport> {
        run.finish(status);
        report.status = status;
        report.duration = started.elapsed();

        let run_id = self.lock_storage()?.record_run(&run)?;
        info!(
            "Run {} of {} finished: {} ({} new, {} updated)",
            run_id, report.site, status, report.inserted, report.updated
        );
        Ok(report)
    }
}
