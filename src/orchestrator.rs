//! Two-level crawl: dealerships, then the vehicles of each dealership
//!
//! Both levels run in a [`TaskGroup`] of width `min(5, max_concurrency)`; the session pool
//! caps the number of open browsers across both levels. Everything that goes wrong below the
//! dealership level is logged, optionally alerted, and turned into a skipped item.

use crate::alerts::Alerter;
use crate::browser_pool::{BrowserSessionPool, PoolStats, SessionLease};
use crate::extractor::{DetailExtractor, SelectorSet};
use crate::models::{DealershipRecord, VehicleRecord};
use crate::pagination::PaginationWalker;
use crate::renderer::{PageRenderer, RenderOptions, RenderedPage};
use crate::retry::{retry_with_policy, RetryPolicy};
use crate::telemetry::CrawlMetrics;
use crate::utils::format_duration;
use crate::worker::{ProgressTracker, TaskGroup, TaskOutcome};
use crate::{Config, CrawlError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Aggregated result of one crawl cycle
///
/// `records` are in completion order, not input order.
#[derive(Debug, Clone, Default)]
pub struct CrawlOutcome {
    pub records: Vec<VehicleRecord>,
    pub dealerships_crawled: usize,
    pub dealerships_failed: usize,
    /// Vehicle links discovered across all dealerships
    pub vehicles_found: usize,
    /// Vehicles that could not be rendered or parsed
    pub vehicles_skipped: usize,
    pub vehicles_timed_out: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct DealershipOutcome {
    records: Vec<VehicleRecord>,
    failed: bool,
    found: usize,
    skipped: usize,
    timed_out: usize,
}

/// Drives dealerships and their vehicles through the renderer, walker and extractor
///
/// Cheap to clone; clones share the pool, caches and cancellation token.
///
/// # Examples
///
/// ```rust,no_run
/// use dealer_crawler::{Alerter, BrowserSessionPool, Config, CrawlMetrics, CrawlOrchestrator};
/// use std::sync::Arc;
///
/// # async fn run(dealerships: Vec<dealer_crawler::DealershipRecord>) -> Result<(), dealer_crawler::CrawlError> {
/// let config = Arc::new(Config::default());
/// let metrics = CrawlMetrics::new();
/// let pool = Arc::new(BrowserSessionPool::chrome(config.clone(), metrics.clone()));
/// let orchestrator = CrawlOrchestrator::new(config, pool, Alerter::log_only(), metrics)?;
///
/// let outcome = orchestrator.run(dealerships).await;
/// println!("Scraped {} vehicles", outcome.records.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CrawlOrchestrator {
    config: Arc<Config>,
    pool: Arc<BrowserSessionPool>,
    renderer: Arc<PageRenderer>,
    walker: Arc<PaginationWalker>,
    extractor: Arc<DetailExtractor>,
    alerter: Alerter,
    metrics: CrawlMetrics,
    cancel: CancellationToken,
}

impl CrawlOrchestrator {
    pub fn new(
        config: Arc<Config>,
        pool: Arc<BrowserSessionPool>,
        alerter: Alerter,
        metrics: CrawlMetrics,
    ) -> Result<Self, CrawlError> {
        let selectors = Arc::new(SelectorSet::try_from(&config.selectors)?);
        let renderer = Arc::new(PageRenderer::new(&config, metrics.clone()));
        let walker = Arc::new(PaginationWalker::new(
            renderer.clone(),
            selectors.clone(),
            &config.caches,
            alerter.clone(),
        ));
        let extractor = Arc::new(DetailExtractor::new(selectors, &config.caches, alerter.clone()));

        Ok(Self {
            config,
            pool,
            renderer,
            walker,
            extractor,
            alerter,
            metrics,
            cancel: CancellationToken::new(),
        })
    }

    /// Uses `token` as the crawl's cancellation signal.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops the crawl when cancelled.
    ///
    /// In-flight vehicle tasks are dropped, which tears their sessions down, and
    /// [`CrawlOrchestrator::run`] returns what was collected up to that point.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub async fn run(&self, dealerships: Vec<DealershipRecord>) -> CrawlOutcome {
        let started = Instant::now();
        let width = self.config.worker_width();
        info!(
            dealerships = dealerships.len(),
            width, "Starting crawl"
        );

        // Dealership tasks watch the token themselves so that a cancelled dealership still
        // hands back the vehicles it already scraped.
        let mut group = TaskGroup::new("dealerships", width, CancellationToken::new());
        for dealership in dealerships {
            let this = self.clone();
            group.spawn(async move { this.crawl_dealership(dealership).await });
        }

        let mut outcome = CrawlOutcome::default();
        for result in group.join().await.outcomes {
            match result {
                TaskOutcome::Completed(dealership) => {
                    if dealership.failed {
                        outcome.dealerships_failed += 1;
                    } else {
                        outcome.dealerships_crawled += 1;
                    }
                    outcome.vehicles_found += dealership.found;
                    outcome.vehicles_skipped += dealership.skipped;
                    outcome.vehicles_timed_out += dealership.timed_out;
                    outcome.records.extend(dealership.records);
                }
                _ => outcome.dealerships_failed += 1,
            }
        }

        outcome.cancelled = self.cancel.is_cancelled();
        outcome.elapsed = started.elapsed();
        info!(
            vehicles = outcome.records.len(),
            dealerships_failed = outcome.dealerships_failed,
            skipped = outcome.vehicles_skipped,
            timed_out = outcome.vehicles_timed_out,
            cancelled = outcome.cancelled,
            "Crawl finished in {}",
            format_duration(outcome.elapsed)
        );
        outcome
    }

    async fn crawl_dealership(&self, dealership: DealershipRecord) -> DealershipOutcome {
        if self.cancel.is_cancelled() {
            return DealershipOutcome::default();
        }
        info!(dealership = %dealership.name, url = %dealership.source_url, "Crawling dealership");

        let links = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CrawlError::Cancelled),
            links = self.discover_links(&dealership) => links,
        };
        let links = match links {
            Ok(links) => links,
            Err(CrawlError::Cancelled) => {
                debug!(dealership = %dealership.name, "Dealership cancelled during discovery");
                return DealershipOutcome::default();
            }
            Err(e) => {
                self.metrics.record_dealership_failed();
                let message = format!(
                    "Failed to scrape dealership {}. URL: {}, ERROR: {}",
                    dealership.name, dealership.source_url, e
                );
                error!("{}", message);
                self.alerter.notify(message).await;
                return DealershipOutcome {
                    failed: true,
                    ..Default::default()
                };
            }
        };

        let found = links.len();
        if found == 0 {
            warn!(dealership = %dealership.name, "No vehicle links discovered");
            return DealershipOutcome::default();
        }

        let dealership = Arc::new(dealership);
        let mut group = TaskGroup::new("vehicles", self.config.worker_width(), self.cancel.clone())
            .with_task_timeout(self.config.vehicle_task_timeout);
        for link in links {
            let this = self.clone();
            let dealership = dealership.clone();
            group.spawn(async move { this.scrape_vehicle(&dealership, link).await });
        }

        let progress = ProgressTracker::new(found);
        let report = group
            .join_with(|outcome| {
                progress.record_completion(matches!(outcome, TaskOutcome::Completed(Some(_))));
                let info = progress.get_progress();
                debug!(
                    dealership = %dealership.name,
                    completed = info.completed,
                    total = info.total,
                    errors = info.errors,
                    "Vehicle progress"
                );
            })
            .await;

        let timed_out = report.timed_out();
        let records: Vec<VehicleRecord> = report.completed().into_iter().flatten().collect();
        info!(
            dealership = %dealership.name,
            found,
            scraped = records.len(),
            timed_out,
            "Finished dealership"
        );

        DealershipOutcome {
            skipped: found.saturating_sub(records.len()),
            records,
            failed: false,
            found,
            timed_out,
        }
    }

    /// Renders the dealership landing page and walks its listing pages with one session.
    ///
    /// The session is released before any vehicle is scraped, so the vehicle level never
    /// waits on a slot its own dealership holds.
    async fn discover_links(&self, dealership: &DealershipRecord) -> Result<Vec<String>, CrawlError> {
        let policy = RetryPolicy::jittered(
            self.config.retries.dealership_attempts,
            self.config.retries.dealership_jitter,
        );

        let (lease, landing) = retry_with_policy(
            "dealership",
            &policy,
            CrawlError::is_retryable,
            move |attempt| async move {
                debug!(dealership = %dealership.name, attempt, "Loading dealership page");
                self.open_landing(dealership).await
            },
        )
        .await?;

        let links = self
            .walker
            .all_vehicle_links(&*lease, dealership, &landing)
            .await;
        lease.release().await;
        Ok(links)
    }

    async fn open_landing(
        &self,
        dealership: &DealershipRecord,
    ) -> Result<(SessionLease, RenderedPage), CrawlError> {
        let lease = self.pool.acquire().await?;
        match self
            .renderer
            .render(&*lease, &dealership.source_url, RenderOptions::listing())
            .await
        {
            Ok(page) => Ok((lease, page)),
            Err(e) => {
                lease.release().await;
                Err(e)
            }
        }
    }

    /// One vehicle: render with retries, then extract. `None` means skipped.
    async fn scrape_vehicle(&self, dealership: &DealershipRecord, url: String) -> Option<VehicleRecord> {
        let started = Instant::now();
        let policy = RetryPolicy::jittered(
            self.config.retries.vehicle_attempts,
            self.config.retries.vehicle_jitter,
        );
        let markers = self.config.selectors.detail_markers.as_slice();
        let link = url.as_str();

        let rendered = retry_with_policy(
            "vehicle",
            &policy,
            CrawlError::is_retryable,
            move |attempt| async move {
                debug!(url = link, attempt, "Loading vehicle page");
                let lease = self.pool.acquire().await?;
                let page = self
                    .renderer
                    .render(&*lease, link, RenderOptions::detail(markers))
                    .await;
                lease.release().await;
                page
            },
        )
        .await;

        let page = match rendered {
            Ok(page) => page,
            Err(e) => {
                self.metrics.record_vehicle(started.elapsed(), false);
                let message = format!(
                    "Failed to load vehicle page for {} after {} attempts. URL: {}, ERROR: {}",
                    dealership.name, policy.max_attempts, url, e
                );
                error!("{}", message);
                self.alerter.notify(message).await;
                return None;
            }
        };

        let Some(details) = self.extractor.extract(&page, dealership).await else {
            self.metrics.record_vehicle(started.elapsed(), false);
            return None;
        };
        let price = self.extractor.price(&page);
        self.metrics.record_vehicle(started.elapsed(), true);

        Some(VehicleRecord::available(
            dealership.inventory_source_id.as_str(),
            url,
            price,
            Some(details),
        ))
    }
}
