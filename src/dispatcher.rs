//! Deduplication against the remote store and batched, retried delivery
//!
//! Delivery failures are isolated per record: a record that exhausts its attempts is logged
//! and alerted, and the dispatcher moves on to the next one.

use crate::alerts::Alerter;
use crate::api::VehicleStore;
use crate::models::{ExistingVehicle, VehicleRecord};
use crate::retry::{retry_with_policy, RetryPolicy};
use crate::telemetry::CrawlMetrics;
use crate::{Config, CrawlError};
use futures::{stream, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Candidates whose listing URL is not stored remotely yet.
///
/// Candidates without a listing URL, and repeats of a URL already accepted from
/// `candidates`, are dropped as well. Input order is preserved.
pub fn filter_new(existing: &[ExistingVehicle], candidates: Vec<VehicleRecord>) -> Vec<VehicleRecord> {
    let stored: HashSet<&str> = existing
        .iter()
        .filter_map(|vehicle| vehicle.listing_url.as_deref())
        .collect();
    let mut accepted = HashSet::new();

    candidates
        .into_iter()
        .filter(|record| {
            if record.listing_url.is_empty() {
                debug!("Skipping record without listing URL");
                return false;
            }
            if stored.contains(record.listing_url.as_str())
                || !accepted.insert(record.listing_url.clone())
            {
                info!(url = %record.listing_url, "Skipping duplicate listing");
                return false;
            }
            true
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Size of every batch, in processing order
    pub batch_sizes: Vec<usize>,
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
    /// Candidates dropped by [`filter_new`]
    pub duplicates: usize,
}

pub struct BatchDispatcher {
    store: Arc<dyn VehicleStore>,
    alerter: Alerter,
    metrics: CrawlMetrics,
    policy: RetryPolicy,
    batch_size: usize,
    concurrency: usize,
}

impl BatchDispatcher {
    pub fn new(
        store: Arc<dyn VehicleStore>,
        config: &Config,
        alerter: Alerter,
        metrics: CrawlMetrics,
    ) -> Self {
        Self {
            store,
            alerter,
            metrics,
            policy: RetryPolicy::fixed(
                config.retries.dispatch_attempts,
                config.retries.dispatch_delay,
            ),
            batch_size: config.batch_size.max(1),
            concurrency: config.max_concurrency.max(1),
        }
    }

    /// Fetches the stored vehicles, drops duplicates and dispatches the rest.
    ///
    /// Nothing is sent when the stored vehicles cannot be fetched, since every record would
    /// otherwise be posted again.
    pub async fn deliver_new(&self, candidates: Vec<VehicleRecord>) -> Result<DispatchReport, CrawlError> {
        let existing = match self.store.existing_vehicles().await {
            Ok(existing) => existing,
            Err(e) => {
                let message = format!(
                    "Skipping delivery of {} vehicles, existing inventory unavailable. TIME: {}, ERROR: {}",
                    candidates.len(),
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                    e
                );
                error!("{}", message);
                self.alerter.notify(message).await;
                return Err(e);
            }
        };

        let total = candidates.len();
        let fresh = filter_new(&existing, candidates);
        let duplicates = total - fresh.len();
        self.metrics.record_duplicates(duplicates);
        info!(
            candidates = total,
            new = fresh.len(),
            duplicates,
            "Filtered crawled vehicles against inventory"
        );

        let mut report = self.dispatch(fresh).await;
        report.duplicates = duplicates;
        Ok(report)
    }

    /// Sends `records` in consecutive batches of `batch_size`.
    ///
    /// Batches run strictly in order; the records of one batch are sent concurrently.
    pub async fn dispatch(&self, records: Vec<VehicleRecord>) -> DispatchReport {
        let mut report = DispatchReport::default();

        for (index, batch) in records.chunks(self.batch_size).enumerate() {
            debug!(batch = index + 1, size = batch.len(), "Dispatching batch");
            report.batch_sizes.push(batch.len());

            let results: Vec<(String, bool)> = stream::iter(batch)
                .map(|record| async move { (record.listing_url.clone(), self.deliver(record).await) })
                .buffered(self.concurrency)
                .collect()
                .await;

            for (url, delivered) in results {
                if delivered {
                    report.delivered.push(url);
                } else {
                    report.failed.push(url);
                }
            }
        }

        info!(
            batches = report.batch_sizes.len(),
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Dispatch finished"
        );
        report
    }

    async fn deliver(&self, record: &VehicleRecord) -> bool {
        let store = self.store.as_ref();
        let result = retry_with_policy(
            "vehicle delivery",
            &self.policy,
            CrawlError::is_retryable,
            move |attempt| {
                debug!(url = %record.listing_url, attempt, "Posting vehicle");
                store.post_vehicle(record)
            },
        )
        .await;

        let delivered = result.is_ok();
        self.metrics.record_delivery(delivered);
        if let Err(e) = result {
            let message = format!(
                "Failed to send data after {} attempts. URL: {}, ERROR: {}",
                self.policy.max_attempts, record.listing_url, e
            );
            error!("{}", message);
            self.alerter.notify(message).await;
        }
        delivered
    }
}
