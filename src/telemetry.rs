use crate::CrawlError;
use metrics::{
    describe_counter, describe_gauge, describe_histogram, register_counter, register_gauge,
    register_histogram, Counter, Gauge, Histogram,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// Handles to every metric the crawler records
///
/// Handles registered before a recorder is installed are no-ops, so tests and runs without
/// `--metrics-listen` pay nothing for them.
#[derive(Clone)]
pub struct CrawlMetrics {
    pages_rendered: Counter,
    render_timeouts: Counter,
    vehicles_scraped: Counter,
    vehicles_failed: Counter,
    dealerships_failed: Counter,
    deliveries_succeeded: Counter,
    deliveries_failed: Counter,
    duplicates_skipped: Counter,
    alerts_failed: Counter,
    outstanding_sessions: Gauge,
    vehicle_duration: Histogram,
}

impl CrawlMetrics {
    pub fn new() -> Self {
        Self {
            pages_rendered: register_counter!("crawler_pages_rendered_total"),
            render_timeouts: register_counter!("crawler_render_timeouts_total"),
            vehicles_scraped: register_counter!("crawler_vehicles_scraped_total"),
            vehicles_failed: register_counter!("crawler_vehicles_failed_total"),
            dealerships_failed: register_counter!("crawler_dealerships_failed_total"),
            deliveries_succeeded: register_counter!("crawler_deliveries_succeeded_total"),
            deliveries_failed: register_counter!("crawler_deliveries_failed_total"),
            duplicates_skipped: register_counter!("crawler_duplicates_skipped_total"),
            alerts_failed: register_counter!("crawler_alerts_failed_total"),
            outstanding_sessions: register_gauge!("crawler_outstanding_sessions"),
            vehicle_duration: register_histogram!("crawler_vehicle_scrape_seconds"),
        }
    }

    pub fn record_page_rendered(&self) {
        self.pages_rendered.increment(1);
    }

    pub fn record_render_timeout(&self) {
        self.render_timeouts.increment(1);
    }

    pub fn record_vehicle(&self, duration: Duration, scraped: bool) {
        if scraped {
            self.vehicles_scraped.increment(1);
        } else {
            self.vehicles_failed.increment(1);
        }
        self.vehicle_duration.record(duration.as_secs_f64());
    }

    pub fn record_dealership_failed(&self) {
        self.dealerships_failed.increment(1);
    }

    pub fn record_delivery(&self, delivered: bool) {
        if delivered {
            self.deliveries_succeeded.increment(1);
        } else {
            self.deliveries_failed.increment(1);
        }
    }

    pub fn record_duplicates(&self, count: usize) {
        self.duplicates_skipped.increment(count as u64);
    }

    pub fn record_alert_failed(&self) {
        self.alerts_failed.increment(1);
    }

    pub fn set_outstanding_sessions(&self, count: usize) {
        self.outstanding_sessions.set(count as f64);
    }
}

impl Default for CrawlMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the global Prometheus recorder and serves `/metrics` on `addr`.
///
/// Must run inside the tokio runtime and before any [`CrawlMetrics`] is created.
pub fn install_prometheus_exporter(addr: SocketAddr) -> Result<(), CrawlError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| CrawlError::Configuration(format!("metrics exporter: {e}")))?;

    describe_counter!("crawler_pages_rendered_total", "Pages rendered by the browser pool");
    describe_counter!("crawler_render_timeouts_total", "Pages whose markers never appeared");
    describe_counter!("crawler_vehicles_scraped_total", "Vehicle pages turned into records");
    describe_counter!("crawler_vehicles_failed_total", "Vehicle pages skipped after failures");
    describe_counter!("crawler_dealerships_failed_total", "Dealerships that could not be crawled");
    describe_counter!("crawler_deliveries_succeeded_total", "Records accepted by the vehicle API");
    describe_counter!("crawler_deliveries_failed_total", "Records rejected after all attempts");
    describe_counter!("crawler_duplicates_skipped_total", "Records already present remotely");
    describe_counter!("crawler_alerts_failed_total", "Alerts the channel did not accept");
    describe_gauge!("crawler_outstanding_sessions", "Browser sessions currently open");
    describe_histogram!("crawler_vehicle_scrape_seconds", "Time spent per vehicle page");

    info!("Prometheus metrics listening on {}", addr);
    Ok(())
}
