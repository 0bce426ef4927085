//! Listing page discovery for one dealership

use crate::alerts::Alerter;
use crate::browser_pool::BrowserSession;
use crate::cache::MemoCache;
use crate::config::CacheConfig;
use crate::extractor::SelectorSet;
use crate::models::DealershipRecord;
use crate::renderer::{PageRenderer, RenderOptions, RenderedPage};
use crate::utils::{content_hash, resolve_link, strip_fragment};
use scraper::Html;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

/// Page count from an indicator text such as `"Page 1 of 5"`.
///
/// The trailing whitespace-separated token must be a positive integer.
pub fn parse_page_indicator(text: &str) -> Option<u32> {
    text.split_whitespace()
        .last()
        .and_then(|token| token.parse::<u32>().ok())
        .filter(|pages| *pages > 0)
}

/// Total listing pages announced on a document; 1 when no usable indicator exists.
pub fn total_pages(document: &Html, selectors: &SelectorSet) -> u32 {
    document
        .select(&selectors.page_indicator)
        .map(element_text_spaced)
        .find(|text| text.contains(&selectors.page_indicator_text))
        .and_then(|text| parse_page_indicator(&text))
        .unwrap_or(1)
}

/// Vehicle detail links on a listing document, resolved against `base`, in document order.
pub fn extract_vehicle_links(document: &Html, selectors: &SelectorSet, base: &Url) -> Vec<String> {
    document
        .select(&selectors.vehicle_link)
        .filter_map(|anchor| anchor.value().attr("href"))
        .filter_map(|href| resolve_link(base, href))
        .collect()
}

/// URL of listing page `page` for a dealership.
pub fn results_page_url(dealership_url: &str, page: u32) -> String {
    format!("{}#resultsPage={}", strip_fragment(dealership_url), page)
}

// Indicator text keeps word boundaries between nested elements, unlike `element_text`.
fn element_text_spaced(element: scraper::ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct PaginationWalker {
    renderer: Arc<PageRenderer>,
    selectors: Arc<SelectorSet>,
    alerter: Alerter,
    total_pages_cache: MemoCache<String, u32>,
    links_cache: MemoCache<(String, String), Vec<String>>,
}

impl PaginationWalker {
    pub fn new(
        renderer: Arc<PageRenderer>,
        selectors: Arc<SelectorSet>,
        caches: &CacheConfig,
        alerter: Alerter,
    ) -> Self {
        Self {
            renderer,
            selectors,
            alerter,
            total_pages_cache: MemoCache::new("total_pages", caches.total_pages),
            links_cache: MemoCache::new("vehicle_links", caches.vehicle_links),
        }
    }

    pub async fn total_pages(&self, page: &RenderedPage) -> u32 {
        self.total_pages_cache
            .get_or_compute(content_hash(&page.html), || async {
                total_pages(&Html::parse_document(&page.html), &self.selectors)
            })
            .await
    }

    pub async fn vehicle_links(&self, page: &RenderedPage, base: &Url) -> Vec<String> {
        let key = (content_hash(&page.html), base.to_string());
        self.links_cache
            .get_or_compute(key, || async {
                extract_vehicle_links(&Html::parse_document(&page.html), &self.selectors, base)
            })
            .await
    }

    /// Collects vehicle links across a dealership's listing pages.
    ///
    /// `landing` is the already rendered dealership page that carries the page indicator.
    /// Pages that fail to render are reported and skipped. The walk stops at the first page
    /// without any links, whatever the indicator announced.
    pub async fn all_vehicle_links(
        &self,
        session: &dyn BrowserSession,
        dealership: &DealershipRecord,
        landing: &RenderedPage,
    ) -> Vec<String> {
        let base = match Url::parse(&dealership.source_url) {
            Ok(base) => base,
            Err(e) => {
                error!(dealership = %dealership.name, "Invalid dealership URL {}: {}", dealership.source_url, e);
                return Vec::new();
            }
        };

        let total = self.total_pages(landing).await;
        info!(dealership = %dealership.name, total_pages = total, "Walking listing pages");

        let mut links = Vec::new();
        for page_number in 1..=total {
            let page_url = results_page_url(&dealership.source_url, page_number);

            let page = match self
                .renderer
                .render(session, &page_url, RenderOptions::listing())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    let message = format!(
                        "Failed to load listing page {} for {}. URL: {}, ERROR: {}",
                        page_number, dealership.name, page_url, e
                    );
                    error!("{}", message);
                    self.alerter.notify(message).await;
                    continue;
                }
            };

            let page_links = self.vehicle_links(&page, &base).await;
            if page_links.is_empty() {
                let message = format!(
                    "No vehicle links found on page {} of {} for {}. URL: {}. Stopping pagination.",
                    page_number, total, dealership.name, page_url
                );
                warn!("{}", message);
                self.alerter.notify(message).await;
                break;
            }

            debug!(page = page_number, found = page_links.len(), "Collected vehicle links");
            links.extend(page_links);
        }

        info!(dealership = %dealership.name, links = links.len(), "Finished walking listing pages");
        links
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteSelectors;
    use crate::telemetry::CrawlMetrics;
    use crate::tests::fakes::{
        listing_page, sample_dealership, test_config, FakeSessionFactory, RecordingAlerts,
    };
    use crate::SessionFactory;
    use std::time::Duration;

    fn selectors() -> SelectorSet {
        SelectorSet::try_from(&SiteSelectors::default()).unwrap()
    }

    fn walker(alerts: Arc<RecordingAlerts>) -> PaginationWalker {
        let config = test_config();
        PaginationWalker::new(
            Arc::new(PageRenderer::new(&config, CrawlMetrics::new())),
            Arc::new(selectors()),
            &config.caches,
            Alerter::new(alerts, Duration::from_secs(1), CrawlMetrics::new()),
        )
    }

    fn pages_of(html: &str) -> u32 {
        total_pages(&Html::parse_document(html), &selectors())
    }

    #[test]
    fn test_total_pages_from_indicator() {
        assert_eq!(pages_of("<span>Page 1 of 5</span>"), 5);
        assert_eq!(pages_of("<div><span>Sort</span><span>Page <b>2</b> of <b>12</b></span></div>"), 12);
    }

    #[test]
    fn test_total_pages_defaults_to_one() {
        assert_eq!(pages_of("<span>Page 1 of abc</span>"), 1);
        assert_eq!(pages_of("<span>Showing all results</span>"), 1);
        assert_eq!(pages_of("<html><body></body></html>"), 1);
        assert_eq!(pages_of("<span>Page 0</span>"), 1);
    }

    #[test]
    fn test_parse_page_indicator() {
        assert_eq!(parse_page_indicator("Page 3 of 40"), Some(40));
        assert_eq!(parse_page_indicator("Page"), None);
        assert_eq!(parse_page_indicator(""), None);
    }

    #[test]
    fn test_links_are_resolved_against_base() {
        let base = Url::parse("https://cars.test/dealer/sunrise").unwrap();
        let html = listing_page(&["/details/1", "https://cars.test/details/2"], None);
        let document = Html::parse_document(&html);
        assert_eq!(
            extract_vehicle_links(&document, &selectors(), &base),
            vec!["https://cars.test/details/1", "https://cars.test/details/2"]
        );
    }

    #[test]
    fn test_results_page_url() {
        assert_eq!(
            results_page_url("https://cars.test/dealer/sunrise", 3),
            "https://cars.test/dealer/sunrise#resultsPage=3"
        );
        assert_eq!(
            results_page_url("https://cars.test/dealer/sunrise#top", 1),
            "https://cars.test/dealer/sunrise#resultsPage=1"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_walk_stops_at_first_empty_page() {
        let dealership = sample_dealership();
        let url = |n| results_page_url(&dealership.source_url, n);
        let factory = FakeSessionFactory::new()
            .with_page(&url(1), &listing_page(&["/details/1", "/details/2"], Some("Page 1 of 4")))
            .with_page(&url(2), &listing_page(&[], Some("Page 2 of 4")))
            .with_page(&url(3), &listing_page(&["/details/3"], Some("Page 3 of 4")));
        let session = factory.create().await.unwrap();
        let alerts = Arc::new(RecordingAlerts::default());

        let landing = RenderedPage {
            url: dealership.source_url.clone(),
            html: listing_page(&["/details/1"], Some("Page 1 of 4")),
        };
        let links = walker(alerts.clone())
            .all_vehicle_links(session.as_ref(), &dealership, &landing)
            .await;

        assert_eq!(
            links,
            vec!["https://cars.test/details/1", "https://cars.test/details/2"]
        );
        assert_eq!(factory.navigations(), vec![url(1), url(2)]);
        assert_eq!(alerts.messages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_page_is_skipped() {
        let dealership = sample_dealership();
        let url = |n| results_page_url(&dealership.source_url, n);
        let factory = FakeSessionFactory::new()
            .with_page(&url(1), &listing_page(&["/details/1"], None))
            .with_page(&url(2), &listing_page(&["/details/2"], None))
            .with_page(&url(3), &listing_page(&["/details/3"], None))
            .failing_navigation(&url(2), 1);
        let session = factory.create().await.unwrap();
        let alerts = Arc::new(RecordingAlerts::default());

        let landing = RenderedPage {
            url: dealership.source_url.clone(),
            html: listing_page(&[], Some("Page 1 of 3")),
        };
        let links = walker(alerts.clone())
            .all_vehicle_links(session.as_ref(), &dealership, &landing)
            .await;

        assert_eq!(
            links,
            vec!["https://cars.test/details/1", "https://cars.test/details/3"]
        );
        assert!(alerts.messages()[0].contains("resultsPage=2"));
    }
}
