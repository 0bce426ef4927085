//! Vehicle detail parsing
//!
//! Pure functions turn rendered markup into typed records; [`DetailExtractor`] adds
//! memoization, logging and alerting around them. A malformed page yields no record and
//! never aborts the crawl.

use crate::alerts::Alerter;
use crate::cache::MemoCache;
use crate::config::{CacheConfig, SiteSelectors};
use crate::models::{DealershipRecord, MakeInfo, ModelInfo, VehicleDetails};
use crate::renderer::RenderedPage;
use crate::utils::content_hash;
use crate::CrawlError;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Normalized label to text value, as found on a detail page
pub type FieldMap = BTreeMap<String, String>;

/// Compiled form of [`SiteSelectors`]
#[derive(Debug)]
pub struct SelectorSet {
    pub page_indicator: Selector,
    pub page_indicator_text: String,
    pub vehicle_link: Selector,
    pub feature_item: Selector,
    pub feature_key: Selector,
    pub feature_value: Selector,
    pub overview_container: Selector,
    pub overview_item: Selector,
    pub overview_label: Selector,
    pub overview_value: Selector,
    pub price: Selector,
}

impl TryFrom<&SiteSelectors> for SelectorSet {
    type Error = CrawlError;

    fn try_from(selectors: &SiteSelectors) -> Result<Self, Self::Error> {
        let compile = |name: &str, css: &str| {
            Selector::parse(css).map_err(|e| {
                CrawlError::Configuration(format!("selector {name} ({css}) is invalid: {e}"))
            })
        };

        Ok(Self {
            page_indicator: compile("page_indicator", &selectors.page_indicator)?,
            page_indicator_text: selectors.page_indicator_text.clone(),
            vehicle_link: compile("vehicle_link", &selectors.vehicle_link)?,
            feature_item: compile("feature_item", &selectors.feature_item)?,
            feature_key: compile("feature_key", &selectors.feature_key)?,
            feature_value: compile("feature_value", &selectors.feature_value)?,
            overview_container: compile("overview_container", &selectors.overview_container)?,
            overview_item: compile("overview_item", &selectors.overview_item)?,
            overview_label: compile("overview_label", &selectors.overview_label)?,
            overview_value: compile("overview_value", &selectors.overview_value)?,
            price: compile("price", &selectors.price)?,
        })
    }
}

/// Text content with each fragment trimmed and fragments joined without separators.
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    element.text().map(str::trim).collect()
}

/// Lower-cases a label and replaces spaces with underscores.
pub fn normalize_label(label: &str) -> String {
    label.trim().replace(' ', "_").to_lowercase()
}

/// Parses a mileage like `"45,210"`. Anything else yields `None`.
pub fn parse_mileage(raw: &str) -> Option<u64> {
    raw.replace(',', "").trim().parse().ok()
}

/// Parses a price like `"$12,345"`. Unparsable or negative prices yield `None`.
pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned = raw.replace(['$', ','], "");
    let price: f64 = cleaned.trim().parse().ok()?;
    (price.is_finite() && price >= 0.0).then_some(price)
}

/// Label/value pairs from the feature list. `None` when the page has no feature items.
pub fn feature_map(document: &Html, selectors: &SelectorSet) -> Option<FieldMap> {
    let mut items = document.select(&selectors.feature_item).peekable();
    items.peek()?;

    let map = items
        .filter_map(|item| {
            let key = item.select(&selectors.feature_key).next().map(element_text)?;
            let value = item.select(&selectors.feature_value).next().map(element_text)?;
            let key = normalize_label(&key);
            (!key.is_empty()).then_some((key, value))
        })
        .collect();
    Some(map)
}

/// Label/value pairs from the stats block. `None` when the block is missing.
pub fn overview_map(document: &Html, selectors: &SelectorSet) -> Option<FieldMap> {
    let container = document.select(&selectors.overview_container).next()?;

    let map = container
        .select(&selectors.overview_item)
        .filter_map(|item| {
            let label = item.select(&selectors.overview_label).next().map(element_text)?;
            let value = item.select(&selectors.overview_value).next().map(element_text)?;
            let key = normalize_label(&label.replace(':', ""));
            (!key.is_empty()).then_some((key, value))
        })
        .collect();
    Some(map)
}

/// Builds [`VehicleDetails`] from a detail page's markup.
///
/// Fails only when the page carries neither a feature list nor a stats block; individual
/// missing or unparsable fields are left empty.
pub fn parse_vehicle_details(
    html: &str,
    url: &str,
    dealership_id: &str,
    selectors: &SelectorSet,
) -> Result<VehicleDetails, CrawlError> {
    let document = Html::parse_document(html);
    let features = feature_map(&document, selectors);
    let overview = overview_map(&document, selectors);

    if features.is_none() && overview.is_none() {
        return Err(CrawlError::Extraction {
            url: url.to_string(),
            reason: "neither feature list nor stats block found".to_string(),
        });
    }

    let features = features.unwrap_or_default();
    let overview = overview.unwrap_or_default();
    let field = |map: &FieldMap, key: &str| map.get(key).filter(|v| !v.is_empty()).cloned();

    Ok(VehicleDetails {
        dealership_id: dealership_id.to_string(),
        vin: field(&overview, "vin"),
        mileage: features.get("mileage").and_then(|raw| parse_mileage(raw)),
        stock_number: field(&overview, "stock_number"),
        description: String::new(),
        exterior_color: field(&overview, "exterior_color"),
        interior_color: field(&overview, "interior_color"),
        model: ModelInfo {
            name: field(&overview, "model"),
            year: field(&overview, "year"),
            trim: field(&overview, "trim"),
            body_style: field(&overview, "body_type"),
            transmission: field(&features, "transmission"),
            fuel_type: field(&features, "fuel_type"),
            drivetrain: field(&features, "drivetrain"),
            engine: field(&features, "engine"),
            make: MakeInfo {
                name: field(&overview, "make"),
            },
        },
    })
}

/// Price shown on a detail page, if any.
pub fn extract_price(html: &str, selectors: &SelectorSet) -> Option<f64> {
    let document = Html::parse_document(html);
    let raw = document.select(&selectors.price).next().map(element_text)?;
    if raw.is_empty() {
        return None;
    }
    parse_price(&raw)
}

type DetailKey = (String, String, String);

pub struct DetailExtractor {
    selectors: Arc<SelectorSet>,
    alerter: Alerter,
    cache: MemoCache<DetailKey, Result<VehicleDetails, CrawlError>>,
}

impl DetailExtractor {
    pub fn new(selectors: Arc<SelectorSet>, caches: &CacheConfig, alerter: Alerter) -> Self {
        Self {
            selectors,
            alerter,
            cache: MemoCache::new("vehicle_details", caches.vehicle_details),
        }
    }

    /// Parses a rendered detail page, reporting failures instead of returning them.
    pub async fn extract(
        &self,
        page: &RenderedPage,
        dealership: &DealershipRecord,
    ) -> Option<VehicleDetails> {
        match self.try_extract(page, dealership).await {
            Ok(details) => Some(details),
            Err(e) => {
                let message = format!(
                    "Vehicle data construction error for {}. URL: {}, ERROR: {}",
                    dealership.name, page.url, e
                );
                error!("{}", message);
                self.alerter.notify(message).await;
                None
            }
        }
    }

    pub async fn try_extract(
        &self,
        page: &RenderedPage,
        dealership: &DealershipRecord,
    ) -> Result<VehicleDetails, CrawlError> {
        let key = (
            content_hash(&page.html),
            page.url.clone(),
            dealership.id.clone(),
        );
        self.cache
            .get_or_compute(key, || async {
                debug!(url = %page.url, "Parsing vehicle details");
                parse_vehicle_details(&page.html, &page.url, &dealership.id, &self.selectors)
            })
            .await
    }

    pub fn price(&self, page: &RenderedPage) -> Option<f64> {
        extract_price(&page.html, &self.selectors)
    }

    pub fn cache(&self) -> &MemoCache<DetailKey, Result<VehicleDetails, CrawlError>> {
        &self.cache
    }
}
