//! Configuration management with serde serialization/deserialization
//!
//! A single [`Config`] is built at process start (defaults, then an optional JSON file, then
//! CLI flags) and handed to every component constructor. Nothing reads settings globally.

use crate::cache::{CacheSettings, EvictionPolicy};
use crate::CrawlError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure for the crawler
///
/// # Examples
///
/// ```rust
/// use dealer_crawler::Config;
///
/// let config = Config {
///     max_concurrency: 4,
///     batch_size: 10,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// assert_eq!(config.worker_width(), 4);
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Upper bound on concurrently open browser sessions (default: 10)
    ///
    /// Both worker levels run at `min(5, max_concurrency)` tasks; the session pool is the
    /// hard limit that keeps nested fan-out from opening more browsers than this.
    pub max_concurrency: usize,

    /// Records per dispatcher chunk (default: 1)
    pub batch_size: usize,

    /// Navigation timeout applied to every page load in a session (default: 600 seconds)
    #[serde(rename = "page_load_timeout_ms", with = "duration_ms")]
    pub page_load_timeout: Duration,

    /// Timeout for a single element lookup in a session (default: 10 seconds)
    #[serde(rename = "implicit_wait_timeout_ms", with = "duration_ms")]
    pub implicit_wait_timeout: Duration,

    /// How long a detail page may take to show one of its marker elements (default: 15 seconds)
    #[serde(rename = "render_timeout_ms", with = "duration_ms")]
    pub render_timeout: Duration,

    /// Hard limit on one vehicle task including its retries (default: 60 seconds)
    ///
    /// A task exceeding it is cancelled and its browser session torn down.
    #[serde(rename = "vehicle_task_timeout_ms", with = "duration_ms")]
    pub vehicle_task_timeout: Duration,

    /// Run Chrome without a window (default: true)
    pub headless_mode: bool,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Custom User-Agent string for page loads (default: Chrome default)
    pub user_agent: Option<String>,

    /// Browser window size in pixels
    pub window: WindowSize,

    /// Random delay applied before each navigation (default: 1-2 seconds)
    pub throttle: DelayRange,

    /// Incremental scroll used to trigger lazy-loaded content
    pub scroll: ScrollSettings,

    /// Attempt counts and delays for each retried operation
    pub retries: RetrySettings,

    /// Remote inventory and dealership endpoints
    pub api: ApiSettings,

    /// Slack alerting side-channel
    pub alerts: AlertSettings,

    /// CSS selectors describing the dealership site's markup
    pub selectors: SiteSelectors,

    /// Per call-site memoization settings
    pub caches: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            batch_size: 1,
            page_load_timeout: Duration::from_secs(600),
            implicit_wait_timeout: Duration::from_secs(10),
            render_timeout: Duration::from_secs(15),
            vehicle_task_timeout: Duration::from_secs(60),
            headless_mode: true,
            chrome_path: None,
            user_agent: None,
            window: WindowSize::default(),
            throttle: DelayRange::new(Duration::from_secs(1), Duration::from_secs(2)),
            scroll: ScrollSettings::default(),
            retries: RetrySettings::default(),
            api: ApiSettings::default(),
            alerts: AlertSettings::default(),
            selectors: SiteSelectors::default(),
            caches: CacheConfig::default(),
        }
    }
}

impl Config {
    /// Width of each worker level.
    pub fn worker_width(&self) -> usize {
        self.max_concurrency.clamp(1, 5)
    }

    pub fn validate(&self) -> Result<(), CrawlError> {
        let fail = |msg: &str| Err(CrawlError::Configuration(msg.to_string()));

        if self.max_concurrency == 0 {
            return fail("max_concurrency must be greater than 0");
        }
        if self.batch_size == 0 {
            return fail("batch_size must be greater than 0");
        }
        if self.page_load_timeout.is_zero()
            || self.implicit_wait_timeout.is_zero()
            || self.render_timeout.is_zero()
            || self.vehicle_task_timeout.is_zero()
        {
            return fail("timeouts must be greater than 0");
        }
        if self.window.width == 0 || self.window.height == 0 {
            return fail("window dimensions must be greater than 0");
        }
        if self.retries.dispatch_attempts == 0
            || self.retries.vehicle_attempts == 0
            || self.retries.dealership_attempts == 0
        {
            return fail("retry attempts must be greater than 0");
        }
        if self.scroll.max_attempts == 0 {
            return fail("scroll.max_attempts must be greater than 0");
        }
        for (name, range) in [
            ("throttle", &self.throttle),
            ("retries.vehicle_jitter", &self.retries.vehicle_jitter),
            ("retries.dealership_jitter", &self.retries.dealership_jitter),
        ] {
            if range.min > range.max {
                return Err(CrawlError::Configuration(format!(
                    "{name}: min delay exceeds max delay"
                )));
            }
        }

        self.selectors.validate()
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

impl Default for WindowSize {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Inclusive range a random delay is drawn from
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct DelayRange {
    #[serde(rename = "min_ms", with = "duration_ms")]
    pub min: Duration,
    #[serde(rename = "max_ms", with = "duration_ms")]
    pub max: Duration,
}

impl DelayRange {
    pub const ZERO: DelayRange = DelayRange {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let millis = rand::rng().random_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(millis as u64)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScrollSettings {
    /// Pause after each scroll so lazy content can load (default: 1 second)
    #[serde(rename = "pause_ms", with = "duration_ms")]
    pub pause: Duration,
    /// Scroll rounds before giving up on a stable height (default: 3)
    pub max_attempts: usize,
}

impl Default for ScrollSettings {
    fn default() -> Self {
        Self {
            pause: Duration::from_secs(1),
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts per record when posting to the vehicle API (default: 2)
    pub dispatch_attempts: usize,
    /// Fixed delay between delivery attempts (default: 2 seconds)
    #[serde(rename = "dispatch_delay_ms", with = "duration_ms")]
    pub dispatch_delay: Duration,
    /// Attempts per vehicle detail page (default: 3)
    pub vehicle_attempts: usize,
    pub vehicle_jitter: DelayRange,
    /// Attempts for a dealership landing page (default: 2)
    pub dealership_attempts: usize,
    pub dealership_jitter: DelayRange,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            dispatch_attempts: 2,
            dispatch_delay: Duration::from_secs(2),
            vehicle_attempts: 3,
            vehicle_jitter: DelayRange::new(Duration::from_secs(1), Duration::from_secs(2)),
            dealership_attempts: 2,
            dealership_jitter: DelayRange::new(Duration::from_secs(3), Duration::from_secs(7)),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiSettings {
    /// Collection endpoint for vehicles, e.g. `https://inventory.test/vehicles`
    pub vehicle_api_url: String,
    /// Collection endpoint for dealerships, e.g. `https://inventory.test/dealerships`
    pub dealership_api_url: String,
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            vehicle_api_url: String::new(),
            dealership_api_url: String::new(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertSettings {
    /// Bot token; alerts only go to the log when unset
    pub slack_bot_token: Option<String>,
    pub slack_channel: Option<String>,
    pub slack_api_base: String,
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            slack_bot_token: None,
            slack_channel: None,
            slack_api_base: "https://slack.com/api".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// CSS selectors for the listing and detail pages
///
/// Defaults match the dealership marketplace markup the crawler targets. Class names there
/// are build-hashed, so they live in configuration rather than code.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SiteSelectors {
    /// Elements scanned for the "Page N of M" indicator
    pub page_indicator: String,
    /// Text an indicator element must contain
    pub page_indicator_text: String,
    /// Anchors pointing at vehicle detail pages
    pub vehicle_link: String,
    pub feature_item: String,
    pub feature_key: String,
    pub feature_value: String,
    pub overview_container: String,
    /// Overview rows, relative to `overview_container`
    pub overview_item: String,
    pub overview_label: String,
    pub overview_value: String,
    pub price: String,
    /// A detail page counts as rendered once any of these is present
    pub detail_markers: Vec<String>,
}

impl Default for SiteSelectors {
    fn default() -> Self {
        Self {
            page_indicator: "span".to_string(),
            page_indicator_text: "Page".to_string(),
            vehicle_link: r#"a[data-testid="car-blade-link"][href]"#.to_string(),
            feature_item: "li._listItem_1tanl_14".to_string(),
            feature_key: "h5".to_string(),
            feature_value: "p".to_string(),
            overview_container: r#"div._records_1vyus_9[data-cg-ft="listing-vdp-stats"]"#
                .to_string(),
            overview_item: "ul li".to_string(),
            overview_label: "span._label_zbkq7_7".to_string(),
            overview_value: "span._value_zbkq7_14".to_string(),
            price: "div._dealInfo_uw1k0_70 h5.WoAzt".to_string(),
            detail_markers: vec![
                "._dealInfo_uw1k0_70".to_string(),
                "._listItem_1tanl_14".to_string(),
                "._records_1vyus_9".to_string(),
            ],
        }
    }
}

impl SiteSelectors {
    pub fn validate(&self) -> Result<(), CrawlError> {
        let single = [
            ("page_indicator", &self.page_indicator),
            ("vehicle_link", &self.vehicle_link),
            ("feature_item", &self.feature_item),
            ("feature_key", &self.feature_key),
            ("feature_value", &self.feature_value),
            ("overview_container", &self.overview_container),
            ("overview_item", &self.overview_item),
            ("overview_label", &self.overview_label),
            ("overview_value", &self.overview_value),
            ("price", &self.price),
        ];
        let markers = self
            .detail_markers
            .iter()
            .map(|marker| ("detail_markers", marker));

        for (name, selector) in single.into_iter().chain(markers) {
            if selector.trim().is_empty() {
                return Err(CrawlError::Configuration(format!(
                    "selector {name} is empty"
                )));
            }
            scraper::Selector::parse(selector).map_err(|e| {
                CrawlError::Configuration(format!("selector {name} ({selector}) is invalid: {e}"))
            })?;
        }

        if self.detail_markers.is_empty() {
            return Err(CrawlError::Configuration(
                "at least one detail marker is required".to_string(),
            ));
        }
        if self.page_indicator_text.is_empty() {
            return Err(CrawlError::Configuration(
                "page_indicator_text must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub total_pages: CacheSettings,
    pub vehicle_links: CacheSettings,
    pub vehicle_details: CacheSettings,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            total_pages: CacheSettings::new(100, Duration::from_secs(3600), EvictionPolicy::Lru),
            vehicle_links: CacheSettings::new(500, Duration::from_secs(3600), EvictionPolicy::Lru),
            vehicle_details: CacheSettings::new(
                1000,
                Duration::from_secs(7200),
                EvictionPolicy::Lru,
            ),
        }
    }
}

/// Serde helpers storing a [`Duration`] as whole milliseconds
///
/// Config files carry timeouts as plain integers such as `"render_timeout_ms": 15000`.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    /// Same encoding for optional durations; `null` or a missing key means none.
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(
            duration: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match duration {
                Some(duration) => super::serialize(duration, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}

/// Chrome command-line arguments shared by every session
pub fn chrome_args(config: &Config) -> Vec<String> {
    let mut args = vec![
        "--disable-gpu".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-extensions".to_string(),
        "--disable-application-cache".to_string(),
        "--incognito".to_string(),
        "--no-first-run".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        format!("--window-size={},{}", config.window.width, config.window.height),
    ];

    if config.headless_mode {
        args.push("--headless".to_string());
    }

    if let Some(user_agent) = &config.user_agent {
        args.push(format!("--user-agent={user_agent}"));
    }

    args
}

/// Browser launch configuration for one isolated session
///
/// Each session gets its own profile directory so no cookies or cache leak between
/// acquisitions.
pub fn create_browser_config(
    config: &Config,
    user_data_dir: &str,
) -> Result<chromiumoxide::browser::BrowserConfig, CrawlError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .window_size(config.window.width, config.window.height)
        .user_data_dir(user_data_dir)
        .request_timeout(config.page_load_timeout)
        .args(chrome_args(config));

    if !config.headless_mode {
        builder = builder.with_head();
    }

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(CrawlError::SessionStart)
}
