//! Page rendering on top of a pooled browser session

use crate::browser_pool::BrowserSession;
use crate::config::{DelayRange, ScrollSettings};
use crate::telemetry::CrawlMetrics;
use crate::{Config, CrawlError};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

const MARKER_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Markup captured from a rendered page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub url: String,
    pub html: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions<'a> {
    /// Page counts as ready once any of these selectors matches; empty skips the wait
    pub markers: &'a [String],
    /// Scroll incrementally before waiting so lazy content gets loaded
    pub scroll: bool,
}

impl<'a> RenderOptions<'a> {
    /// Listing pages: navigation only, an empty page is a meaningful result.
    pub fn listing() -> Self {
        Self::default()
    }

    /// Detail pages: scroll, then wait for one of the markers.
    pub fn detail(markers: &'a [String]) -> Self {
        Self {
            markers,
            scroll: true,
        }
    }
}

pub struct PageRenderer {
    throttle: DelayRange,
    render_timeout: Duration,
    scroll: ScrollSettings,
    metrics: CrawlMetrics,
}

impl PageRenderer {
    pub fn new(config: &Config, metrics: CrawlMetrics) -> Self {
        Self {
            throttle: config.throttle,
            render_timeout: config.render_timeout,
            scroll: config.scroll.clone(),
            metrics,
        }
    }

    /// Loads `url` after the throttle delay and returns the rendered markup.
    ///
    /// Fails with [`CrawlError::RenderTimeout`] when markers were requested and none of them
    /// appeared within the render timeout.
    pub async fn render(
        &self,
        session: &dyn BrowserSession,
        url: &str,
        options: RenderOptions<'_>,
    ) -> Result<RenderedPage, CrawlError> {
        let delay = self.throttle.sample();
        if !delay.is_zero() {
            sleep(delay).await;
        }

        debug!(url, "Navigating");
        session.navigate(url).await?;

        if options.scroll {
            if let Err(e) = self.scroll_incrementally(session).await {
                warn!(url, "Scrolling failed, parsing what is loaded: {}", e);
            }
        }

        if !options.markers.is_empty() {
            self.wait_for_markers(session, url, options.markers).await?;
        }

        let html = session.content().await?;
        self.metrics.record_page_rendered();

        Ok(RenderedPage {
            url: url.to_string(),
            html,
        })
    }

    /// Polls until any marker matches or the render timeout elapses.
    pub async fn wait_for_markers(
        &self,
        session: &dyn BrowserSession,
        url: &str,
        markers: &[String],
    ) -> Result<String, CrawlError> {
        let poll = async {
            loop {
                for marker in markers {
                    if session.has_element(marker).await? {
                        return Ok::<_, CrawlError>(marker.clone());
                    }
                }
                sleep(MARKER_POLL_INTERVAL).await;
            }
        };

        match timeout(self.render_timeout, poll).await {
            Ok(found) => found,
            Err(_) => {
                self.metrics.record_render_timeout();
                Err(CrawlError::RenderTimeout {
                    url: url.to_string(),
                    waited: self.render_timeout,
                })
            }
        }
    }

    /// Scrolls to the bottom until the document height stops growing.
    ///
    /// Returns the number of scroll rounds performed.
    pub async fn scroll_incrementally(
        &self,
        session: &dyn BrowserSession,
    ) -> Result<usize, CrawlError> {
        let mut last_height = session.document_height().await?;

        for round in 1..=self.scroll.max_attempts {
            session.scroll_to_bottom().await?;
            sleep(self.scroll.pause).await;

            let height = session.document_height().await?;
            if (height - last_height).abs() < 1.0 {
                return Ok(round);
            }
            last_height = height;
        }

        Ok(self.scroll.max_attempts)
    }
}
