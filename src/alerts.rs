//! Free-text failure notices
//!
//! Alerts are best effort: a channel that is down is logged locally and never turns into a
//! crawl failure.

use crate::config::AlertSettings;
use crate::telemetry::CrawlMetrics;
use crate::CrawlError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), CrawlError>;
}

/// Posts alerts to a Slack channel through `chat.postMessage`
pub struct SlackAlerts {
    client: reqwest::Client,
    token: String,
    channel: String,
    api_base: String,
}

#[derive(Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackAlerts {
    pub fn new(
        token: impl Into<String>,
        channel: impl Into<String>,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CrawlError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CrawlError::Configuration(format!("slack client: {e}")))?;

        Ok(Self {
            client,
            token: token.into(),
            channel: channel.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AlertChannel for SlackAlerts {
    async fn notify(&self, message: &str) -> Result<(), CrawlError> {
        let endpoint = format!("{}/chat.postMessage", self.api_base);
        let api_error = |reason: String| CrawlError::Api {
            endpoint: endpoint.clone(),
            reason,
        };

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.token)
            .json(&PostMessage {
                channel: &self.channel,
                text: message,
            })
            .send()
            .await
            .map_err(|e| api_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(api_error(format!("status {}", response.status())));
        }

        let body: SlackResponse = response
            .json()
            .await
            .map_err(|e| api_error(e.to_string()))?;
        if body.ok {
            Ok(())
        } else {
            Err(api_error(body.error.unwrap_or_else(|| "unknown error".to_string())))
        }
    }
}

/// Writes alerts to the log only
pub struct LogAlerts;

#[async_trait]
impl AlertChannel for LogAlerts {
    async fn notify(&self, message: &str) -> Result<(), CrawlError> {
        warn!(alert = true, "{}", message);
        Ok(())
    }
}

/// Cloneable front for an [`AlertChannel`] that swallows channel failures
#[derive(Clone)]
pub struct Alerter {
    channel: Arc<dyn AlertChannel>,
    timeout: Duration,
    metrics: CrawlMetrics,
}

impl Alerter {
    pub fn new(channel: Arc<dyn AlertChannel>, timeout: Duration, metrics: CrawlMetrics) -> Self {
        Self {
            channel,
            timeout,
            metrics,
        }
    }

    /// Slack when both token and channel are configured, the log otherwise.
    pub fn from_settings(settings: &AlertSettings, metrics: CrawlMetrics) -> Result<Self, CrawlError> {
        let channel: Arc<dyn AlertChannel> =
            match (&settings.slack_bot_token, &settings.slack_channel) {
                (Some(token), Some(channel)) if !token.is_empty() && !channel.is_empty() => {
                    info!("Alerts go to Slack channel {}", channel);
                    Arc::new(SlackAlerts::new(
                        token.as_str(),
                        channel.as_str(),
                        settings.slack_api_base.as_str(),
                        settings.timeout,
                    )?)
                }
                _ => {
                    info!("No Slack credentials configured, alerts go to the log");
                    Arc::new(LogAlerts)
                }
            };

        Ok(Self::new(channel, settings.timeout, metrics))
    }

    pub fn log_only() -> Self {
        Self::new(Arc::new(LogAlerts), Duration::from_secs(1), CrawlMetrics::new())
    }

    /// Sends `message`; returns whether the channel accepted it.
    pub async fn notify(&self, message: impl AsRef<str>) -> bool {
        let message = message.as_ref();
        match tokio::time::timeout(self.timeout, self.channel.notify(message)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                self.metrics.record_alert_failed();
                warn!("Failed to send alert: {}", e);
                false
            }
            Err(_) => {
                self.metrics.record_alert_failed();
                warn!("Alert channel timed out after {:?}", self.timeout);
                false
            }
        }
    }
}
