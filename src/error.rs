use std::time::Duration;
use thiserror::Error;
use tokio::sync::AcquireError;

#[derive(Debug, Clone, Error)]
pub enum CrawlError {
    #[error("Browser session failed to start: {0}")]
    SessionStart(String),

    #[error("No marker element appeared on {url} within {waited:?}")]
    RenderTimeout { url: String, waited: Duration },

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Extraction failed for {url}: {reason}")]
    Extraction { url: String, reason: String },

    #[error("Delivery of {url} failed: {reason}")]
    Delivery { url: String, reason: String },

    #[error("API request to {endpoint} failed: {reason}")]
    Api { endpoint: String, reason: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Session pool is closed")]
    PoolClosed,

    #[error("Operation cancelled")]
    Cancelled,
}

impl CrawlError {
    /// Transient failures that a retry policy may attempt again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CrawlError::SessionStart(_)
                | CrawlError::RenderTimeout { .. }
                | CrawlError::Navigation { .. }
                | CrawlError::Browser(_)
                | CrawlError::Delivery { .. }
                | CrawlError::Api { .. }
        )
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            CrawlError::InvalidUrl(_) | CrawlError::InvalidRecord(_) => ErrorSeverity::Low,
            CrawlError::Extraction { .. } | CrawlError::RenderTimeout { .. } => ErrorSeverity::Low,
            CrawlError::Cancelled => ErrorSeverity::Low,
            CrawlError::Configuration(_) | CrawlError::PoolClosed => ErrorSeverity::Critical,
            CrawlError::SessionStart(_) | CrawlError::Delivery { .. } => ErrorSeverity::High,
            _ => ErrorSeverity::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Logs an absorbed failure at a level matching its severity.
pub fn log_absorbed(context: &str, error: &CrawlError) {
    match error.severity() {
        ErrorSeverity::Low => tracing::debug!(error = %error, "{}", context),
        ErrorSeverity::Medium => tracing::warn!(error = %error, "{}", context),
        ErrorSeverity::High | ErrorSeverity::Critical => {
            tracing::error!(error = %error, "{}", context)
        }
    }
}

impl From<AcquireError> for CrawlError {
    fn from(_: AcquireError) -> Self {
        CrawlError::PoolClosed
    }
}

impl From<std::io::Error> for CrawlError {
    fn from(err: std::io::Error) -> Self {
        CrawlError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CrawlError {
    fn from(err: serde_json::Error) -> Self {
        CrawlError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for CrawlError {
    fn from(err: csv::Error) -> Self {
        CrawlError::Snapshot(err.to_string())
    }
}
