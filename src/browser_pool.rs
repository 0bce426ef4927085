//! Bounded pool of isolated browser sessions
//!
//! Every [`BrowserSessionPool::acquire`] launches a fresh session with its own profile
//! directory and tears it down on release, so no cookies or cache survive between
//! acquisitions. The pool's only shared state is a counting semaphore sized to
//! `max_concurrency`.

use crate::telemetry::CrawlMetrics;
use crate::{create_browser_config, Config, CrawlError};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// One isolated browser automation context
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Loads `url` and waits for the navigation to finish.
    async fn navigate(&self, url: &str) -> Result<(), CrawlError>;

    /// Whether an element matching the CSS `selector` exists right now.
    async fn has_element(&self, selector: &str) -> Result<bool, CrawlError>;

    async fn document_height(&self) -> Result<f64, CrawlError>;

    async fn scroll_to_bottom(&self) -> Result<(), CrawlError>;

    /// Serialized markup of the current document.
    async fn content(&self) -> Result<String, CrawlError>;

    /// Tears the session down completely.
    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn BrowserSession>, CrawlError>;
}

/// Launches one Chrome process per session
pub struct ChromeSessionFactory {
    config: Arc<Config>,
}

impl ChromeSessionFactory {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    async fn create(&self) -> Result<Box<dyn BrowserSession>, CrawlError> {
        let profile_dir = std::env::temp_dir().join(format!(
            "dealer-crawler-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));
        tokio::fs::create_dir_all(&profile_dir).await.map_err(|e| {
            CrawlError::SessionStart(format!("failed to create profile dir: {e}"))
        })?;

        let launched = match create_browser_config(&self.config, &profile_dir.to_string_lossy())
        {
            Ok(browser_config) => Browser::launch(browser_config)
                .await
                .map_err(|e| CrawlError::SessionStart(e.to_string())),
            Err(e) => Err(e),
        };

        let (mut browser, mut handler) = match launched {
            Ok(launched) => launched,
            Err(e) => {
                remove_profile(&profile_dir).await;
                return Err(e);
            }
        };

        // The handler stream carries all DevTools traffic and must be polled for the
        // browser to make progress.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {}", e);
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                handler_task.abort();
                remove_profile(&profile_dir).await;
                return Err(CrawlError::SessionStart(format!("failed to open page: {e}")));
            }
        };

        debug!(profile = %profile_dir.display(), "Browser session started");

        Ok(Box::new(ChromeSession {
            browser,
            page,
            handler: handler_task,
            profile_dir,
            page_load_timeout: self.config.page_load_timeout,
            implicit_wait: self.config.implicit_wait_timeout,
        }))
    }
}

struct ChromeSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    profile_dir: PathBuf,
    page_load_timeout: Duration,
    implicit_wait: Duration,
}

impl ChromeSession {
    async fn evaluate<T: serde::de::DeserializeOwned>(&self, script: &str) -> Result<T, CrawlError> {
        let result = timeout(self.implicit_wait, self.page.evaluate(script))
            .await
            .map_err(|_| CrawlError::Browser(format!("script timed out: {script}")))?
            .map_err(|e| CrawlError::Browser(e.to_string()))?;
        result
            .into_value::<T>()
            .map_err(|e| CrawlError::Browser(format!("unexpected script result: {e}")))
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&self, url: &str) -> Result<(), CrawlError> {
        match timeout(self.page_load_timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(CrawlError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(CrawlError::Navigation {
                url: url.to_string(),
                reason: format!("page load exceeded {:?}", self.page_load_timeout),
            }),
        }
    }

    async fn has_element(&self, selector: &str) -> Result<bool, CrawlError> {
        match timeout(self.implicit_wait, self.page.find_element(selector)).await {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(_)) | Err(_) => Ok(false),
        }
    }

    async fn document_height(&self) -> Result<f64, CrawlError> {
        self.evaluate("document.body ? document.body.scrollHeight : 0")
            .await
    }

    async fn scroll_to_bottom(&self) -> Result<(), CrawlError> {
        self.evaluate::<serde_json::Value>(
            "window.scrollTo(0, document.body ? document.body.scrollHeight : 0); null",
        )
        .await
        .map(|_| ())
    }

    async fn content(&self) -> Result<String, CrawlError> {
        self.page
            .content()
            .await
            .map_err(|e| CrawlError::Browser(e.to_string()))
    }

    async fn close(self: Box<Self>) {
        let ChromeSession {
            mut browser,
            page,
            handler,
            profile_dir,
            ..
        } = *self;

        if let Err(e) = page.close().await {
            debug!("Failed to close page: {}", e);
        }
        if let Err(e) = browser.close().await {
            warn!("Failed to close browser: {}", e);
        }
        let _ = browser.wait().await;
        handler.abort();
        remove_profile(&profile_dir).await;
    }
}

async fn remove_profile(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        debug!(profile = %dir.display(), "Failed to remove profile dir: {}", e);
    }
}

/// Counts a slot as outstanding for as long as it is held
struct SlotGuard {
    _permit: OwnedSemaphorePermit,
    outstanding: Arc<AtomicUsize>,
    metrics: CrawlMetrics,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let now = self.outstanding.fetch_sub(1, Ordering::SeqCst) - 1;
        self.metrics.set_outstanding_sessions(now);
    }
}

/// Scoped handle to one pooled session
///
/// Call [`SessionLease::release`] to tear the session down and free the slot. A lease that
/// is dropped instead (error path, timeout, cancellation) closes the session on a background
/// task and frees the slot once that finishes.
pub struct SessionLease {
    session: Box<dyn BrowserSession>,
    /// `None` once the session has been handed off for closing
    slot: Option<SlotGuard>,
}

impl SessionLease {
    pub async fn release(mut self) {
        if let Some((session, slot)) = self.hand_off() {
            session.close().await;
            drop(slot);
        }
    }

    /// Moves the live session and its slot out, leaving a [`ClosedSession`] behind.
    fn hand_off(&mut self) -> Option<(Box<dyn BrowserSession>, SlotGuard)> {
        let slot = self.slot.take()?;
        let session = std::mem::replace(&mut self.session, Box::new(ClosedSession));
        Some((session, slot))
    }
}

impl Deref for SessionLease {
    type Target = dyn BrowserSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let Some((session, slot)) = self.hand_off() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    session.close().await;
                    drop(slot);
                });
            }
            Err(_) => {
                error!("Session lease dropped outside a runtime; session not closed cleanly");
                drop(slot);
            }
        }
    }
}

/// Placeholder left in a lease whose session is already closing
struct ClosedSession;

impl ClosedSession {
    fn error() -> CrawlError {
        CrawlError::Browser("session already closed".to_string())
    }
}

#[async_trait]
impl BrowserSession for ClosedSession {
    async fn navigate(&self, _url: &str) -> Result<(), CrawlError> {
        Err(Self::error())
    }

    async fn has_element(&self, _selector: &str) -> Result<bool, CrawlError> {
        Err(Self::error())
    }

    async fn document_height(&self) -> Result<f64, CrawlError> {
        Err(Self::error())
    }

    async fn scroll_to_bottom(&self) -> Result<(), CrawlError> {
        Err(Self::error())
    }

    async fn content(&self) -> Result<String, CrawlError> {
        Err(Self::error())
    }

    async fn close(self: Box<Self>) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub outstanding: usize,
    pub peak_outstanding: usize,
    pub sessions_created: u64,
    pub start_failures: u64,
}

pub struct BrowserSessionPool {
    factory: Arc<dyn SessionFactory>,
    semaphore: Arc<Semaphore>,
    capacity: usize,
    outstanding: Arc<AtomicUsize>,
    peak: AtomicUsize,
    created: AtomicU64,
    failures: AtomicU64,
    metrics: CrawlMetrics,
}

impl BrowserSessionPool {
    pub fn new(factory: Arc<dyn SessionFactory>, capacity: usize, metrics: CrawlMetrics) -> Self {
        let capacity = capacity.max(1);
        info!("Browser session pool ready with {} slots", capacity);
        Self {
            factory,
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            outstanding: Arc::new(AtomicUsize::new(0)),
            peak: AtomicUsize::new(0),
            created: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            metrics,
        }
    }

    pub fn chrome(config: Arc<Config>, metrics: CrawlMetrics) -> Self {
        let capacity = config.max_concurrency;
        Self::new(Arc::new(ChromeSessionFactory::new(config)), capacity, metrics)
    }

    /// Waits for a free slot and starts a fresh session in it.
    ///
    /// A session that fails to start gives its slot back before the error is returned.
    pub async fn acquire(&self) -> Result<SessionLease, CrawlError> {
        let permit = self.semaphore.clone().acquire_owned().await?;

        let session = match self.factory.create().await {
            Ok(session) => session,
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to start browser session: {}", e);
                drop(permit);
                return Err(e);
            }
        };

        self.created.fetch_add(1, Ordering::Relaxed);
        let now = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.metrics.set_outstanding_sessions(now);

        Ok(SessionLease {
            session,
            slot: Some(SlotGuard {
                _permit: permit,
                outstanding: self.outstanding.clone(),
                metrics: self.metrics.clone(),
            }),
        })
    }

    /// Rejects further acquisitions; outstanding leases stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            outstanding: self.outstanding.load(Ordering::SeqCst),
            peak_outstanding: self.peak.load(Ordering::SeqCst),
            sessions_created: self.created.load(Ordering::Relaxed),
            start_failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fakes::FakeSessionFactory;

    fn pool(factory: &Arc<FakeSessionFactory>, capacity: usize) -> Arc<BrowserSessionPool> {
        Arc::new(BrowserSessionPool::new(
            factory.clone(),
            capacity,
            CrawlMetrics::new(),
        ))
    }

    #[tokio::test]
    async fn test_outstanding_sessions_never_exceed_capacity() {
        let factory = Arc::new(FakeSessionFactory::new().with_navigate_delay(Duration::from_millis(5)));
        let pool = pool(&factory, 3);

        let mut handles = Vec::new();
        for i in 0..20 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let lease = pool.acquire().await.unwrap();
                lease.navigate(&format!("https://dealer.test/{i}")).await.unwrap();
                lease.release().await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = pool.stats();
        assert!(stats.peak_outstanding <= 3);
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.sessions_created, 20);
        assert!(factory.peak_live() <= 3);
        assert_eq!(factory.closed(), 20);
    }

    #[tokio::test]
    async fn test_start_failure_returns_slot() {
        let factory = Arc::new(FakeSessionFactory::new().failing_creates(2));
        let pool = pool(&factory, 1);

        assert!(matches!(pool.acquire().await, Err(CrawlError::SessionStart(_))));
        assert!(matches!(pool.acquire().await, Err(CrawlError::SessionStart(_))));

        let lease = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().outstanding, 1);
        lease.release().await;
        assert_eq!(pool.stats().start_failures, 2);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[tokio::test]
    async fn test_dropped_lease_is_released() {
        let factory = Arc::new(FakeSessionFactory::new());
        let pool = pool(&factory, 1);

        let result: Result<(), CrawlError> = async {
            let lease = pool.acquire().await?;
            lease.navigate("https://dealer.test/missing").await?;
            Err(CrawlError::Browser("operation failed".into()))
        }
        .await;
        assert!(result.is_err());

        // The background close must free the only slot.
        let lease = timeout(Duration::from_secs(1), pool.acquire())
            .await
            .expect("slot was not released")
            .unwrap();
        lease.release().await;
        assert_eq!(factory.closed(), 2);
    }

    #[tokio::test]
    async fn test_each_lease_closes_its_session_once() {
        let factory = Arc::new(FakeSessionFactory::new());
        let pool = pool(&factory, 2);

        let released = pool.acquire().await.unwrap();
        let dropped = pool.acquire().await.unwrap();
        assert_eq!(factory.live(), 2);

        released.release().await;
        drop(dropped);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(factory.closed(), 2);
        assert_eq!(factory.live(), 0);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[tokio::test]
    async fn test_closed_session_placeholder_reports_errors() {
        let placeholder: Box<dyn BrowserSession> = Box::new(ClosedSession);
        assert!(matches!(
            placeholder.navigate("https://dealer.test/").await,
            Err(CrawlError::Browser(_))
        ));
        assert!(placeholder.content().await.is_err());
        placeholder.close().await;
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_acquire() {
        let factory = Arc::new(FakeSessionFactory::new());
        let pool = pool(&factory, 2);
        pool.close();
        assert!(matches!(pool.acquire().await, Err(CrawlError::PoolClosed)));
    }
}
