use crate::alerts::Alerter;
use crate::api::{DealershipSource, InventoryApi};
use crate::browser_pool::BrowserSessionPool;
use crate::dispatcher::BatchDispatcher;
use crate::error::log_absorbed;
use crate::models::{DealershipApiRecord, DealershipRecord, VehicleRecord};
use crate::orchestrator::CrawlOrchestrator;
use crate::reconcile::reconcile_file;
use crate::snapshot::{read_snapshot, write_snapshot};
use crate::telemetry::CrawlMetrics;
use crate::utils::format_duration;
use crate::Config;
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "dealer-crawler")]
#[command(about = "Crawls dealership inventories and delivers new vehicle listings")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Configuration file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, env = "MAX_CONCURRENCY", help = "Maximum concurrent browser sessions")]
    pub max_concurrency: Option<usize>,

    #[arg(long, global = true, env = "SEND_BATCH_SIZE", help = "Vehicles per delivery batch")]
    pub batch_size: Option<usize>,

    #[arg(long, global = true, env = "HEADLESS_MODE", help = "Run Chrome without a window (true/false)")]
    pub headless: Option<bool>,

    #[arg(long, global = true, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, global = true, env = "VEHICLE_API_URL", help = "Vehicle inventory endpoint")]
    pub vehicle_api_url: Option<String>,

    #[arg(long, global = true, env = "DEALERSHIP_API_URL", help = "Dealership endpoint")]
    pub dealership_api_url: Option<String>,

    #[arg(long, global = true, env = "SLACK_BOT_TOKEN", hide_env_values = true, help = "Slack bot token for alerts")]
    pub slack_bot_token: Option<String>,

    #[arg(long, global = true, env = "SLACK_CHANNEL", help = "Slack channel for alerts")]
    pub slack_channel: Option<String>,

    #[arg(long, global = true, help = "Serve Prometheus metrics on this address")]
    pub metrics_listen: Option<SocketAddr>,

    #[arg(long, global = true, help = "Write logs to this file instead of stdout")]
    pub log_file: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,
}

impl Cli {
    /// Applies flags and environment variables on top of file or default settings.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(max_concurrency) = self.max_concurrency {
            config.max_concurrency = max_concurrency;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(headless) = self.headless {
            config.headless_mode = headless;
        }
        if let Some(chrome_path) = &self.chrome_path {
            config.chrome_path = Some(chrome_path.clone());
        }
        if let Some(url) = &self.vehicle_api_url {
            config.api.vehicle_api_url = url.clone();
        }
        if let Some(url) = &self.dealership_api_url {
            config.api.dealership_api_url = url.clone();
        }
        if let Some(token) = &self.slack_bot_token {
            config.alerts.slack_bot_token = Some(token.clone());
        }
        if let Some(channel) = &self.slack_channel {
            config.alerts.slack_channel = Some(channel.clone());
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crawl every dealership and deliver new vehicles
    Crawl {
        #[arg(long, help = "Also write the crawled vehicles to this CSV file")]
        snapshot: Option<PathBuf>,

        #[arg(long, help = "Crawl without delivering anything")]
        dry_run: bool,

        #[arg(long, help = "Only crawl the dealership with this id")]
        dealership: Option<String>,
    },

    /// Deliver vehicles from a CSV snapshot
    Dispatch {
        #[arg(short, long, help = "Snapshot written by crawl --snapshot")]
        input: PathBuf,
    },

    /// Post dealerships from a JSON file that the API does not know yet
    Reconcile {
        #[arg(short, long, help = "JSON array of dealership payloads")]
        file: PathBuf,
    },

    /// Validate configuration
    Validate {
        #[arg(help = "Configuration file to validate")]
        path: PathBuf,
    },
}

pub struct CliRunner {
    pub config: Arc<Config>,
    metrics: CrawlMetrics,
    alerter: Alerter,
    api: Arc<InventoryApi>,
    cancel: CancellationToken,
}

impl CliRunner {
    pub fn new(config: Config, metrics: CrawlMetrics) -> anyhow::Result<Self> {
        let alerter = Alerter::from_settings(&config.alerts, metrics.clone())?;
        let api = Arc::new(InventoryApi::new(&config.api)?);

        Ok(Self {
            config: Arc::new(config),
            metrics,
            alerter,
            api,
            cancel: CancellationToken::new(),
        })
    }

    /// Cancelling this token stops a running crawl and keeps its partial results.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::Crawl {
                snapshot,
                dry_run,
                dealership,
            } => {
                self.run_crawl(snapshot.as_deref(), dry_run, dealership.as_deref())
                    .await
            }
            Commands::Dispatch { input } => self.run_dispatch(&input).await,
            Commands::Reconcile { file } => self.run_reconcile(&file).await,
            Commands::Validate { path } => validate_config_file(&path).await,
        }
    }

    pub async fn run_crawl(
        &self,
        snapshot: Option<&Path>,
        dry_run: bool,
        only: Option<&str>,
    ) -> anyhow::Result<()> {
        let payloads = match self.api.fetch_dealerships().await {
            Ok(payloads) => payloads,
            Err(e) => {
                let message = format!(
                    "Failed to fetch dealerships. TIME: {}, ERROR: {}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                    e
                );
                error!("{}", message);
                self.alerter.notify(message).await;
                return Err(e).context("dealership list unavailable");
            }
        };

        let dealerships = select_dealerships(payloads, only);
        if dealerships.is_empty() {
            warn!("No dealerships to crawl");
            return Ok(());
        }

        let pool = Arc::new(BrowserSessionPool::chrome(self.config.clone(), self.metrics.clone()));
        let orchestrator = CrawlOrchestrator::new(
            self.config.clone(),
            pool.clone(),
            self.alerter.clone(),
            self.metrics.clone(),
        )?
        .with_cancellation(self.cancel.clone());

        let outcome = orchestrator.run(dealerships).await;
        let stats = orchestrator.pool_stats();
        pool.close();
        info!(
            sessions_created = stats.sessions_created,
            start_failures = stats.start_failures,
            peak_outstanding = stats.peak_outstanding,
            capacity = stats.capacity,
            "Browser session pool drained"
        );
        info!(
            "Crawled {} dealerships ({} failed), {} of {} vehicles scraped in {}",
            outcome.dealerships_crawled,
            outcome.dealerships_failed,
            outcome.records.len(),
            outcome.vehicles_found,
            format_duration(outcome.elapsed)
        );

        if let Some(path) = snapshot {
            write_snapshot(path, &outcome.records)
                .with_context(|| format!("failed to write snapshot {}", path.display()))?;
        }

        if outcome.cancelled {
            warn!("Crawl was cancelled, skipping delivery");
            return Ok(());
        }
        if dry_run {
            info!("Dry run, skipping delivery of {} vehicles", outcome.records.len());
            return Ok(());
        }

        self.deliver(outcome.records).await;
        Ok(())
    }

    pub async fn run_dispatch(&self, input: &Path) -> anyhow::Result<()> {
        let records = read_snapshot(input)
            .with_context(|| format!("failed to read snapshot {}", input.display()))?;
        info!("Loaded {} vehicles from {}", records.len(), input.display());
        self.deliver(records).await;
        Ok(())
    }

    pub async fn run_reconcile(&self, file: &Path) -> anyhow::Result<()> {
        let source: &dyn DealershipSource = self.api.as_ref();
        let results = reconcile_file(source, file)
            .await
            .with_context(|| format!("failed to reconcile {}", file.display()))?;
        info!(
            "Posted {} of {} dealerships",
            results.iter().filter(|posted| **posted).count(),
            results.len()
        );
        Ok(())
    }

    async fn deliver(&self, records: Vec<VehicleRecord>) {
        let dispatcher = BatchDispatcher::new(
            self.api.clone(),
            &self.config,
            self.alerter.clone(),
            self.metrics.clone(),
        );
        match dispatcher.deliver_new(records).await {
            Ok(report) => info!(
                "Delivered {} vehicles, {} failed, {} duplicates skipped",
                report.delivered.len(),
                report.failed.len(),
                report.duplicates
            ),
            Err(e) => error!("Delivery skipped: {}", e),
        }
    }
}

/// Turns API payloads into crawlable dealerships, optionally keeping only the one with `only`.
pub fn select_dealerships(payloads: Vec<DealershipApiRecord>, only: Option<&str>) -> Vec<DealershipRecord> {
    payloads
        .into_iter()
        .filter_map(|payload| match DealershipRecord::try_from(payload) {
            Ok(dealership) => Some(dealership),
            Err(e) => {
                log_absorbed("Skipping dealership", &e);
                None
            }
        })
        .filter(|dealership| only.map_or(true, |id| dealership.id == id))
        .collect()
}

pub async fn load_config_file(path: &Path) -> anyhow::Result<Config> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: Config = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    Ok(config)
}

pub async fn validate_config_file(path: &Path) -> anyhow::Result<()> {
    let config = load_config_file(path).await?;
    if let Err(e) = config.validate() {
        bail!("{} is invalid: {}", path.display(), e);
    }
    println!("Configuration {} is valid", path.display());
    println!("  max_concurrency: {}", config.max_concurrency);
    println!("  batch_size: {}", config.batch_size);
    println!("  headless_mode: {}", config.headless_mode);
    println!("  vehicle_task_timeout: {:?}", config.vehicle_task_timeout);
    Ok(())
}

/// Installs the global tracing subscriber.
///
/// DEBUG with `verbose`, INFO otherwise. With `log_file` every line goes to that file instead
/// of stdout.
pub fn setup_logging(verbose: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false);

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.init(),
    }

    Ok(())
}
