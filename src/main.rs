use anyhow::Context;
use clap::Parser;
use dealer_crawler::{
    install_prometheus_exporter, load_config_file, setup_logging, validate_config_file, Cli,
    CliRunner, Commands, Config, CrawlMetrics,
};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    setup_logging(args.verbose, args.log_file.as_deref())?;
    info!("Starting dealer-crawler v{}", env!("CARGO_PKG_VERSION"));

    // Validation reads its own file and needs no runtime components.
    if let Commands::Validate { path } = &args.command {
        return validate_config_file(path).await;
    }

    let config = load_config(&args).await?;

    // The recorder must exist before any metric handle is registered.
    if let Some(addr) = args.metrics_listen {
        install_prometheus_exporter(addr)?;
    }

    let runner = CliRunner::new(config, CrawlMetrics::new())?;
    let cancel = runner.cancel_handle();
    let run = runner.run(args.command);
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        _ = signal::ctrl_c() => {
            warn!("Received Ctrl-C, stopping crawl and keeping partial results");
            cancel.cancel();
            run.await
        }
    };

    if let Err(e) = &result {
        error!("Application error: {:#}", e);
    }
    info!("dealer-crawler stopped");
    result
}

async fn load_config(args: &Cli) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => load_config_file(path).await?,
        None => Config::default(),
    };

    args.apply_overrides(&mut config);
    config.validate().context("invalid configuration")?;

    info!("Configuration loaded successfully");
    info!("Max concurrency: {} (worker width {})", config.max_concurrency, config.worker_width());
    info!("Batch size: {}", config.batch_size);
    info!("Headless: {}", config.headless_mode);
    if config.api.vehicle_api_url.is_empty() || config.api.dealership_api_url.is_empty() {
        warn!("API endpoints are not fully configured; set VEHICLE_API_URL and DEALERSHIP_API_URL");
    }

    Ok(config)
}
