//! # Dealer Crawler
//!
//! Crawls car-dealership inventory websites with a bounded pool of headless Chrome sessions,
//! turns each vehicle detail page into a structured record and delivers the listings the
//! inventory API does not know yet.
//!
//! ## Pipeline
//!
//! 1. Dealerships are fetched from the dealership API.
//! 2. Each dealership's landing page is rendered and its listing pages are walked to collect
//!    vehicle detail links.
//! 3. Every detail page is rendered and parsed into a [`VehicleRecord`].
//! 4. Records whose listing URL is already stored are dropped, the rest are posted in batches
//!    with per-record retries.
//!
//! Both crawl levels run with at most `min(5, max_concurrency)` concurrent tasks, and the
//! [`BrowserSessionPool`] never holds more than `max_concurrency` open browsers. Rendering and
//! parsing results are memoized per URL and content hash.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dealer_crawler::{CliRunner, Commands, Config, CrawlMetrics};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::default();
//!     config.api.vehicle_api_url = "https://inventory.example.com/vehicles".to_string();
//!     config.api.dealership_api_url = "https://inventory.example.com/dealerships".to_string();
//!
//!     let runner = CliRunner::new(config, CrawlMetrics::new())?;
//!     runner
//!         .run(Commands::Crawl {
//!             snapshot: None,
//!             dry_run: true,
//!             dealership: None,
//!         })
//!         .await
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! # Crawl everything and deliver new vehicles
//! dealer-crawler crawl
//!
//! # Crawl one dealership, keep a CSV copy, deliver nothing
//! dealer-crawler crawl --dealership d-42 --snapshot out/vehicles.csv --dry-run
//!
//! # Deliver a snapshot later
//! dealer-crawler dispatch --input out/vehicles.csv
//!
//! # Post dealerships the API does not know yet
//! dealer-crawler reconcile --file dealerships.json
//! ```

/// Slack alerts for failures worth a human's attention
pub mod alerts;

/// Clients for the vehicle and dealership APIs
pub mod api;

/// Bounded pool of headless browser sessions
pub mod browser_pool;

/// Memoization cache with single-flight computation
pub mod cache;

/// Command-line interface implementation
pub mod cli;

/// Configuration and settings
pub mod config;

/// Dedup and batched delivery of vehicle records
pub mod dispatcher;

/// Error types and error handling utilities
pub mod error;

/// Vehicle detail extraction from rendered pages
pub mod extractor;

/// Dealership and vehicle data model
pub mod models;

/// Two-level crawl over dealerships and vehicles
pub mod orchestrator;

/// Listing page discovery and pagination
pub mod pagination;

/// Dealership reconciliation against the dealership API
pub mod reconcile;

/// Page rendering with scrolling and readiness checks
pub mod renderer;

/// Retry policies
pub mod retry;

/// CSV snapshots of crawled vehicles
pub mod snapshot;

/// Crawl metrics and Prometheus export
pub mod telemetry;

/// Utility functions and helpers
pub mod utils;

/// Bounded task groups and progress tracking
pub mod worker;


pub use alerts::*;
pub use api::*;
pub use browser_pool::*;
pub use cache::*;
pub use cli::*;
pub use config::*;
pub use dispatcher::*;
pub use error::*;
pub use extractor::*;
pub use models::*;
pub use orchestrator::*;
pub use pagination::*;
pub use reconcile::*;
pub use renderer::*;
pub use retry::*;
pub use snapshot::*;
pub use telemetry::*;
pub use utils::*;
pub use worker::*;
