//! Catalog Sync - Product Aggregation Service
//!
//! Reconciles product data from external providers into SQLite on a fixed
//! interval. Runs continuously; cycles never overlap.

use catalog_sync::{Aggregator, Config, ProviderClient, ProductStream};
use catalog_sync::database;
use clap::Parser;
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Product catalog aggregation server - syncs provider data to SQLite
#[derive(Parser, Debug)]
#[command(name = "catalog_sync")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the SQLite database file
    #[arg(short, long, default_value_t = default_db_path())]
    database: String,

    /// Run one aggregation cycle and exit (default: run continuously)
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Cycle interval in milliseconds (overrides FETCH_INTERVAL_MS)
    #[arg(long)]
    interval_ms: Option<u64>,
}

/// Returns the default database path: ~/.local/share/catalog_sync/catalog.db
fn default_db_path() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("catalog_sync")
        .join("catalog.db")
        .to_string_lossy()
        .to_string()
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(ms) = args.interval_ms {
        config.fetch_interval = Duration::from_millis(ms);
    }

    let db_path = PathBuf::from(&args.database);

    log::info!("Starting catalog_sync...");
    log::info!("Database path: {}", db_path.display());

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.exists() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::error!("Failed to create database directory: {}", e);
                std::process::exit(1);
            }
            log::info!("Created directory: {}", parent.display());
        }
    }

    let conn = match Connection::open(&db_path) {
        Ok(conn) => {
            log::info!("Opened database: {}", db_path.display());
            conn
        }
        Err(e) => {
            log::error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = database::init_schema(&conn) {
        log::error!("Failed to initialize database schema: {}", e);
        std::process::exit(1);
    }

    let client = match ProviderClient::new(config.provider_timeout) {
        Ok(client) => client,
        Err(e) => {
            log::error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let db = Arc::new(Mutex::new(conn));
    let aggregator = Aggregator::new(
        Arc::clone(&db),
        client,
        ProductStream::new(),
        config.stale_threshold,
    );

    // Config seeding, not reconciliation: runs once before the first cycle
    aggregator.seed_providers(&config.provider_seeds());

    // Startup cycle
    if let Err(e) = aggregator.run_cycle().await {
        log::error!("Startup aggregation cycle failed: {}", e);
    }

    if args.once {
        log::info!("Single cycle complete, exiting");
        return;
    }

    log::info!(
        "Running in daemon mode, cycle every {}ms",
        config.fetch_interval.as_millis()
    );
    run_daemon(&aggregator, config.fetch_interval).await;
}

/// Drive cycles on a fixed interval. Awaiting `run_cycle` inline serializes
/// cycles; Delay pushes back missed ticks instead of stacking them.
async fn run_daemon(aggregator: &Aggregator, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately and the startup cycle already ran
    ticker.tick().await;

    loop {
        ticker.tick().await;
        log::debug!("Scheduled aggregation cycle triggered");
        if let Err(e) = aggregator.run_cycle().await {
            log::error!("Aggregation cycle failed: {}", e);
        }
    }
}
