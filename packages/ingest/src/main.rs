#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the crime updater service.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use crime_updater_cli_utils::init_logger;
use crime_updater_ingest::config::{Config, Overrides, Settings};
use crime_updater_ingest::scheduler::Scheduler;
use crime_updater_ingest::{open_coordinator, open_store, table_status};
use crime_updater_source::sink;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "crime_updater",
    about = "Keeps a blue/green copy of the Portland crime dataset fresh"
)]
struct Cli {
    #[command(flatten)]
    options: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalOptions {
    /// Path to the TOML config file (default: ./config.toml or ./config/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// `DuckDB` database file
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,
    /// Time between refreshes (e.g. "24h", "90m")
    #[arg(long, global = true)]
    interval: Option<String>,
    /// CSV URL to load; repeat for several files
    #[arg(long = "csv", global = true)]
    csv_urls: Vec<String>,
    /// Name of the blue table
    #[arg(long, global = true)]
    blue_table: Option<String>,
    /// Name of the green table
    #[arg(long, global = true)]
    green_table: Option<String>,
    /// HTTP timeout per request (e.g. "30s")
    #[arg(long, global = true)]
    timeout: Option<String>,
    /// HTTP retries after the first attempt
    #[arg(long, global = true)]
    retries: Option<u32>,
    /// Log level: trace, debug, info, warn, error
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Log format: text or json
    #[arg(long, global = true)]
    log_format: Option<String>,
}

impl GlobalOptions {
    fn into_overrides(self) -> (Option<PathBuf>, Overrides) {
        let overrides = Overrides {
            db_path: self.db_path,
            interval: self.interval,
            csv_urls: self.csv_urls,
            blue_table: self.blue_table,
            green_table: self.green_table,
            timeout: self.timeout,
            retries: self.retries,
            log_level: self.log_level,
            log_format: self.log_format,
        };
        (self.config, overrides)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the refresh scheduler until Ctrl-C
    Launch,
    /// Run a single refresh cycle and exit
    Refresh,
    /// Show both tables' load time, row count, and which is active
    Status,
}

fn load_settings(options: GlobalOptions) -> Result<Settings, Box<dyn std::error::Error>> {
    let (config_path, overrides) = options.into_overrides();

    let mut config = Config::load(config_path.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok())?;
    config.apply_overrides(overrides);

    Ok(config.validate()?)
}

/// Returns a token that is cancelled on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Received Ctrl-C, shutting down...");
                trigger.cancel();
            }
            Err(e) => log::error!("Failed to listen for Ctrl-C: {e}"),
        }
    });
    token
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = load_settings(cli.options)?;
    init_logger(settings.log_level, settings.log_format);

    match cli.command {
        Commands::Launch => {
            let coordinator = Arc::new(open_coordinator(&settings)?);

            let mut changes = coordinator.subscribe();
            tokio::spawn(async move {
                while changes.changed().await.is_ok() {
                    let active = changes.borrow_and_update().clone();
                    if let Some(active) = active {
                        log::info!(
                            "Active table changed: {} ({})",
                            active.name,
                            active.color
                        );
                    }
                }
            });

            log::info!(
                "Refreshing {} source(s) every {}",
                settings.csv_urls.len(),
                humantime::format_duration(settings.check_interval)
            );

            let stats = Scheduler::new(coordinator, settings.check_interval, sink::global())
                .with_run_on_start(settings.run_on_start)
                .run(cancel_on_ctrl_c())
                .await;

            if stats.started > 0 && stats.succeeded == 0 {
                log::warn!("No refresh succeeded during this run");
            }
        }
        Commands::Refresh => {
            let coordinator = open_coordinator(&settings)?;
            let report = coordinator.refresh(&cancel_on_ctrl_c()).await?;

            log::info!(
                "Refresh complete: {} rows into {} ({} discarded) in {:.1}s",
                report.rows_loaded,
                report.table,
                report.rows_discarded,
                report.duration.as_secs_f64()
            );
        }
        Commands::Status => {
            let store = open_store(&settings)?;

            println!("{:<8} {:<24} {:<34} {:>10}", "COLOR", "TABLE", "LOADED AT", "ROWS");
            println!("{}", "-".repeat(79));
            for status in table_status(&store, &settings)? {
                println!(
                    "{:<8} {:<24} {:<34} {:>10}{}",
                    status.color.as_ref(),
                    status.name,
                    status
                        .loaded_at
                        .map_or_else(|| "never".to_string(), |at| at.to_rfc3339()),
                    status.rows,
                    if status.active { "  (active)" } else { "" }
                );
            }
        }
    }

    Ok(())
}
