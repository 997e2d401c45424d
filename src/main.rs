//! Dashboard Sync
//!
//! Keeps the dashboard spreadsheet's yearly metric tables up to date.
//!
//! Commands:
//! - `run`: startup sync, then daily checks for the quarterly update window
//! - `sync`: one sync of every enabled source, or of a single one
//! - `status`: configured sources and the outcome of each source's last run

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dashboard_sync::checkpoint::RunStateStore;
use dashboard_sync::config::{Config, ALL_SOURCES};
use dashboard_sync::harvester::{Harvester, SourceOutcome};
use dashboard_sync::http_client::{HttpClientConfig, ResilientHttpClient};
use dashboard_sync::storage::GoogleSheetsSink;

/// Dashboard Sync - quarterly metrics collection into the dashboard spreadsheet
#[derive(Parser, Debug)]
#[command(name = "dashboard-sync")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Syncs platform metrics into the dashboard spreadsheet")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, default_value = "false", global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync at startup, then every day at UPDATE_TIME during update months
    Run,

    /// Sync once and exit
    Sync {
        /// Only sync this source (budget, linkedin, eventbrite, scholar, youtube, medium)
        #[arg(short, long)]
        source: Option<String>,
    },

    /// Show configured sources and the last run state
    Status,
}

/// Sets up structured logging with tracing
fn setup_logging(log_level: &str, json_output: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

/// Waits for SIGINT/SIGTERM and broadcasts shutdown
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down after the current sync");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down after the current sync");
        }
    }

    let _ = shutdown_tx.send(());
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level, cli.json_logs);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting dashboard sync");

    let config = Config::load().context("loading configuration")?;

    match cli.command {
        Commands::Status => show_status(&config).await,
        Commands::Sync { source } => {
            config.validate()?;
            let harvester = build_harvester(config).await?;
            sync_once(&harvester, source.as_deref()).await
        }
        Commands::Run => {
            config.validate()?;
            let harvester = build_harvester(config).await?;
            let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
            tokio::spawn(shutdown_signal(shutdown_tx));
            harvester.run_continuous(shutdown_rx).await?;
            info!("Dashboard sync stopped");
            Ok(())
        }
    }
}

async fn build_harvester(config: Config) -> Result<Harvester> {
    let http_client = Arc::new(ResilientHttpClient::new(HttpClientConfig::from_config(&config)?)?);
    let sink = GoogleSheetsSink::from_config(&config, http_client.clone())
        .await
        .context("opening the spreadsheet")?;

    info!(
        sources = %config.enabled_sources()?.join(","),
        state_file = %config.state_file.display(),
        "Configuration loaded"
    );

    Ok(Harvester::new(config, Arc::new(sink), http_client).await?)
}

/// Runs one sync and exits non-zero if any source failed
async fn sync_once(harvester: &Harvester, source: Option<&str>) -> Result<()> {
    let outcomes = match source {
        Some(id) => vec![(id.to_string(), harvester.run_source(id).await?)],
        None => harvester.run_once().await.outcomes,
    };

    println!("\n{:<12} {:<10} {:>6} {:>8}", "Source", "Outcome", "Rows", "Skipped");
    println!("{}", "-".repeat(40));
    for (id, outcome) in &outcomes {
        let skipped = match outcome {
            SourceOutcome::Partial { skipped, .. } => skipped.len(),
            _ => 0,
        };
        println!(
            "{:<12} {:<10} {:>6} {:>8}",
            id,
            outcome.status().as_str(),
            outcome.rows_written(),
            skipped
        );
        if let SourceOutcome::Failed { error } = outcome {
            println!("    {error}");
        }
    }

    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|(_, o)| o.is_failed())
        .map(|(id, _)| id.as_str())
        .collect();
    if !failed.is_empty() {
        warn!(failed = ?failed, "Some sources failed");
        anyhow::bail!("{} source(s) failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

/// Shows configured sources and the last recorded outcomes
async fn show_status(config: &Config) -> Result<()> {
    println!("\nDashboard Sync Status");
    println!("=====================\n");

    println!(
        "Spreadsheet: {}",
        if config.has_sheets() { "configured" } else { "not configured" }
    );
    println!(
        "Update window: months {} at {}",
        config.update_months,
        config.update_time
    );

    let store = RunStateStore::open(&config.state_file).await?;
    let state = store.state();
    match state.last_run_at {
        Some(at) => println!("Last run: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Last run: never"),
    }

    println!("\nSources:");
    for id in ALL_SOURCES {
        let enabled = if config.is_enabled(id) { "enabled" } else { "disabled" };
        match state.source(id) {
            Some(rec) => {
                let success = rec
                    .last_success_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "  - {:<11} {:<9} last: {:<9} rows: {:<5} last success: {}",
                    id,
                    enabled,
                    rec.status.as_str(),
                    rec.rows_written,
                    success
                );
                if let Some(err) = &rec.last_error {
                    println!("      error: {err}");
                }
            }
            None => println!("  - {:<11} {:<9} no runs yet", id, enabled),
        }
    }

    Ok(())
}
