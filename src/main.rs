//! Grocy to OurGroceries shopping list sync.
//!
//! Reads shopping lists from a Grocy instance and mirrors them into
//! OurGroceries lists, once with `--once` or on an interval.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use grocy_og_sync::{
    Config, GrocyClient, Orchestrator, OurGroceriesClient, PairOutcome, RunReport,
};

#[derive(Parser)]
#[command(name = "grocy-og-sync")]
#[command(version)]
#[command(about = "Sync Grocy shopping lists into OurGroceries", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Run a single sync pass and exit
    #[arg(long)]
    once: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.debug {
        "grocy_og_sync=debug"
    } else {
        "grocy_og_sync=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(cli.config)?;
    config.validate()?;

    let grocy = GrocyClient::from_config(&config.grocy)?;
    let ourgroceries = OurGroceriesClient::from_config(&config.ourgroceries)?;
    let builder = config.snapshot_builder();

    let orchestrator = Orchestrator::new(
        &grocy,
        &ourgroceries,
        &builder,
        &config.sync.lists,
        config.sync.retry.clone(),
        config.sync.deletion.clone(),
    );

    if cli.once {
        let report = orchestrator.run().await?;
        print_report(&report);
        if report.has_failures() {
            std::process::exit(1);
        }
        return Ok(());
    }

    let interval = Duration::from_secs(config.sync.interval_minutes * 60);
    tracing::info!(
        minutes = config.sync.interval_minutes,
        "running on an interval, ctrl-c to stop"
    );
    loop {
        match orchestrator.run().await {
            Ok(report) => print_report(&report),
            Err(e) => tracing::error!("sync run failed: {}", e),
        }
        // lookups must not go stale across runs
        grocy.clear_caches().await;
        ourgroceries.clear_caches().await;
        tokio::time::sleep(interval).await;
    }
}

fn print_report(report: &RunReport) {
    for pair in &report.pairs {
        match &pair.outcome {
            PairOutcome::Completed(result) => {
                let status = if result.is_clean() { "✓" } else { "✗" };
                let mut line = format!(
                    "  {} list {} -> '{}': {} added, {} removed, {} updated",
                    status,
                    pair.source_list_id,
                    pair.destination_list,
                    result.added,
                    result.removed,
                    result.updated
                );
                if result.dry_run_removals > 0 {
                    line.push_str(&format!(
                        ", {} removal{} held back (dry run)",
                        result.dry_run_removals,
                        if result.dry_run_removals == 1 { "" } else { "s" }
                    ));
                }
                if !result.failures.is_empty() {
                    line.push_str(&format!(", {} failed", result.failures.len()));
                }
                println!("{}", line);
            }
            PairOutcome::Skipped(e) => {
                println!(
                    "  ✗ list {} -> '{}': skipped ({})",
                    pair.source_list_id, pair.destination_list, e
                );
            }
        }
    }

    println!();
    if report.has_failures() {
        println!("Sync finished with failures.");
    } else {
        println!("Sync complete.");
    }
}
