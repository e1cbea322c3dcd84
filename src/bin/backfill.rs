//! pricewatch-backfill: admin CLI for supplementary backfill, full
//! event rebuild and the `events.url` column backfill (§4.5, §4.6).
//!
//! Grounded on `scripts/backfill_events.py`'s docopt flag set, ported to
//! `clap` derive the way the teacher's binaries parse arguments.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use pricewatch_core::{backfill, Config, HistoryStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pricewatch-backfill", about = "Event backfill and rebuild admin tool")]
struct Cli {
    #[arg(long, default_value = "config.yaml", env = "PRICEWATCH_CONFIG")]
    config: String,

    /// Report what would change without writing anything.
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fill in events the live path missed, without touching existing rows.
    Supplement,
    /// Delete every rebuildable event (lowest_price, price_drop) and replay history from scratch.
    Rebuild,
    /// Fill events.url from each event's owning item's current url.
    BackfillUrls,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::load(&cli.config).context("loading configuration")?;
    let store = HistoryStore::open(&config.db_path).context("opening history store")?;

    match cli.command {
        Command::Supplement => {
            let report = backfill::run_supplementary(&store, &config, cli.dry_run).await?;
            info!(?report, "supplementary backfill finished");
        }
        Command::Rebuild => {
            let report = backfill::run_rebuild(&store, &config, cli.dry_run).await?;
            info!(?report, "rebuild finished");
        }
        Command::BackfillUrls => {
            let updated = backfill::backfill_event_urls(&store, cli.dry_run).await?;
            info!(updated, dry_run = cli.dry_run, "event url backfill finished");
        }
    }
    Ok(())
}
