//! pricewatch coordinator: schedules per-store acquisition loops and
//! drives each observation through ingest (§4.7).
//!
//! Stores run concurrently (`tokio::spawn` per store); items within a
//! store are checked one at a time with an inter-request pacing delay,
//! mirroring the teacher's `parallel_data_collection` split between
//! cross-source concurrency and in-source serialization.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use dotenv::dotenv;
use pricewatch_core::adapter::{Adapter, StaticAdapter};
use pricewatch_core::model::{CheckedItem, CrawlStatus, Stock};
use pricewatch_core::notify::{NullNotifier, Notifier, WebhookNotifier};
use pricewatch_core::{ingest, Config, HistoryStore};
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pricewatch", about = "Multi-storefront price monitoring coordinator")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml", env = "PRICEWATCH_CONFIG")]
    config: String,

    /// Run exactly one acquisition pass per store, then exit.
    #[arg(long)]
    once: bool,

    /// JSON-webhook endpoint to notify events to. Falls back to a
    /// no-op notifier when unset, so the coordinator is runnable
    /// without any external receiver wired up.
    #[arg(long, env = "PRICEWATCH_WEBHOOK_URL")]
    webhook_url: Option<String>,
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
    let store = Arc::new(HistoryStore::open(&config.db_path).context("opening history store")?);

    let notifier: Arc<dyn Notifier> = match &cli.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => {
            warn!("no webhook url configured, notifications will be dropped");
            Arc::new(NullNotifier::default())
        }
    };

    if config.stores.is_empty() {
        warn!("no stores configured, nothing to do");
        return Ok(());
    }

    info!(stores = config.stores.len(), interval_sec = config.check.interval_sec, "starting coordinator");

    let config = Arc::new(config);
    let mut handles = Vec::new();
    for store_cfg in config.stores.clone() {
        let store = store.clone();
        let notifier = notifier.clone();
        let config = config.clone();
        let once = cli.once;
        handles.push(tokio::spawn(async move {
            run_store_loop(store, notifier, config, store_cfg.name, once).await;
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

/// One store's acquisition loop: check its item(s) serially, pacing
/// between requests, then sleep for the configured interval.
async fn run_store_loop(
    store: Arc<HistoryStore>,
    notifier: Arc<dyn Notifier>,
    config: Arc<Config>,
    store_name: String,
    once: bool,
) {
    let adapter = demo_adapter(&store_name);
    loop {
        let now = Utc::now().naive_utc();
        let checked = match adapter.check().await {
            Ok(checked) => checked,
            Err(err) => {
                warn!(store = %store_name, error = %err, "adapter check failed, recording as crawl failure");
                failed_sample(&store_name)
            }
        };

        match ingest::ingest(&store, notifier.as_ref(), &config, checked, now).await {
            Ok(outcome) => {
                if !outcome.events.is_empty() {
                    info!(item_id = outcome.item_id, events = ?outcome.events, store = %store_name, "events fired");
                }
            }
            Err(err) => error!(store = %store_name, error = %err, "ingest failed"),
        }

        if once {
            return;
        }
        sleep(StdDuration::from_secs(config.check.interval_sec)).await;
    }
}

/// Converts an `Adapter::check` transport error into the same
/// `crawl_status: Failure` observation a storefront reporting its own
/// failure would produce, so one bad adapter call is stored like any
/// other failed crawl rather than escaping the ingest loop (§7).
fn failed_sample(store_name: &str) -> CheckedItem {
    CheckedItem {
        name: format!("{store_name}/demo-item"),
        store: store_name.to_string(),
        url: Some(format!("https://example.invalid/{store_name}/demo-item")),
        price: None,
        stock: Stock::Unknown,
        crawl_status: CrawlStatus::Failure,
        price_unit: "JPY".to_string(),
        thumb_url: None,
        search_keyword: None,
        search_cond: None,
    }
}

/// Stand-in for a real per-storefront adapter (§6.1 Non-goal): reports
/// the same item as in stock at a fixed price every call, so the
/// coordinator is runnable end to end without a live storefront.
fn demo_adapter(store_name: &str) -> StaticAdapter {
    StaticAdapter::once(
        format!("{store_name}/demo-item"),
        CheckedItem {
            name: "Demo Item".to_string(),
            store: store_name.to_string(),
            url: Some(format!("https://example.invalid/{store_name}/demo-item")),
            price: Some(1000),
            stock: Stock::InStock,
            crawl_status: CrawlStatus::Success,
            price_unit: "JPY".to_string(),
            thumb_url: None,
            search_keyword: None,
            search_cond: None,
        },
    )
}
