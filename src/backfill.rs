//! Backfill and rebuild (C5, §4.5, §4.6).
//!
//! Grounded on `scripts/backfill_events.py`: replay the rebuildable
//! event types (`lowest_price`, `price_drop`) over stored price history
//! rather than over live observations. Two modes share the same replay
//! core:
//!
//! - **supplementary** (`run_supplementary`): fills in events the live
//!   path missed (e.g. after downtime) without touching existing rows.
//! - **rebuild** (`run_rebuild`): deletes every rebuildable event first,
//!   then replays from scratch — used after a detection-logic change.
//!
//! `back_in_stock`, `crawl_failure` and `data_retrieval_failure` are
//! deliberately not replayed: they are not derivable from price history
//! alone (§3.1 `EventType::is_rebuildable`).

use anyhow::Result;
use chrono::NaiveDateTime;
use tracing::info;

use crate::config::Config;
use crate::detector;
use crate::model::{Item, Stock};
use crate::store::HistoryStore;

/// De-dup window for replayed events, centered on the sample's own
/// timestamp rather than "now" (§9). Matches the live path's 24h
/// cooldown for symmetry, though the two windows serve different ends.
const REPLAY_DEDUP_HOURS: i64 = 24;

#[derive(Debug, Default, Clone)]
pub struct BackfillReport {
    pub items_scanned: usize,
    pub lowest_price_events: usize,
    pub price_drop_events: usize,
    pub skipped_existing: usize,
}

impl BackfillReport {
    fn merge(&mut self, other: BackfillReport) {
        self.items_scanned += other.items_scanned;
        self.lowest_price_events += other.lowest_price_events;
        self.price_drop_events += other.price_drop_events;
        self.skipped_existing += other.skipped_existing;
    }
}

pub async fn run_supplementary(store: &HistoryStore, config: &Config, dry_run: bool) -> Result<BackfillReport> {
    let items = store.all_items().await?;
    let mut report = BackfillReport::default();
    for item in items {
        report.merge(replay_item(store, config, &item, dry_run).await?);
    }
    info!(?report, dry_run, "supplementary backfill complete");
    Ok(report)
}

pub async fn run_rebuild(store: &HistoryStore, config: &Config, dry_run: bool) -> Result<BackfillReport> {
    if !dry_run {
        let deleted = store.delete_rebuildable_events().await?;
        info!(deleted, "cleared rebuildable events before rebuild");
    }
    let mut report = run_supplementary(store, config, dry_run).await?;
    report.items_scanned = store.all_items().await?.len();
    Ok(report)
}

/// §4.6: fills `events.url` for rows whose owning item has a URL but
/// whose event predates the column's existence.
pub async fn backfill_event_urls(store: &HistoryStore, dry_run: bool) -> Result<usize> {
    store.backfill_event_urls(dry_run).await
}

async fn replay_item(store: &HistoryStore, config: &Config, item: &Item, dry_run: bool) -> Result<BackfillReport> {
    let mut report = BackfillReport { items_scanned: 1, ..Default::default() };
    let samples = store.price_history_asc(item.id).await?;
    if samples.is_empty() {
        return Ok(report);
    }

    let price_unit = config
        .stores
        .iter()
        .find(|s| s.name == item.store)
        .and_then(|s| s.price_unit.as_deref())
        .unwrap_or("");
    let currency_rate = detector::currency_rate_for(config, price_unit);
    let windows = config.check.drop.sorted_windows();

    // Baseline is the price of the last LOWEST_PRICE event fired during
    // this replay, not a running minimum (§9/§4.2.4): prevents a slow
    // grind-down from re-firing on every single-unit new low. The
    // trigger check still uses the true running minimum, tracked
    // separately below.
    let mut last_lowest_event_price: Option<i64> = None;

    for sample in &samples {
        if sample.stock != Stock::InStock {
            continue;
        }
        // Detect on the raw stored price (§3.2): `lowest_before`/
        // `lowest_in_period_before` read the raw column too.
        let Some(price) = sample.price else { continue };
        let all_time_min = store.lowest_before(item.id, sample.time).await?;

        if let Some(result) = detector::check_lowest_price(
            price,
            sample.stock,
            all_time_min,
            last_lowest_event_price,
            &config.check.lowest,
            currency_rate,
        ) {
            if store.has_event_near(item.id, result.event_type, sample.time, REPLAY_DEDUP_HOURS).await? {
                report.skipped_existing += 1;
            } else if !dry_run {
                store.insert_event(item.id, &result, item.url.as_deref(), false, sample.time).await?;
                report.lowest_price_events += 1;
            } else {
                report.lowest_price_events += 1;
            }
            last_lowest_event_price = Some(price);
        }

        if let Some(result) = replay_price_drop(store, item.id, &windows, price, sample.time, currency_rate).await? {
            if store.has_event_near(item.id, result.event_type, sample.time, REPLAY_DEDUP_HOURS).await? {
                report.skipped_existing += 1;
            } else if !dry_run {
                store.insert_event(item.id, &result, item.url.as_deref(), false, sample.time).await?;
                report.price_drop_events += 1;
            } else {
                report.price_drop_events += 1;
            }
        }
    }

    Ok(report)
}

async fn replay_price_drop(
    store: &HistoryStore,
    item_id: i64,
    windows: &[crate::config::PriceDropWindow],
    price: i64,
    at: NaiveDateTime,
    currency_rate: f64,
) -> Result<Option<crate::model::EventResult>> {
    let mut lowest_cache = Vec::with_capacity(windows.len());
    for window in windows {
        let lowest = store.lowest_in_period_before(item_id, at, window.days).await?;
        lowest_cache.push((window.days, lowest));
    }
    let lookup = |days: i64| lowest_cache.iter().find(|(d, _)| *d == days).and_then(|(_, v)| *v);
    Ok(detector::check_price_drop(price, Stock::InStock, windows, lookup, currency_rate))
}
