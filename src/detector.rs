//! Event detectors (C2, §4.2) — pure functions over a read-only
//! snapshot of history-store state, one per event type, mirroring the
//! `Option<T>` return style of `signals/detector.rs` and the algorithms
//! of `price_watch/event.py`'s `check_*` functions.
//!
//! Each detector takes exactly the facts it needs rather than the whole
//! store, so the ingest path controls what "now" and "history" mean for
//! a given call (live vs. replay, §9 "Replay window centering").

use chrono::NaiveDateTime;

use crate::config::{Config, PriceDropWindow};
use crate::model::{CrawlStatus, EventResult, EventType, Stock};

/// Default minimum out-of-stock duration before a restock counts as a
/// real event rather than a crawl flicker (§4.2.1).
pub const BACK_IN_STOCK_MIN_HOURS: f64 = 3.0;

/// §4.2.1 `back_in_stock`: fires when the previous successful
/// observation was out of stock for at least `min_hours` and the new
/// one is in stock. De-dup (setting `should_notify=false` on a hit) is
/// the caller's job, since it needs store access this pure function
/// doesn't have.
pub fn check_back_in_stock(
    previous_stock: Option<Stock>,
    new_stock: Stock,
    crawl_status: CrawlStatus,
    out_of_stock_duration_hours: Option<f64>,
    min_hours: f64,
) -> Option<EventResult> {
    if crawl_status != CrawlStatus::Success {
        return None;
    }
    if previous_stock != Some(Stock::OutOfStock) || new_stock != Stock::InStock {
        return None;
    }
    let hours = out_of_stock_duration_hours?;
    if hours < min_hours {
        return None;
    }
    Some(EventResult::new(EventType::BackInStock, true))
}

/// Fixed lookback window for `crawl_failure`'s trigger and de-dup alike
/// (§4.2.2): not the configurable `ignore_hours` used elsewhere.
pub const CRAWL_FAILURE_LOOKBACK_HOURS: i64 = 24;

/// §4.2.2 `crawl_failure`: fires when there has been no successful crawl
/// in the last 24 hours, mirroring `event.py::check_crawl_failure`'s
/// `has_successful_crawl_in_hours(item_id, 24)` gate. A single
/// long-but-recent-enough success suppresses it even mid a failure run,
/// which a contiguous-failure-duration count (what this used to check)
/// cannot express.
pub fn check_crawl_failure(has_successful_crawl_in_24h: bool) -> Option<EventResult> {
    if has_successful_crawl_in_24h {
        None
    } else {
        Some(EventResult::new(EventType::CrawlFailure, true))
    }
}

/// §4.2.3 `data_retrieval_failure`: a successful crawl that returned no
/// usable price/stock data (crawl succeeded but the page had nothing
/// parseable), sustained for at least `threshold_hours`. Distinct from
/// `crawl_failure`, which is keyed on the acquisition attempt itself
/// failing outright.
pub fn check_data_retrieval_failure(no_data_duration_hours: Option<f64>, threshold_hours: f64) -> Option<EventResult> {
    let hours = no_data_duration_hours?;
    if hours >= threshold_hours {
        Some(EventResult::new(EventType::DataRetrievalFailure, true))
    } else {
        None
    }
}

/// §4.2.4 `lowest_price`: fires when `new_price` is strictly below the
/// true all-time minimum (`all_time_min`, excluding the current
/// sample). The amount that must clear `lowest_cfg`'s threshold is
/// measured from a separate **baseline**: the price of the most recent
/// prior `lowest_price` event, or `all_time_min` if there has been
/// none. Using the baseline instead of the running minimum for gating
/// is deliberate (§9): it stops a slow grind-down from re-firing on
/// every single-unit new low once one drop has already been announced.
pub fn check_lowest_price(
    new_price: i64,
    stock: Stock,
    all_time_min: Option<i64>,
    last_lowest_event_price: Option<i64>,
    lowest_cfg: &crate::config::LowestConfig,
    currency_rate: f64,
) -> Option<EventResult> {
    if stock != Stock::InStock {
        return None;
    }
    // First ever in-stock sample: nothing to compare against yet (§9 open question).
    let all_time_min = all_time_min?;
    if new_price >= all_time_min {
        return None;
    }

    let baseline = last_lowest_event_price.unwrap_or(all_time_min);
    let drop_amount = baseline - new_price;
    if drop_amount <= 0 {
        return None;
    }

    if !clears_threshold(drop_amount, baseline, lowest_cfg.rate, lowest_cfg.value, currency_rate) {
        return None;
    }

    Some(EventResult::new(EventType::LowestPrice, true).with_prices(Some(new_price), Some(baseline)))
}

/// Shared OR-gate for `lowest_price`/`price_drop`: fires if either the
/// percent-drop clears `rate`, or the currency-scaled drop clears
/// `value`. Unconfigured thresholds do not block the other clause; with
/// neither configured, any strictly-positive drop clears.
fn clears_threshold(drop_amount: i64, baseline: i64, rate: Option<f64>, value: Option<i64>, currency_rate: f64) -> bool {
    if rate.is_none() && value.is_none() {
        return true;
    }
    let rate_ok = rate
        .map(|r| baseline > 0 && (drop_amount as f64 / baseline as f64 * 100.0) >= r)
        .unwrap_or(false);
    let value_ok = value.map(|v| (drop_amount as f64 * currency_rate) >= v as f64).unwrap_or(false);
    rate_ok || value_ok
}

/// §4.2.5 `price_drop`: checks each configured window (ascending by
/// `days`, pre-sorted by `DropConfig::sorted_windows`) and returns the
/// first one the new price clears, i.e. the shortest window that fires.
/// A window's threshold is satisfied when the drop from that window's
/// own past-lowest price meets its `rate` or `value` bound.
pub fn check_price_drop(
    new_price: i64,
    stock: Stock,
    windows: &[PriceDropWindow],
    lowest_for_window: impl Fn(i64) -> Option<i64>,
    currency_rate: f64,
) -> Option<EventResult> {
    if stock != Stock::InStock {
        return None;
    }
    for window in windows {
        let Some(past_lowest) = lowest_for_window(window.days) else {
            continue;
        };
        if new_price >= past_lowest {
            continue;
        }
        let drop_amount = past_lowest - new_price;
        if clears_threshold(drop_amount, past_lowest, window.rate, window.value, currency_rate) {
            return Some(
                EventResult::new(EventType::PriceDrop, true)
                    .with_prices(Some(new_price), Some(past_lowest))
                    .with_threshold_days(window.days),
            );
        }
    }
    None
}

/// Hours threshold used by both failure detectors (§4.2.2, §4.2.3): a
/// fixed constant in the original rather than a configured value.
pub const FAILURE_THRESHOLD_HOURS: f64 = 6.0;

/// Convenience for `ingest` to fetch `LowestConfig`/currency inputs for
/// a store in one place.
pub fn currency_rate_for(config: &Config, price_unit: &str) -> f64 {
    config.currency_rate_for_label(price_unit)
}

/// `NaiveDateTime`-free marker type kept only for doc clarity at call
/// sites that pass "now" through several layers of the ingest pipeline.
pub type Now = NaiveDateTime;
