//! Ingestion orchestration (C3, §4.3): the live path that turns one
//! `CheckedItem` observation into a stored sample and zero or more
//! events, mirroring `event.py::record_event`'s "always record, notify
//! only if `should_notify`" split and `price_repository.py`'s
//! read-before-write ordering.
//!
//! Every read needed by a detector (`latest`, the all-time minimum, the
//! per-window minimums, `out_of_stock_duration_hours`) is snapshotted
//! before `insert_sample` runs, per §9 "Implicit snapshot before
//! write": reading back from the store after the merge would let the
//! new sample contaminate its own thresholds.

use anyhow::Result;
use chrono::NaiveDateTime;
use tracing::{info, warn};

use crate::config::Config;
use crate::detector;
use crate::model::{CheckedItem, CrawlStatus, EventResult, EventType, Stock};
use crate::notify::Notifier;
use crate::store::HistoryStore;

pub struct IngestOutcome {
    pub item_id: i64,
    pub events: Vec<EventType>,
}

/// Runs the full live ingest pipeline for a single checked item.
///
/// `now` is threaded through explicitly end to end (P5): a single call
/// sees one consistent notion of "now" no matter how long the detectors
/// or the notifier dispatch take.
pub async fn ingest(
    store: &HistoryStore,
    notifier: &dyn Notifier,
    config: &Config,
    checked: CheckedItem,
    now: NaiveDateTime,
) -> Result<IngestOutcome> {
    let checked = checked.normalized();
    let ignore_hours = config.check.drop.ignore.hour;

    let item_id = store
        .upsert_item(
            &checked.name,
            &checked.store,
            checked.url.as_deref(),
            checked.thumb_url.as_deref(),
            checked.search_keyword.as_deref(),
            checked.search_cond.as_deref(),
        )
        .await?;

    // --- snapshot everything the detectors need before the write ---
    let previous = store.latest(item_id).await?;
    let previous_stock = previous.as_ref().map(|p| p.stock);
    let out_of_stock_hours = store.out_of_stock_duration_hours(item_id, now).await?;
    let no_data_hours = store.no_data_duration_hours(item_id, now).await?;

    let last_lowest_event_price = store.last_event(item_id, EventType::LowestPrice).await?.and_then(|e| e.price);
    let all_time_min = store.lowest_in_period(item_id, None, now).await?;
    let windows = config.check.drop.sorted_windows();
    let mut window_lowest = Vec::with_capacity(windows.len());
    for window in &windows {
        window_lowest.push((window.days, store.lowest_in_period(item_id, Some(window.days), now).await?));
    }
    let has_successful_crawl_24h = store
        .has_successful_crawl_in_hours(item_id, detector::CRAWL_FAILURE_LOOKBACK_HOURS, now)
        .await?;

    // --- run detectors in §4.3's grouping order ---
    let mut raw_results: Vec<EventResult> = Vec::new();

    if let Some(result) = detector::check_back_in_stock(
        previous_stock,
        checked.stock,
        checked.crawl_status,
        out_of_stock_hours,
        detector::BACK_IN_STOCK_MIN_HOURS,
    ) {
        raw_results.push(result);
    }

    if checked.crawl_status == CrawlStatus::Success && checked.stock == Stock::InStock {
        // Detect on the raw stored price, not the read-time "effective
        // price" (§3.2): the history aggregates being compared against
        // are raw too, and scaling only one side fires spurious events.
        if let Some(price) = checked.price {
            let currency_rate = detector::currency_rate_for(config, &checked.price_unit);

            if let Some(result) =
                detector::check_lowest_price(price, checked.stock, all_time_min, last_lowest_event_price, &config.check.lowest, currency_rate)
            {
                raw_results.push(result);
            }

            let lookup = |days: i64| window_lowest.iter().find(|(d, _)| *d == days).and_then(|(_, v)| *v);
            if let Some(result) = detector::check_price_drop(price, checked.stock, &windows, lookup, currency_rate) {
                raw_results.push(result);
            }
        }
    } else if checked.crawl_status == CrawlStatus::Failure {
        if let Some(result) = detector::check_crawl_failure(has_successful_crawl_24h) {
            raw_results.push(result);
        }
    } else if checked.price.is_none() && checked.stock == Stock::Unknown {
        if let Some(result) = detector::check_data_retrieval_failure(no_data_hours, detector::FAILURE_THRESHOLD_HOURS) {
            raw_results.push(result);
        }
    }

    // --- apply the hourly-merge write now that every read is done ---
    store.insert_sample(item_id, checked.price, checked.stock, checked.crawl_status, now).await?;

    // --- de-dup, record (always) and notify (only if should_notify) ---
    // crawl_failure's de-dup window is the same fixed 24h as its trigger
    // (§4.2.2); every other event type uses the configurable ignore_hours.
    let mut fired = Vec::new();
    for mut result in raw_results {
        let dedup_hours = if result.event_type == EventType::CrawlFailure {
            detector::CRAWL_FAILURE_LOOKBACK_HOURS
        } else {
            ignore_hours
        };
        if store.has_event_in_hours(item_id, result.event_type, dedup_hours, now).await? {
            result.should_notify = false;
        }
        handle_event(store, notifier, item_id, checked.url.as_deref(), result, now, &mut fired).await?;
    }

    Ok(IngestOutcome { item_id, events: fired })
}

async fn handle_event(
    store: &HistoryStore,
    notifier: &dyn Notifier,
    item_id: i64,
    url: Option<&str>,
    result: EventResult,
    now: NaiveDateTime,
    fired: &mut Vec<EventType>,
) -> Result<()> {
    let event_type = result.event_type;
    let should_notify = result.should_notify;
    let event_id = store.insert_event(item_id, &result, url, false, now).await?;

    if should_notify {
        match notifier.notify(item_id, &result, url).await {
            Ok(()) => {
                store.mark_notified(event_id).await?;
                info!(item_id, ?event_type, "notified event");
            }
            Err(err) => {
                warn!(item_id, ?event_type, error = %err, "notification failed, event stays unnotified");
            }
        }
    }

    fired.push(event_type);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullNotifier;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    fn item(price: Option<i64>, stock: Stock, crawl_status: CrawlStatus) -> CheckedItem {
        CheckedItem {
            name: "Widget".into(),
            store: "storeA".into(),
            url: Some("http://x/1".into()),
            price,
            stock,
            crawl_status,
            price_unit: "JPY".into(),
            thumb_url: None,
            search_keyword: None,
            search_cond: None,
        }
    }

    // Scenario 1 (§8): first observation.
    #[tokio::test]
    async fn first_observation_fires_no_events() {
        let store = HistoryStore::open_in_memory().unwrap();
        let notifier = NullNotifier::default();
        let config = Config::default();
        let outcome = ingest(&store, &notifier, &config, item(Some(1000), Stock::InStock, CrawlStatus::Success), now())
            .await
            .unwrap();
        assert!(outcome.events.is_empty());
    }

    // Scenario 2 (§8): new all-time low at t=2h.
    #[tokio::test]
    async fn new_all_time_low_fires_lowest_price() {
        let store = HistoryStore::open_in_memory().unwrap();
        let notifier = NullNotifier::default();
        let config = Config::default();

        ingest(&store, &notifier, &config, item(Some(1000), Stock::InStock, CrawlStatus::Success), now()).await.unwrap();
        let outcome = ingest(
            &store,
            &notifier,
            &config,
            item(Some(900), Stock::InStock, CrawlStatus::Success),
            now() + chrono::Duration::hours(2),
        )
        .await
        .unwrap();
        assert!(outcome.events.contains(&EventType::LowestPrice));

        let events = store.events_for_item(outcome.item_id).await.unwrap();
        let lowest = events.iter().find(|e| e.event_type == EventType::LowestPrice).unwrap();
        assert_eq!(lowest.price, Some(900));
        assert_eq!(lowest.old_price, Some(1000));
    }

    // Scenario 3 (§8): a below-low sample landing in the same hour
    // bucket as the first still fires against the pre-ingest snapshot.
    #[tokio::test]
    async fn below_low_within_same_hour_still_fires_against_prior_snapshot() {
        let store = HistoryStore::open_in_memory().unwrap();
        let notifier = NullNotifier::default();
        let config = Config::default();

        ingest(&store, &notifier, &config, item(Some(1000), Stock::InStock, CrawlStatus::Success), now()).await.unwrap();
        let outcome = ingest(
            &store,
            &notifier,
            &config,
            item(Some(800), Stock::InStock, CrawlStatus::Success),
            now() + chrono::Duration::minutes(30),
        )
        .await
        .unwrap();
        assert!(outcome.events.contains(&EventType::LowestPrice));

        let sample = store.latest(outcome.item_id).await.unwrap().unwrap();
        assert_eq!(sample.price, Some(800), "merge policy still folds into the same bucket");
    }

    // Scenario 4 (§8): a short stock flicker must not fire back_in_stock.
    #[tokio::test]
    async fn brief_stock_flicker_does_not_fire_back_in_stock() {
        let store = HistoryStore::open_in_memory().unwrap();
        let notifier = NullNotifier::default();
        let config = Config::default();

        ingest(&store, &notifier, &config, item(Some(1000), Stock::InStock, CrawlStatus::Success), now()).await.unwrap();
        ingest(
            &store,
            &notifier,
            &config,
            item(None, Stock::OutOfStock, CrawlStatus::Success),
            now() + chrono::Duration::hours(1),
        )
        .await
        .unwrap();
        let outcome = ingest(
            &store,
            &notifier,
            &config,
            item(Some(1000), Stock::InStock, CrawlStatus::Success),
            now() + chrono::Duration::hours(2),
        )
        .await
        .unwrap();
        assert!(!outcome.events.contains(&EventType::BackInStock));
    }

    // Scenario 5 (§8): sustained out-of-stock then restock fires exactly once.
    #[tokio::test]
    async fn sustained_out_of_stock_then_restock_fires_back_in_stock_once() {
        let store = HistoryStore::open_in_memory().unwrap();
        let notifier = NullNotifier::default();
        let config = Config::default();

        ingest(&store, &notifier, &config, item(Some(1000), Stock::InStock, CrawlStatus::Success), now()).await.unwrap();
        for h in 1..=5 {
            ingest(
                &store,
                &notifier,
                &config,
                item(None, Stock::OutOfStock, CrawlStatus::Success),
                now() + chrono::Duration::hours(h),
            )
            .await
            .unwrap();
        }
        let outcome = ingest(
            &store,
            &notifier,
            &config,
            item(Some(1000), Stock::InStock, CrawlStatus::Success),
            now() + chrono::Duration::hours(6),
        )
        .await
        .unwrap();
        assert_eq!(outcome.events.iter().filter(|e| **e == EventType::BackInStock).count(), 1);
    }

    // §4.2.2: crawl_failure fires on the very first failed sample, since
    // there is no successful crawl in the lookback window at all.
    #[tokio::test]
    async fn crawl_failure_fires_on_first_failure_with_no_prior_success() {
        let store = HistoryStore::open_in_memory().unwrap();
        let notifier = NullNotifier::default();
        let config = Config::default();

        let outcome = ingest(&store, &notifier, &config, item(None, Stock::Unknown, CrawlStatus::Failure), now()).await.unwrap();
        assert!(outcome.events.contains(&EventType::CrawlFailure));
    }

    // §4.2.2: a success within the last 24h suppresses crawl_failure even
    // mid a long run of failures, since the trigger is "no success in
    // 24h", not "N contiguous hours of failure".
    #[tokio::test]
    async fn crawl_failure_suppressed_by_a_recent_success() {
        let store = HistoryStore::open_in_memory().unwrap();
        let notifier = NullNotifier::default();
        let config = Config::default();

        ingest(&store, &notifier, &config, item(Some(1000), Stock::InStock, CrawlStatus::Success), now()).await.unwrap();
        let outcome = ingest(
            &store,
            &notifier,
            &config,
            item(None, Stock::Unknown, CrawlStatus::Failure),
            now() + chrono::Duration::hours(10),
        )
        .await
        .unwrap();
        assert!(!outcome.events.contains(&EventType::CrawlFailure));
    }

    // Scenario 6 (§8): the 7-day window fires before the 30-day one.
    #[tokio::test]
    async fn price_drop_window_hit_prefers_shortest_window() {
        let store = HistoryStore::open_in_memory().unwrap();
        let notifier = NullNotifier::default();
        let mut config = Config::default();
        config.check.drop.windows = vec![
            crate::config::PriceDropWindow { days: 7, rate: Some(10.0), value: None },
            crate::config::PriceDropWindow { days: 30, rate: Some(5.0), value: None },
        ];

        for day in 0..10 {
            ingest(
                &store,
                &notifier,
                &config,
                item(Some(1000), Stock::InStock, CrawlStatus::Success),
                now() + chrono::Duration::days(day),
            )
            .await
            .unwrap();
        }
        let outcome = ingest(
            &store,
            &notifier,
            &config,
            item(Some(890), Stock::InStock, CrawlStatus::Success),
            now() + chrono::Duration::days(11),
        )
        .await
        .unwrap();
        assert!(outcome.events.contains(&EventType::PriceDrop));
        let events = store.events_for_item(outcome.item_id).await.unwrap();
        let drop = events.iter().find(|e| e.event_type == EventType::PriceDrop).unwrap();
        assert_eq!(drop.threshold_days, Some(7));
    }

    // P5: de-dup suppresses notification (not the record) within ignore_hours.
    #[tokio::test]
    async fn dedup_suppresses_repeat_notification_but_still_records_event() {
        let store = HistoryStore::open_in_memory().unwrap();
        let notifier = NullNotifier::default();
        let config = Config::default();

        ingest(&store, &notifier, &config, item(Some(1000), Stock::InStock, CrawlStatus::Success), now()).await.unwrap();
        let outcome = ingest(
            &store,
            &notifier,
            &config,
            item(Some(900), Stock::InStock, CrawlStatus::Success),
            now() + chrono::Duration::hours(1),
        )
        .await
        .unwrap();
        let item_id = outcome.item_id;

        // Drop the price to a new record low twice within the same hour's
        // dedup window; the second one should still be recorded.
        ingest(
            &store,
            &notifier,
            &config,
            item(Some(850), Stock::InStock, CrawlStatus::Success),
            now() + chrono::Duration::hours(2),
        )
        .await
        .unwrap();
        ingest(
            &store,
            &notifier,
            &config,
            item(Some(800), Stock::InStock, CrawlStatus::Success),
            now() + chrono::Duration::hours(3),
        )
        .await
        .unwrap();

        let events = store.events_for_item(item_id).await.unwrap();
        let lowest_events: Vec<_> = events.iter().filter(|e| e.event_type == EventType::LowestPrice).collect();
        assert!(lowest_events.len() >= 2, "both record lows must be persisted: {lowest_events:?}");
        assert!(!lowest_events.last().unwrap().notified, "the de-duped repeat must not be marked notified");
    }
}
