//! Integration coverage for `HistoryStore` against a real on-disk
//! sqlite file rather than `:memory:`, exercising `open()`'s migration
//! + table-creation path end to end. Tempfile fixture style mirrors the
//! teacher's `tests/backtest_run_integration.rs`.

use chrono::{Duration, NaiveDate};
use pricewatch_core::{CrawlStatus, HistoryStore, Stock};
use tempfile::tempdir;

fn t(h: i64) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(0, 0, 0).unwrap() + Duration::hours(h)
}

#[tokio::test]
async fn opening_a_fresh_file_creates_a_usable_schema() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("pricewatch.db");

    let store = HistoryStore::open(db_path.to_str().unwrap()).unwrap();
    let item_id = store
        .upsert_item("Widget", "storeA", Some("https://example.invalid/widget"), None, None, None)
        .await
        .unwrap();
    store.insert_sample(item_id, Some(1000), Stock::InStock, CrawlStatus::Success, t(0)).await.unwrap();

    let sample = store.latest(item_id).await.unwrap().unwrap();
    assert_eq!(sample.price, Some(1000));
}

#[tokio::test]
async fn reopening_the_same_file_preserves_data_and_runs_migrations_idempotently() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("pricewatch.db");

    {
        let store = HistoryStore::open(db_path.to_str().unwrap()).unwrap();
        let item_id = store
            .upsert_item("Widget", "storeA", Some("https://example.invalid/widget"), None, None, None)
            .await
            .unwrap();
        store.insert_sample(item_id, Some(1000), Stock::InStock, CrawlStatus::Success, t(0)).await.unwrap();
    }

    let store = HistoryStore::open(db_path.to_str().unwrap()).unwrap();
    let items = store.all_items().await.unwrap();
    assert_eq!(items.len(), 1);
    let sample = store.latest(items[0].id).await.unwrap().unwrap();
    assert_eq!(sample.price, Some(1000));
}
