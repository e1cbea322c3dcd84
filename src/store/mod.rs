//! History Store (C1) — the sole source of truth for items, price
//! samples and events.
//!
//! Grounded on `vault/vault_db.rs`'s shape: a `rusqlite::Connection`
//! behind a `tokio::sync::Mutex`, WAL mode, `CREATE TABLE IF NOT EXISTS`
//! DDL run on open, prepared statements per query. The hourly-merge
//! policy (§4.1) is lifted from
//! `price_watch/managers/history/price_repository.py::insert_price_history`,
//! with one deliberate correction from the spec: when a failed sample
//! lands in an hour-bucket that already holds a successful one, the
//! stored `crawl_status` stays `1` (success) — the Python original sets
//! it to the new failed sample's `0` while still keeping the old
//! price/stock, which would violate invariant B (`crawl_status=0` implies
//! `price`/`stock` are both null). The spec calls this out explicitly
//! (§4.1 point 2); we follow the spec over the original here.

mod migrations;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDateTime, Timelike};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::debug;

use crate::model::{CrawlStatus, Event, EventResult, EventType, Item, PriceSample, Stock};

const TIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

fn fmt_time(t: NaiveDateTime) -> String {
    t.format(TIME_FMT).to_string()
}

fn parse_time(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIME_FMT).context("parsing stored timestamp")
}

pub(crate) fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS items (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            item_key        TEXT NOT NULL UNIQUE,
            url             TEXT,
            name            TEXT NOT NULL,
            store           TEXT NOT NULL,
            thumb_url       TEXT,
            search_keyword  TEXT,
            search_cond     TEXT,
            created_at      TIMESTAMP DEFAULT (DATETIME('now','localtime')),
            updated_at      TIMESTAMP DEFAULT (DATETIME('now','localtime'))
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_items_item_key ON items(item_key);

        CREATE TABLE IF NOT EXISTS price_history (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            item_id      INTEGER NOT NULL REFERENCES items(id),
            price        INTEGER,
            stock        INTEGER,
            crawl_status INTEGER NOT NULL DEFAULT 1,
            time         TIMESTAMP NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_price_history_item_time ON price_history(item_id, time);

        CREATE TABLE IF NOT EXISTS events (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            item_id         INTEGER NOT NULL REFERENCES items(id),
            event_type      TEXT NOT NULL,
            price           INTEGER,
            old_price       INTEGER,
            threshold_days  INTEGER,
            url             TEXT,
            notified        INTEGER NOT NULL DEFAULT 0,
            created_at      TIMESTAMP NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_item_type_created
            ON events(item_id, event_type, created_at);",
    )?;
    Ok(())
}

pub struct HistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl HistoryStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("opening database {path}"))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();
        migrations::run_all(&conn)?;
        create_tables(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_all(&conn)?;
        create_tables(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// §4.1 `upsert_item`: returns the existing id on key collision,
    /// refreshing display fields (name, thumbnail) when they differ.
    pub async fn upsert_item(
        &self,
        name: &str,
        store: &str,
        url: Option<&str>,
        thumb_url: Option<&str>,
        search_keyword: Option<&str>,
        search_cond: Option<&str>,
    ) -> Result<i64> {
        let item_key = crate::key::derive(store, url, search_keyword)?;
        let conn = self.conn.lock().await;

        let existing: Option<(i64, String, Option<String>)> = conn
            .query_row(
                "SELECT id, name, thumb_url FROM items WHERE item_key = ?1",
                params![item_key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        if let Some((id, existing_name, existing_thumb)) = existing {
            if existing_name != name || existing_thumb.as_deref() != thumb_url {
                conn.execute(
                    "UPDATE items SET name = ?1, thumb_url = ?2, updated_at = DATETIME('now','localtime')
                     WHERE id = ?3",
                    params![name, thumb_url, id],
                )?;
            }
            return Ok(id);
        }

        conn.execute(
            "INSERT INTO items (item_key, url, name, store, thumb_url, search_keyword, search_cond)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![item_key, url, name, store, thumb_url, search_keyword, search_cond],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn item_by_id(&self, item_id: i64) -> Result<Option<Item>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, item_key, name, store, url, thumb_url, search_keyword, search_cond
             FROM items WHERE id = ?1",
            params![item_id],
            |row| {
                Ok(Item {
                    id: row.get(0)?,
                    item_key: row.get(1)?,
                    name: row.get(2)?,
                    store: row.get(3)?,
                    url: row.get(4)?,
                    thumb_url: row.get(5)?,
                    search_keyword: row.get(6)?,
                    search_cond: row.get(7)?,
                })
            },
        )
        .optional()
        .context("loading item by id")
    }

    pub async fn all_items(&self) -> Result<Vec<Item>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, item_key, name, store, url, thumb_url, search_keyword, search_cond
             FROM items ORDER BY name, store",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Item {
                id: row.get(0)?,
                item_key: row.get(1)?,
                name: row.get(2)?,
                store: row.get(3)?,
                url: row.get(4)?,
                thumb_url: row.get(5)?,
                search_keyword: row.get(6)?,
                search_cond: row.get(7)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("listing items")
    }

    /// §4.1 hourly-merge policy. `now` is passed in explicitly (rather
    /// than read from the system clock) so ingest and its tests share a
    /// single deterministic notion of "now" for a given sample, per P5.
    pub async fn insert_sample(
        &self,
        item_id: i64,
        price: Option<i64>,
        stock: Stock,
        crawl_status: CrawlStatus,
        now: NaiveDateTime,
    ) -> Result<()> {
        let (new_price, new_stock_db) = match crawl_status {
            CrawlStatus::Failure => (None, None),
            CrawlStatus::Success => (price, stock.to_db()),
        };
        let new_crawl_status = crawl_status.to_db();

        let hour_start = now.date().and_hms_opt(now.hour(), 0, 0).unwrap();
        let conn = self.conn.lock().await;

        let existing: Option<(i64, Option<i64>, Option<i64>, i64)> = conn
            .query_row(
                "SELECT id, price, stock, crawl_status FROM price_history
                 WHERE item_id = ?1 AND time >= ?2
                 ORDER BY time DESC LIMIT 1",
                params![item_id, fmt_time(hour_start)],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((existing_id, existing_price, existing_stock, existing_crawl_status)) = existing
        else {
            conn.execute(
                "INSERT INTO price_history (item_id, price, stock, crawl_status, time)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![item_id, new_price, new_stock_db, new_crawl_status, fmt_time(now)],
            )?;
            return Ok(());
        };

        let mut should_update = false;
        let mut final_price = new_price;
        let mut final_stock = new_stock_db;

        if new_crawl_status == 1 {
            if existing_crawl_status == 0 {
                should_update = true;
            } else if let (Some(np), Some(ep)) = (new_price, existing_price) {
                if new_stock_db == Some(1) {
                    final_price = Some(np.min(ep));
                    should_update = np < ep;
                } else {
                    should_update = true;
                }
            } else if (new_price.is_some() && existing_price.is_none())
                || new_stock_db != existing_stock
            {
                should_update = true;
            }
        } else if existing_crawl_status == 1 {
            final_price = existing_price;
            final_stock = existing_stock;
            should_update = true;
        }

        // Spec correction (§4.1 point 2): a failed sample landing on a
        // successful bucket never downgrades crawl_status to 0.
        let final_crawl_status = if new_crawl_status == 1 { 1 } else { existing_crawl_status };

        if should_update {
            conn.execute(
                "UPDATE price_history SET price = ?1, stock = ?2, crawl_status = ?3, time = ?4
                 WHERE id = ?5",
                params![final_price, final_stock, final_crawl_status, fmt_time(now), existing_id],
            )?;
        } else {
            conn.execute(
                "UPDATE price_history SET time = ?1 WHERE id = ?2",
                params![fmt_time(now), existing_id],
            )?;
        }

        debug!(item_id, should_update, "merged sample into hour bucket");
        Ok(())
    }

    fn row_to_sample(item_id: i64, row: &rusqlite::Row) -> rusqlite::Result<PriceSample> {
        let price: Option<i64> = row.get(0)?;
        let stock_db: Option<i64> = row.get(1)?;
        let crawl_status_db: i64 = row.get(2)?;
        let time_str: String = row.get(3)?;
        Ok(PriceSample {
            item_id,
            price,
            stock: Stock::from_db(stock_db),
            crawl_status: CrawlStatus::from_db(crawl_status_db),
            time: parse_time(&time_str).unwrap_or_default(),
        })
    }

    pub async fn latest(&self, item_id: i64) -> Result<Option<PriceSample>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT price, stock, crawl_status, time FROM price_history
             WHERE item_id = ?1 ORDER BY time DESC LIMIT 1",
            params![item_id],
            |row| Self::row_to_sample(item_id, row),
        )
        .optional()
        .context("loading latest sample")
    }

    /// `lowest_in_period(item_id, days)`: `crawl_status=1 AND price IS NOT NULL`,
    /// `days = None` means all history.
    pub async fn lowest_in_period(&self, item_id: i64, days: Option<i64>, now: NaiveDateTime) -> Result<Option<i64>> {
        let conn = self.conn.lock().await;
        match days {
            None => conn
                .query_row(
                    "SELECT MIN(price) FROM price_history
                     WHERE item_id = ?1 AND price IS NOT NULL AND crawl_status = 1",
                    params![item_id],
                    |row| row.get(0),
                )
                .context("lowest_in_period (all time)"),
            Some(days) => {
                let since = fmt_time(now - Duration::days(days));
                conn.query_row(
                    "SELECT MIN(price) FROM price_history
                     WHERE item_id = ?1 AND time >= ?2 AND price IS NOT NULL AND crawl_status = 1",
                    params![item_id, since],
                    |row| row.get(0),
                )
                .context("lowest_in_period (windowed)")
            }
        }
    }

    /// The true all-time minimum strictly before `before`, used by
    /// backfill to reproduce the live path's `all_time_min` trigger
    /// check (distinct from the event-price `baseline` used for
    /// threshold gating, §4.2.4).
    pub async fn lowest_before(&self, item_id: i64, before: NaiveDateTime) -> Result<Option<i64>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT MIN(price) FROM price_history
             WHERE item_id = ?1 AND time < ?2
               AND price IS NOT NULL AND crawl_status = 1 AND stock = 1",
            params![item_id, fmt_time(before)],
            |row| row.get(0),
        )
        .context("lowest_before")
    }

    /// Backfill variant (§4.5): the minimum over the `days` preceding
    /// `before`, rather than the days preceding "now". Also restricted
    /// to in-stock samples, matching
    /// `backfill_events.py::get_lowest_in_period_before`.
    pub async fn lowest_in_period_before(
        &self,
        item_id: i64,
        before: NaiveDateTime,
        days: i64,
    ) -> Result<Option<i64>> {
        let conn = self.conn.lock().await;
        let window_start = fmt_time(before - Duration::days(days));
        conn.query_row(
            "SELECT MIN(price) FROM price_history
             WHERE item_id = ?1 AND time >= ?2 AND time < ?3
               AND price IS NOT NULL AND crawl_status = 1 AND stock = 1",
            params![item_id, window_start, fmt_time(before)],
            |row| row.get(0),
        )
        .context("lowest_in_period_before")
    }

    /// Walks newest -> oldest over successful samples, returning hours
    /// since the oldest contiguous `stock=0` run, or `None` if the most
    /// recent successful sample is not out of stock.
    pub async fn out_of_stock_duration_hours(&self, item_id: i64, now: NaiveDateTime) -> Result<Option<f64>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT stock, time FROM price_history
             WHERE item_id = ?1 AND crawl_status = 1
             ORDER BY time DESC",
        )?;
        let rows = stmt.query_map(params![item_id], |row| {
            Ok((row.get::<_, Option<i64>>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut oldest_out_of_stock: Option<String> = None;
        for row in rows {
            let (stock, time_str) = row?;
            match stock {
                Some(1) => break,
                Some(0) => oldest_out_of_stock = Some(time_str),
                _ => break,
            }
        }

        let Some(oldest) = oldest_out_of_stock else {
            return Ok(None);
        };
        let oldest_time = parse_time(&oldest)?;
        Ok(Some((now - oldest_time).num_seconds() as f64 / 3600.0))
    }

    /// Walks newest -> oldest, returning hours since the oldest
    /// contiguous run where the crawl failed or succeeded with unknown
    /// stock.
    pub async fn no_data_duration_hours(&self, item_id: i64, now: NaiveDateTime) -> Result<Option<f64>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT crawl_status, stock, time FROM price_history
             WHERE item_id = ?1
             ORDER BY time DESC",
        )?;
        let rows = stmt.query_map(params![item_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut oldest_no_data: Option<String> = None;
        for row in rows {
            let (crawl_status, stock, time_str) = row?;
            if crawl_status == 1 && stock.is_some() {
                break;
            }
            oldest_no_data = Some(time_str);
        }

        let Some(oldest) = oldest_no_data else {
            return Ok(None);
        };
        let oldest_time = parse_time(&oldest)?;
        Ok(Some((now - oldest_time).num_seconds() as f64 / 3600.0))
    }

    pub async fn has_successful_crawl_in_hours(&self, item_id: i64, hours: i64, now: NaiveDateTime) -> Result<bool> {
        let conn = self.conn.lock().await;
        let since = fmt_time(now - Duration::hours(hours));
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM price_history WHERE item_id = ?1 AND time >= ?2 AND crawl_status = 1",
            params![item_id, since],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Live-path de-dup: is there an event of this type within the last
    /// `hours`, measured back from `now`? (distinct from the backfill's
    /// "centered on the sample" semantics, §9 "Replay window centering".)
    pub async fn has_event_in_hours(
        &self,
        item_id: i64,
        event_type: EventType,
        hours: i64,
        now: NaiveDateTime,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let since = fmt_time(now - Duration::hours(hours));
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE item_id = ?1 AND event_type = ?2 AND created_at >= ?3",
            params![item_id, event_type.as_db_str(), since],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Backfill/replay de-dup (§9 "Replay window centering"): is there
    /// already an event of this type within `hours` of `center`, looking
    /// both before and after? Distinct from `has_event_in_hours`, which
    /// only looks backward from "now" for the live path.
    pub async fn has_event_near(
        &self,
        item_id: i64,
        event_type: EventType,
        center: NaiveDateTime,
        hours: i64,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let lower = fmt_time(center - Duration::hours(hours));
        let upper = fmt_time(center + Duration::hours(hours));
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events
             WHERE item_id = ?1 AND event_type = ?2 AND created_at >= ?3 AND created_at <= ?4",
            params![item_id, event_type.as_db_str(), lower, upper],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub async fn insert_event(
        &self,
        item_id: i64,
        result: &EventResult,
        url: Option<&str>,
        notified: bool,
        created_at: NaiveDateTime,
    ) -> Result<i64> {
        if result.event_type == EventType::PriceDrop && result.threshold_days.is_none() {
            anyhow::bail!("price_drop events must carry threshold_days");
        }
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO events (item_id, event_type, price, old_price, threshold_days, url, notified, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                item_id,
                result.event_type.as_db_str(),
                result.price,
                result.old_price,
                result.threshold_days,
                url,
                notified as i64,
                fmt_time(created_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn mark_notified(&self, event_id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("UPDATE events SET notified = 1 WHERE id = ?1", params![event_id])?;
        Ok(())
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
        let event_type_str: String = row.get(2)?;
        let created_at_str: String = row.get(8)?;
        Ok(Event {
            id: row.get(0)?,
            item_id: row.get(1)?,
            event_type: EventType::from_db_str(&event_type_str).unwrap_or(EventType::CrawlFailure),
            price: row.get(3)?,
            old_price: row.get(4)?,
            threshold_days: row.get(5)?,
            url: row.get(6)?,
            notified: row.get::<_, i64>(7)? != 0,
            created_at: parse_time(&created_at_str).unwrap_or_default(),
        })
    }

    pub async fn last_event(&self, item_id: i64, event_type: EventType) -> Result<Option<Event>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, item_id, event_type, price, old_price, threshold_days, url, notified, created_at
             FROM events WHERE item_id = ?1 AND event_type = ?2
             ORDER BY created_at DESC LIMIT 1",
            params![item_id, event_type.as_db_str()],
            Self::row_to_event,
        )
        .optional()
        .context("loading last event")
    }

    pub async fn recent_events(&self, limit: i64) -> Result<Vec<Event>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, item_id, event_type, price, old_price, threshold_days, url, notified, created_at
             FROM events ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], Self::row_to_event)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("listing recent events")
    }

    pub async fn events_for_item(&self, item_id: i64) -> Result<Vec<Event>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, item_id, event_type, price, old_price, threshold_days, url, notified, created_at
             FROM events WHERE item_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![item_id], Self::row_to_event)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("listing item events")
    }

    /// Successful, in-stock, priced samples in ascending time order —
    /// the exact input `backfill::run_supplementary` scans per item.
    pub async fn price_history_asc(&self, item_id: i64) -> Result<Vec<PriceSample>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT price, stock, crawl_status, time FROM price_history
             WHERE item_id = ?1 AND crawl_status = 1 AND price IS NOT NULL AND stock = 1
             ORDER BY time ASC",
        )?;
        let rows = stmt.query_map(params![item_id], |row| Self::row_to_sample(item_id, row))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("listing price history")
    }

    /// §4.5 full rebuild: deletes every `lowest_price`/`price_drop` row.
    /// `back_in_stock`, `crawl_failure` and `data_retrieval_failure`
    /// survive, since they cannot be regenerated from price history alone.
    pub async fn delete_rebuildable_events(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM events WHERE event_type IN (?1, ?2)",
            params![EventType::LowestPrice.as_db_str(), EventType::PriceDrop.as_db_str()],
        )?;
        Ok(deleted)
    }

    /// §4.6 admin operation: fills `events.url` from the owning item's
    /// *current* URL for rows where it is still null. Not a historical
    /// snapshot — an approximation, same as the original.
    pub async fn backfill_event_urls(&self, dry_run: bool) -> Result<usize> {
        let conn = self.conn.lock().await;
        if dry_run {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM events e
                 JOIN items i ON e.item_id = i.id
                 WHERE e.url IS NULL AND i.url IS NOT NULL",
                [],
                |row| row.get(0),
            )?;
            return Ok(count as usize);
        }
        let updated = conn.execute(
            "UPDATE events SET url = (SELECT i.url FROM items i WHERE i.id = events.item_id)
             WHERE url IS NULL
               AND EXISTS (SELECT 1 FROM items i WHERE i.id = events.item_id AND i.url IS NOT NULL)",
            [],
        )?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(h: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + Duration::hours(h)
    }

    async fn store() -> HistoryStore {
        HistoryStore::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn upsert_item_is_keyed_by_url() {
        let s = store().await;
        let id1 = s.upsert_item("Widget", "storeA", Some("http://x/1"), None, None, None).await.unwrap();
        let id2 = s.upsert_item("Widget v2", "storeA", Some("http://x/1"), None, None, None).await.unwrap();
        assert_eq!(id1, id2, "same url must resolve to the same item");
        let item = s.item_by_id(id1).await.unwrap().unwrap();
        assert_eq!(item.name, "Widget v2", "display name refreshes on change");
    }

    // P1: at most one row per (item, hour-bucket).
    #[tokio::test]
    async fn p1_one_row_per_hour_bucket() {
        let s = store().await;
        let id = s.upsert_item("Widget", "storeA", Some("http://x/1"), None, None, None).await.unwrap();
        s.insert_sample(id, Some(1000), Stock::InStock, CrawlStatus::Success, t(0)).await.unwrap();
        s.insert_sample(id, Some(900), Stock::InStock, CrawlStatus::Success, t(0) + Duration::minutes(30)).await.unwrap();
        let conn = s.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM price_history WHERE item_id = ?1", params![id], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    // P2: crawl_status=0 implies price and stock both null.
    #[tokio::test]
    async fn p2_failed_crawl_has_no_price_or_stock() {
        let s = store().await;
        let id = s.upsert_item("Widget", "storeA", Some("http://x/1"), None, None, None).await.unwrap();
        s.insert_sample(id, None, Stock::Unknown, CrawlStatus::Failure, t(0)).await.unwrap();
        let sample = s.latest(id).await.unwrap().unwrap();
        assert_eq!(sample.price, None);
        assert_eq!(sample.stock, Stock::Unknown);
        assert_eq!(sample.crawl_status, CrawlStatus::Failure);
    }

    // P3: final stored price is the min across in-stock successful
    // samples within the bucket.
    #[tokio::test]
    async fn p3_minimum_price_wins_within_bucket() {
        let s = store().await;
        let id = s.upsert_item("Widget", "storeA", Some("http://x/1"), None, None, None).await.unwrap();
        s.insert_sample(id, Some(1000), Stock::InStock, CrawlStatus::Success, t(0)).await.unwrap();
        s.insert_sample(id, Some(800), Stock::InStock, CrawlStatus::Success, t(0) + Duration::minutes(20)).await.unwrap();
        s.insert_sample(id, Some(1200), Stock::InStock, CrawlStatus::Success, t(0) + Duration::minutes(40)).await.unwrap();
        let sample = s.latest(id).await.unwrap().unwrap();
        assert_eq!(sample.price, Some(800));
    }

    #[tokio::test]
    async fn failed_sample_over_success_preserves_price_and_crawl_status() {
        let s = store().await;
        let id = s.upsert_item("Widget", "storeA", Some("http://x/1"), None, None, None).await.unwrap();
        s.insert_sample(id, Some(1000), Stock::InStock, CrawlStatus::Success, t(0)).await.unwrap();
        s.insert_sample(id, None, Stock::Unknown, CrawlStatus::Failure, t(0) + Duration::minutes(10)).await.unwrap();
        let sample = s.latest(id).await.unwrap().unwrap();
        assert_eq!(sample.price, Some(1000));
        assert_eq!(sample.stock, Stock::InStock);
        assert_eq!(sample.crawl_status, CrawlStatus::Success, "invariant B: never downgrade to failure with non-null price");
    }

    #[tokio::test]
    async fn out_of_stock_overwrites_in_stock_within_bucket() {
        let s = store().await;
        let id = s.upsert_item("Widget", "storeA", Some("http://x/1"), None, None, None).await.unwrap();
        s.insert_sample(id, Some(1000), Stock::InStock, CrawlStatus::Success, t(0)).await.unwrap();
        s.insert_sample(id, None, Stock::OutOfStock, CrawlStatus::Success, t(0) + Duration::minutes(10)).await.unwrap();
        let sample = s.latest(id).await.unwrap().unwrap();
        assert_eq!(sample.stock, Stock::OutOfStock);
    }

    // P4: lowest_in_period is monotonically non-increasing as days grows.
    #[tokio::test]
    async fn p4_lowest_in_period_monotonic() {
        let s = store().await;
        let id = s.upsert_item("Widget", "storeA", Some("http://x/1"), None, None, None).await.unwrap();
        s.insert_sample(id, Some(1000), Stock::InStock, CrawlStatus::Success, t(0)).await.unwrap();
        s.insert_sample(id, Some(500), Stock::InStock, CrawlStatus::Success, t(24 * 20)).await.unwrap();
        let now = t(24 * 25);
        let short = s.lowest_in_period(id, Some(5), now).await.unwrap();
        let long = s.lowest_in_period(id, Some(60), now).await.unwrap();
        assert!(short.unwrap_or(i64::MAX) >= long.unwrap());
    }

    #[tokio::test]
    async fn out_of_stock_duration_hours_counts_contiguous_run() {
        let s = store().await;
        let id = s.upsert_item("Widget", "storeA", Some("http://x/1"), None, None, None).await.unwrap();
        s.insert_sample(id, Some(1000), Stock::InStock, CrawlStatus::Success, t(0)).await.unwrap();
        for h in 1..=5 {
            s.insert_sample(id, None, Stock::OutOfStock, CrawlStatus::Success, t(h)).await.unwrap();
        }
        let hours = s.out_of_stock_duration_hours(id, t(6)).await.unwrap().unwrap();
        assert!((hours - 5.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn backfill_event_urls_fills_from_current_item_url() {
        let s = store().await;
        let id = s.upsert_item("Widget", "storeA", Some("http://x/1"), None, None, None).await.unwrap();
        let result = EventResult::new(EventType::LowestPrice, true).with_prices(Some(900), Some(1000));
        s.insert_event(id, &result, None, true, t(0)).await.unwrap();

        let dry = s.backfill_event_urls(true).await.unwrap();
        assert_eq!(dry, 1);

        let updated = s.backfill_event_urls(false).await.unwrap();
        assert_eq!(updated, 1);
        let events = s.events_for_item(id).await.unwrap();
        assert_eq!(events[0].url.as_deref(), Some("http://x/1"));
    }
}
