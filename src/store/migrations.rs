//! Schema evolution (§6.5): tolerate in-place migration from older
//! schemas, idempotently, detected by column introspection via
//! `PRAGMA table_info`.
//!
//! Grounded on `price_watch/managers/history/migrations.py`: SQLite has
//! no `ALTER COLUMN`, so widening a column to nullable means recreating
//! the table and copying rows across, while adding a column is a plain
//! `ALTER TABLE ... ADD COLUMN`.

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::info;

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let exists: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1)",
            [name],
            |row| row.get(0),
        )
        .context("checking table existence")?;
    Ok(exists)
}

struct ColumnInfo {
    name: String,
    notnull: bool,
}

fn columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let rows = stmt.query_map([], |row| {
        Ok(ColumnInfo {
            name: row.get::<_, String>(1)?,
            notnull: row.get::<_, i64>(3)? != 0,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn has_column(cols: &[ColumnInfo], name: &str) -> bool {
    cols.iter().any(|c| c.name == name)
}

/// (a) older `price` NOT NULL -> nullable.
fn migrate_to_nullable_price(conn: &Connection) -> Result<()> {
    if !table_exists(conn, "price_history")? {
        return Ok(());
    }
    let cols = columns(conn, "price_history")?;
    let Some(price_col) = cols.iter().find(|c| c.name == "price") else {
        return Ok(());
    };
    if !price_col.notnull {
        return Ok(());
    }
    info!("migrating price_history.price to nullable");
    let has_crawl_status = has_column(&cols, "crawl_status");
    conn.execute_batch(&format!(
        "CREATE TABLE price_history_new (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            item_id INTEGER NOT NULL,
            price INTEGER,
            stock INTEGER NOT NULL,
            time TIMESTAMP,
            {crawl_col}
        );
        INSERT INTO price_history_new (id, item_id, price, stock, time{crawl_sel})
            SELECT id, item_id, price, stock, time{crawl_from} FROM price_history;
        DROP TABLE price_history;
        ALTER TABLE price_history_new RENAME TO price_history;",
        crawl_col = if has_crawl_status {
            "crawl_status INTEGER NOT NULL DEFAULT 1"
        } else {
            "crawl_status INTEGER NOT NULL DEFAULT 1"
        },
        crawl_sel = if has_crawl_status { ", crawl_status" } else { "" },
        crawl_from = if has_crawl_status { ", crawl_status" } else { "" },
    ))?;
    Ok(())
}

/// (b) older `stock` NOT NULL -> nullable, and (c) add `crawl_status`
/// with default 1 if it is still missing after the price migration.
fn migrate_to_nullable_stock_and_crawl_status(conn: &Connection) -> Result<()> {
    if !table_exists(conn, "price_history")? {
        return Ok(());
    }
    let cols = columns(conn, "price_history")?;
    let stock_notnull = cols.iter().find(|c| c.name == "stock").map(|c| c.notnull).unwrap_or(false);
    let has_crawl_status = has_column(&cols, "crawl_status");

    if !stock_notnull && has_crawl_status {
        return Ok(());
    }

    info!("migrating price_history.stock to nullable / adding crawl_status");
    if stock_notnull {
        conn.execute_batch(
            "CREATE TABLE price_history_new (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id INTEGER NOT NULL,
                price INTEGER,
                stock INTEGER,
                time TIMESTAMP,
                crawl_status INTEGER NOT NULL DEFAULT 1
            );
            INSERT INTO price_history_new (id, item_id, price, stock, time, crawl_status)
                SELECT id, item_id, price, stock, time, 1 FROM price_history;
            DROP TABLE price_history;
            ALTER TABLE price_history_new RENAME TO price_history;",
        )?;
    } else if !has_crawl_status {
        conn.execute(
            "ALTER TABLE price_history ADD COLUMN crawl_status INTEGER NOT NULL DEFAULT 1",
            [],
        )?;
    }
    Ok(())
}

/// (d) legacy `url_hash` -> rename to `item_key`, add `search_keyword`
/// and `search_cond`.
fn migrate_url_hash_to_item_key(conn: &Connection) -> Result<()> {
    if !table_exists(conn, "items")? {
        return Ok(());
    }
    let cols = columns(conn, "items")?;
    if has_column(&cols, "item_key") {
        return Ok(());
    }
    if !has_column(&cols, "url_hash") {
        return Ok(());
    }

    info!("migrating items.url_hash to item_key");
    conn.execute_batch(
        "CREATE TABLE items_new (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            item_key TEXT NOT NULL UNIQUE,
            url TEXT,
            name TEXT NOT NULL,
            store TEXT NOT NULL,
            thumb_url TEXT,
            search_keyword TEXT,
            search_cond TEXT,
            created_at TIMESTAMP DEFAULT (DATETIME('now','localtime')),
            updated_at TIMESTAMP DEFAULT (DATETIME('now','localtime'))
        );
        INSERT INTO items_new (id, item_key, url, name, store, thumb_url, created_at, updated_at)
            SELECT id, url_hash, url, name, store, thumb_url, created_at, updated_at FROM items;
        DROP TABLE items;
        ALTER TABLE items_new RENAME TO items;
        CREATE INDEX IF NOT EXISTS idx_items_item_key ON items(item_key);",
    )?;
    Ok(())
}

/// Adds the `events.url` snapshot column when missing (carried forward
/// from the original's `ensure_url_column`, §4.6).
fn migrate_add_events_url(conn: &Connection) -> Result<()> {
    if !table_exists(conn, "events")? {
        return Ok(());
    }
    let cols = columns(conn, "events")?;
    if has_column(&cols, "url") {
        return Ok(());
    }
    info!("adding events.url column");
    conn.execute("ALTER TABLE events ADD COLUMN url TEXT", [])?;
    Ok(())
}

/// Runs every migration step, in order, before indices are (re)created.
/// Safe to call on every startup: each step is a no-op once applied.
pub fn run_all(conn: &Connection) -> Result<()> {
    migrate_to_nullable_price(conn).context("migrate_to_nullable_price")?;
    migrate_to_nullable_stock_and_crawl_status(conn)
        .context("migrate_to_nullable_stock_and_crawl_status")?;
    migrate_url_hash_to_item_key(conn).context("migrate_url_hash_to_item_key")?;
    migrate_add_events_url(conn).context("migrate_add_events_url")?;
    Ok(())
}
