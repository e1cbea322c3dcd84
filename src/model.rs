//! Core domain types shared by every component of the engine:
//! items, price samples, events and the adapter-facing `CheckedItem`.

use serde::{Deserialize, Serialize};

/// Tri-valued stock state as reported by an adapter or stored in a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stock {
    OutOfStock,
    InStock,
    Unknown,
}

impl Stock {
    /// DB representation: 0 = out, 1 = in, NULL = unknown.
    pub fn to_db(self) -> Option<i64> {
        match self {
            Stock::OutOfStock => Some(0),
            Stock::InStock => Some(1),
            Stock::Unknown => None,
        }
    }

    pub fn from_db(v: Option<i64>) -> Self {
        match v {
            Some(0) => Stock::OutOfStock,
            Some(1) => Stock::InStock,
            _ => Stock::Unknown,
        }
    }
}

/// Whether an acquisition attempt for a sample succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Failure,
    Success,
}

impl CrawlStatus {
    pub fn to_db(self) -> i64 {
        match self {
            CrawlStatus::Failure => 0,
            CrawlStatus::Success => 1,
        }
    }

    pub fn from_db(v: i64) -> Self {
        if v == 1 {
            CrawlStatus::Success
        } else {
            CrawlStatus::Failure
        }
    }
}

/// Normalized output of an acquisition adapter (§6.1 of the spec).
///
/// Invariant the adapter must satisfy: `crawl_status == Failure` implies
/// `price.is_none() && stock == Stock::Unknown`. The ingest path does not
/// trust adapters to uphold this and re-normalizes defensively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckedItem {
    pub name: String,
    pub store: String,
    pub url: Option<String>,
    pub price: Option<i64>,
    pub stock: Stock,
    pub crawl_status: CrawlStatus,
    pub price_unit: String,
    pub thumb_url: Option<String>,
    pub search_keyword: Option<String>,
    pub search_cond: Option<String>,
}

impl CheckedItem {
    /// Re-normalizes the item so a failed crawl never carries stale
    /// price/stock data, regardless of what the adapter actually sent.
    pub fn normalized(mut self) -> Self {
        if self.crawl_status == CrawlStatus::Failure {
            self.price = None;
            self.stock = Stock::Unknown;
        }
        self
    }
}

/// A persisted item row (`items` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub item_key: String,
    pub name: String,
    pub store: String,
    pub url: Option<String>,
    pub thumb_url: Option<String>,
    pub search_keyword: Option<String>,
    pub search_cond: Option<String>,
}

/// A persisted price/stock observation (`price_history` row).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSample {
    pub item_id: i64,
    pub price: Option<i64>,
    pub stock: Stock,
    pub crawl_status: CrawlStatus,
    pub time: chrono::NaiveDateTime,
}

/// Event types the detector can emit (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    BackInStock,
    CrawlFailure,
    DataRetrievalFailure,
    LowestPrice,
    PriceDrop,
}

impl EventType {
    pub fn as_db_str(self) -> &'static str {
        match self {
            EventType::BackInStock => "back_in_stock",
            EventType::CrawlFailure => "crawl_failure",
            EventType::DataRetrievalFailure => "data_retrieval_failure",
            EventType::LowestPrice => "lowest_price",
            EventType::PriceDrop => "price_drop",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "back_in_stock" => Some(EventType::BackInStock),
            "crawl_failure" => Some(EventType::CrawlFailure),
            "data_retrieval_failure" => Some(EventType::DataRetrievalFailure),
            "lowest_price" => Some(EventType::LowestPrice),
            "price_drop" => Some(EventType::PriceDrop),
            _ => None,
        }
    }

    /// Event types `backfill::rebuild` can regenerate from history alone.
    pub fn is_rebuildable(self) -> bool {
        matches!(self, EventType::LowestPrice | EventType::PriceDrop)
    }
}

/// Outcome of a detector function: the event to (maybe) notify and record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventResult {
    pub event_type: EventType,
    pub should_notify: bool,
    pub price: Option<i64>,
    pub old_price: Option<i64>,
    pub threshold_days: Option<i64>,
}

impl EventResult {
    pub fn new(event_type: EventType, should_notify: bool) -> Self {
        Self {
            event_type,
            should_notify,
            price: None,
            old_price: None,
            threshold_days: None,
        }
    }

    pub fn with_prices(mut self, price: Option<i64>, old_price: Option<i64>) -> Self {
        self.price = price;
        self.old_price = old_price;
        self
    }

    pub fn with_threshold_days(mut self, days: i64) -> Self {
        self.threshold_days = Some(days);
        self
    }
}

/// A persisted event row (`events` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub item_id: i64,
    pub event_type: EventType,
    pub price: Option<i64>,
    pub old_price: Option<i64>,
    pub threshold_days: Option<i64>,
    pub url: Option<String>,
    pub notified: bool,
    pub created_at: chrono::NaiveDateTime,
}
