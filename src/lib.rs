//! pricewatch-core: a multi-storefront price-monitoring pipeline.
//!
//! Exposes the modules shared by the `pricewatch` coordinator and the
//! `pricewatch-backfill` admin tool.

pub mod adapter;
pub mod backfill;
pub mod config;
pub mod detector;
pub mod ingest;
pub mod key;
pub mod model;
pub mod notify;
pub mod store;

pub use config::Config;
pub use model::{CheckedItem, CrawlStatus, Event, EventResult, EventType, Item, PriceSample, Stock};
pub use store::HistoryStore;
