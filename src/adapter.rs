//! Acquisition adapters (§6.1): the boundary between a storefront and
//! the ingest pipeline. Concrete per-storefront scraping logic is out
//! of scope (§1 Non-goals); this module carries the trait contract the
//! coordinator drives, plus a deterministic test double, the way
//! `scrapers/mod.rs` declares one trait-ish shape per source and the
//! coordinator in `main.rs` iterates over them uniformly.

use async_trait::async_trait;

use crate::model::CheckedItem;

#[async_trait]
pub trait Adapter: Send + Sync {
    /// Human-readable name used in logs, e.g. "storeA/widget-123".
    fn label(&self) -> &str;

    /// Performs one acquisition attempt. A network/parse failure should
    /// be reported as `Ok(CheckedItem { crawl_status: Failure, .. })`,
    /// not as `Err` — `Err` is reserved for adapter misconfiguration
    /// that ingest cannot recover from (§6.1).
    async fn check(&self) -> anyhow::Result<CheckedItem>;
}

/// Fixed-response test double: returns the same `CheckedItem` every
/// call, or cycles through a scripted sequence when given more than one.
pub struct StaticAdapter {
    label: String,
    responses: std::sync::Mutex<Vec<CheckedItem>>,
    cursor: std::sync::atomic::AtomicUsize,
}

impl StaticAdapter {
    pub fn new(label: impl Into<String>, responses: Vec<CheckedItem>) -> Self {
        assert!(!responses.is_empty(), "StaticAdapter needs at least one scripted response");
        Self {
            label: label.into(),
            responses: std::sync::Mutex::new(responses),
            cursor: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn once(label: impl Into<String>, response: CheckedItem) -> Self {
        Self::new(label, vec![response])
    }
}

#[async_trait]
impl Adapter for StaticAdapter {
    fn label(&self) -> &str {
        &self.label
    }

    async fn check(&self) -> anyhow::Result<CheckedItem> {
        let responses = self.responses.lock().unwrap();
        let i = self.cursor.fetch_add(1, std::sync::atomic::Ordering::SeqCst) % responses.len();
        Ok(responses[i].clone())
    }
}
