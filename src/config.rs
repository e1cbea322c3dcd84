//! Configuration surface (§6.3), deserialized from a YAML document.
//!
//! Field names and defaults mirror `price_watch/config.py`:
//! `interval_sec` defaults to 1800, `drop.ignore.hour` to 24, and the
//! `price_drop` window list is sorted ascending by `days` on load so the
//! detector can rely on "first match wins" meaning "shortest window
//! wins" (§4.2.5).

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// One price-drop detection window (§4.2.5, §6.3 `check.drop.windows[]`).
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PriceDropWindow {
    pub days: i64,
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub value: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IgnoreConfig {
    #[serde(default = "default_ignore_hours")]
    pub hour: i64,
}

fn default_ignore_hours() -> i64 {
    24
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self { hour: default_ignore_hours() }
    }
}

/// §6.3 `check.drop.*`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DropConfig {
    #[serde(default)]
    pub ignore: IgnoreConfig,
    #[serde(default)]
    pub windows: Vec<PriceDropWindow>,
}

impl DropConfig {
    /// Windows sorted ascending by `days`, per §4.2.5.
    pub fn sorted_windows(&self) -> Vec<PriceDropWindow> {
        let mut windows = self.windows.clone();
        windows.sort_by_key(|w| w.days);
        windows
    }
}

/// §6.3 `check.lowest.*` — optional gating for `lowest_price`.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct LowestConfig {
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub value: Option<i64>,
}

/// §6.3 `check.currency[]` — maps a store's currency label to a
/// base-currency multiplier used for `value`-threshold comparisons.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CurrencyRate {
    pub label: String,
    pub rate: f64,
}

/// Per-store settings: display currency label, point-back rebate rate
/// used to compute the read-time "effective price" (§3.2), and the
/// currency label used to resolve `CurrencyRate` for threshold math.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoreConfig {
    pub name: String,
    #[serde(default)]
    pub price_unit: Option<String>,
    #[serde(default)]
    pub point_rate: f64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CheckConfig {
    #[serde(default = "default_interval_sec")]
    pub interval_sec: u64,
    #[serde(default)]
    pub drop: DropConfig,
    #[serde(default)]
    pub lowest: LowestConfig,
    #[serde(default)]
    pub currency: Vec<CurrencyRate>,
}

fn default_interval_sec() -> u64 {
    1800
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub check: CheckConfig,
    #[serde(default)]
    pub stores: Vec<StoreConfig>,
    /// Path to the sqlite database file backing the `HistoryStore`.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "price_watch.db".to_string()
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// Currency rate for a store's native currency label; 1.0 (base
    /// currency) when unconfigured, per §3.2.
    pub fn currency_rate_for_label(&self, price_unit: &str) -> f64 {
        self.check
            .currency
            .iter()
            .find(|c| c.label == price_unit)
            .map(|c| c.rate)
            .unwrap_or(1.0)
    }

    pub fn point_rate_for_store(&self, store: &str) -> f64 {
        self.stores
            .iter()
            .find(|s| s.name == store)
            .map(|s| s.point_rate)
            .unwrap_or(0.0)
    }
}

/// Effective price at read time (§3.2): `price * (1 - point_rate/100)`,
/// truncated toward zero. Display-only, never persisted.
pub fn effective_price(price: i64, point_rate: f64) -> i64 {
    ((price as f64) * (1.0 - point_rate / 100.0)) as i64
}
