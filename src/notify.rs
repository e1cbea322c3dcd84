//! Notification gateway (C4, §6.2).
//!
//! Slack-specific formatting (`price_watch/notify.py`) is out of scope;
//! what is grounded here is the *contract* — a `Notifier` trait any
//! transport can implement — plus one concrete transport,
//! `WebhookNotifier`, built the way the teacher talks to external HTTP
//! services in `scrapers/dome.rs` and `vault/execution.rs`: a shared
//! `reqwest::Client`, `anyhow::Context` on every network call.
//!
//! `NotifierRoute` survives from the original's channel split (errors
//! vs. info) even without a Slack transport: `DataRetrievalFailure` and
//! `CrawlFailure` route to `Error`, everything else to `Info`, so a
//! webhook consumer can fan the payload out to two channels if it wants.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::model::{EventResult, EventType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierRoute {
    Info,
    Error,
}

pub fn route_for(event_type: EventType) -> NotifierRoute {
    match event_type {
        EventType::DataRetrievalFailure | EventType::CrawlFailure => NotifierRoute::Error,
        EventType::BackInStock | EventType::LowestPrice | EventType::PriceDrop => NotifierRoute::Info,
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, item_id: i64, result: &EventResult, url: Option<&str>) -> Result<()>;
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    item_id: i64,
    event_type: &'static str,
    route: NotifierRoute,
    price: Option<i64>,
    old_price: Option<i64>,
    threshold_days: Option<i64>,
    url: Option<&'a str>,
}

/// A generic JSON-webhook transport: POSTs the event to a configured
/// URL and treats any non-success HTTP status as a failed notification
/// (the caller leaves the event unnotified and will try again next
/// time the same condition fires, per ingest's `mark_notified` gating).
pub struct WebhookNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), endpoint: endpoint.into() }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, item_id: i64, result: &EventResult, url: Option<&str>) -> Result<()> {
        let payload = WebhookPayload {
            item_id,
            event_type: result.event_type.as_db_str(),
            route: route_for(result.event_type),
            price: result.price,
            old_price: result.old_price,
            threshold_days: result.threshold_days,
            url,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .context("sending webhook notification")?;

        if !response.status().is_success() {
            anyhow::bail!("webhook endpoint returned {}", response.status());
        }
        Ok(())
    }
}

/// Test/offline double that records nothing and always succeeds.
#[derive(Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, item_id: i64, result: &EventResult, _url: Option<&str>) -> Result<()> {
        debug!(item_id, event_type = ?result.event_type, "null notifier: dropping event");
        Ok(())
    }
}
