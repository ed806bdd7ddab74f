//! Order Persistence Gateway.
//!
//! [`OrderStore::update_order`] is the single write path after placement: it
//! reads the current record, runs [`Order::apply`] and writes the result back
//! as one atomic step per order, so a webhook and a fulfillment run touching
//! the same order can interleave in any order.

pub mod memory;
pub mod postgres;

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderPatch, StatusDecision};
use crate::domain::events::OrderEvent;
use crate::FulfillmentError;

pub use memory::MemoryOrderStore;
pub use postgres::PgOrderStore;

/// Result of an atomic read-modify-write.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub order: Order,
    pub decision: StatusDecision,
    /// Events raised by this update only.
    pub events: Vec<OrderEvent>,
}

impl UpdateOutcome {
    pub fn status_applied(&self) -> bool { self.decision.applied() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookLogState {
    /// Claimed by a delivery that has not finished yet.
    Received,
    Processed,
    /// Processing hit an error; the next delivery or retry pass claims it again.
    Failed,
}

impl WebhookLogState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for WebhookLogState {
    type Err = FulfillmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            other => Err(FulfillmentError::Storage(format!("unknown webhook log state: {other}"))),
        }
    }
}

/// A received carrier webhook, kept for audit whether or not it changed anything.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookLogEntry {
    pub dedup_key: String,
    pub awb_code: String,
    pub status: String,
    pub event_timestamp: Option<String>,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub state: WebhookLogState,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// When the current or latest processing attempt started.
    pub claimed_at: DateTime<Utc>,
}

impl WebhookLogEntry {
    /// Whether another delivery may take this entry over.
    pub fn reclaimable(&self, stale_before: DateTime<Utc>) -> bool {
        match self.state {
            WebhookLogState::Failed => true,
            WebhookLogState::Received => self.claimed_at < stale_before,
            WebhookLogState::Processed => false,
        }
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert_order(&self, order: &Order) -> crate::Result<()>;

    async fn get_order(&self, id: Uuid) -> crate::Result<Option<Order>>;

    /// Fails with [`crate::FulfillmentError::OrderNotFound`] when `id` is unknown.
    async fn update_order(&self, id: Uuid, patch: OrderPatch) -> crate::Result<UpdateOutcome>;

    async fn get_order_by_tracking_number(&self, awb_code: &str) -> crate::Result<Option<Order>>;

    /// Logs `entry` and claims it for processing, atomically. An existing
    /// entry is claimed again only when it is
    /// [reclaimable](WebhookLogEntry::reclaimable). Returns whether this call
    /// holds the claim.
    async fn claim_webhook_log(&self, entry: &WebhookLogEntry, stale_before: DateTime<Utc>) -> crate::Result<bool>;

    /// Ends the current claim: processed, or failed with `error`.
    async fn finish_webhook_log(&self, dedup_key: &str, error: Option<String>) -> crate::Result<()>;

    async fn find_webhook_log(&self, dedup_key: &str) -> crate::Result<Option<WebhookLogEntry>>;

    /// Failed entries, oldest first.
    async fn failed_webhook_logs(&self, limit: usize) -> crate::Result<Vec<WebhookLogEntry>>;
}
