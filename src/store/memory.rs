//! In-process order store for tests and local runs without Postgres.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{OrderStore, UpdateOutcome, WebhookLogEntry, WebhookLogState};
use crate::domain::aggregates::{Order, OrderPatch};
use crate::FulfillmentError;

#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    orders: RwLock<HashMap<Uuid, Order>>,
    webhook_log: RwLock<Vec<WebhookLogEntry>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self { Self::default() }

    pub async fn webhook_log(&self) -> Vec<WebhookLogEntry> { self.webhook_log.read().await.clone() }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert_order(&self, order: &Order) -> crate::Result<()> {
        let mut stored = order.clone();
        stored.take_events();
        self.orders.write().await.insert(order.id(), stored);
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> crate::Result<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn update_order(&self, id: Uuid, patch: OrderPatch) -> crate::Result<UpdateOutcome> {
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(&id).ok_or_else(|| FulfillmentError::OrderNotFound(id.to_string()))?;
        let decision = order.apply(patch);
        let events = order.take_events();
        Ok(UpdateOutcome { order: order.clone(), decision, events })
    }

    async fn get_order_by_tracking_number(&self, awb_code: &str) -> crate::Result<Option<Order>> {
        Ok(self.orders.read().await.values().find(|o| o.awb_code() == Some(awb_code)).cloned())
    }

    async fn claim_webhook_log(&self, entry: &WebhookLogEntry, stale_before: DateTime<Utc>) -> crate::Result<bool> {
        let mut log = self.webhook_log.write().await;
        match log.iter_mut().find(|e| e.dedup_key == entry.dedup_key) {
            Some(existing) if existing.reclaimable(stale_before) => {
                existing.state = WebhookLogState::Received;
                existing.attempts += 1;
                existing.claimed_at = entry.claimed_at;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                log.push(WebhookLogEntry { state: WebhookLogState::Received, attempts: 1, last_error: None, ..entry.clone() });
                Ok(true)
            }
        }
    }

    async fn finish_webhook_log(&self, dedup_key: &str, error: Option<String>) -> crate::Result<()> {
        let mut log = self.webhook_log.write().await;
        if let Some(entry) = log.iter_mut().find(|e| e.dedup_key == dedup_key) {
            entry.state = if error.is_some() { WebhookLogState::Failed } else { WebhookLogState::Processed };
            entry.last_error = error;
        }
        Ok(())
    }

    async fn find_webhook_log(&self, dedup_key: &str) -> crate::Result<Option<WebhookLogEntry>> {
        Ok(self.webhook_log.read().await.iter().find(|e| e.dedup_key == dedup_key).cloned())
    }

    async fn failed_webhook_logs(&self, limit: usize) -> crate::Result<Vec<WebhookLogEntry>> {
        let log = self.webhook_log.read().await;
        Ok(log.iter().filter(|e| e.state == WebhookLogState::Failed).take(limit).cloned().collect())
    }
}
