//! Webhook Reconciler
//!
//! Applies carrier status callbacks to orders. Every event is logged once,
//! keyed by `awb|status|timestamp`; redeliveries stop at the log unless the
//! earlier attempt failed. Status moves
//! only forward through [`OrderStore::update_order`], so it does not matter
//! whether a callback or the fulfillment run reaches an order first.

pub mod signature;
pub mod status_map;

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::bus::EventSink;
use crate::carrier::types::lenient;
use crate::domain::aggregates::{NotificationKind, OrderPatch, OrderStatus, StatusDecision};
use crate::notify::{NotificationDispatcher, NotificationOutcome};
use crate::store::{OrderStore, WebhookLogEntry, WebhookLogState};
use crate::FulfillmentError;

pub use status_map::map_carrier_status;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookEvent {
    pub awb_code: String,
    pub status: String,
    pub timestamp: Option<String>,
    pub courier_name: Option<String>,
    /// The body as received, kept for the audit log.
    pub payload: Value,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(default, alias = "awb", deserialize_with = "lenient::opt_string")]
    awb_code: Option<String>,
    #[serde(default, alias = "current_status", deserialize_with = "lenient::opt_string")]
    status: Option<String>,
    #[serde(default, alias = "current_timestamp", deserialize_with = "lenient::opt_string")]
    timestamp: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    courier_name: Option<String>,
}

impl WebhookEvent {
    pub fn new(awb_code: impl Into<String>, status: impl Into<String>, timestamp: Option<String>) -> Self {
        let (awb_code, status) = (awb_code.into(), status.into());
        let payload = serde_json::json!({ "awb": awb_code, "current_status": status, "current_timestamp": timestamp });
        Self { awb_code, status, timestamp, courier_name: None, payload }
    }

    /// Reads the aggregator's callback body. Both the native field names
    /// (`awb`, `current_status`, `current_timestamp`) and the plain ones are accepted.
    pub fn from_payload(payload: Value) -> crate::Result<Self> {
        let raw: RawEvent = serde_json::from_value(payload.clone())
            .map_err(|e| FulfillmentError::Validation(vec![format!("payload ({e})")]))?;
        match (raw.awb_code, raw.status) {
            (Some(awb_code), Some(status)) => Ok(Self { awb_code, status, timestamp: raw.timestamp, courier_name: raw.courier_name, payload }),
            (awb, status) => {
                let mut missing = vec![];
                if awb.is_none() { missing.push("awb".to_string()); }
                if status.is_none() { missing.push("current_status".to_string()); }
                Err(FulfillmentError::Validation(missing))
            }
        }
    }

    /// Hex SHA-256 of `awb|status|timestamp`.
    pub fn dedup_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.awb_code.as_bytes());
        hasher.update(b"|");
        hasher.update(self.status.as_bytes());
        hasher.update(b"|");
        hasher.update(self.timestamp.as_deref().unwrap_or_default().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Rebuilds the event from its log entry for a retry.
    pub fn from_log(entry: WebhookLogEntry) -> Self {
        let courier_name = entry.payload.get("courier_name").and_then(Value::as_str).map(str::to_string);
        Self { awb_code: entry.awb_code, status: entry.status, timestamp: entry.event_timestamp, courier_name, payload: entry.payload }
    }

    fn log_entry(&self) -> WebhookLogEntry {
        let now = Utc::now();
        WebhookLogEntry {
            dedup_key: self.dedup_key(),
            awb_code: self.awb_code.clone(),
            status: self.status.clone(),
            event_timestamp: self.timestamp.clone(),
            payload: self.payload.clone(),
            received_at: now,
            state: WebhookLogState::Received,
            attempts: 1,
            last_error: None,
            claimed_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Duplicate,
    Unmapped { carrier_status: String },
    UnknownAwb,
    NoOp { order_id: Uuid, current: OrderStatus, requested: OrderStatus },
    Applied { order_id: Uuid, from: OrderStatus, to: OrderStatus, notification: NotificationOutcome },
    /// Logged, but applying it failed. It stays claimable for a redelivery
    /// or [`WebhookReconciler::retry_failed`].
    ProcessingFailed { error: String },
}

pub struct WebhookReconciler {
    store: Arc<dyn OrderStore>,
    notifier: Arc<NotificationDispatcher>,
    events: Arc<dyn EventSink>,
    lease: chrono::Duration,
}

impl WebhookReconciler {
    pub fn new(store: Arc<dyn OrderStore>, notifier: Arc<NotificationDispatcher>, events: Arc<dyn EventSink>) -> Self {
        Self { store, notifier, events, lease: chrono::Duration::minutes(5) }
    }

    /// How long a started attempt holds its claim before another delivery
    /// may take the event over.
    pub fn with_lease(mut self, lease: chrono::Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Only a failure to log the event is an error; once logged, every
    /// outcome is an acknowledgement.
    pub async fn handle(&self, event: &WebhookEvent) -> crate::Result<WebhookOutcome> {
        let span = info_span!("webhook", awb = %event.awb_code, carrier_status = %event.status);
        self.reconcile(event).instrument(span).await
    }

    /// Runs failed events again, oldest first.
    pub async fn retry_failed(&self, limit: usize) -> crate::Result<Vec<WebhookOutcome>> {
        let entries = self.store.failed_webhook_logs(limit).await?;
        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            outcomes.push(self.handle(&WebhookEvent::from_log(entry)).await?);
        }
        Ok(outcomes)
    }

    async fn reconcile(&self, event: &WebhookEvent) -> crate::Result<WebhookOutcome> {
        let entry = event.log_entry();
        if !self.store.claim_webhook_log(&entry, Utc::now() - self.lease).await? {
            info!("duplicate webhook, already processed or in progress");
            return Ok(WebhookOutcome::Duplicate);
        }

        match self.apply(event).await {
            Ok(outcome) => {
                if let Err(e) = self.store.finish_webhook_log(&entry.dedup_key, None).await {
                    warn!(error = %e, "webhook applied but not marked processed, a late redelivery will re-check it");
                }
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, "webhook processing failed, kept for retry");
                if let Err(mark) = self.store.finish_webhook_log(&entry.dedup_key, Some(e.to_string())).await {
                    error!(error = %mark, "failed to mark webhook for retry, it is reclaimed once its lease runs out");
                }
                Ok(WebhookOutcome::ProcessingFailed { error: e.to_string() })
            }
        }
    }

    async fn apply(&self, event: &WebhookEvent) -> crate::Result<WebhookOutcome> {
        let Some(mapped) = map_carrier_status(&event.status) else {
            warn!("unmapped carrier status, order left unchanged");
            return Ok(WebhookOutcome::Unmapped { carrier_status: event.status.clone() });
        };

        let Some(order) = self.store.get_order_by_tracking_number(&event.awb_code).await? else {
            warn!("no order carries this AWB");
            return Ok(WebhookOutcome::UnknownAwb);
        };
        let order_id = order.id();
        if !order.status().can_transition_to(mapped) {
            info!(%order_id, status = %order.status(), requested = %mapped, "status not ahead of order, no-op");
            return Ok(WebhookOutcome::NoOp { order_id, current: order.status(), requested: mapped });
        }

        let patch = OrderPatch {
            status: Some(mapped),
            last_carrier_status: Some(event.status.clone()),
            courier_name: event.courier_name.clone(),
            ..Default::default()
        };
        let outcome = self.store.update_order(order_id, patch).await?;
        self.events.publish(&outcome.events).await;

        match outcome.decision {
            StatusDecision::Applied { from, to } => {
                info!(%order_id, %from, %to, "order status advanced from webhook");
                let notification = self.notifier.notify(&outcome.order, NotificationKind::for_status(to)).await;
                Ok(WebhookOutcome::Applied { order_id, from, to, notification })
            }
            StatusDecision::Rejected { .. } | StatusDecision::Unchanged => {
                let current = outcome.order.status();
                info!(%order_id, status = %current, requested = %mapped, "order moved on concurrently, no-op");
                Ok(WebhookOutcome::NoOp { order_id, current, requested: mapped })
            }
        }
    }
}
