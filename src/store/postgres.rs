//! Postgres order store. The full order lives in a JSONB document; the
//! columns next to it exist for lookups and admin queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use uuid::Uuid;

use super::{OrderStore, UpdateOutcome, WebhookLogEntry, WebhookLogState};
use crate::domain::aggregates::{Order, OrderPatch};
use crate::FulfillmentError;

#[derive(Debug, Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    document: Json<Order>,
}

#[derive(sqlx::FromRow)]
struct WebhookLogRow {
    dedup_key: String,
    awb_code: String,
    status: String,
    event_timestamp: Option<String>,
    payload: serde_json::Value,
    received_at: DateTime<Utc>,
    state: String,
    attempts: i32,
    last_error: Option<String>,
    claimed_at: DateTime<Utc>,
}

impl TryFrom<WebhookLogRow> for WebhookLogEntry {
    type Error = FulfillmentError;

    fn try_from(r: WebhookLogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            state: r.state.parse()?,
            attempts: u32::try_from(r.attempts).unwrap_or_default(),
            dedup_key: r.dedup_key,
            awb_code: r.awb_code,
            status: r.status,
            event_timestamp: r.event_timestamp,
            payload: r.payload,
            received_at: r.received_at,
            last_error: r.last_error,
            claimed_at: r.claimed_at,
        })
    }
}

fn shipment_column(order: &Order) -> Option<i64> {
    order.shipment().shipment_id.and_then(|id| i64::try_from(id).ok())
}

impl PgOrderStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> crate::Result<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self { Self { pool } }

    pub async fn migrate(&self) -> crate::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| FulfillmentError::Storage(e.to_string()))
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert_order(&self, order: &Order) -> crate::Result<()> {
        sqlx::query("INSERT INTO orders (id, order_number, status, awb_code, shipment_id, needs_attention, document, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)")
            .bind(order.id()).bind(order.order_number()).bind(order.status().as_str()).bind(order.awb_code())
            .bind(shipment_column(order)).bind(order.needs_attention()).bind(Json(order))
            .bind(order.created_at()).bind(order.updated_at())
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> crate::Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT document FROM orders WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| r.document.0))
    }

    async fn update_order(&self, id: Uuid, patch: OrderPatch) -> crate::Result<UpdateOutcome> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, OrderRow>("SELECT document FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id).fetch_optional(&mut *tx).await?
            .ok_or_else(|| FulfillmentError::OrderNotFound(id.to_string()))?;
        let mut order = row.document.0;
        let decision = order.apply(patch);
        let events = order.take_events();

        sqlx::query("UPDATE orders SET status = $2, awb_code = $3, shipment_id = $4, needs_attention = $5, document = $6, updated_at = $7 WHERE id = $1")
            .bind(id).bind(order.status().as_str()).bind(order.awb_code()).bind(shipment_column(&order))
            .bind(order.needs_attention()).bind(Json(&order)).bind(order.updated_at())
            .execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(UpdateOutcome { order, decision, events })
    }

    async fn get_order_by_tracking_number(&self, awb_code: &str) -> crate::Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT document FROM orders WHERE awb_code = $1 ORDER BY created_at DESC LIMIT 1")
            .bind(awb_code).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| r.document.0))
    }

    async fn claim_webhook_log(&self, entry: &WebhookLogEntry, stale_before: DateTime<Utc>) -> crate::Result<bool> {
        let result = sqlx::query(
            "INSERT INTO webhook_logs (dedup_key, awb_code, status, event_timestamp, payload, received_at, state, attempts, claimed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, 'received', 1, $7) \
             ON CONFLICT (dedup_key) DO UPDATE SET state = 'received', attempts = webhook_logs.attempts + 1, claimed_at = EXCLUDED.claimed_at \
             WHERE webhook_logs.state = 'failed' OR (webhook_logs.state = 'received' AND webhook_logs.claimed_at < $8)",
        )
        .bind(&entry.dedup_key).bind(&entry.awb_code).bind(&entry.status).bind(&entry.event_timestamp)
        .bind(&entry.payload).bind(entry.received_at).bind(entry.claimed_at).bind(stale_before)
        .execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn finish_webhook_log(&self, dedup_key: &str, error: Option<String>) -> crate::Result<()> {
        let state = if error.is_some() { WebhookLogState::Failed } else { WebhookLogState::Processed };
        sqlx::query("UPDATE webhook_logs SET state = $2, last_error = $3 WHERE dedup_key = $1")
            .bind(dedup_key).bind(state.as_str()).bind(error)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn find_webhook_log(&self, dedup_key: &str) -> crate::Result<Option<WebhookLogEntry>> {
        let row = sqlx::query_as::<_, WebhookLogRow>("SELECT * FROM webhook_logs WHERE dedup_key = $1")
            .bind(dedup_key).fetch_optional(&self.pool).await?;
        row.map(WebhookLogEntry::try_from).transpose()
    }

    async fn failed_webhook_logs(&self, limit: usize) -> crate::Result<Vec<WebhookLogEntry>> {
        let rows = sqlx::query_as::<_, WebhookLogRow>("SELECT * FROM webhook_logs WHERE state = 'failed' ORDER BY received_at LIMIT $1")
            .bind(i64::try_from(limit).unwrap_or(i64::MAX)).fetch_all(&self.pool).await?;
        rows.into_iter().map(WebhookLogEntry::try_from).collect()
    }
}
