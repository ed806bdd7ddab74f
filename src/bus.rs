//! Publishes order domain events for other storefront services.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::events::OrderEvent;

#[async_trait]
pub trait EventSink: Send + Sync {
    /// Best effort: failures are logged, never returned.
    async fn publish(&self, events: &[OrderEvent]);
}

/// Used when no bus is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn publish(&self, events: &[OrderEvent]) {
        for event in events {
            debug!(subject = event.subject(), order_id = %event.order_id(), "no event bus configured, dropping event");
        }
    }
}

#[derive(Debug, Clone)]
pub struct NatsEventSink {
    client: async_nats::Client,
}

impl NatsEventSink {
    pub fn new(client: async_nats::Client) -> Self { Self { client } }
}

#[async_trait]
impl EventSink for NatsEventSink {
    async fn publish(&self, events: &[OrderEvent]) {
        for event in events {
            let payload = match serde_json::to_vec(event) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "failed to encode order event");
                    continue;
                }
            };
            if let Err(e) = self.client.publish(event.subject().to_string(), payload.into()).await {
                warn!(subject = event.subject(), error = %e, "failed to publish order event");
            }
        }
    }
}
