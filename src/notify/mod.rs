//! Customer notifications for order status changes.
//!
//! Email is a side effect of fulfillment, never a precondition: the
//! dispatcher reports what happened as a [`NotificationOutcome`] and does not
//! return errors to its callers.

pub mod resend;
pub mod templates;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

pub use crate::domain::aggregates::NotificationKind;
use crate::domain::aggregates::{Order, OrderPatch};
use crate::store::OrderStore;
pub use resend::ResendMailer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub from: Option<String>,
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmailError {
    #[error("email provider rejected the message ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("email provider unreachable: {0}")]
    Transport(String),
}

/// Outbound email delivery. Returns the provider's message id.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<String, EmailError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum NotificationOutcome {
    Sent { message_id: String },
    Skipped { reason: String },
    Failed { error: String },
}

impl NotificationOutcome {
    pub fn is_sent(&self) -> bool { matches!(self, Self::Sent { .. }) }
    pub fn is_failed(&self) -> bool { matches!(self, Self::Failed { .. }) }
}

pub struct NotificationDispatcher {
    provider: Arc<dyn EmailProvider>,
    store: Arc<dyn OrderStore>,
    store_name: String,
}

impl NotificationDispatcher {
    pub fn new(provider: Arc<dyn EmailProvider>, store: Arc<dyn OrderStore>, store_name: impl Into<String>) -> Self {
        Self { provider, store, store_name: store_name.into() }
    }

    /// Sends the `kind` email for `order` unless it already went out.
    pub async fn notify(&self, order: &Order, kind: NotificationKind) -> NotificationOutcome {
        if order.was_notified(kind) {
            info!(order_id = %order.id(), kind = kind.as_str(), "notification already sent, skipping");
            return NotificationOutcome::Skipped { reason: format!("{} notification already sent", kind.as_str()) };
        }
        self.deliver(order, kind).await
    }

    /// Sends the `kind` email even if an earlier one succeeded.
    pub async fn resend(&self, order: &Order, kind: NotificationKind) -> NotificationOutcome {
        self.deliver(order, kind).await
    }

    async fn deliver(&self, order: &Order, kind: NotificationKind) -> NotificationOutcome {
        let to = match order.contact_email() {
            Ok(email) => email,
            Err(e) => {
                warn!(order_id = %order.id(), kind = kind.as_str(), error = %e, "no usable recipient, notification skipped");
                return NotificationOutcome::Skipped { reason: e.to_string() };
            }
        };
        let rendered = templates::render(kind, order, &self.store_name);
        let message = EmailMessage { to: to.to_string(), subject: rendered.subject, html: rendered.html, from: None, reply_to: None };

        match self.provider.send(&message).await {
            Ok(message_id) => {
                info!(order_id = %order.id(), kind = kind.as_str(), %message_id, "order notification sent");
                if let Err(e) = self.store.update_order(order.id(), OrderPatch::notified(kind)).await {
                    warn!(order_id = %order.id(), error = %e, "failed to record sent notification");
                }
                NotificationOutcome::Sent { message_id }
            }
            Err(e) => {
                warn!(order_id = %order.id(), kind = kind.as_str(), error = %e, "order notification failed");
                NotificationOutcome::Failed { error: e.to_string() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{Address, CustomerSnapshot, LineItem, NewOrder, PaymentMethod};
    use crate::store::MemoryOrderStore;
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<EmailMessage>>,
        fail: bool,
    }

    #[async_trait]
    impl EmailProvider for Outbox {
        async fn send(&self, message: &EmailMessage) -> Result<String, EmailError> {
            if self.fail {
                return Err(EmailError::Transport("connection reset".into()));
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push(message.clone());
            Ok(format!("msg-{}", sent.len()))
        }
    }

    fn order(email: &str) -> Order {
        Order::place(NewOrder {
            customer: CustomerSnapshot { name: "Asha".into(), email: email.into(), phone: "9876543210".into(), address: Address::default() },
            items: vec![LineItem { name: "Kurta".into(), sku: "K-1".into(), quantity: 1, unit_price: Decimal::new(499, 0) }],
            shipping_cost: Decimal::ZERO, tax: Decimal::ZERO, discount: Decimal::ZERO, currency: "INR".into(),
            payment_method: PaymentMethod::Prepaid, courier_preference: None, package: None,
        }).unwrap()
    }

    async fn setup(o: &Order, fail: bool) -> (Arc<Outbox>, Arc<MemoryOrderStore>, NotificationDispatcher) {
        let outbox = Arc::new(Outbox { fail, ..Default::default() });
        let store = Arc::new(MemoryOrderStore::new());
        store.insert_order(o).await.unwrap();
        let dispatcher = NotificationDispatcher::new(outbox.clone(), store.clone(), "Loom");
        (outbox, store, dispatcher)
    }

    #[tokio::test]
    async fn sends_once_per_kind() {
        let o = order("asha@example.com");
        let (outbox, store, dispatcher) = setup(&o, false).await;

        assert!(dispatcher.notify(&o, NotificationKind::Confirmed).await.is_sent());
        let stored = store.get_order(o.id()).await.unwrap().unwrap();
        assert!(stored.was_notified(NotificationKind::Confirmed));
        assert!(matches!(dispatcher.notify(&stored, NotificationKind::Confirmed).await, NotificationOutcome::Skipped { .. }));
        assert!(dispatcher.resend(&stored, NotificationKind::Confirmed).await.is_sent());
        assert_eq!(outbox.sent.lock().unwrap().len(), 2);
        assert_eq!(outbox.sent.lock().unwrap()[0].to, "asha@example.com");
    }

    #[tokio::test]
    async fn invalid_recipient_is_skipped_without_sending() {
        let o = order("asha-at-example");
        let (outbox, _store, dispatcher) = setup(&o, false).await;
        assert!(matches!(dispatcher.notify(&o, NotificationKind::Shipped).await, NotificationOutcome::Skipped { .. }));
        assert!(outbox.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn provider_failure_is_reported_not_raised() {
        let o = order("asha@example.com");
        let (_outbox, store, dispatcher) = setup(&o, true).await;
        assert!(dispatcher.notify(&o, NotificationKind::Delivered).await.is_failed());
        let stored = store.get_order(o.id()).await.unwrap().unwrap();
        assert!(!stored.was_notified(NotificationKind::Delivered));
    }
}
