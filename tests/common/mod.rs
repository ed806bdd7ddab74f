//! Shared fixtures: a mocked aggregator, a mocked email provider and an
//! in-memory order store wired into the real services.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use opensase_fulfillment::bus::NullEventSink;
use opensase_fulfillment::carrier::{CarrierClient, CarrierSettings, RetryPolicy};
use opensase_fulfillment::domain::aggregates::{Address, CustomerSnapshot, LineItem, NewOrder, OrderPatch, PaymentMethod};
use opensase_fulfillment::http::AppState;
use opensase_fulfillment::notify::{NotificationDispatcher, ResendMailer};
use opensase_fulfillment::store::{MemoryOrderStore, OrderStore, UpdateOutcome, WebhookLogEntry};
use opensase_fulfillment::{FulfillmentError, FulfillmentService, FulfillmentSettings, Order, WebhookReconciler};

pub const COURIER_ID: u32 = 12345;

pub struct Harness {
    pub carrier: MockServer,
    pub email: MockServer,
    pub store: Arc<MemoryOrderStore>,
    pub service: Arc<FulfillmentService>,
    pub reconciler: Arc<WebhookReconciler>,
}

impl Harness {
    /// Pickup location configured, no default courier.
    pub async fn start() -> Self {
        Self::with_settings(FulfillmentSettings { pickup_location: Some("Primary".into()), ..Default::default() }).await
    }

    pub async fn with_settings(settings: FulfillmentSettings) -> Self {
        let carrier = MockServer::start().await;
        let email = MockServer::start().await;
        let store = Arc::new(MemoryOrderStore::new());

        let client = CarrierClient::new(&CarrierSettings {
            base_url: carrier.uri(),
            email: "ops@shop.test".into(),
            password: "secret".into(),
            timeout: Duration::from_secs(5),
            token_ttl: Duration::from_secs(3600),
            retry: RetryPolicy { max_retries: 2, base_delay: Duration::from_millis(1) },
        })
        .unwrap();
        let mailer = ResendMailer::new(email.uri(), "re_test", "Loom <orders@loom.test>", None).unwrap();
        let notifier = Arc::new(NotificationDispatcher::new(Arc::new(mailer), store.clone(), "Loom"));
        let events = Arc::new(NullEventSink);

        let service = Arc::new(FulfillmentService::new(store.clone(), client, notifier.clone(), events.clone(), settings));
        let reconciler = Arc::new(WebhookReconciler::new(store.clone(), notifier, events));
        Self { carrier, email, store, service, reconciler }
    }

    pub fn state(&self, webhook_secret: Option<&str>) -> AppState {
        AppState { fulfillment: self.service.clone(), reconciler: self.reconciler.clone(), webhook_secret: webhook_secret.map(Arc::from) }
    }

    /// A reconciler over `store`, sending mail to the harness provider.
    pub fn reconciler_over(&self, store: Arc<dyn OrderStore>) -> WebhookReconciler {
        let mailer = ResendMailer::new(self.email.uri(), "re_test", "Loom <orders@loom.test>", None).unwrap();
        let notifier = Arc::new(NotificationDispatcher::new(Arc::new(mailer), store.clone(), "Loom"));
        WebhookReconciler::new(store, notifier, Arc::new(NullEventSink))
    }

    pub async fn place(&self, new: NewOrder) -> Order {
        let order = Order::place(new).unwrap();
        self.store.insert_order(&order).await.unwrap();
        order
    }

    pub async fn reload(&self, order: &Order) -> Order {
        self.store.get_order(order.id()).await.unwrap().unwrap()
    }

    pub async fn accept_emails(&self) {
        Mock::given(method("POST"))
            .and(path("/emails"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg_1"})))
            .mount(&self.email)
            .await;
    }

    pub async fn reject_emails(&self) {
        Mock::given(method("POST"))
            .and(path("/emails"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "internal error"})))
            .mount(&self.email)
            .await;
    }

    /// Subjects of every email the provider received, in order.
    pub async fn sent_subjects(&self) -> Vec<String> {
        self.email
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter_map(|r| serde_json::from_slice::<Value>(&r.body).ok())
            .filter_map(|b| b["subject"].as_str().map(str::to_string))
            .collect()
    }

    pub async fn mount_login(&self, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok-1"})))
            .expect(expected_calls)
            .mount(&self.carrier)
            .await;
    }

    pub async fn mount_create_shipment(&self, shipment_id: u64, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/orders/create/adhoc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "order_id": 5001, "shipment_id": shipment_id, "status": "NEW", "status_code": 1,
                "awb_code": "", "courier_company_id": "", "courier_name": null
            })))
            .expect(expected_calls)
            .mount(&self.carrier)
            .await;
    }

    pub async fn mount_assign(&self, awb: &str, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/courier/assign/awb"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "awb_assign_status": 1,
                "response": {"data": {"awb_code": awb, "courier_company_id": COURIER_ID, "courier_name": "Delhivery Surface"}}
            })))
            .expect(expected_calls)
            .mount(&self.carrier)
            .await;
    }
}

pub fn new_order() -> NewOrder {
    NewOrder {
        customer: CustomerSnapshot {
            name: "Asha Rao".into(),
            email: "asha@example.com".into(),
            phone: "9876543210".into(),
            address: Address {
                line1: "12 MG Road".into(),
                line2: None,
                city: "Bengaluru".into(),
                state: "Karnataka".into(),
                pincode: "560001".into(),
                country: "India".into(),
            },
        },
        items: vec![LineItem { name: "Handloom Kurta".into(), sku: "K-1".into(), quantity: 2, unit_price: Decimal::new(49_900, 2) }],
        shipping_cost: Decimal::new(50, 0),
        tax: Decimal::ZERO,
        discount: Decimal::ZERO,
        currency: "INR".into(),
        payment_method: PaymentMethod::Prepaid,
        courier_preference: Some(COURIER_ID),
        package: None,
    }
}

/// Delegates to a [`MemoryOrderStore`] but fails the next `failures` order
/// updates with a storage error.
pub struct FlakyStore {
    inner: Arc<MemoryOrderStore>,
    failures: AtomicUsize,
}

impl FlakyStore {
    pub fn failing_updates(inner: Arc<MemoryOrderStore>, failures: usize) -> Arc<Self> {
        Arc::new(Self { inner, failures: AtomicUsize::new(failures) })
    }
}

#[async_trait]
impl OrderStore for FlakyStore {
    async fn insert_order(&self, order: &Order) -> opensase_fulfillment::Result<()> {
        self.inner.insert_order(order).await
    }

    async fn get_order(&self, id: Uuid) -> opensase_fulfillment::Result<Option<Order>> {
        self.inner.get_order(id).await
    }

    async fn update_order(&self, id: Uuid, patch: OrderPatch) -> opensase_fulfillment::Result<UpdateOutcome> {
        if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
            return Err(FulfillmentError::Storage("connection reset".into()));
        }
        self.inner.update_order(id, patch).await
    }

    async fn get_order_by_tracking_number(&self, awb_code: &str) -> opensase_fulfillment::Result<Option<Order>> {
        self.inner.get_order_by_tracking_number(awb_code).await
    }

    async fn claim_webhook_log(&self, entry: &WebhookLogEntry, stale_before: DateTime<Utc>) -> opensase_fulfillment::Result<bool> {
        self.inner.claim_webhook_log(entry, stale_before).await
    }

    async fn finish_webhook_log(&self, dedup_key: &str, error: Option<String>) -> opensase_fulfillment::Result<()> {
        self.inner.finish_webhook_log(dedup_key, error).await
    }

    async fn find_webhook_log(&self, dedup_key: &str) -> opensase_fulfillment::Result<Option<WebhookLogEntry>> {
        self.inner.find_webhook_log(dedup_key).await
    }

    async fn failed_webhook_logs(&self, limit: usize) -> opensase_fulfillment::Result<Vec<WebhookLogEntry>> {
        self.inner.failed_webhook_logs(limit).await
    }
}
