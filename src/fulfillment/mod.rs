//! Fulfillment Orchestrator
//!
//! Takes a placed order through pickup resolution, shipment creation, courier
//! assignment and the customer notification. Each step persists what it
//! learned before the next one starts, so a failed run can be re-run without
//! repeating carrier-side effects that already happened.

pub mod shipment;

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::bus::EventSink;
use crate::carrier::{AwbAssignment, CarrierClient, CreatedShipment, ShipmentRequest};
use crate::domain::aggregates::{Attention, NotificationKind, Order, OrderPatch, OrderStatus, StatusDecision};
use crate::domain::value_objects::PackageDimensions;
use crate::notify::{NotificationDispatcher, NotificationOutcome};
use crate::store::OrderStore;
use crate::{ErrorKind, FulfillmentError};

#[derive(Clone, Debug)]
pub struct FulfillmentSettings {
    /// Named pickup location; when absent the carrier's primary one is used.
    pub pickup_location: Option<String>,
    pub default_courier_id: Option<u32>,
    pub default_package: PackageDimensions,
    /// Customer-facing tracking link, `{awb}` is substituted.
    pub tracking_url_template: String,
}

impl FulfillmentSettings {
    pub fn tracking_url(&self, awb_code: &str) -> String {
        self.tracking_url_template.replace("{awb}", awb_code)
    }
}

impl Default for FulfillmentSettings {
    fn default() -> Self {
        Self {
            pickup_location: None,
            default_courier_id: None,
            default_package: PackageDimensions::default(),
            tracking_url_template: "https://shiprocket.co/tracking/{awb}".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentOutcome {
    /// Shipment created, courier assigned, customer told.
    Completed,
    /// The order already had an AWB; nothing was sent to the carrier.
    AlreadyFulfilled,
    /// Shipment created; no courier preference, so assignment is left to an operator.
    AwaitingAssignment,
    /// Shipment created but courier assignment failed.
    NeedsManualAssignment,
    /// Carrier work succeeded, the email did not.
    NotificationFailed,
    Failed,
}

#[derive(Clone, Debug, Serialize)]
pub struct FulfillmentResult {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub outcome: FulfillmentOutcome,
    pub awb: Option<String>,
    pub shipment_id: Option<u64>,
    pub courier_assigned: bool,
    pub notification_skipped: bool,
    pub notification_failed: bool,
    pub needs_attention: bool,
    pub failure: Option<ErrorKind>,
    pub errors: Vec<String>,
}

impl FulfillmentResult {
    fn from_order(order: &Order, outcome: FulfillmentOutcome) -> Self {
        Self {
            order_id: order.id(),
            status: order.status(),
            outcome,
            awb: order.awb_code().map(str::to_string),
            shipment_id: order.shipment().shipment_id,
            courier_assigned: order.awb_code().is_some(),
            notification_skipped: false,
            notification_failed: false,
            needs_attention: order.needs_attention(),
            failure: None,
            errors: vec![],
        }
    }

    fn failed(order_id: Uuid, order: Option<&Order>, error: &FulfillmentError) -> Self {
        let mut result = match order {
            Some(order) => Self::from_order(order, FulfillmentOutcome::Failed),
            None => Self {
                order_id,
                status: OrderStatus::Pending,
                outcome: FulfillmentOutcome::Failed,
                awb: None,
                shipment_id: None,
                courier_assigned: false,
                notification_skipped: false,
                notification_failed: false,
                needs_attention: false,
                failure: None,
                errors: vec![],
            },
        };
        result.failure = Some(error.kind());
        result.errors.push(error.to_string());
        result
    }

    pub fn is_failed(&self) -> bool { self.outcome == FulfillmentOutcome::Failed }

    fn refresh(&mut self, order: &Order) {
        self.status = order.status();
        self.awb = order.awb_code().map(str::to_string);
        self.shipment_id = order.shipment().shipment_id;
        self.courier_assigned = order.awb_code().is_some();
        self.needs_attention = order.needs_attention();
    }

    fn record_notification(&mut self, outcome: NotificationOutcome) {
        match outcome {
            NotificationOutcome::Sent { .. } => {}
            NotificationOutcome::Skipped { .. } => self.notification_skipped = true,
            NotificationOutcome::Failed { error } => {
                self.notification_failed = true;
                self.errors.push(format!("notification failed: {error}"));
                if self.outcome == FulfillmentOutcome::Completed {
                    self.outcome = FulfillmentOutcome::NotificationFailed;
                }
            }
        }
    }
}

pub struct FulfillmentService {
    store: Arc<dyn OrderStore>,
    carrier: CarrierClient,
    notifier: Arc<NotificationDispatcher>,
    events: Arc<dyn EventSink>,
    settings: FulfillmentSettings,
}

impl FulfillmentService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        carrier: CarrierClient,
        notifier: Arc<NotificationDispatcher>,
        events: Arc<dyn EventSink>,
        settings: FulfillmentSettings,
    ) -> Self {
        Self { store, carrier, notifier, events, settings }
    }

    pub fn carrier(&self) -> &CarrierClient { &self.carrier }
    pub fn store(&self) -> &Arc<dyn OrderStore> { &self.store }
    pub fn settings(&self) -> &FulfillmentSettings { &self.settings }

    /// Runs every fulfillment step for `order_id`. Never fails: the outcome,
    /// including any error, is reported in the returned [`FulfillmentResult`].
    pub async fn run_fulfillment(&self, order_id: Uuid) -> FulfillmentResult {
        self.fulfill(order_id).instrument(info_span!("fulfillment", %order_id)).await
    }

    async fn fulfill(&self, order_id: Uuid) -> FulfillmentResult {
        let order = match self.load(order_id).await {
            Ok(order) => order,
            Err(e) => {
                error!(error = %e, "cannot load order for fulfillment");
                return FulfillmentResult::failed(order_id, None, &e);
            }
        };
        if order.status().is_terminal() {
            let e = FulfillmentError::InvalidTransition { order_id: order_id.to_string(), status: order.status(), action: "fulfilled" };
            warn!(status = %order.status(), "order is closed, not fulfilling");
            return FulfillmentResult::failed(order_id, Some(&order), &e);
        }
        if let Some(awb) = order.awb_code() {
            info!(%awb, "order already has an AWB, nothing to do");
            return FulfillmentResult::from_order(&order, FulfillmentOutcome::AlreadyFulfilled);
        }

        // 1. pickup location
        let pickup = match order.shipment().pickup_location.clone() {
            Some(stored) => stored,
            None => match self.carrier.resolve_pickup_location(self.settings.pickup_location.as_deref()).await {
                Ok(name) => name,
                Err(e) => return self.fail(&order, e.into(), "resolve pickup location").await,
            },
        };

        // 2. payload
        let request = shipment::build_request(&order, &pickup, self.settings.default_package);
        if let Err(e) = shipment::validate(&request) {
            return self.fail(&order, e, "validate shipment").await;
        }
        let email_usable = match order.contact_email() {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "billing email unusable; carrier will not notify the customer and order emails are skipped");
                false
            }
        };

        // 3. shipment
        let mut order = order;
        let shipment_id = match order.shipment().shipment_id {
            Some(id) => {
                info!(shipment_id = id, "shipment already exists, skipping creation");
                id
            }
            None => {
                let created = match self.create_or_adopt(&order, &request).await {
                    Ok(created) => created,
                    Err(e) => return self.fail(&order, e, "create shipment").await,
                };
                let auto_assigned = created.awb_code.is_some();
                let patch = OrderPatch {
                    status: auto_assigned.then_some(OrderStatus::Processing),
                    carrier_order_id: created.carrier_order_id,
                    shipment_id: Some(created.shipment_id),
                    tracking_url: created.awb_code.as_deref().map(|awb| self.settings.tracking_url(awb)),
                    awb_code: created.awb_code,
                    courier_id: created.courier_id,
                    courier_name: created.courier_name,
                    pickup_location: Some(pickup.clone()),
                    attention: Some(Attention::Clear),
                    ..Default::default()
                };
                order = match self.persist(order.id(), patch).await {
                    Ok(order) => order,
                    Err(e) => {
                        error!(shipment_id = created.shipment_id, error = %e, "shipment created at carrier but could not be recorded");
                        return FulfillmentResult::failed(order_id, Some(&order), &e);
                    }
                };
                created.shipment_id
            }
        };

        // 4. courier
        let mut result = FulfillmentResult::from_order(&order, FulfillmentOutcome::Completed);
        if order.awb_code().is_none() {
            match order.courier_preference().or(self.settings.default_courier_id) {
                Some(courier_id) => match self.carrier.assign_courier(shipment_id, courier_id).await {
                    Ok(assignment) => match self.record_assignment(order.id(), assignment).await {
                        Ok(updated) => order = updated,
                        Err(e) => {
                            error!(shipment_id, error = %e, "courier assigned at carrier but could not be recorded");
                            return FulfillmentResult::failed(order_id, Some(&order), &e);
                        }
                    },
                    Err(e) => {
                        let e = FulfillmentError::from(e);
                        let reason = format!("courier assignment failed: {e}");
                        warn!(shipment_id, courier_id, error = %e, "courier assignment failed, order needs manual assignment");
                        match self.persist(order.id(), OrderPatch::flag(&reason)).await {
                            Ok(updated) => order = updated,
                            Err(e) => error!(error = %e, "failed to flag order for manual assignment"),
                        }
                        result.errors.push(reason);
                        result.failure = Some(e.kind());
                        result.outcome = FulfillmentOutcome::NeedsManualAssignment;
                    }
                },
                None => {
                    info!(shipment_id, "no courier preference, leaving shipment for manual assignment");
                    result.outcome = FulfillmentOutcome::AwaitingAssignment;
                }
            }
        }
        result.refresh(&order);

        // 6. notify
        if email_usable {
            let kind = NotificationKind::for_status(order.status());
            result.record_notification(self.notifier.notify(&order, kind).await);
        } else {
            result.notification_skipped = true;
        }

        info!(status = %result.status, awb = ?result.awb, outcome = ?result.outcome, "fulfillment finished");
        result
    }

    /// Assigns `courier_id` to an order whose shipment exists but has no AWB.
    pub async fn assign_courier(&self, order_id: Uuid, courier_id: u32) -> crate::Result<FulfillmentResult> {
        let order = self.load(order_id).await?;
        if order.status().is_terminal() {
            return Err(FulfillmentError::InvalidTransition { order_id: order_id.to_string(), status: order.status(), action: "assigned a courier" });
        }
        if order.awb_code().is_some() {
            return Ok(FulfillmentResult::from_order(&order, FulfillmentOutcome::AlreadyFulfilled));
        }
        let shipment_id = order.shipment().shipment_id.ok_or_else(|| FulfillmentError::InvalidTransition {
            order_id: order_id.to_string(),
            status: order.status(),
            action: "assigned a courier before its shipment exists",
        })?;

        let assignment = match self.carrier.assign_courier(shipment_id, courier_id).await {
            Ok(a) => a,
            Err(e) => {
                let e = FulfillmentError::from(e);
                warn!(%order_id, shipment_id, courier_id, error = %e, "manual courier assignment failed");
                self.persist(order_id, OrderPatch::flag(format!("courier assignment failed: {e}"))).await?;
                return Err(e);
            }
        };
        let order = self.record_assignment(order_id, assignment).await?;
        let mut result = FulfillmentResult::from_order(&order, FulfillmentOutcome::Completed);
        if order.contact_email().is_ok() {
            result.record_notification(self.notifier.notify(&order, NotificationKind::for_status(order.status())).await);
        } else {
            result.notification_skipped = true;
        }
        Ok(result)
    }

    /// Cancels the carrier shipment, if any, then closes the order.
    pub async fn cancel_order(&self, order_id: Uuid) -> crate::Result<Order> {
        let order = self.load(order_id).await?;
        match order.status() {
            OrderStatus::Cancelled => return Ok(order),
            status if status.is_terminal() => {
                return Err(FulfillmentError::InvalidTransition { order_id: order_id.to_string(), status, action: "cancelled" });
            }
            _ => {}
        }
        if let Some(awb) = order.awb_code() {
            self.carrier.cancel_shipment(&[awb.to_string()]).await?;
        } else if let Some(carrier_order_id) = order.shipment().carrier_order_id {
            self.carrier.cancel_orders(&[carrier_order_id]).await?;
        } else if order.shipment().creation_unconfirmed {
            let found = self.carrier.find_shipment(order.order_number()).await?;
            if let Some(carrier_order_id) = found.and_then(|s| s.carrier_order_id) {
                self.carrier.cancel_orders(&[carrier_order_id]).await?;
            }
        }

        let patch = OrderPatch { status: Some(OrderStatus::Cancelled), attention: Some(Attention::Clear), ..Default::default() };
        let order = self.persist(order_id, patch).await?;
        info!(%order_id, "order cancelled");
        if order.status() == OrderStatus::Cancelled {
            self.notifier.notify(&order, NotificationKind::Cancelled).await;
        }
        Ok(order)
    }

    /// Sends the email for the order's current status again.
    pub async fn resend_notification(&self, order_id: Uuid) -> crate::Result<NotificationOutcome> {
        let order = self.load(order_id).await?;
        Ok(self.notifier.resend(&order, NotificationKind::for_status(order.status())).await)
    }

    /// Creates the carrier shipment. The order is marked unconfirmed before
    /// the call goes out; an order still marked from an earlier run is
    /// searched for at the carrier first and its shipment adopted if found.
    async fn create_or_adopt(&self, order: &Order, request: &ShipmentRequest) -> crate::Result<CreatedShipment> {
        if order.shipment().creation_unconfirmed {
            if let Some(existing) = self.carrier.find_shipment(&request.order_id).await? {
                info!(shipment_id = existing.shipment_id, "earlier create reached the carrier, adopting its shipment");
                return Ok(existing);
            }
            info!("earlier create left nothing at the carrier, creating again");
        } else {
            self.persist(order.id(), OrderPatch { creation_unconfirmed: Some(true), ..Default::default() }).await?;
        }

        match self.carrier.create_shipment(request).await {
            Ok(created) => Ok(created),
            Err(e) if e.is_transient() => {
                warn!(error = %e, "shipment creation outcome unknown, next run checks the carrier first");
                Err(e.into())
            }
            Err(e) => {
                let settled = OrderPatch { creation_unconfirmed: Some(false), ..Default::default() };
                if let Err(store) = self.persist(order.id(), settled).await {
                    warn!(error = %store, "failed to clear unconfirmed shipment marker");
                }
                Err(e.into())
            }
        }
    }

    async fn load(&self, order_id: Uuid) -> crate::Result<Order> {
        self.store.get_order(order_id).await?.ok_or_else(|| FulfillmentError::OrderNotFound(order_id.to_string()))
    }

    async fn record_assignment(&self, order_id: Uuid, assignment: AwbAssignment) -> crate::Result<Order> {
        let patch = OrderPatch {
            status: Some(OrderStatus::Processing),
            tracking_url: Some(self.settings.tracking_url(&assignment.awb_code)),
            courier_id: assignment.courier_id,
            courier_name: Some(assignment.courier_name),
            awb_code: Some(assignment.awb_code),
            attention: Some(Attention::Clear),
            ..Default::default()
        };
        self.persist(order_id, patch).await
    }

    async fn persist(&self, order_id: Uuid, patch: OrderPatch) -> crate::Result<Order> {
        let outcome = self.store.update_order(order_id, patch).await?;
        if let StatusDecision::Rejected { current, requested } = outcome.decision {
            warn!(%order_id, status = %current, %requested, "status change refused, order moved on concurrently");
        }
        self.events.publish(&outcome.events).await;
        Ok(outcome.order)
    }

    async fn fail(&self, order: &Order, error: FulfillmentError, step: &'static str) -> FulfillmentResult {
        error!(step, kind = ?error.kind(), error = %error, "fulfillment step failed");
        let reason = format!("{step}: {error}");
        let order = match self.persist(order.id(), OrderPatch::flag(reason)).await {
            Ok(flagged) => flagged,
            Err(e) => {
                error!(error = %e, "failed to record fulfillment failure");
                order.clone()
            }
        };
        FulfillmentResult::failed(order.id(), Some(&order), &error)
    }
}
