//! Order Aggregate
//!
//! The order record the fulfillment workflow and the carrier webhook both
//! write to. All mutation after placement goes through [`Order::apply`], which
//! enforces the status ordering so that the two writers can interleave freely.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;
use crate::domain::events::OrderEvent;
use crate::domain::value_objects::{EmailAddress, EmailAddressError, Money, PackageDimensions};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    id: Uuid,
    order_number: String,
    status: OrderStatus,
    payment_method: PaymentMethod,
    items: Vec<LineItem>,
    subtotal: Decimal,
    shipping_cost: Decimal,
    tax: Decimal,
    discount: Decimal,
    total: Decimal,
    currency: String,
    customer: CustomerSnapshot,
    courier_preference: Option<u32>,
    package: Option<PackageDimensions>,
    shipment: ShipmentInfo,
    needs_attention: bool,
    fulfillment_error: Option<String>,
    notified: Vec<NotificationKind>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<OrderEvent>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    #[serde(default)]
    pub sku: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl LineItem {
    pub fn line_total(&self, currency: &str) -> Money { Money::new(self.unit_price, currency).multiply(self.quantity) }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub pincode: String,
    pub country: String,
}

/// Contact details as they were when the order was placed.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
pub struct CustomerSnapshot {
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub address: Address,
}

/// Carrier-side identifiers accumulated during fulfillment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShipmentInfo {
    pub carrier_order_id: Option<u64>,
    pub shipment_id: Option<u64>,
    pub awb_code: Option<String>,
    pub tracking_url: Option<String>,
    pub courier_id: Option<u32>,
    pub courier_name: Option<String>,
    pub pickup_location: Option<String>,
    pub last_carrier_status: Option<String>,
    /// A create call went out and its result never came back. The carrier
    /// must be searched before creating again.
    #[serde(default)]
    pub creation_unconfirmed: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus { #[default] Pending, Processing, Shipped, Delivered, Cancelled }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    /// Position on the happy path. `Cancelled` sits outside it.
    fn rank(&self) -> u8 {
        match self { Self::Pending => 0, Self::Processing => 1, Self::Shipped => 2, Self::Delivered => 3, Self::Cancelled => 4 }
    }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Delivered | Self::Cancelled) }

    /// Whether an order currently in `self` may move to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if self.is_terminal() { return false; }
        if next == Self::Cancelled { return true; }
        next.rank() > self.rank()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(OrderError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod { #[default] Prepaid, #[serde(rename = "COD")] Cod }

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str { match self { Self::Prepaid => "Prepaid", Self::Cod => "COD" } }
    pub fn is_cod(&self) -> bool { matches!(self, Self::Cod) }
}

/// Customer-facing message families, one per status the customer hears about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind { Confirmed, Processing, Shipped, Delivered, Cancelled }

impl NotificationKind {
    pub fn for_status(status: OrderStatus) -> Self {
        match status {
            OrderStatus::Pending => Self::Confirmed,
            OrderStatus::Processing => Self::Processing,
            OrderStatus::Shipped => Self::Shipped,
            OrderStatus::Delivered => Self::Delivered,
            OrderStatus::Cancelled => Self::Cancelled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Checkout input. Only what a storefront must provide is checked here; the
/// shipment-level requirements are enforced when fulfillment runs.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct NewOrder {
    #[validate]
    pub customer: CustomerSnapshot,
    #[validate(length(min = 1))]
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub shipping_cost: Decimal,
    #[serde(default)]
    pub tax: Decimal,
    #[serde(default)]
    pub discount: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub courier_preference: Option<u32>,
    #[serde(default)]
    pub package: Option<PackageDimensions>,
}

fn default_currency() -> String { "INR".to_string() }

#[derive(Clone, Debug, PartialEq)]
pub enum Attention { Flag(String), Clear }

/// A partial update. Absent fields leave the stored value alone.
#[derive(Clone, Debug, Default)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub carrier_order_id: Option<u64>,
    pub shipment_id: Option<u64>,
    pub awb_code: Option<String>,
    pub tracking_url: Option<String>,
    pub courier_id: Option<u32>,
    pub courier_name: Option<String>,
    pub pickup_location: Option<String>,
    pub last_carrier_status: Option<String>,
    pub attention: Option<Attention>,
    pub notified: Option<NotificationKind>,
    pub creation_unconfirmed: Option<bool>,
}

impl OrderPatch {
    pub fn status(status: OrderStatus) -> Self { Self { status: Some(status), ..Default::default() } }
    pub fn flag(reason: impl Into<String>) -> Self { Self { attention: Some(Attention::Flag(reason.into())), ..Default::default() } }
    pub fn notified(kind: NotificationKind) -> Self { Self { notified: Some(kind), ..Default::default() } }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusDecision {
    Unchanged,
    Applied { from: OrderStatus, to: OrderStatus },
    Rejected { current: OrderStatus, requested: OrderStatus },
}

impl StatusDecision {
    pub fn applied(&self) -> bool { matches!(self, Self::Applied { .. }) }
}

impl Order {
    pub fn place(new: NewOrder) -> Result<Self, OrderError> {
        if new.items.is_empty() { return Err(OrderError::NoItems); }
        if let Some(item) = new.items.iter().find(|i| i.quantity == 0 || i.name.trim().is_empty()) {
            return Err(OrderError::InvalidQuantity(item.name.clone()));
        }
        let now = Utc::now();
        let subtotal = new.items.iter()
            .fold(Money::zero(&new.currency), |acc, i| acc.add(&i.line_total(&new.currency)).unwrap_or(acc))
            .amount();
        let total = subtotal + new.shipping_cost + new.tax - new.discount;
        Ok(Self {
            id: Uuid::now_v7(), order_number: format!("ORD-{:08}", rand::random::<u32>()),
            status: OrderStatus::Pending, payment_method: new.payment_method, items: new.items,
            subtotal, shipping_cost: new.shipping_cost, tax: new.tax, discount: new.discount, total,
            currency: new.currency, customer: new.customer, courier_preference: new.courier_preference,
            package: new.package, shipment: ShipmentInfo::default(), needs_attention: false,
            fulfillment_error: None, notified: vec![], created_at: now, updated_at: now, events: vec![],
        })
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_number(&self) -> &str { &self.order_number }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment_method(&self) -> PaymentMethod { self.payment_method }
    pub fn items(&self) -> &[LineItem] { &self.items }
    pub fn subtotal(&self) -> Money { Money::new(self.subtotal, &self.currency) }
    pub fn shipping_cost(&self) -> Money { Money::new(self.shipping_cost, &self.currency) }
    pub fn tax(&self) -> Money { Money::new(self.tax, &self.currency) }
    pub fn discount(&self) -> Money { Money::new(self.discount, &self.currency) }
    pub fn total(&self) -> Money { Money::new(self.total, &self.currency) }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn customer(&self) -> &CustomerSnapshot { &self.customer }
    pub fn courier_preference(&self) -> Option<u32> { self.courier_preference }
    pub fn package(&self) -> Option<PackageDimensions> { self.package }
    pub fn shipment(&self) -> &ShipmentInfo { &self.shipment }
    pub fn awb_code(&self) -> Option<&str> { self.shipment.awb_code.as_deref() }
    pub fn needs_attention(&self) -> bool { self.needs_attention }
    pub fn fulfillment_error(&self) -> Option<&str> { self.fulfillment_error.as_deref() }
    pub fn was_notified(&self, kind: NotificationKind) -> bool { self.notified.contains(&kind) }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn contact_email(&self) -> Result<EmailAddress, EmailAddressError> { EmailAddress::parse(&self.customer.email) }

    /// Applies `patch`, guarding the status field with [`OrderStatus::can_transition_to`].
    /// Carrier identifiers are recorded even when the status change is refused.
    pub fn apply(&mut self, patch: OrderPatch) -> StatusDecision {
        let ship = &mut self.shipment;
        if let Some(id) = patch.carrier_order_id { ship.carrier_order_id = Some(id); }
        if let Some(pending) = patch.creation_unconfirmed { ship.creation_unconfirmed = pending; }
        if let Some(id) = patch.shipment_id {
            ship.creation_unconfirmed = false;
            if ship.shipment_id != Some(id) {
                ship.shipment_id = Some(id);
                self.events.push(OrderEvent::ShipmentCreated { order_id: self.id, shipment_id: id });
            }
        }
        if let Some(id) = patch.courier_id { self.shipment.courier_id = Some(id); }
        if let Some(name) = patch.courier_name { self.shipment.courier_name = Some(name); }
        if let Some(awb) = patch.awb_code {
            if self.shipment.awb_code.as_deref() != Some(awb.as_str()) {
                self.events.push(OrderEvent::CourierAssigned {
                    order_id: self.id, awb_code: awb.clone(),
                    courier_name: self.shipment.courier_name.clone().unwrap_or_default(),
                });
                self.shipment.awb_code = Some(awb);
            }
        }
        if let Some(url) = patch.tracking_url { self.shipment.tracking_url = Some(url); }
        if let Some(loc) = patch.pickup_location { self.shipment.pickup_location = Some(loc); }
        if let Some(raw) = patch.last_carrier_status { self.shipment.last_carrier_status = Some(raw); }
        match patch.attention {
            Some(Attention::Flag(reason)) => {
                self.needs_attention = true;
                self.events.push(OrderEvent::FulfillmentFailed { order_id: self.id, reason: reason.clone() });
                self.fulfillment_error = Some(reason);
            }
            Some(Attention::Clear) => { self.needs_attention = false; self.fulfillment_error = None; }
            None => {}
        }
        if let Some(kind) = patch.notified {
            if !self.notified.contains(&kind) { self.notified.push(kind); }
        }

        let decision = match patch.status {
            None => StatusDecision::Unchanged,
            Some(next) if next == self.status => StatusDecision::Unchanged,
            Some(next) if self.status.can_transition_to(next) => {
                let from = self.status;
                self.status = next;
                self.events.push(OrderEvent::StatusChanged { order_id: self.id, from, to: next });
                StatusDecision::Applied { from, to: next }
            }
            Some(next) => StatusDecision::Rejected { current: self.status, requested: next },
        };
        self.touch();
        decision
    }

    pub fn take_events(&mut self) -> Vec<OrderEvent> { std::mem::take(&mut self.events) }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq)] pub enum OrderError { NoItems, InvalidQuantity(String), UnknownStatus(String) }
impl std::error::Error for OrderError {}
impl fmt::Display for OrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoItems => write!(f, "No items"),
            Self::InvalidQuantity(name) => write!(f, "Invalid quantity for {name}"),
            Self::UnknownStatus(s) => write!(f, "Unknown order status: {s}"),
        }
    }
}
