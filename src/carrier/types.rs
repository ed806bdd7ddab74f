//! Request and response payloads for the shipping aggregator API.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;
use validator::{Validate, ValidationError};

use super::error::CarrierError;

// =============================================================================
// Shipments
// =============================================================================

/// Payload for `POST /orders/create/adhoc`.
#[derive(Clone, Debug, Serialize, Validate)]
pub struct ShipmentRequest {
    #[validate(length(min = 1))]
    pub order_id: String,
    pub order_date: String,
    #[validate(length(min = 1))]
    pub pickup_location: String,
    #[validate(length(min = 1))]
    pub billing_customer_name: String,
    pub billing_last_name: String,
    #[validate(length(min = 1))]
    pub billing_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_address_2: Option<String>,
    #[validate(length(min = 1))]
    pub billing_city: String,
    #[validate(length(min = 1))]
    pub billing_pincode: String,
    #[validate(length(min = 1))]
    pub billing_state: String,
    #[validate(length(min = 1))]
    pub billing_country: String,
    /// Checked separately: a bad address degrades notifications, it does not block shipping.
    pub billing_email: String,
    #[validate(length(min = 1))]
    pub billing_phone: String,
    pub shipping_is_billing: bool,
    #[validate(length(min = 1))]
    pub order_items: Vec<ShipmentItem>,
    #[validate(length(min = 1))]
    pub payment_method: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub shipping_charges: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_discount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[validate(custom = "positive_amount")]
    pub sub_total: Decimal,
    #[validate(range(min = 0.01))]
    pub length: f64,
    #[validate(range(min = 0.01))]
    pub breadth: f64,
    #[validate(range(min = 0.01))]
    pub height: f64,
    #[validate(range(min = 0.01))]
    pub weight: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShipmentItem {
    pub name: String,
    pub sku: String,
    pub units: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub selling_price: Decimal,
}

fn positive_amount(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_positive() && !value.is_zero() { Ok(()) } else { Err(ValidationError::new("positive")) }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateShipmentResponse {
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    order_id: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    shipment_id: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    status: Option<String>,
    #[serde(default)]
    status_code: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    awb_code: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    courier_company_id: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    courier_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CreatedShipment {
    pub carrier_order_id: Option<u64>,
    pub shipment_id: u64,
    pub status: String,
    /// Some accounts auto-assign a courier at creation time.
    pub awb_code: Option<String>,
    pub courier_id: Option<u32>,
    pub courier_name: Option<String>,
}

impl CreateShipmentResponse {
    pub(crate) fn into_created(self) -> Result<CreatedShipment, CarrierError> {
        let message = || self.message.clone().unwrap_or_else(|| "carrier did not return a shipment id".to_string());
        if self.status_code == Some(0) {
            return Err(CarrierError::Rejected(message()));
        }
        let shipment_id = self.shipment_id.ok_or_else(|| CarrierError::Rejected(message()))?;
        Ok(CreatedShipment {
            carrier_order_id: self.order_id,
            shipment_id,
            status: self.status.unwrap_or_else(|| "NEW".to_string()),
            awb_code: self.awb_code,
            courier_id: self.courier_company_id.and_then(|id| u32::try_from(id).ok()),
            courier_name: self.courier_name,
        })
    }
}

/// `GET /orders?search=` lists carrier orders matching a channel order id.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct OrderSearchResponse {
    #[serde(default)]
    data: Vec<CarrierOrder>,
}

#[derive(Debug, Deserialize)]
struct CarrierOrder {
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    id: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    channel_order_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    status: Option<String>,
    #[serde(default)]
    shipments: Vec<CarrierOrderShipment>,
}

#[derive(Debug, Deserialize)]
struct CarrierOrderShipment {
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    id: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    awb: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    courier: Option<String>,
}

impl OrderSearchResponse {
    /// The search is a substring match, so only an exact channel id counts.
    pub(crate) fn find(self, channel_order_id: &str) -> Option<CreatedShipment> {
        self.data.into_iter().filter(|o| o.channel_order_id.as_deref() == Some(channel_order_id)).find_map(|order| {
            let shipment = order.shipments.into_iter().find(|s| s.id.is_some())?;
            Some(CreatedShipment {
                carrier_order_id: order.id,
                shipment_id: shipment.id?,
                status: order.status.unwrap_or_else(|| "NEW".to_string()),
                awb_code: shipment.awb,
                courier_id: None,
                courier_name: shipment.courier,
            })
        })
    }
}

// =============================================================================
// Courier assignment
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AssignAwbResponse {
    #[serde(default)]
    pub(crate) awb_assign_status: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub(crate) awb_code: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub(crate) courier_company_id: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub(crate) courier_name: Option<String>,
    #[serde(default)]
    pub(crate) response: Option<AssignAwbEnvelope>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub(crate) message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AssignAwbEnvelope {
    #[serde(default)]
    pub(crate) data: Option<AwbData>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AwbData {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub(crate) awb_code: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub(crate) courier_company_id: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub(crate) courier_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub(crate) awb_assign_error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AwbAssignment {
    pub awb_code: String,
    pub courier_id: Option<u32>,
    pub courier_name: String,
}

impl AssignAwbResponse {
    /// The AWB is echoed at the top level and under `response.data`; the
    /// nested copy is authoritative when the two disagree.
    pub(crate) fn resolve(self) -> Result<AwbAssignment, CarrierError> {
        let nested = self.response.and_then(|r| r.data).unwrap_or_default();
        let failure = nested.awb_assign_error.clone().or(self.message.clone());
        if self.awb_assign_status == Some(0) {
            return Err(CarrierError::Rejected(failure.unwrap_or_else(|| "courier assignment refused".to_string())));
        }
        let awb_code = match (nested.awb_code, self.awb_code) {
            (Some(inner), Some(outer)) if inner != outer => {
                warn!(nested = %inner, top_level = %outer, "AWB echoes disagree; using nested value");
                inner
            }
            (Some(inner), _) => inner,
            (None, Some(outer)) => outer,
            (None, None) => {
                return Err(CarrierError::Rejected(failure.unwrap_or_else(|| "no AWB in assignment response".to_string())));
            }
        };
        let courier_id = nested.courier_company_id.or(self.courier_company_id).and_then(|id| u32::try_from(id).ok());
        let courier_name = nested.courier_name.or(self.courier_name).unwrap_or_default();
        Ok(AwbAssignment { awb_code, courier_id, courier_name })
    }
}

// =============================================================================
// Serviceability
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct ServiceabilityResponse {
    #[serde(default)]
    pub(crate) data: Option<ServiceabilityData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServiceabilityData {
    #[serde(default)]
    pub(crate) available_courier_companies: Vec<ServiceableCourier>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServiceableCourier {
    pub(crate) courier_company_id: u32,
    pub(crate) courier_name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub(crate) rate: Decimal,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub(crate) etd: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CourierQuote {
    pub courier_id: u32,
    pub courier_name: String,
    pub rate: Decimal,
    pub etd: Option<String>,
}

impl From<ServiceableCourier> for CourierQuote {
    fn from(c: ServiceableCourier) -> Self {
        Self { courier_id: c.courier_company_id, courier_name: c.courier_name, rate: c.rate, etd: c.etd }
    }
}

// =============================================================================
// Documents, cancellation, returns
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind { Label, Invoice, Manifest }

impl DocumentKind {
    pub(crate) fn path(&self) -> &'static str {
        match self {
            Self::Label => "/courier/generate/label",
            Self::Invoice => "/orders/print/invoice",
            Self::Manifest => "/manifests/generate",
        }
    }

    /// Invoices are keyed by carrier order id, the others by shipment id.
    pub(crate) fn body(&self, ids: &[u64]) -> serde_json::Value {
        match self {
            Self::Invoice => serde_json::json!({ "ids": ids }),
            Self::Label | Self::Manifest => serde_json::json!({ "shipment_id": ids }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DocumentResponse {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    label_url: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    invoice_url: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    manifest_url: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    message: Option<String>,
}

impl DocumentResponse {
    pub(crate) fn into_url(self) -> Result<String, CarrierError> {
        self.label_url.or(self.invoice_url).or(self.manifest_url)
            .ok_or_else(|| CarrierError::Rejected(self.message.unwrap_or_else(|| "document was not generated".to_string())))
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct AckResponse {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub(crate) message: Option<String>,
}

/// Payload for `POST /orders/create/return`.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct ReturnRequest {
    #[validate(length(min = 1))]
    pub order_id: String,
    pub order_date: String,
    #[validate(length(min = 1))]
    pub pickup_customer_name: String,
    #[validate(length(min = 1))]
    pub pickup_address: String,
    #[validate(length(min = 1))]
    pub pickup_city: String,
    #[validate(length(min = 1))]
    pub pickup_state: String,
    #[validate(length(min = 1))]
    pub pickup_country: String,
    #[validate(length(min = 1))]
    pub pickup_pincode: String,
    #[serde(default)]
    pub pickup_email: String,
    #[validate(length(min = 1))]
    pub pickup_phone: String,
    #[validate(length(min = 1))]
    pub shipping_customer_name: String,
    #[validate(length(min = 1))]
    pub shipping_address: String,
    #[validate(length(min = 1))]
    pub shipping_city: String,
    #[validate(length(min = 1))]
    pub shipping_state: String,
    #[validate(length(min = 1))]
    pub shipping_country: String,
    #[validate(length(min = 1))]
    pub shipping_pincode: String,
    #[validate(length(min = 1))]
    pub shipping_phone: String,
    #[validate(length(min = 1))]
    pub order_items: Vec<ShipmentItem>,
    #[serde(default = "prepaid")]
    pub payment_method: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub sub_total: Decimal,
    pub length: f64,
    pub breadth: f64,
    pub height: f64,
    pub weight: f64,
}

fn prepaid() -> String { "Prepaid".to_string() }

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CreatedReturn {
    pub carrier_order_id: Option<u64>,
    pub shipment_id: Option<u64>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateReturnResponse {
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub(crate) order_id: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub(crate) shipment_id: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub(crate) status: Option<String>,
    #[serde(default)]
    pub(crate) status_code: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub(crate) message: Option<String>,
}

impl CreateReturnResponse {
    pub(crate) fn into_created(self) -> Result<CreatedReturn, CarrierError> {
        if self.status_code == Some(0) || self.order_id.is_none() {
            return Err(CarrierError::Rejected(self.message.unwrap_or_else(|| "return order was not created".to_string())));
        }
        Ok(CreatedReturn { carrier_order_id: self.order_id, shipment_id: self.shipment_id, status: self.status })
    }
}

// =============================================================================
// Tracking
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct TrackingResponse {
    pub(crate) tracking_data: TrackingData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TrackingData {
    #[serde(default)]
    shipment_track: Option<Vec<ShipmentTrack>>,
    #[serde(default)]
    shipment_track_activities: Option<Vec<TrackActivity>>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    track_url: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShipmentTrack {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    current_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrackActivity {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    date: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    activity: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    location: Option<String>,
    #[serde(default, rename = "sr-status-label", deserialize_with = "lenient::opt_string")]
    status_label: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackingCheckpoint {
    pub at: Option<NaiveDateTime>,
    pub status: String,
    pub activity: String,
    pub location: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Tracking {
    pub current_status: Option<String>,
    pub track_url: Option<String>,
    /// Oldest first.
    pub checkpoints: Vec<TrackingCheckpoint>,
}

impl TrackingData {
    pub(crate) fn into_tracking(self) -> Result<Tracking, CarrierError> {
        let activities = match (self.shipment_track_activities, self.error) {
            (None, Some(error)) => return Err(CarrierError::Rejected(error)),
            (activities, _) => activities.unwrap_or_default(),
        };
        let mut checkpoints: Vec<TrackingCheckpoint> = activities.into_iter().map(|a| TrackingCheckpoint {
            at: a.date.as_deref().and_then(|d| NaiveDateTime::parse_from_str(d, "%Y-%m-%d %H:%M:%S").ok()),
            status: a.status_label.unwrap_or_default(),
            activity: a.activity.unwrap_or_default(),
            location: a.location,
        }).collect();
        // the aggregator lists newest first
        checkpoints.reverse();
        // undated entries go last, keeping their listed order
        checkpoints.sort_by_key(|c| (c.at.is_none(), c.at));
        Ok(Tracking {
            current_status: self.shipment_track.into_iter().flatten().find_map(|t| t.current_status),
            track_url: self.track_url,
            checkpoints,
        })
    }
}

// =============================================================================
// Pickup locations
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct PickupLocationsResponse {
    pub(crate) data: PickupLocationsData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PickupLocationsData {
    #[serde(default)]
    pub(crate) shipping_address: Vec<PickupLocation>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PickupLocation {
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub id: Option<u64>,
    #[serde(rename = "pickup_location")]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub pin_code: Option<String>,
    #[serde(rename = "is_primary_location", default, deserialize_with = "lenient::flag")]
    pub is_primary: bool,
}

/// The primary location if one is flagged, else the first listed.
pub fn select_pickup_location(locations: &[PickupLocation]) -> Option<&PickupLocation> {
    locations.iter().find(|l| l.is_primary).or_else(|| locations.first())
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub(crate) token: String,
}

/// The aggregator is loose with scalar types: ids arrive as numbers or
/// strings, empty strings stand for absent values.
pub(crate) mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    pub fn opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Bool(b) => b,
            Value::Number(n) => n.as_i64() == Some(1),
            Value::String(s) => matches!(s.trim(), "1" | "true"),
            _ => false,
        })
    }
}
