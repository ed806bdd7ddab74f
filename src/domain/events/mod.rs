//! Domain events
use crate::domain::aggregates::OrderStatus;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    ShipmentCreated { order_id: Uuid, shipment_id: u64 },
    CourierAssigned { order_id: Uuid, awb_code: String, courier_name: String },
    StatusChanged { order_id: Uuid, from: OrderStatus, to: OrderStatus },
    FulfillmentFailed { order_id: Uuid, reason: String },
}

impl OrderEvent {
    pub fn order_id(&self) -> Uuid {
        match self {
            Self::ShipmentCreated { order_id, .. }
            | Self::CourierAssigned { order_id, .. }
            | Self::StatusChanged { order_id, .. }
            | Self::FulfillmentFailed { order_id, .. } => *order_id,
        }
    }

    /// Bus subject this event is published on.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::ShipmentCreated { .. } => "ecommerce.orders.shipment_created",
            Self::CourierAssigned { .. } => "ecommerce.orders.courier_assigned",
            Self::StatusChanged { .. } => "ecommerce.orders.status_changed",
            Self::FulfillmentFailed { .. } => "ecommerce.orders.fulfillment_failed",
        }
    }
}
