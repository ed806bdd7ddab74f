//! Carrier status vocabulary to order status.
//!
//! The table is closed: a status missing here leaves the order untouched. RTO
//! (return to origin), loss and damage all end the order as cancelled, since
//! the customer will not receive the parcel.

use crate::domain::aggregates::OrderStatus;

/// Upper-cased, single-spaced form with `_` and `-` treated as spaces.
pub fn normalize(raw: &str) -> String {
    raw.replace(['_', '-'], " ").split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase()
}

pub fn map_carrier_status(raw: &str) -> Option<OrderStatus> {
    let status = match normalize(raw).as_str() {
        "NEW" | "INVOICED" | "READY TO SHIP" | "AWB ASSIGNED" | "LABEL GENERATED" | "PICKUP SCHEDULED"
        | "PICKUP GENERATED" | "PICKUP QUEUED" | "PICKUP RESCHEDULED" | "MANIFEST GENERATED" | "OUT FOR PICKUP"
        | "PACKED" => OrderStatus::Processing,

        "PICKED UP" | "SHIPPED" | "IN TRANSIT" | "IN TRANSIT AT DESTINATION HUB" | "REACHED AT DESTINATION HUB"
        | "REACHED DESTINATION HUB" | "REACHED WAREHOUSE" | "OUT FOR DELIVERY" | "UNDELIVERED" | "DELAYED"
        | "MISROUTED" | "CUSTODY SCANNED" | "FULFILLED" => OrderStatus::Shipped,

        "DELIVERED" | "PARTIAL DELIVERED" => OrderStatus::Delivered,

        "CANCELED" | "CANCELLED" | "RTO" | "RTO INITIATED" | "RTO IN TRANSIT" | "RTO OFD" | "RTO NDR"
        | "RTO ACKNOWLEDGED" | "RTO DELIVERED" | "LOST" | "DAMAGED" | "DESTROYED" | "DISPOSED OFF" => OrderStatus::Cancelled,

        _ => return None,
    };
    Some(status)
}
