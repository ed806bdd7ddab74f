//! Builds the carrier shipment payload from a stored order.

use validator::Validate;

use crate::carrier::{ShipmentItem, ShipmentRequest};
use crate::domain::aggregates::Order;
use crate::domain::value_objects::PackageDimensions;
use crate::FulfillmentError;

pub fn build_request(order: &Order, pickup_location: &str, default_package: PackageDimensions) -> ShipmentRequest {
    let customer = order.customer();
    let address = &customer.address;
    let (first, last) = match customer.name.trim().split_once(' ') {
        Some((first, last)) => (first.to_string(), last.trim().to_string()),
        None => (customer.name.trim().to_string(), String::new()),
    };
    let package = order.package().unwrap_or(default_package);

    ShipmentRequest {
        order_id: order.order_number().to_string(),
        order_date: order.created_at().format("%Y-%m-%d %H:%M").to_string(),
        pickup_location: pickup_location.to_string(),
        billing_customer_name: first,
        billing_last_name: last,
        billing_address: address.line1.trim().to_string(),
        billing_address_2: address.line2.clone().filter(|l| !l.trim().is_empty()),
        billing_city: address.city.trim().to_string(),
        billing_pincode: address.pincode.trim().to_string(),
        billing_state: address.state.trim().to_string(),
        billing_country: address.country.trim().to_string(),
        billing_email: customer.email.trim().to_string(),
        billing_phone: customer.phone.trim().to_string(),
        shipping_is_billing: true,
        order_items: order.items().iter().map(|i| ShipmentItem {
            name: i.name.clone(),
            sku: if i.sku.is_empty() { i.name.clone() } else { i.sku.clone() },
            units: i.quantity,
            selling_price: i.unit_price,
        }).collect(),
        payment_method: order.payment_method().as_str().to_string(),
        shipping_charges: order.shipping_cost().amount(),
        total_discount: order.discount().amount(),
        sub_total: order.subtotal().amount(),
        length: package.length_cm,
        breadth: package.breadth_cm,
        height: package.height_cm,
        weight: package.weight_kg,
    }
}

/// Every field the carrier needs to create a shipment, by name. The billing
/// email is deliberately not among them.
pub fn validate(request: &ShipmentRequest) -> Result<(), FulfillmentError> {
    let mut missing: Vec<String> = match request.validate() {
        Ok(()) => vec![],
        Err(errors) => errors.field_errors().keys().map(|k| k.to_string()).collect(),
    };
    if request.order_items.iter().any(|i| i.name.trim().is_empty() || i.units == 0) {
        missing.push("order_items".to_string());
    }
    if missing.is_empty() {
        return Ok(());
    }
    missing.sort();
    missing.dedup();
    Err(FulfillmentError::Validation(missing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{Address, CustomerSnapshot, LineItem, NewOrder, PaymentMethod};
    use rust_decimal::Decimal;

    fn order(customer: CustomerSnapshot) -> Order {
        Order::place(NewOrder {
            customer,
            items: vec![LineItem { name: "Kurta".into(), sku: String::new(), quantity: 2, unit_price: Decimal::new(499, 0) }],
            shipping_cost: Decimal::new(50, 0), tax: Decimal::ZERO, discount: Decimal::ZERO, currency: "INR".into(),
            payment_method: PaymentMethod::Cod, courier_preference: None, package: None,
        }).unwrap()
    }

    fn customer() -> CustomerSnapshot {
        CustomerSnapshot {
            name: "Asha Devi Rao".into(), email: "asha@example.com".into(), phone: "9876543210".into(),
            address: Address { line1: "12 MG Road".into(), line2: Some(" ".into()), city: "Bengaluru".into(), state: "Karnataka".into(), pincode: "560001".into(), country: "India".into() },
        }
    }

    #[test]
    fn builds_payload_from_snapshot() {
        let o = order(customer());
        let r = build_request(&o, "Primary", PackageDimensions::default());
        assert_eq!(r.order_id, o.order_number());
        assert_eq!(r.billing_customer_name, "Asha");
        assert_eq!(r.billing_last_name, "Devi Rao");
        assert!(r.billing_address_2.is_none());
        assert_eq!(r.payment_method, "COD");
        assert_eq!(r.sub_total, Decimal::new(998, 0));
        assert_eq!(r.order_items[0].sku, "Kurta");
        assert_eq!(r.weight, 0.5);
        assert!(validate(&r).is_ok());
    }

    #[test]
    fn missing_fields_are_named() {
        let mut c = customer();
        c.address.city = " ".into();
        c.phone = String::new();
        let r = build_request(&order(c), "", PackageDimensions { weight_kg: 0.0, ..Default::default() });
        match validate(&r).unwrap_err() {
            FulfillmentError::Validation(fields) => assert_eq!(fields, vec!["billing_city", "billing_phone", "pickup_location", "weight"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_email_does_not_fail_validation() {
        let mut c = customer();
        c.email = String::new();
        assert!(validate(&build_request(&order(c), "Primary", PackageDimensions::default())).is_ok());
    }
}
