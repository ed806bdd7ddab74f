//! Fulfillment runs against a mocked aggregator and email provider.

mod common;

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use common::{new_order, Harness, COURIER_ID};
use opensase_fulfillment::notify::NotificationOutcome;
use opensase_fulfillment::{ErrorKind, FulfillmentOutcome, FulfillmentSettings, OrderStatus};

#[tokio::test]
async fn assigns_courier_and_moves_order_to_processing() {
    let h = Harness::start().await;
    h.mount_login(1).await;
    h.mount_create_shipment(8001, 1).await;
    Mock::given(method("POST"))
        .and(path("/courier/assign/awb"))
        .and(body_partial_json(json!({"shipment_id": 8001, "courier_id": COURIER_ID})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "awb_assign_status": 1,
            "response": {"data": {"awb_code": "AWB1001", "courier_company_id": COURIER_ID, "courier_name": "Delhivery Surface"}}
        })))
        .expect(1)
        .mount(&h.carrier)
        .await;
    h.accept_emails().await;
    let order = h.place(new_order()).await;

    let result = h.service.run_fulfillment(order.id()).await;

    assert_eq!(result.outcome, FulfillmentOutcome::Completed);
    assert_eq!(result.status, OrderStatus::Processing);
    assert_eq!(result.awb.as_deref(), Some("AWB1001"));
    assert!(result.courier_assigned);
    assert!(result.errors.is_empty());

    let stored = h.reload(&order).await;
    assert_eq!(stored.status(), OrderStatus::Processing);
    assert_eq!(stored.awb_code(), Some("AWB1001"));
    assert_eq!(stored.shipment().shipment_id, Some(8001));
    assert_eq!(stored.shipment().carrier_order_id, Some(5001));
    assert_eq!(stored.shipment().courier_name.as_deref(), Some("Delhivery Surface"));
    assert_eq!(stored.shipment().tracking_url.as_deref(), Some("https://shiprocket.co/tracking/AWB1001"));
    assert_eq!(h.sent_subjects().await, vec![format!("Your order {} is being prepared", order.order_number())]);
}

#[tokio::test]
async fn missing_email_still_ships_but_skips_notification() {
    let h = Harness::start().await;
    h.mount_login(1).await;
    h.mount_create_shipment(8002, 1).await;
    h.mount_assign("AWB1002", 1).await;
    h.accept_emails().await;
    let mut new = new_order();
    new.customer.email = String::new();
    let order = h.place(new).await;

    let result = h.service.run_fulfillment(order.id()).await;

    assert_eq!(result.status, OrderStatus::Processing);
    assert!(result.notification_skipped);
    assert!(!result.notification_failed);
    assert!(h.sent_subjects().await.is_empty());
}

#[tokio::test]
async fn bad_credentials_leave_order_pending_without_shipment() {
    let h = Harness::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "Invalid email and password combination"})))
        .expect(2)
        .mount(&h.carrier)
        .await;
    h.mount_create_shipment(1, 0).await;
    let order = h.place(new_order()).await;

    for _ in 0..2 {
        let result = h.service.run_fulfillment(order.id()).await;
        assert_eq!(result.outcome, FulfillmentOutcome::Failed);
        assert_eq!(result.failure, Some(ErrorKind::AuthenticationFailed));
        assert_eq!(result.status, OrderStatus::Pending);
    }

    let stored = h.reload(&order).await;
    assert_eq!(stored.status(), OrderStatus::Pending);
    assert!(stored.shipment().shipment_id.is_none());
    assert!(stored.needs_attention());
    assert!(stored.fulfillment_error().unwrap_or_default().starts_with("create shipment"));
}

#[tokio::test]
async fn failed_assignment_keeps_shipment_and_flags_order() {
    let h = Harness::start().await;
    h.mount_login(1).await;
    h.mount_create_shipment(8003, 1).await;
    Mock::given(method("POST"))
        .and(path("/courier/assign/awb"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "awb_assign_status": 0,
            "response": {"data": {"awb_assign_error": "Courier not serviceable for this pincode"}}
        })))
        .expect(1)
        .mount(&h.carrier)
        .await;
    h.accept_emails().await;
    let order = h.place(new_order()).await;

    let result = h.service.run_fulfillment(order.id()).await;

    assert_eq!(result.outcome, FulfillmentOutcome::NeedsManualAssignment);
    assert_eq!(result.failure, Some(ErrorKind::CarrierRejected));
    assert_eq!(result.shipment_id, Some(8003));
    assert!(!result.courier_assigned);
    assert!(result.needs_attention);

    let stored = h.reload(&order).await;
    assert_eq!(stored.status(), OrderStatus::Pending);
    assert_eq!(stored.shipment().shipment_id, Some(8003));
    assert!(stored.needs_attention());
    assert!(stored.fulfillment_error().unwrap_or_default().contains("not serviceable"));
    // the customer still hears that the order was received
    assert_eq!(h.sent_subjects().await, vec![format!("Order {} confirmed", order.order_number())]);
}

#[tokio::test]
async fn rerun_after_failed_assignment_reuses_the_shipment() {
    let h = Harness::start().await;
    h.mount_login(1).await;
    h.mount_create_shipment(8004, 1).await;
    Mock::given(method("POST"))
        .and(path("/courier/assign/awb"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&h.carrier)
        .await;
    h.mount_assign("AWB1004", 1).await;
    h.accept_emails().await;
    let order = h.place(new_order()).await;

    let first = h.service.run_fulfillment(order.id()).await;
    assert_eq!(first.outcome, FulfillmentOutcome::NeedsManualAssignment);
    assert_eq!(first.failure, Some(ErrorKind::TransientNetwork));

    let second = h.service.run_fulfillment(order.id()).await;
    assert_eq!(second.outcome, FulfillmentOutcome::Completed);
    assert_eq!(second.awb.as_deref(), Some("AWB1004"));
    assert!(!second.needs_attention);

    let stored = h.reload(&order).await;
    assert_eq!(stored.shipment().shipment_id, Some(8004));
    assert!(stored.fulfillment_error().is_none());
}

#[tokio::test]
async fn order_with_awb_is_not_sent_to_the_carrier_again() {
    let h = Harness::start().await;
    h.mount_login(1).await;
    h.mount_create_shipment(8005, 1).await;
    h.mount_assign("AWB1005", 1).await;
    h.accept_emails().await;
    let order = h.place(new_order()).await;

    h.service.run_fulfillment(order.id()).await;
    let again = h.service.run_fulfillment(order.id()).await;

    assert_eq!(again.outcome, FulfillmentOutcome::AlreadyFulfilled);
    assert_eq!(again.awb.as_deref(), Some("AWB1005"));
    assert_eq!(h.sent_subjects().await.len(), 1);
}

#[tokio::test]
async fn incomplete_address_is_rejected_before_any_carrier_call() {
    let h = Harness::start().await;
    h.mount_login(0).await;
    h.mount_create_shipment(1, 0).await;
    let mut new = new_order();
    new.customer.address.pincode = String::new();
    new.customer.phone = " ".into();
    let order = h.place(new).await;

    let result = h.service.run_fulfillment(order.id()).await;

    assert_eq!(result.failure, Some(ErrorKind::Validation));
    assert_eq!(result.errors, vec!["Shipment is missing required fields: billing_phone, billing_pincode"]);
    let stored = h.reload(&order).await;
    assert_eq!(stored.status(), OrderStatus::Pending);
    assert!(stored.needs_attention());
}

#[tokio::test]
async fn missing_pickup_location_is_recorded() {
    let h = Harness::with_settings(FulfillmentSettings::default()).await;
    h.mount_login(1).await;
    Mock::given(method("GET"))
        .and(path("/settings/company/pickup"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"shipping_address": []}})))
        .mount(&h.carrier)
        .await;
    h.mount_create_shipment(1, 0).await;
    let order = h.place(new_order()).await;

    let result = h.service.run_fulfillment(order.id()).await;

    assert_eq!(result.failure, Some(ErrorKind::NoPickupLocationConfigured));
    let stored = h.reload(&order).await;
    assert_eq!(stored.status(), OrderStatus::Pending);
    assert!(stored.needs_attention());
}

#[tokio::test]
async fn primary_pickup_location_is_used_when_none_is_configured() {
    let h = Harness::with_settings(FulfillmentSettings::default()).await;
    h.mount_login(1).await;
    Mock::given(method("GET"))
        .and(path("/settings/company/pickup"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"shipping_address": [
            {"id": 1, "pickup_location": "Backup", "is_primary_location": 0},
            {"id": 2, "pickup_location": "Warehouse-BLR", "is_primary_location": 1}
        ]}})))
        .mount(&h.carrier)
        .await;
    Mock::given(method("POST"))
        .and(path("/orders/create/adhoc"))
        .and(body_partial_json(json!({"pickup_location": "Warehouse-BLR", "payment_method": "Prepaid"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"order_id": 5002, "shipment_id": 8006, "status": "NEW", "status_code": 1})))
        .expect(1)
        .mount(&h.carrier)
        .await;
    h.mount_assign("AWB1006", 1).await;
    h.accept_emails().await;
    let order = h.place(new_order()).await;

    let result = h.service.run_fulfillment(order.id()).await;

    assert_eq!(result.outcome, FulfillmentOutcome::Completed);
    assert_eq!(h.reload(&order).await.shipment().pickup_location.as_deref(), Some("Warehouse-BLR"));
}

#[tokio::test]
async fn rejected_shipment_keeps_order_pending() {
    let h = Harness::start().await;
    h.mount_login(1).await;
    Mock::given(method("POST"))
        .and(path("/orders/create/adhoc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status_code": 0, "message": "Order id already exists"})))
        .expect(1)
        .mount(&h.carrier)
        .await;
    let order = h.place(new_order()).await;

    let result = h.service.run_fulfillment(order.id()).await;

    assert_eq!(result.failure, Some(ErrorKind::CarrierRejected));
    assert!(result.errors[0].contains("Order id already exists"));
    assert_eq!(h.reload(&order).await.status(), OrderStatus::Pending);
}

#[tokio::test]
async fn shipment_creation_is_not_retried_on_server_errors() {
    let h = Harness::start().await;
    h.mount_login(1).await;
    Mock::given(method("POST"))
        .and(path("/orders/create/adhoc"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&h.carrier)
        .await;
    let order = h.place(new_order()).await;

    let result = h.service.run_fulfillment(order.id()).await;

    assert_eq!(result.failure, Some(ErrorKind::TransientNetwork));
    let stored = h.reload(&order).await;
    assert_eq!(stored.status(), OrderStatus::Pending);
    assert!(stored.shipment().creation_unconfirmed);
    assert!(stored.shipment().shipment_id.is_none());
}

#[tokio::test]
async fn rerun_after_unconfirmed_create_adopts_the_carrier_shipment() {
    let h = Harness::start().await;
    h.mount_login(1).await;
    Mock::given(method("POST"))
        .and(path("/orders/create/adhoc"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&h.carrier)
        .await;
    h.mount_assign("AWB1011", 1).await;
    h.accept_emails().await;
    let order = h.place(new_order()).await;
    Mock::given(method("GET"))
        .and(path("/orders"))
        .and(query_param("search", order.order_number()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": 5011, "channel_order_id": order.order_number(), "status": "NEW", "shipments": [{"id": 8011, "awb": ""}]}]
        })))
        .expect(1)
        .mount(&h.carrier)
        .await;

    let first = h.service.run_fulfillment(order.id()).await;
    assert_eq!(first.failure, Some(ErrorKind::TransientNetwork));

    let second = h.service.run_fulfillment(order.id()).await;
    assert_eq!(second.outcome, FulfillmentOutcome::Completed);
    assert_eq!(second.shipment_id, Some(8011));
    assert_eq!(second.awb.as_deref(), Some("AWB1011"));

    let stored = h.reload(&order).await;
    assert_eq!(stored.shipment().carrier_order_id, Some(5011));
    assert!(!stored.shipment().creation_unconfirmed);
    assert!(!stored.needs_attention());
}

#[tokio::test]
async fn rerun_creates_again_when_the_carrier_has_no_shipment() {
    let h = Harness::start().await;
    h.mount_login(1).await;
    Mock::given(method("POST"))
        .and(path("/orders/create/adhoc"))
        .respond_with(ResponseTemplate::new(504))
        .up_to_n_times(1)
        .expect(1)
        .mount(&h.carrier)
        .await;
    h.mount_create_shipment(8012, 1).await;
    Mock::given(method("GET"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(1)
        .mount(&h.carrier)
        .await;
    h.mount_assign("AWB1012", 1).await;
    h.accept_emails().await;
    let order = h.place(new_order()).await;

    assert_eq!(h.service.run_fulfillment(order.id()).await.failure, Some(ErrorKind::TransientNetwork));
    let second = h.service.run_fulfillment(order.id()).await;

    assert_eq!(second.outcome, FulfillmentOutcome::Completed);
    assert_eq!(second.shipment_id, Some(8012));
}

#[tokio::test]
async fn rejected_create_needs_no_carrier_search_on_rerun() {
    let h = Harness::start().await;
    h.mount_login(1).await;
    Mock::given(method("POST"))
        .and(path("/orders/create/adhoc"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"message": "Invalid pincode"})))
        .up_to_n_times(1)
        .expect(1)
        .mount(&h.carrier)
        .await;
    h.mount_create_shipment(8013, 1).await;
    Mock::given(method("GET")).and(path("/orders")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&h.carrier).await;
    h.mount_assign("AWB1013", 1).await;
    h.accept_emails().await;
    let order = h.place(new_order()).await;

    assert_eq!(h.service.run_fulfillment(order.id()).await.failure, Some(ErrorKind::CarrierRejected));
    assert!(!h.reload(&order).await.shipment().creation_unconfirmed);
    assert_eq!(h.service.run_fulfillment(order.id()).await.outcome, FulfillmentOutcome::Completed);
}

#[tokio::test]
async fn notification_failure_does_not_undo_fulfillment() {
    let h = Harness::start().await;
    h.mount_login(1).await;
    h.mount_create_shipment(8007, 1).await;
    h.mount_assign("AWB1007", 1).await;
    h.reject_emails().await;
    let order = h.place(new_order()).await;

    let result = h.service.run_fulfillment(order.id()).await;

    assert_eq!(result.outcome, FulfillmentOutcome::NotificationFailed);
    assert!(result.notification_failed);
    let stored = h.reload(&order).await;
    assert_eq!(stored.status(), OrderStatus::Processing);
    assert_eq!(stored.awb_code(), Some("AWB1007"));
}

#[tokio::test]
async fn order_without_courier_preference_waits_for_assignment() {
    let h = Harness::start().await;
    h.mount_login(1).await;
    h.mount_create_shipment(8008, 1).await;
    h.mount_assign("AWB1008", 1).await;
    h.accept_emails().await;
    let mut new = new_order();
    new.courier_preference = None;
    let order = h.place(new).await;

    let result = h.service.run_fulfillment(order.id()).await;
    assert_eq!(result.outcome, FulfillmentOutcome::AwaitingAssignment);
    assert_eq!(result.status, OrderStatus::Pending);
    assert!(!result.needs_attention);

    let assigned = h.service.assign_courier(order.id(), COURIER_ID).await.unwrap();
    assert_eq!(assigned.outcome, FulfillmentOutcome::Completed);
    assert_eq!(assigned.status, OrderStatus::Processing);
    assert_eq!(assigned.awb.as_deref(), Some("AWB1008"));
    assert_eq!(h.sent_subjects().await.len(), 2);
}

#[tokio::test]
async fn concurrent_runs_share_one_login() {
    let h = Harness::start().await;
    h.mount_login(1).await;
    h.mount_create_shipment(8009, 8).await;
    h.mount_assign("AWB1009", 8).await;
    h.accept_emails().await;

    let mut orders = vec![];
    for _ in 0..8 {
        orders.push(h.place(new_order()).await);
    }
    let service = Arc::clone(&h.service);
    let runs = orders.iter().map(|o| {
        let service = Arc::clone(&service);
        let id = o.id();
        tokio::spawn(async move { service.run_fulfillment(id).await })
    });
    for result in futures::future::join_all(runs).await {
        assert_eq!(result.unwrap().status, OrderStatus::Processing);
    }
}

#[tokio::test]
async fn cancelling_an_assigned_order_cancels_the_awb() {
    let h = Harness::start().await;
    h.mount_login(1).await;
    h.mount_create_shipment(8010, 1).await;
    h.mount_assign("AWB1010", 1).await;
    Mock::given(method("POST"))
        .and(path("/orders/cancel/shipment/awbs"))
        .and(body_partial_json(json!({"awbs": ["AWB1010"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "Bulk Shipment cancellation is in progress."})))
        .expect(1)
        .mount(&h.carrier)
        .await;
    h.accept_emails().await;
    let order = h.place(new_order()).await;
    h.service.run_fulfillment(order.id()).await;

    let cancelled = h.service.cancel_order(order.id()).await.unwrap();
    assert_eq!(cancelled.status(), OrderStatus::Cancelled);

    // cancelling twice is harmless
    assert_eq!(h.service.cancel_order(order.id()).await.unwrap().status(), OrderStatus::Cancelled);
    let subjects = h.sent_subjects().await;
    assert_eq!(subjects.len(), 2);
    assert!(subjects[1].ends_with("has been cancelled"));
}

#[tokio::test]
async fn notification_can_be_resent() {
    let h = Harness::start().await;
    h.accept_emails().await;
    let order = h.place(new_order()).await;

    let outcome = h.service.resend_notification(order.id()).await.unwrap();
    assert!(matches!(outcome, NotificationOutcome::Sent { .. }));
    assert_eq!(h.sent_subjects().await, vec![format!("Order {} confirmed", order.order_number())]);
}

#[tokio::test]
async fn unknown_order_is_reported_in_the_result() {
    let h = Harness::start().await;
    let result = h.service.run_fulfillment(uuid::Uuid::now_v7()).await;
    assert_eq!(result.failure, Some(ErrorKind::OrderNotFound));
}
