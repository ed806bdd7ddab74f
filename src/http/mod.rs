//! HTTP surface: checkout, order administration, carrier passthroughs and the
//! inbound carrier webhook.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, warn};
use uuid::Uuid;
use validator::Validate;

use crate::carrier::{CourierQuote, CreatedReturn, DocumentKind, PickupLocation, ReturnRequest, Tracking};
use crate::domain::aggregates::{NewOrder, Order};
use crate::fulfillment::{FulfillmentResult, FulfillmentService};
use crate::notify::NotificationOutcome;
use crate::store::OrderStore;
use crate::webhook::{signature, WebhookEvent, WebhookOutcome, WebhookReconciler};
use crate::{ErrorKind, FulfillmentError};

#[derive(Clone)]
pub struct AppState {
    pub fulfillment: Arc<FulfillmentService>,
    pub reconciler: Arc<WebhookReconciler>,
    pub webhook_secret: Option<Arc<str>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "opensase-fulfillment"})) }))
        .route("/api/v1/checkout", post(checkout))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/fulfill", post(fulfill_order))
        .route("/api/v1/orders/:id/assign-courier", post(assign_courier))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/orders/:id/notify", post(resend_notification))
        .route("/api/v1/shipping/serviceability", get(serviceability))
        .route("/api/v1/shipping/pickup-locations", get(pickup_locations))
        .route("/api/v1/shipping/tracking/:awb", get(tracking))
        .route("/api/v1/shipping/documents", post(generate_document))
        .route("/api/v1/shipping/cancel", post(cancel_shipments))
        .route("/api/v1/shipping/returns", post(create_return))
        .route("/api/v1/webhooks/carrier", post(carrier_webhook))
        .with_state(state)
}

impl IntoResponse for FulfillmentError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::OrderNotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidTransition => StatusCode::CONFLICT,
            ErrorKind::AuthenticationFailed | ErrorKind::CarrierRejected => StatusCode::BAD_GATEWAY,
            ErrorKind::TransientNetwork | ErrorKind::NoPickupLocationConfigured => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Storage | ErrorKind::Config => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({"error": self.to_string(), "kind": self.kind()}))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, FulfillmentError>;

fn invalid(errors: validator::ValidationErrors) -> FulfillmentError {
    let mut fields: Vec<String> = errors.errors().keys().map(|k| k.to_string()).collect();
    fields.sort();
    FulfillmentError::Validation(fields)
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub order: Order,
    pub fulfillment: FulfillmentResult,
}

/// Places the order and fulfills it in the same request. Fulfillment problems
/// are reported in the body; the order exists either way.
async fn checkout(State(s): State<AppState>, Json(r): Json<NewOrder>) -> Result<(StatusCode, Json<CheckoutResponse>), FulfillmentError> {
    r.validate().map_err(invalid)?;
    let order = Order::place(r).map_err(|e| FulfillmentError::Validation(vec![e.to_string()]))?;
    let store = s.fulfillment.store();
    store.insert_order(&order).await?;

    let fulfillment = s.fulfillment.run_fulfillment(order.id()).await;
    let order = store.get_order(order.id()).await?.unwrap_or(order);
    Ok((StatusCode::CREATED, Json(CheckoutResponse { order, fulfillment })))
}

async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Order> {
    s.fulfillment.store().get_order(id).await?.map(Json).ok_or_else(|| FulfillmentError::OrderNotFound(id.to_string()))
}

async fn fulfill_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<FulfillmentResult> {
    let result = s.fulfillment.run_fulfillment(id).await;
    if result.failure == Some(ErrorKind::OrderNotFound) {
        return Err(FulfillmentError::OrderNotFound(id.to_string()));
    }
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct AssignCourierRequest {
    pub courier_id: u32,
}

async fn assign_courier(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<AssignCourierRequest>) -> ApiResult<FulfillmentResult> {
    Ok(Json(s.fulfillment.assign_courier(id, r.courier_id).await?))
}

async fn cancel_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Order> {
    Ok(Json(s.fulfillment.cancel_order(id).await?))
}

async fn resend_notification(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<NotificationOutcome> {
    Ok(Json(s.fulfillment.resend_notification(id).await?))
}

// =============================================================================
// Carrier passthroughs
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ServiceabilityParams {
    pub pickup_postcode: String,
    pub delivery_postcode: String,
    pub weight: f64,
    #[serde(default)]
    pub cod: bool,
}

async fn serviceability(State(s): State<AppState>, Query(p): Query<ServiceabilityParams>) -> ApiResult<Vec<CourierQuote>> {
    let quotes = s.fulfillment.carrier().check_serviceability(&p.pickup_postcode, &p.delivery_postcode, p.weight, p.cod).await?;
    Ok(Json(quotes))
}

async fn pickup_locations(State(s): State<AppState>) -> ApiResult<Vec<PickupLocation>> {
    Ok(Json(s.fulfillment.carrier().pickup_locations().await?))
}

async fn tracking(State(s): State<AppState>, Path(awb): Path<String>) -> ApiResult<Tracking> {
    Ok(Json(s.fulfillment.carrier().track_by_awb(&awb).await?))
}

#[derive(Debug, Deserialize)]
pub struct DocumentRequest {
    pub kind: DocumentKind,
    pub ids: Vec<u64>,
}

async fn generate_document(State(s): State<AppState>, Json(r): Json<DocumentRequest>) -> ApiResult<Value> {
    if r.ids.is_empty() {
        return Err(FulfillmentError::Validation(vec!["ids".into()]));
    }
    let url = s.fulfillment.carrier().generate_document(r.kind, &r.ids).await?;
    Ok(Json(json!({ "url": url })))
}

#[derive(Debug, Deserialize)]
pub struct CancelShipmentsRequest {
    pub awbs: Vec<String>,
}

async fn cancel_shipments(State(s): State<AppState>, Json(r): Json<CancelShipmentsRequest>) -> ApiResult<Value> {
    if r.awbs.is_empty() {
        return Err(FulfillmentError::Validation(vec!["awbs".into()]));
    }
    let message = s.fulfillment.carrier().cancel_shipment(&r.awbs).await?;
    Ok(Json(json!({ "message": message })))
}

async fn create_return(State(s): State<AppState>, Json(r): Json<ReturnRequest>) -> Result<(StatusCode, Json<CreatedReturn>), FulfillmentError> {
    r.validate().map_err(invalid)?;
    Ok((StatusCode::CREATED, Json(s.fulfillment.carrier().create_return_order(&r).await?)))
}

// =============================================================================
// Webhook
// =============================================================================

#[derive(Serialize)]
pub struct WebhookAck {
    pub accepted: bool,
    pub outcome: WebhookOutcome,
}

async fn carrier_webhook(State(s): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Some(secret) = &s.webhook_secret {
        let provided = headers.get(signature::SIGNATURE_HEADER).and_then(|v| v.to_str().ok()).unwrap_or_default();
        if !signature::verify(secret.as_bytes(), &body, provided) {
            warn!("carrier webhook rejected: bad or missing signature");
            return (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid webhook signature"}))).into_response();
        }
    }
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return FulfillmentError::Validation(vec![format!("body ({e})")]).into_response(),
    };
    let event = match WebhookEvent::from_payload(payload) {
        Ok(event) => event,
        Err(e) => return e.into_response(),
    };
    match s.reconciler.handle(&event).await {
        Ok(outcome) => Json(WebhookAck { accepted: true, outcome }).into_response(),
        Err(e) => e.into_response(),
    }
}
