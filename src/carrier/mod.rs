//! Typed client for the shipping aggregator's REST API.
//!
//! Every call is authorised with a token from the shared [`TokenCache`] and
//! every result is classified into [`CarrierError`] before it leaves this
//! module. Read-only calls are retried on transient failures; calls with a
//! carrier-side effect are issued once and left to the caller.

pub mod error;
pub mod token;
pub mod types;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

pub use error::CarrierError;
pub use token::{Authenticator, CarrierAuth, CarrierToken, TokenCache};
pub use types::{
    select_pickup_location, AwbAssignment, CourierQuote, CreatedReturn, CreatedShipment, DocumentKind, PickupLocation,
    ReturnRequest, ShipmentItem, ShipmentRequest, Tracking, TrackingCheckpoint,
};

use types::{
    AckResponse, AssignAwbResponse, CreateReturnResponse, CreateShipmentResponse, DocumentResponse, OrderSearchResponse,
    PickupLocationsResponse, ServiceabilityResponse, TrackingResponse,
};

/// Bounded exponential backoff for transient failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Waits base, 2×base, 4×base… between attempts, without jitter.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_factor(2.0)
            .with_max_times(self.max_retries as usize)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self { Self { max_retries: 2, base_delay: Duration::from_secs(1) } }
}

#[derive(Clone, Debug)]
pub struct CarrierSettings {
    pub base_url: String,
    pub email: String,
    pub password: String,
    pub timeout: Duration,
    pub token_ttl: Duration,
    pub retry: RetryPolicy,
}

#[derive(Clone, Debug)]
pub struct CarrierClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenCache>,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct AssignAwbRequest {
    shipment_id: u64,
    courier_id: u32,
}

#[derive(Serialize)]
struct CancelRequest<'a> {
    awbs: &'a [String],
}

#[derive(Serialize)]
struct CancelOrdersRequest<'a> {
    ids: &'a [u64],
}

impl CarrierClient {
    pub fn new(settings: &CarrierSettings) -> crate::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| crate::FulfillmentError::Config(format!("failed to build carrier HTTP client: {e}")))?;
        let base_url = settings.base_url.trim_end_matches('/').to_string();
        let auth = CarrierAuth::new(http.clone(), base_url.clone(), settings.email.clone(), settings.password.clone(), settings.token_ttl);
        let tokens = Arc::new(TokenCache::new(Arc::new(auth)));
        Ok(Self::with_token_cache(http, base_url, tokens, settings.retry))
    }

    pub fn with_token_cache(http: reqwest::Client, base_url: impl Into<String>, tokens: Arc<TokenCache>, retry: RetryPolicy) -> Self {
        Self { http, base_url: base_url.into(), tokens, retry }
    }

    pub fn tokens(&self) -> &Arc<TokenCache> { &self.tokens }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    pub async fn check_serviceability(&self, origin_pincode: &str, dest_pincode: &str, weight_kg: f64, cod: bool) -> Result<Vec<CourierQuote>, CarrierError> {
        let query = [
            ("pickup_postcode", origin_pincode.to_string()),
            ("delivery_postcode", dest_pincode.to_string()),
            ("weight", weight_kg.to_string()),
            ("cod", if cod { "1" } else { "0" }.to_string()),
        ];
        let response: ServiceabilityResponse = self
            .with_retry("serviceability", || self.call(Method::GET, "/courier/serviceability/", &query, None::<&()>))
            .await?;
        Ok(response.data.map(|d| d.available_courier_companies).unwrap_or_default().into_iter().map(CourierQuote::from).collect())
    }

    /// Creates the carrier-side order and shipment. Not retried.
    pub async fn create_shipment(&self, request: &ShipmentRequest) -> Result<CreatedShipment, CarrierError> {
        let response: CreateShipmentResponse = self.call(Method::POST, "/orders/create/adhoc", &[], Some(request)).await?;
        let created = response.into_created()?;
        info!(order = %request.order_id, shipment_id = created.shipment_id, "carrier shipment created");
        Ok(created)
    }

    /// Looks up the shipment an earlier create may have left behind for
    /// `channel_order_id`. Read-only, so retried like the other lookups.
    pub async fn find_shipment(&self, channel_order_id: &str) -> Result<Option<CreatedShipment>, CarrierError> {
        let query = [("search", channel_order_id.to_string())];
        let response: OrderSearchResponse = self
            .with_retry("find_shipment", || self.call(Method::GET, "/orders", &query, None::<&()>))
            .await?;
        Ok(response.find(channel_order_id))
    }

    /// Assigns a courier and generates the AWB. Not retried.
    pub async fn assign_courier(&self, shipment_id: u64, courier_id: u32) -> Result<AwbAssignment, CarrierError> {
        let body = AssignAwbRequest { shipment_id, courier_id };
        let response: AssignAwbResponse = self.call(Method::POST, "/courier/assign/awb", &[], Some(&body)).await?;
        let assignment = response.resolve()?;
        info!(shipment_id, awb = %assignment.awb_code, courier = %assignment.courier_name, "courier assigned");
        Ok(assignment)
    }

    /// Label and manifest take shipment ids; invoice takes carrier order ids.
    pub async fn generate_document(&self, kind: DocumentKind, ids: &[u64]) -> Result<String, CarrierError> {
        let body = kind.body(ids);
        let response: DocumentResponse = self.call(Method::POST, kind.path(), &[], Some(&body)).await?;
        response.into_url()
    }

    pub async fn generate_label(&self, shipment_ids: &[u64]) -> Result<String, CarrierError> {
        self.generate_document(DocumentKind::Label, shipment_ids).await
    }

    pub async fn generate_invoice(&self, carrier_order_ids: &[u64]) -> Result<String, CarrierError> {
        self.generate_document(DocumentKind::Invoice, carrier_order_ids).await
    }

    pub async fn generate_manifest(&self, shipment_ids: &[u64]) -> Result<String, CarrierError> {
        self.generate_document(DocumentKind::Manifest, shipment_ids).await
    }

    pub async fn cancel_shipment(&self, awb_codes: &[String]) -> Result<String, CarrierError> {
        let response: AckResponse = self.call(Method::POST, "/orders/cancel/shipment/awbs", &[], Some(&CancelRequest { awbs: awb_codes })).await?;
        info!(awbs = ?awb_codes, "carrier shipment cancelled");
        Ok(response.message.unwrap_or_else(|| "cancelled".to_string()))
    }

    /// Cancels carrier orders that never received an AWB.
    pub async fn cancel_orders(&self, carrier_order_ids: &[u64]) -> Result<String, CarrierError> {
        let response: AckResponse = self.call(Method::POST, "/orders/cancel", &[], Some(&CancelOrdersRequest { ids: carrier_order_ids })).await?;
        info!(ids = ?carrier_order_ids, "carrier orders cancelled");
        Ok(response.message.unwrap_or_else(|| "cancelled".to_string()))
    }

    pub async fn create_return_order(&self, request: &ReturnRequest) -> Result<CreatedReturn, CarrierError> {
        let response: CreateReturnResponse = self.call(Method::POST, "/orders/create/return", &[], Some(request)).await?;
        response.into_created()
    }

    pub async fn track_by_shipment(&self, shipment_id: u64) -> Result<Tracking, CarrierError> {
        let path = format!("/courier/track/shipment/{shipment_id}");
        let response: TrackingResponse = self.with_retry("track_shipment", || self.call(Method::GET, &path, &[], None::<&()>)).await?;
        response.tracking_data.into_tracking()
    }

    pub async fn track_by_awb(&self, awb_code: &str) -> Result<Tracking, CarrierError> {
        let path = format!("/courier/track/awb/{awb_code}");
        let response: TrackingResponse = self.with_retry("track_awb", || self.call(Method::GET, &path, &[], None::<&()>)).await?;
        response.tracking_data.into_tracking()
    }

    pub async fn pickup_locations(&self) -> Result<Vec<PickupLocation>, CarrierError> {
        let response: PickupLocationsResponse = self
            .with_retry("pickup_locations", || self.call(Method::GET, "/settings/company/pickup", &[], None::<&()>))
            .await?;
        Ok(response.data.shipping_address)
    }

    /// An explicitly configured name wins; otherwise the primary location,
    /// else the first one the carrier lists.
    pub async fn resolve_pickup_location(&self, explicit: Option<&str>) -> Result<String, CarrierError> {
        if let Some(name) = explicit.map(str::trim).filter(|n| !n.is_empty()) {
            return Ok(name.to_string());
        }
        let locations = self.pickup_locations().await?;
        let chosen = select_pickup_location(&locations).ok_or(CarrierError::NoPickupLocationConfigured)?;
        debug!(pickup_location = %chosen.name, primary = chosen.is_primary, "pickup location resolved");
        Ok(chosen.name.clone())
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    /// Sends one authorised request. A refused token is refreshed and the
    /// request repeated exactly once.
    async fn call<T, B>(&self, method: Method, path: &str, query: &[(&str, String)], body: Option<&B>) -> Result<T, CarrierError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let token = self.tokens.get_token().await?;
        match self.send(&token, method.clone(), path, query, body).await {
            Err(CarrierError::Unauthorized) => {
                warn!(path, "carrier refused bearer token, refreshing once");
                self.tokens.invalidate(&token);
                let token = self.tokens.get_token().await?;
                match self.send(&token, method, path, query, body).await {
                    Err(CarrierError::Unauthorized) => {
                        Err(CarrierError::AuthenticationFailed("token refused again after refresh".to_string()))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn send<T, B>(&self, token: &str, method: Method, path: &str, query: &[(&str, String)], body: Option<&B>) -> Result<T, CarrierError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method, &url).bearer_auth(token);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(CarrierError::from_reqwest)?;
        let status = response.status();
        debug!(status = %status, path, "carrier response received");

        if status.is_success() {
            let bytes = response.bytes().await.map_err(CarrierError::from_reqwest)?;
            return serde_json::from_slice(&bytes).map_err(|e| CarrierError::Decode(format!("{path}: {e}")));
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T, CarrierError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CarrierError>>,
    {
        f.retry(self.retry.backoff())
            .when(|e| e.is_transient())
            .notify(|e: &CarrierError, delay: Duration| {
                warn!(op, delay_ms = delay.as_millis() as u64, error = %e, "transient carrier error, retrying");
            })
            .await
    }
}

fn classify_status(status: StatusCode, body: &str) -> CarrierError {
    let message = error_message(body);
    match status {
        StatusCode::UNAUTHORIZED => CarrierError::Unauthorized,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => CarrierError::Transient(format!("{status}: {message}")),
        s if s.is_server_error() => CarrierError::Transient(format!("{status}: {message}")),
        s => CarrierError::Client { status: s.as_u16(), message },
    }
}

/// Pulls `message` and any per-field `errors` out of an aggregator error body.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.chars().take(300).collect();
    };
    let mut message = value.get("message").and_then(|m| m.as_str()).unwrap_or_default().to_string();
    if let Some(errors) = value.get("errors").and_then(|e| e.as_object()) {
        let details: Vec<String> = errors.iter().map(|(field, v)| match v {
            serde_json::Value::Array(list) => format!("{field}: {}", list.iter().filter_map(|x| x.as_str()).collect::<Vec<_>>().join(", ")),
            other => format!("{field}: {other}"),
        }).collect();
        if !details.is_empty() {
            if !message.is_empty() { message.push_str(" - "); }
            message.push_str(&details.join("; "));
        }
    }
    if message.is_empty() { body.chars().take(300).collect() } else { message }
}
