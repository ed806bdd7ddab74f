//! OpenSASE Fulfillment
//!
//! Drives placed storefront orders through the shipping aggregator and keeps
//! them in step with the carrier's status webhooks.
//!
//! ## Features
//! - Shipment creation, courier assignment and AWB generation
//! - Shared, single-flight carrier token cache
//! - Idempotent carrier webhook reconciliation
//! - Status-driven customer email notifications
//! - Postgres-backed order store with an in-memory twin for tests

pub mod bus;
pub mod carrier;
pub mod config;
pub mod domain;
pub mod fulfillment;
pub mod http;
pub mod notify;
pub mod store;
pub mod webhook;

use serde::Serialize;
use thiserror::Error;

use carrier::CarrierError;

pub use domain::aggregates::{NewOrder, NotificationKind, Order, OrderPatch, OrderStatus};
pub use fulfillment::{FulfillmentOutcome, FulfillmentResult, FulfillmentService, FulfillmentSettings};
pub use webhook::{WebhookEvent, WebhookOutcome, WebhookReconciler};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum FulfillmentError {
    #[error("Carrier authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Shipment is missing required fields: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("Carrier rejected the request: {0}")]
    CarrierRejected(String),

    #[error("Carrier temporarily unavailable: {0}")]
    TransientNetwork(String),

    #[error("No pickup location configured")]
    NoPickupLocationConfigured,

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order {order_id} is {status} and cannot be {action}")]
    InvalidTransition { order_id: String, status: OrderStatus, action: &'static str },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Stable, serialisable name for each error class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthenticationFailed,
    Validation,
    CarrierRejected,
    TransientNetwork,
    NoPickupLocationConfigured,
    OrderNotFound,
    InvalidTransition,
    Storage,
    Config,
}

impl FulfillmentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthenticationFailed(_) => ErrorKind::AuthenticationFailed,
            Self::Validation(_) => ErrorKind::Validation,
            Self::CarrierRejected(_) => ErrorKind::CarrierRejected,
            Self::TransientNetwork(_) => ErrorKind::TransientNetwork,
            Self::NoPickupLocationConfigured => ErrorKind::NoPickupLocationConfigured,
            Self::OrderNotFound(_) => ErrorKind::OrderNotFound,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

impl From<CarrierError> for FulfillmentError {
    fn from(e: CarrierError) -> Self {
        match e {
            CarrierError::AuthenticationFailed(msg) => Self::AuthenticationFailed(msg),
            CarrierError::Unauthorized => Self::AuthenticationFailed(e.to_string()),
            CarrierError::Client { .. } | CarrierError::Rejected(_) | CarrierError::Decode(_) => Self::CarrierRejected(e.to_string()),
            CarrierError::Transient(_) => Self::TransientNetwork(e.to_string()),
            CarrierError::NoPickupLocationConfigured => Self::NoPickupLocationConfigured,
        }
    }
}

impl From<sqlx::Error> for FulfillmentError {
    fn from(e: sqlx::Error) -> Self { Self::Storage(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, FulfillmentError>;
