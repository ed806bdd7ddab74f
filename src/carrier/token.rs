//! Bearer token cache for the shipping aggregator.
//!
//! One [`TokenCache`] is built at startup and shared by every carrier call.
//! A refresh is a [`Shared`] future parked in the cache, so callers that find
//! a refresh in flight await the same login instead of starting their own.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::error::CarrierError;
use super::types::LoginResponse;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CarrierToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl CarrierToken {
    fn is_fresh(&self, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or_else(|_| chrono::Duration::seconds(60));
        self.expires_at - margin > Utc::now()
    }
}

/// Something that can exchange credentials for a [`CarrierToken`].
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> Result<CarrierToken, CarrierError>;
}

type Refresh = Shared<BoxFuture<'static, Result<CarrierToken, CarrierError>>>;

enum Slot {
    Empty,
    Ready(CarrierToken),
    Refreshing { generation: u64, refresh: Refresh },
}

struct State {
    slot: Slot,
    generation: u64,
}

pub struct TokenCache {
    authenticator: Arc<dyn Authenticator>,
    margin: Duration,
    state: Mutex<State>,
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache").field("margin", &self.margin).finish_non_exhaustive()
    }
}

impl TokenCache {
    pub const DEFAULT_MARGIN: Duration = Duration::from_secs(60);

    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self::with_margin(authenticator, Self::DEFAULT_MARGIN)
    }

    /// Tokens expiring within `margin` are treated as already expired.
    pub fn with_margin(authenticator: Arc<dyn Authenticator>, margin: Duration) -> Self {
        Self { authenticator, margin, state: Mutex::new(State { slot: Slot::Empty, generation: 0 }) }
    }

    /// Returns a usable bearer token, logging in first if needed.
    pub async fn get_token(&self) -> Result<String, CarrierError> {
        let (generation, refresh) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let pending = match &state.slot {
                Slot::Ready(token) if token.is_fresh(self.margin) => return Ok(token.token.clone()),
                Slot::Refreshing { generation, refresh } => Some((*generation, refresh.clone())),
                Slot::Ready(_) | Slot::Empty => None,
            };
            match pending {
                Some(pending) => pending,
                None => {
                    state.generation += 1;
                    let generation = state.generation;
                    let authenticator = Arc::clone(&self.authenticator);
                    let refresh = async move { authenticator.authenticate().await }.boxed().shared();
                    state.slot = Slot::Refreshing { generation, refresh: refresh.clone() };
                    debug!(generation, "starting carrier token refresh");
                    (generation, refresh)
                }
            }
        };

        let outcome = refresh.await;

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the refresh that is still current may settle the slot.
        if matches!(&state.slot, Slot::Refreshing { generation: g, .. } if *g == generation) {
            state.slot = match &outcome {
                Ok(token) => {
                    info!(expires_at = %token.expires_at, "carrier token refreshed");
                    Slot::Ready(token.clone())
                }
                Err(e) => {
                    warn!(error = %e, "carrier token refresh failed");
                    Slot::Empty
                }
            };
        }
        outcome.map(|t| t.token)
    }

    /// Forgets `rejected` so the next [`get_token`](Self::get_token) logs in
    /// again. A token that already replaced it, or a refresh in flight, is kept.
    pub fn invalidate(&self, rejected: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(&state.slot, Slot::Ready(token) if token.token == rejected) {
            debug!("carrier token invalidated");
            state.slot = Slot::Empty;
        }
    }
}

/// Logs in to the aggregator with account email and password.
#[derive(Debug, Clone)]
pub struct CarrierAuth {
    http: reqwest::Client,
    base_url: String,
    email: String,
    password: String,
    ttl: Duration,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

impl CarrierAuth {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, email: impl Into<String>, password: impl Into<String>, ttl: Duration) -> Self {
        Self { http, base_url: base_url.into(), email: email.into(), password: password.into(), ttl }
    }
}

#[async_trait]
impl Authenticator for CarrierAuth {
    async fn authenticate(&self) -> Result<CarrierToken, CarrierError> {
        let url = format!("{}/auth/login", self.base_url.trim_end_matches('/'));
        let response = self.http.post(&url)
            .json(&LoginRequest { email: &self.email, password: &self.password })
            .send()
            .await
            .map_err(|e| CarrierError::AuthenticationFailed(format!("login request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CarrierError::AuthenticationFailed(format!("login returned {status}: {body}")));
        }
        let login: LoginResponse = response.json().await
            .map_err(|e| CarrierError::AuthenticationFailed(format!("unreadable login response: {e}")))?;
        if login.token.is_empty() {
            return Err(CarrierError::AuthenticationFailed("login response carried no token".to_string()));
        }
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::hours(240));
        Ok(CarrierToken { token: login.token, expires_at: Utc::now() + ttl })
    }
}
