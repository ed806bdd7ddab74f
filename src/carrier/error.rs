//! Outcome classification for shipping aggregator calls.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CarrierError {
    /// Credentials were refused, or a login could not be completed at all.
    #[error("carrier authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The bearer token was refused on a regular call.
    #[error("carrier rejected the bearer token")]
    Unauthorized,

    #[error("carrier returned {status}: {message}")]
    Client { status: u16, message: String },

    /// A success-shaped response that reports failure in its body.
    #[error("carrier rejected the request: {0}")]
    Rejected(String),

    #[error("carrier unavailable: {0}")]
    Transient(String),

    #[error("unexpected carrier response: {0}")]
    Decode(String),

    #[error("no pickup location is configured with the carrier")]
    NoPickupLocationConfigured,
}

impl CarrierError {
    /// Whether the caller may retry the same call after a backoff.
    pub fn is_transient(&self) -> bool { matches!(self, Self::Transient(_)) }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            // timeouts, refused connections and resets all land here
            Self::Transient(e.to_string())
        }
    }
}
