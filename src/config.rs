//! Service configuration, read from the environment (and `.env` via dotenvy).

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::carrier::{CarrierSettings, RetryPolicy};
use crate::domain::value_objects::PackageDimensions;
use crate::fulfillment::FulfillmentSettings;
use crate::notify::resend::DEFAULT_API_URL;

pub const DEFAULT_CARRIER_BASE_URL: &str = "https://apiv2.shiprocket.in/v1/external";
pub const DEFAULT_TRACKING_URL_TEMPLATE: &str = "https://shiprocket.co/tracking/{awb}";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Clone, Debug)]
pub struct EmailSettings {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
    pub reply_to: Option<String>,
    pub store_name: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub nats_url: Option<String>,
    pub carrier: CarrierSettings,
    pub fulfillment: FulfillmentSettings,
    pub email: EmailSettings,
    pub webhook_secret: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let carrier = CarrierSettings {
            base_url: env.or("CARRIER_BASE_URL", DEFAULT_CARRIER_BASE_URL),
            email: env.required("CARRIER_EMAIL")?,
            password: env.required("CARRIER_PASSWORD")?,
            timeout: Duration::from_secs(env.parse("CARRIER_TIMEOUT_SECS", 30u64)?),
            token_ttl: Duration::from_secs(env.parse("CARRIER_TOKEN_TTL_HOURS", 240u64)? * 3600),
            retry: RetryPolicy {
                max_retries: env.parse("CARRIER_MAX_RETRIES", 2u32)?,
                base_delay: Duration::from_millis(env.parse("CARRIER_RETRY_BASE_MS", 1000u64)?),
            },
        };

        let defaults = PackageDimensions::default();
        let default_package = PackageDimensions {
            length_cm: env.parse("PACKAGE_LENGTH_CM", defaults.length_cm)?,
            breadth_cm: env.parse("PACKAGE_BREADTH_CM", defaults.breadth_cm)?,
            height_cm: env.parse("PACKAGE_HEIGHT_CM", defaults.height_cm)?,
            weight_kg: env.parse("PACKAGE_WEIGHT_KG", defaults.weight_kg)?,
        };
        if !default_package.is_measurable() {
            return Err(ConfigError::Invalid { key: "PACKAGE_*", message: "package dimensions must be positive".into() });
        }
        let tracking_url_template = env.or("TRACKING_URL_TEMPLATE", DEFAULT_TRACKING_URL_TEMPLATE);
        if !tracking_url_template.contains("{awb}") {
            return Err(ConfigError::Invalid { key: "TRACKING_URL_TEMPLATE", message: "must contain {awb}".into() });
        }
        let fulfillment = FulfillmentSettings {
            pickup_location: env.optional("CARRIER_PICKUP_LOCATION"),
            default_courier_id: env.optional_parse("CARRIER_DEFAULT_COURIER_ID")?,
            default_package,
            tracking_url_template,
        };

        let store_name = env.or("STORE_NAME", "OpenSASE Store");
        let email = EmailSettings {
            api_url: env.or("EMAIL_API_URL", DEFAULT_API_URL),
            api_key: env.required("EMAIL_API_KEY")?,
            from: env.optional("EMAIL_FROM").unwrap_or_else(|| format!("{store_name} <orders@example.com>")),
            reply_to: env.optional("EMAIL_REPLY_TO"),
            store_name,
        };

        Ok(Self {
            database_url: env.required("DATABASE_URL")?,
            port: env.parse("PORT", 8083u16)?,
            nats_url: env.optional("NATS_URL"),
            carrier,
            fulfillment,
            email,
            webhook_secret: env.optional("CARRIER_WEBHOOK_SECRET"),
        })
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn optional_parse<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        self.optional(key)
            .map(|raw| raw.parse().map_err(|e: T::Err| ConfigError::Invalid { key, message: e.to_string() }))
            .transpose()
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        Ok(self.optional_parse(key)?.unwrap_or(default))
    }
}
