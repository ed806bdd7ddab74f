//! Value Objects for fulfillment

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Money value object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money { amount: Decimal, currency: String }

impl Money {
    pub fn new(amount: Decimal, currency: &str) -> Self { Self { amount, currency: currency.to_string() } }
    pub fn zero(currency: &str) -> Self { Self::new(Decimal::ZERO, currency) }
    pub fn amount(&self) -> Decimal { self.amount }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        if self.currency != other.currency { return Err(MoneyError::CurrencyMismatch); }
        Ok(Money::new(self.amount + other.amount, &self.currency))
    }
    pub fn multiply(&self, qty: u32) -> Money { Money::new(self.amount * Decimal::from(qty), &self.currency) }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.currency, self.amount.round_dp(2))
    }
}

#[derive(Debug, Clone)] pub enum MoneyError { CurrencyMismatch }
impl std::error::Error for MoneyError {}
impl fmt::Display for MoneyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Currency mismatch") }
}

/// A syntactically valid recipient address.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn parse(value: &str) -> Result<Self, EmailAddressError> {
        let value = value.trim();
        if value.is_empty() { return Err(EmailAddressError::Empty); }
        if !validator::validate_email(value) { return Err(EmailAddressError::Malformed(value.to_string())); }
        Ok(Self(value.to_lowercase()))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum EmailAddressError { Empty, Malformed(String) }
impl std::error::Error for EmailAddressError {}
impl fmt::Display for EmailAddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::Empty => write!(f, "email empty"), Self::Malformed(v) => write!(f, "malformed email: {v}") }
    }
}

/// Parcel size in centimetres and weight in kilograms.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackageDimensions { pub length_cm: f64, pub breadth_cm: f64, pub height_cm: f64, pub weight_kg: f64 }

impl PackageDimensions {
    pub fn is_measurable(&self) -> bool {
        [self.length_cm, self.breadth_cm, self.height_cm, self.weight_kg].iter().all(|v| v.is_finite() && *v > 0.0)
    }
}

impl Default for PackageDimensions {
    fn default() -> Self { Self { length_cm: 10.0, breadth_cm: 10.0, height_cm: 10.0, weight_kg: 0.5 } }
}
