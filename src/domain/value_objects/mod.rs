//! Value Objects for checkout

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::aggregates::FieldSpec;
use crate::CheckoutError;

/// Owner reference, issued by the identity layer
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Largest whole-unit amount a line or order total may reach. Matches the
/// `NUMERIC(16, 2)` order total column.
const MAX_TOTAL_UNITS: i64 = 100_000_000_000_000;

/// Money value object. Single store currency; precision is applied by the
/// pricing engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self { Self(amount) }
    pub fn amount(&self) -> Decimal { self.0 }

    /// Line total; fails instead of overflowing.
    pub fn multiply(&self, qty: Quantity) -> Result<Money, CheckoutError> {
        Self::bounded(self.0.checked_mul(Decimal::from(qty.value())))
    }

    pub fn checked_add(&self, other: Money) -> Result<Money, CheckoutError> {
        Self::bounded(self.0.checked_add(other.0))
    }

    pub fn total(amounts: impl IntoIterator<Item = Money>) -> Result<Money, CheckoutError> {
        amounts.into_iter().try_fold(Money::ZERO, |acc, m| acc.checked_add(m))
    }

    fn bounded(amount: Option<Decimal>) -> Result<Money, CheckoutError> {
        match amount {
            Some(a) if a.abs() < Decimal::from(MAX_TOTAL_UNITS) => Ok(Money(a)),
            _ => Err(CheckoutError::AmountOutOfRange),
        }
    }

    /// Round half-up to `scale` decimal places.
    pub fn round(&self, scale: u32) -> Money {
        Money(self.0.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Line quantity, always at least one and within the `INTEGER` column range
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u32")]
pub struct Quantity(u32);

impl Quantity {
    pub const MAX: u32 = i32::MAX as u32;

    pub fn new(value: i64) -> Result<Self, CheckoutError> {
        match u32::try_from(value) {
            Ok(v) if (1..=Self::MAX).contains(&v) => Ok(Self(v)),
            _ => Err(CheckoutError::InvalidQuantity),
        }
    }
    pub fn value(&self) -> u32 { self.0 }
    pub fn add(&self, other: Quantity) -> Self { Self(self.0.saturating_add(other.0).min(Self::MAX)) }
}

impl TryFrom<i64> for Quantity {
    type Error = CheckoutError;
    fn try_from(value: i64) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<Quantity> for u32 {
    fn from(q: Quantity) -> u32 { q.0 }
}

/// Custom field values attached to a cart line or order line, keyed by the
/// field name the service declares.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldValues(BTreeMap<String, String>);

impl FieldValues {
    pub fn new(values: BTreeMap<String, String>) -> Self { Self(values) }
    pub fn get(&self, name: &str) -> Option<&str> { self.0.get(name).map(String::as_str) }
    pub fn is_filled(&self, name: &str) -> bool { self.get(name).is_some_and(|v| !v.trim().is_empty()) }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn as_map(&self) -> &BTreeMap<String, String> { &self.0 }

    /// Drop every key the service does not declare.
    pub fn retain_declared(mut self, declared: &[FieldSpec]) -> Self {
        self.0.retain(|k, _| declared.iter().any(|f| &f.name == k));
        self
    }
}

impl From<BTreeMap<String, String>> for FieldValues {
    fn from(values: BTreeMap<String, String>) -> Self { Self(values) }
}
