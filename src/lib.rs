//! Subscription checkout engine
//!
//! Turns a per-owner shopping cart of subscription services into an immutable
//! priced order, opens a payment session with the gateway and reconciles the
//! gateway callback exactly once per order.
//!
//! ## Features
//! - Live cart pricing with per-service discounts
//! - Required custom fields per service, checked before checkout
//! - Atomic cart to order snapshots
//! - Idempotent payment callback handling
//! - Fire-and-forget payment confirmation notifications

pub mod config;
pub mod domain;
pub mod gateway;
pub mod http;
pub mod notify;
pub mod services;
pub mod store;

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{OrderStatus, SessionStatus};
use crate::domain::validation::ItemRejection;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum CheckoutError {
    #[error("Invalid discount percent {0}, expected a value between 0 and 100")]
    InvalidDiscount(Decimal),

    #[error("Invalid price {0}, expected a non-negative amount with at most two decimal places")]
    InvalidPrice(Decimal),

    #[error("Amount exceeds the supported range")]
    AmountOutOfRange,

    #[error("Catalog item {0} is not available")]
    ItemUnavailable(Uuid),

    #[error("Quantity must be a positive integer")]
    InvalidQuantity,

    #[error("Required fields are not filled: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Checkout rejected: {}", ItemRejection::summary(.0))]
    CheckoutRejected(Vec<ItemRejection>),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Order {0} already has a payment session")]
    AlreadySessioned(Uuid),

    #[error("No payment session for order {0}")]
    UnknownOrder(Uuid),

    #[error("Authority does not match the payment session of order {0}")]
    AuthorityMismatch(Uuid),

    #[error("Amount mismatch: order total is {expected}, gateway reported {reported}")]
    AmountMismatch { expected: Decimal, reported: Decimal },

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Payment gateway did not answer in time")]
    GatewayTimeout,

    #[error("Catalog item {0} not found")]
    CatalogItemNotFound(Uuid),

    #[error("Cart item {0} not found")]
    CartItemNotFound(Uuid),

    #[error("Order {0} not found")]
    OrderNotFound(Uuid),

    #[error("Order {0} is {1} and cannot be paid")]
    OrderNotPending(Uuid, OrderStatus),

    #[error("Order {0} cannot be canceled")]
    NotCancelable(Uuid),

    #[error("Payment session is {0} and cannot move to {1}")]
    IllegalTransition(SessionStatus, SessionStatus),

    #[error("Notification delivery failed: {0}")]
    Notification(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl CheckoutError {
    /// Transient failures the caller may retry with an explicit action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Gateway(_) | Self::GatewayTimeout)
    }

    /// Integrity failures on the callback path. The callback endpoint
    /// acknowledges them instead of reporting an error to the gateway.
    pub fn is_suspicious(&self) -> bool {
        matches!(
            self,
            Self::UnknownOrder(_) | Self::AuthorityMismatch(_) | Self::AmountMismatch { .. }
        )
    }
}

impl From<sqlx::Error> for CheckoutError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for CheckoutError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CheckoutError>;
