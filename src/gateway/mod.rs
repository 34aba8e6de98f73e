//! Payment gateway seam.

pub mod zarinpal;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::value_objects::{Money, OwnerId};
use crate::Result;

pub use zarinpal::ZarinpalGateway;

#[derive(Clone, Debug, Serialize)]
pub struct PaymentRequest {
    pub amount: Money,
    pub callback_url: String,
    pub description: String,
    pub metadata: PaymentMetadata,
}

#[derive(Clone, Debug, Serialize)]
pub struct PaymentMetadata {
    pub order_id: Uuid,
    pub owner_id: OwnerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
}

/// Outcome of a verify call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verification {
    pub confirmed: bool,
    pub reference_id: Option<String>,
    /// Amount the gateway reports having charged, when it reports one.
    pub amount: Option<Money>,
    pub message: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a payment with the gateway and return its authority token.
    async fn request_payment(&self, request: &PaymentRequest) -> Result<String>;

    async fn verify_payment(&self, authority: &str, amount: Money) -> Result<Verification>;
}
