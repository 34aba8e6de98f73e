//! ZarinPal v4 REST client.
//!
//! Prices are kept in toman; the gateway is charged in rial, so amounts are
//! multiplied by the configured scale on the wire.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{PaymentGateway, PaymentRequest, Verification};
use crate::config::GatewayConfig;
use crate::domain::value_objects::Money;
use crate::{CheckoutError, Result};

/// Request accepted / payment verified.
const CODE_OK: i64 = 100;
/// Payment was already verified earlier.
const CODE_ALREADY_VERIFIED: i64 = 101;

#[derive(Debug, Clone)]
pub struct ZarinpalGateway {
    client: reqwest::Client,
    merchant_id: String,
    request_url: String,
    verify_url: String,
    amount_scale: Decimal,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Value,
    #[serde(default)]
    errors: Value,
}

impl Envelope {
    fn code(&self) -> Option<i64> { self.data.get("code").and_then(Value::as_i64) }

    fn error_message(&self) -> String {
        self.errors
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| self.data.get("message").and_then(Value::as_str))
            .unwrap_or("Unspecified error")
            .to_string()
    }
}

fn transport_error(e: reqwest::Error) -> CheckoutError {
    if e.is_timeout() { CheckoutError::GatewayTimeout } else { CheckoutError::Gateway(e.to_string()) }
}

impl ZarinpalGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| CheckoutError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            merchant_id: config.merchant_id.clone(),
            request_url: config.request_url.clone(),
            verify_url: config.verify_url.clone(),
            amount_scale: config.amount_scale,
        })
    }

    /// Amount in gateway units. Fractions of a gateway unit are refused, not dropped.
    fn wire_amount(&self, amount: Money) -> Result<i64> {
        amount
            .amount()
            .checked_mul(self.amount_scale)
            .filter(|wire| wire.fract().is_zero())
            .and_then(|wire| wire.to_i64())
            .ok_or_else(|| CheckoutError::Gateway(format!("amount {amount} cannot be sent to the gateway")))
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Envelope> {
        let response = self.client.post(url).json(body).send().await.map_err(transport_error)?;
        let status = response.status();
        let envelope = response.json::<Envelope>().await.map_err(transport_error)?;
        debug!(%status, data = %envelope.data, "gateway response");
        Ok(envelope)
    }
}

#[async_trait]
impl PaymentGateway for ZarinpalGateway {
    async fn request_payment(&self, request: &PaymentRequest) -> Result<String> {
        let body = json!({
            "merchant_id": self.merchant_id,
            "amount": self.wire_amount(request.amount)?,
            "callback_url": request.callback_url,
            "description": request.description,
            "metadata": {
                "order_id": request.metadata.order_id.to_string(),
                "mobile": request.metadata.contact,
            },
        });
        let envelope = self.post(&self.request_url, &body).await?;
        match (envelope.code(), envelope.data.get("authority").and_then(Value::as_str)) {
            (Some(CODE_OK), Some(authority)) => Ok(authority.to_string()),
            _ => {
                let message = envelope.error_message();
                warn!(order_id = %request.metadata.order_id, %message, "gateway refused payment request");
                Err(CheckoutError::Gateway(message))
            }
        }
    }

    async fn verify_payment(&self, authority: &str, amount: Money) -> Result<Verification> {
        let body = json!({
            "merchant_id": self.merchant_id,
            "authority": authority,
            "amount": self.wire_amount(amount)?,
        });
        let envelope = self.post(&self.verify_url, &body).await?;
        let confirmed = matches!(envelope.code(), Some(CODE_OK | CODE_ALREADY_VERIFIED));
        let reference_id = envelope.data.get("ref_id").and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        let message = (!confirmed).then(|| envelope.error_message());
        Ok(Verification { confirmed, reference_id, amount: None, message })
    }
}
