//! Environment-driven configuration.

use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use validator::{Validate, ValidationError};

use crate::{CheckoutError, Result};

const DEFAULT_PORT: u16 = 8083;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_NATS_SUBJECT: &str = "checkout.payment_confirmed";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;

const SANDBOX_REQUEST_URL: &str = "https://sandbox.zarinpal.com/pg/v4/payment/request.json";
const SANDBOX_VERIFY_URL: &str = "https://sandbox.zarinpal.com/pg/v4/payment/verify.json";
const SANDBOX_START_PAY_URL: &str = "https://sandbox.zarinpal.com/pg/StartPay/";
const PRODUCTION_REQUEST_URL: &str = "https://payment.zarinpal.com/pg/v4/payment/request.json";
const PRODUCTION_VERIFY_URL: &str = "https://payment.zarinpal.com/pg/v4/payment/verify.json";
const PRODUCTION_START_PAY_URL: &str = "https://payment.zarinpal.com/pg/StartPay/";

#[derive(Clone, Debug, Validate)]
pub struct Config {
    /// Absent: run on the in-memory store.
    pub database_url: Option<String>,
    #[validate(range(min = 1))]
    pub database_max_connections: u32,
    /// Absent: payment notifications are only logged.
    pub nats_url: Option<String>,
    #[validate(length(min = 1))]
    pub nats_subject: String,
    pub port: u16,
    /// Decimal places of the store currency's minor unit. Money columns
    /// store two, see `pricing::MAX_CURRENCY_SCALE`.
    #[validate(range(max = 2))]
    pub currency_scale: u32,
    #[validate]
    pub gateway: GatewayConfig,
}

#[derive(Clone, Debug, Validate)]
pub struct GatewayConfig {
    #[validate(length(min = 1))]
    pub merchant_id: String,
    pub sandbox: bool,
    #[validate(url)]
    pub request_url: String,
    #[validate(url)]
    pub verify_url: String,
    #[validate(url)]
    pub start_pay_url: String,
    #[validate(url)]
    pub callback_base_url: String,
    #[validate(range(min = 1, max = 120))]
    pub timeout_secs: u64,
    /// Multiplier from catalog currency to the gateway's charging unit.
    #[validate(custom = "positive")]
    pub amount_scale: Decimal,
}

impl GatewayConfig {
    pub fn sandbox(merchant_id: impl Into<String>, callback_base_url: impl Into<String>) -> Self {
        Self {
            merchant_id: merchant_id.into(),
            sandbox: true,
            request_url: SANDBOX_REQUEST_URL.to_string(),
            verify_url: SANDBOX_VERIFY_URL.to_string(),
            start_pay_url: SANDBOX_START_PAY_URL.to_string(),
            callback_base_url: callback_base_url.into(),
            timeout_secs: DEFAULT_GATEWAY_TIMEOUT_SECS,
            amount_scale: Decimal::TEN,
        }
    }

    pub fn timeout(&self) -> Duration { Duration::from_secs(self.timeout_secs) }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let sandbox = parse_or(get("GATEWAY_SANDBOX"), "GATEWAY_SANDBOX", true)?;
        let (request_url, verify_url, start_pay_url) = if sandbox {
            (SANDBOX_REQUEST_URL, SANDBOX_VERIFY_URL, SANDBOX_START_PAY_URL)
        } else {
            (PRODUCTION_REQUEST_URL, PRODUCTION_VERIFY_URL, PRODUCTION_START_PAY_URL)
        };

        let gateway = GatewayConfig {
            merchant_id: get("GATEWAY_MERCHANT_ID").ok_or_else(|| missing("GATEWAY_MERCHANT_ID"))?,
            sandbox,
            request_url: get("GATEWAY_REQUEST_URL").unwrap_or_else(|| request_url.to_string()),
            verify_url: get("GATEWAY_VERIFY_URL").unwrap_or_else(|| verify_url.to_string()),
            start_pay_url: get("GATEWAY_START_PAY_URL").unwrap_or_else(|| start_pay_url.to_string()),
            callback_base_url: get("CALLBACK_BASE_URL")
                .ok_or_else(|| missing("CALLBACK_BASE_URL"))?
                .trim_end_matches('/')
                .to_string(),
            timeout_secs: parse_or(get("GATEWAY_TIMEOUT_SECS"), "GATEWAY_TIMEOUT_SECS", DEFAULT_GATEWAY_TIMEOUT_SECS)?,
            amount_scale: parse_or(get("GATEWAY_AMOUNT_SCALE"), "GATEWAY_AMOUNT_SCALE", Decimal::TEN)?,
        };

        let config = Self {
            database_url: get("DATABASE_URL"),
            database_max_connections: parse_or(get("DATABASE_MAX_CONNECTIONS"), "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            nats_url: get("NATS_URL"),
            nats_subject: get("NATS_SUBJECT").unwrap_or_else(|| DEFAULT_NATS_SUBJECT.to_string()),
            port: parse_or(get("PORT"), "PORT", DEFAULT_PORT)?,
            currency_scale: parse_or(get("CURRENCY_SCALE"), "CURRENCY_SCALE", 0)?,
            gateway,
        };
        config.validate().map_err(|e| CheckoutError::Config(e.to_string()))?;
        Ok(config)
    }
}

fn positive(value: &Decimal) -> std::result::Result<(), ValidationError> {
    if value.is_sign_positive() && !value.is_zero() {
        Ok(())
    } else {
        Err(ValidationError::new("positive"))
    }
}

fn missing(key: &str) -> CheckoutError {
    CheckoutError::Config(format!("{key} must be set"))
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        Some(v) => v.trim().parse().map_err(|_| CheckoutError::Config(format!("{key} has an invalid value: {v}"))),
        None => Ok(default),
    }
}
