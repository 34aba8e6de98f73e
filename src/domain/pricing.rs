//! Pricing engine

use rust_decimal::Decimal;

use crate::domain::value_objects::Money;
use crate::{CheckoutError, Result};

/// Largest catalog price, exclusive. Matches the `NUMERIC(14, 2)` price columns.
const MAX_PRICE_UNITS: i64 = 1_000_000_000_000;
/// Decimal places the price and total columns store.
pub const MAX_CURRENCY_SCALE: u32 = 2;

pub fn check_price(price: Decimal) -> Result<Money> {
    let in_range = price >= Decimal::ZERO && price < Decimal::from(MAX_PRICE_UNITS);
    if !in_range || price.round_dp(MAX_CURRENCY_SCALE) != price {
        return Err(CheckoutError::InvalidPrice(price));
    }
    Ok(Money::new(price))
}

pub fn check_discount(percent: Decimal) -> Result<()> {
    if percent < Decimal::ZERO || percent > Decimal::ONE_HUNDRED {
        return Err(CheckoutError::InvalidDiscount(percent));
    }
    Ok(())
}

/// `base_price * (1 - discount/100)`, rounded half-up to `scale` decimal places.
pub fn effective_price(base_price: Money, discount_percent: Option<Decimal>, scale: u32) -> Result<Money> {
    let Some(percent) = discount_percent else {
        return Ok(base_price.round(scale));
    };
    check_discount(percent)?;
    let factor = Decimal::ONE - percent / Decimal::ONE_HUNDRED;
    Ok(Money::new(base_price.amount() * factor).round(scale))
}
