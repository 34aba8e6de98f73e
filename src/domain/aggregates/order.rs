//! Order Aggregate
//!
//! An order is a frozen snapshot of a checked-out cart. Only `status` and the
//! payment references change after creation; prices, discounts and field
//! values are copied at purchase time and never read from the catalog again.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::aggregates::{CartItem, CatalogItem};
use crate::domain::events::OrderEvent;
use crate::domain::value_objects::{FieldValues, Money, OwnerId, Quantity};
use crate::{CheckoutError, Result};

#[derive(Clone, Debug, Serialize)]
pub struct Order {
    pub(crate) id: Uuid,
    pub(crate) owner_id: OwnerId,
    pub(crate) owner_contact: Option<String>,
    pub(crate) items: Vec<OrderItem>,
    pub(crate) total: Money,
    pub(crate) status: OrderStatus,
    pub(crate) payment_authority: Option<String>,
    pub(crate) payment_ref_id: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) paid_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub(crate) events: Vec<OrderEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub catalog_item_id: Uuid,
    pub item_name: String,
    pub quantity: Quantity,
    pub list_price: Money,
    pub discount_percent: Option<Decimal>,
    pub unit_price: Money,
    pub fields: FieldValues,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Canceled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(&self) -> bool { !matches!(self, Self::Pending) }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = CheckoutError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PAID" => Ok(Self::Paid),
            "FAILED" => Ok(Self::Failed),
            "CANCELED" => Ok(Self::Canceled),
            other => Err(CheckoutError::Storage(format!("unknown order status {other}"))),
        }
    }
}

impl OrderItem {
    /// Copy price, discount and field values of a cart line at this instant.
    pub fn snapshot(order_id: Uuid, line: &CartItem, catalog_item: &CatalogItem, scale: u32) -> Result<Self> {
        Ok(Self {
            id: Uuid::now_v7(),
            order_id,
            catalog_item_id: catalog_item.id,
            item_name: catalog_item.name.clone(),
            quantity: line.quantity,
            list_price: catalog_item.base_price,
            discount_percent: catalog_item.discount_percent,
            unit_price: catalog_item.effective_price(scale)?,
            fields: line.fields.clone(),
        })
    }

    pub fn line_total(&self) -> Result<Money> { self.unit_price.multiply(self.quantity) }
}

impl Order {
    pub fn place(id: Uuid, owner_id: OwnerId, owner_contact: Option<String>, items: Vec<OrderItem>) -> Result<Self> {
        if items.is_empty() { return Err(CheckoutError::EmptyCart); }
        let total = items.iter().try_fold(Money::ZERO, |acc, item| acc.checked_add(item.line_total()?))?;
        let mut order = Self {
            id, owner_id, owner_contact, items, total, status: OrderStatus::Pending,
            payment_authority: None, payment_ref_id: None, created_at: Utc::now(), paid_at: None, events: vec![],
        };
        order.raise_event(OrderEvent::Placed { order_id: id, owner_id: order.owner_id.clone(), total });
        Ok(order)
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn owner_id(&self) -> &OwnerId { &self.owner_id }
    pub fn owner_contact(&self) -> Option<&str> { self.owner_contact.as_deref() }
    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn total(&self) -> Money { self.total }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment_authority(&self) -> Option<&str> { self.payment_authority.as_deref() }
    pub fn payment_ref_id(&self) -> Option<&str> { self.payment_ref_id.as_deref() }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn paid_at(&self) -> Option<DateTime<Utc>> { self.paid_at }

    pub fn attach_authority(&mut self, authority: impl Into<String>) -> Result<()> {
        self.ensure_pending()?;
        self.payment_authority = Some(authority.into());
        Ok(())
    }

    pub fn mark_paid(&mut self, reference_id: Option<String>) -> Result<()> {
        self.ensure_pending()?;
        self.status = OrderStatus::Paid;
        self.payment_ref_id = reference_id.clone();
        self.paid_at = Some(Utc::now());
        self.raise_event(OrderEvent::Paid {
            order_id: self.id, owner_id: self.owner_id.clone(),
            owner_contact: self.owner_contact.clone(), reference_id,
        });
        Ok(())
    }

    pub fn mark_failed(&mut self) -> Result<()> {
        self.ensure_pending()?;
        self.status = OrderStatus::Failed;
        self.raise_event(OrderEvent::PaymentFailed { order_id: self.id });
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        if self.status != OrderStatus::Pending { return Err(CheckoutError::NotCancelable(self.id)); }
        self.status = OrderStatus::Canceled;
        self.raise_event(OrderEvent::Canceled { order_id: self.id });
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<OrderEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: OrderEvent) { self.events.push(e); }

    fn ensure_pending(&self) -> Result<()> {
        if self.status == OrderStatus::Pending { Ok(()) } else { Err(CheckoutError::OrderNotPending(self.id, self.status)) }
    }
}
