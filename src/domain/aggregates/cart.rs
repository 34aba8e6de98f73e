//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::{FieldValues, OwnerId, Quantity};
use crate::{CheckoutError, Result};

/// One active cart per owner. Holds no prices: totals are always computed
/// from the live catalog.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cart {
    pub id: Uuid,
    pub owner_id: OwnerId,
    pub items: Vec<CartItem>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub catalog_item_id: Uuid,
    pub quantity: Quantity,
    pub fields: FieldValues,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn for_owner(owner_id: OwnerId) -> Self {
        Self { id: Uuid::now_v7(), owner_id, items: vec![], created_at: Utc::now() }
    }

    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn item_count(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn item(&self, item_id: Uuid) -> Option<&CartItem> { self.items.iter().find(|i| i.id == item_id) }

    /// Adds a line, merging into an existing line for the same service with
    /// identical field values. Returns the resulting line.
    pub fn add_item(&mut self, catalog_item_id: Uuid, quantity: Quantity, fields: FieldValues) -> CartItem {
        let now = Utc::now();
        if let Some(existing) = self.items.iter_mut().find(|i| i.catalog_item_id == catalog_item_id && i.fields == fields) {
            existing.quantity = existing.quantity.add(quantity);
            existing.updated_at = now;
            return existing.clone();
        }
        let item = CartItem {
            id: Uuid::now_v7(), cart_id: self.id, catalog_item_id, quantity, fields,
            created_at: now, updated_at: now,
        };
        self.items.push(item.clone());
        item
    }

    pub fn update_item(&mut self, item_id: Uuid, quantity: Option<Quantity>, fields: Option<FieldValues>) -> Result<CartItem> {
        let item = self.items.iter_mut().find(|i| i.id == item_id).ok_or(CheckoutError::CartItemNotFound(item_id))?;
        if let Some(q) = quantity { item.quantity = q; }
        if let Some(f) = fields { item.fields = f; }
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    pub fn remove_item(&mut self, item_id: Uuid) -> Result<CartItem> {
        let pos = self.items.iter().position(|i| i.id == item_id).ok_or(CheckoutError::CartItemNotFound(item_id))?;
        Ok(self.items.remove(pos))
    }

    pub fn clear(&mut self) { self.items.clear(); }
}
