//! Cart store: per-owner cart mutations and live totals.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::aggregates::{CartItem, CatalogItem};
use crate::domain::validation;
use crate::domain::value_objects::{FieldValues, Money, OwnerId, Quantity};
use crate::store::{CartStore, Catalog, Store};
use crate::{CheckoutError, Result};

#[derive(Clone, Debug, Deserialize)]
pub struct AddItem {
    pub catalog_item_id: Uuid,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

fn default_quantity() -> i64 { 1 }

#[derive(Clone, Debug, Default, Deserialize)]
pub struct UpdateItem {
    pub quantity: Option<i64>,
    pub fields: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CartView {
    pub cart_id: Uuid,
    pub owner_id: OwnerId,
    pub lines: Vec<CartLine>,
    pub total: Money,
}

#[derive(Clone, Debug, Serialize)]
pub struct CartLine {
    #[serde(flatten)]
    pub item: CartItem,
    pub item_name: String,
    pub available: bool,
    pub unit_price: Money,
    pub line_total: Money,
}

#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn Store>,
    currency_scale: u32,
}

impl CartService {
    pub fn new(store: Arc<dyn Store>, currency_scale: u32) -> Self {
        Self { store, currency_scale }
    }

    async fn catalog_item(&self, id: Uuid) -> Result<CatalogItem> {
        self.store.catalog_item(id).await?.ok_or(CheckoutError::CatalogItemNotFound(id))
    }

    /// Keep only declared fields and require the mandatory ones.
    fn clean_fields(raw: BTreeMap<String, String>, catalog_item: &CatalogItem) -> Result<FieldValues> {
        let fields = FieldValues::from(raw).retain_declared(&catalog_item.fields);
        validation::check_fields(&fields, catalog_item)?;
        Ok(fields)
    }

    pub async fn add_item(&self, owner: &OwnerId, request: AddItem) -> Result<CartItem> {
        let quantity = Quantity::new(request.quantity)?;
        let catalog_item = self.catalog_item(request.catalog_item_id).await?;
        if !catalog_item.active {
            return Err(CheckoutError::ItemUnavailable(catalog_item.id));
        }
        let fields = Self::clean_fields(request.fields, &catalog_item)?;

        let mut tx = self.store.lock_cart(owner).await?;
        let mut cart = tx.cart().clone();
        let line = cart.add_item(catalog_item.id, quantity, fields);
        tx.save_item(&line).await?;
        tx.commit().await?;
        info!(%owner, item_id = %line.id, catalog_item_id = %catalog_item.id, quantity = line.quantity.value(), "cart item added");
        Ok(line)
    }

    pub async fn update_item(&self, owner: &OwnerId, item_id: Uuid, request: UpdateItem) -> Result<CartItem> {
        let quantity = request.quantity.map(Quantity::new).transpose()?;
        let mut tx = self.store.lock_cart(owner).await?;
        let mut cart = tx.cart().clone();
        let current = cart.item(item_id).ok_or(CheckoutError::CartItemNotFound(item_id))?;
        let catalog_item = self.catalog_item(current.catalog_item_id).await?;
        let fields = match request.fields {
            Some(raw) => Some(Self::clean_fields(raw, &catalog_item)?),
            None => None,
        };

        let line = cart.update_item(item_id, quantity, fields)?;
        tx.save_item(&line).await?;
        tx.commit().await?;
        info!(%owner, %item_id, quantity = line.quantity.value(), "cart item updated");
        Ok(line)
    }

    pub async fn remove_item(&self, owner: &OwnerId, item_id: Uuid) -> Result<()> {
        let mut tx = self.store.lock_cart(owner).await?;
        let mut cart = tx.cart().clone();
        cart.remove_item(item_id)?;
        tx.delete_item(item_id).await?;
        tx.commit().await?;
        info!(%owner, %item_id, "cart item removed");
        Ok(())
    }

    /// Cart lines priced from the live catalog. Never cached.
    pub async fn view(&self, owner: &OwnerId) -> Result<CartView> {
        let cart = self.store.lock_cart(owner).await?.cart().clone();
        let mut lines = Vec::with_capacity(cart.item_count());
        for item in cart.items {
            let catalog_item = self.catalog_item(item.catalog_item_id).await?;
            let unit_price = catalog_item.effective_price(self.currency_scale)?;
            lines.push(CartLine {
                line_total: unit_price.multiply(item.quantity)?,
                unit_price,
                available: catalog_item.active,
                item_name: catalog_item.name,
                item,
            });
        }
        let total = Money::total(lines.iter().map(|l| l.line_total))?;
        Ok(CartView { cart_id: cart.id, owner_id: cart.owner_id, lines, total })
    }

    pub async fn compute_total(&self, owner: &OwnerId) -> Result<Money> {
        Ok(self.view(owner).await?.total)
    }
}
