//! Persistence seams.
//!
//! Mutations go through lock handles: [`CartStore::lock_cart`] holds the
//! owner's cart and [`OrderStore::lock_order`] holds one order together with
//! its payment session. Nothing a handle writes is visible until
//! [`CartTx::commit`] / [`OrderTx::commit`]; dropping a handle discards its
//! writes and releases the lock.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::domain::aggregates::{Cart, CartItem, CatalogItem, Order, PaymentSession};
use crate::domain::value_objects::OwnerId;
use crate::{CheckoutError, Result};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn catalog_item(&self, id: Uuid) -> Result<Option<CatalogItem>>;
    async fn put_catalog_item(&self, item: &CatalogItem) -> Result<()>;

    /// Change a catalog item's discount. Placed orders keep the discount
    /// they were priced with.
    async fn set_discount(&self, id: Uuid, percent: Option<Decimal>) -> Result<CatalogItem> {
        let mut item = self.catalog_item(id).await?.ok_or(CheckoutError::CatalogItemNotFound(id))?;
        item.set_discount(percent)?;
        self.put_catalog_item(&item).await?;
        info!(catalog_item_id = %id, discount = ?percent, "discount changed");
        Ok(item)
    }
}

#[async_trait]
pub trait CartStore: Send + Sync {
    /// Lock the owner's cart, creating an empty one if none exists yet.
    async fn lock_cart(&self, owner: &OwnerId) -> Result<Box<dyn CartTx>>;
}

#[async_trait]
pub trait CartTx: Send {
    fn cart(&self) -> &Cart;
    async fn save_item(&mut self, item: &CartItem) -> Result<()>;
    async fn delete_item(&mut self, item_id: Uuid) -> Result<()>;
    /// Persist `order` with its items and delete the cart, as one unit.
    async fn place_order(&mut self, order: &Order) -> Result<()>;
    async fn commit(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn order(&self, id: Uuid) -> Result<Option<Order>>;
    async fn orders_for_owner(&self, owner: &OwnerId) -> Result<Vec<Order>>;
    async fn session(&self, order_id: Uuid) -> Result<Option<PaymentSession>>;
    /// Lock an order and its payment session. `None` when the order does not exist.
    async fn lock_order(&self, id: Uuid) -> Result<Option<Box<dyn OrderTx>>>;
}

#[async_trait]
pub trait OrderTx: Send {
    fn order(&self) -> &Order;
    fn session(&self) -> Option<&PaymentSession>;
    /// Write status and payment references of the locked order.
    async fn save_order(&mut self, order: &Order) -> Result<()>;
    /// Fails with `AlreadySessioned` if the order already has a session.
    async fn insert_session(&mut self, session: &PaymentSession) -> Result<()>;
    async fn save_session(&mut self, session: &PaymentSession) -> Result<()>;
    async fn commit(self: Box<Self>) -> Result<()>;
}

pub trait Store: Catalog + CartStore + OrderStore {}

impl<T: Catalog + CartStore + OrderStore> Store for T {}
