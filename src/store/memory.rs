//! In-memory store for local runs and tests.
//!
//! Per-cart and per-order locks are async mutexes keyed by owner / order id.
//! A lock entry lives only while someone holds or waits for it. Staged writes
//! are applied under a single table write lock on commit.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use super::{CartStore, CartTx, Catalog, OrderStore, OrderTx};
use crate::domain::aggregates::{Cart, CartItem, CatalogItem, Order, PaymentSession};
use crate::domain::value_objects::OwnerId;
use crate::{CheckoutError, Result};

#[derive(Default)]
struct Tables {
    catalog: HashMap<Uuid, CatalogItem>,
    carts: HashMap<OwnerId, Cart>,
    orders: HashMap<Uuid, Order>,
    sessions: HashMap<Uuid, PaymentSession>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum LockKey {
    Cart(OwnerId),
    Order(Uuid),
}

type LockMap = DashMap<LockKey, Arc<Mutex<()>>>;

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    locks: Arc<LockMap>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    async fn acquire(&self, key: LockKey) -> KeyGuard {
        let lock = self.locks.entry(key.clone()).or_default().clone();
        let guard = lock.lock_owned().await;
        KeyGuard { guard: Some(guard), key, locks: self.locks.clone() }
    }
}

/// Held lock on one key. Dropping it removes the map entry once no other
/// task holds or waits for the same key.
struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: LockKey,
    locks: Arc<LockMap>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Clones are taken under the shard lock, so a count of one means no waiter.
        self.locks.remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Stored orders never carry pending domain events.
fn stored(order: &Order) -> Order {
    let mut order = order.clone();
    order.events.clear();
    order
}

#[async_trait]
impl Catalog for MemoryStore {
    async fn catalog_item(&self, id: Uuid) -> Result<Option<CatalogItem>> {
        Ok(self.tables.read().await.catalog.get(&id).cloned())
    }

    async fn put_catalog_item(&self, item: &CatalogItem) -> Result<()> {
        self.tables.write().await.catalog.insert(item.id, item.clone());
        Ok(())
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn lock_cart(&self, owner: &OwnerId) -> Result<Box<dyn CartTx>> {
        let guard = self.acquire(LockKey::Cart(owner.clone())).await;
        let cart = self.tables.read().await.carts.get(owner).cloned()
            .unwrap_or_else(|| Cart::for_owner(owner.clone()));
        Ok(Box::new(MemoryCartTx { _guard: guard, tables: self.tables.clone(), cart, placed: None }))
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn orders_for_owner(&self, owner: &OwnerId) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        let mut orders: Vec<Order> = tables.orders.values().filter(|o| &o.owner_id == owner).cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn session(&self, order_id: Uuid) -> Result<Option<PaymentSession>> {
        Ok(self.tables.read().await.sessions.get(&order_id).cloned())
    }

    async fn lock_order(&self, id: Uuid) -> Result<Option<Box<dyn OrderTx>>> {
        // Orders are never deleted, so an id missing here stays missing.
        if !self.tables.read().await.orders.contains_key(&id) {
            return Ok(None);
        }
        let guard = self.acquire(LockKey::Order(id)).await;
        let tables = self.tables.read().await;
        let Some(order) = tables.orders.get(&id).cloned() else { return Ok(None) };
        let session = tables.sessions.get(&id).cloned();
        drop(tables);
        Ok(Some(Box::new(MemoryOrderTx {
            _guard: guard, tables: self.tables.clone(), order, session,
            order_dirty: false, session_dirty: false,
        })))
    }
}

struct MemoryCartTx {
    _guard: KeyGuard,
    tables: Arc<RwLock<Tables>>,
    cart: Cart,
    placed: Option<Order>,
}

#[async_trait]
impl CartTx for MemoryCartTx {
    fn cart(&self) -> &Cart { &self.cart }

    async fn save_item(&mut self, item: &CartItem) -> Result<()> {
        match self.cart.items.iter_mut().find(|i| i.id == item.id) {
            Some(existing) => *existing = item.clone(),
            None => self.cart.items.push(item.clone()),
        }
        Ok(())
    }

    async fn delete_item(&mut self, item_id: Uuid) -> Result<()> {
        self.cart.items.retain(|i| i.id != item_id);
        Ok(())
    }

    async fn place_order(&mut self, order: &Order) -> Result<()> {
        self.placed = Some(stored(order));
        self.cart.clear();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryCartTx { _guard, tables, cart, placed } = *self;
        let mut tables = tables.write().await;
        match placed {
            Some(order) => {
                tables.carts.remove(&cart.owner_id);
                tables.orders.insert(order.id, order);
            }
            None => {
                tables.carts.insert(cart.owner_id.clone(), cart);
            }
        }
        Ok(())
    }
}

struct MemoryOrderTx {
    _guard: KeyGuard,
    tables: Arc<RwLock<Tables>>,
    order: Order,
    session: Option<PaymentSession>,
    order_dirty: bool,
    session_dirty: bool,
}

#[async_trait]
impl OrderTx for MemoryOrderTx {
    fn order(&self) -> &Order { &self.order }
    fn session(&self) -> Option<&PaymentSession> { self.session.as_ref() }

    async fn save_order(&mut self, order: &Order) -> Result<()> {
        self.order = stored(order);
        self.order_dirty = true;
        Ok(())
    }

    async fn insert_session(&mut self, session: &PaymentSession) -> Result<()> {
        if self.session.is_some() {
            return Err(CheckoutError::AlreadySessioned(session.order_id));
        }
        self.session = Some(session.clone());
        self.session_dirty = true;
        Ok(())
    }

    async fn save_session(&mut self, session: &PaymentSession) -> Result<()> {
        self.session = Some(session.clone());
        self.session_dirty = true;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryOrderTx { _guard, tables, order, session, order_dirty, session_dirty } = *self;
        let mut tables = tables.write().await;
        if order_dirty {
            tables.orders.insert(order.id, order);
        }
        if let (true, Some(session)) = (session_dirty, session) {
            tables.sessions.insert(session.order_id, session);
        }
        Ok(())
    }
}
