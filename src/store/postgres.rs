//! PostgreSQL store.
//!
//! Lock handles are open transactions: the cart row and the order row are
//! taken with `SELECT ... FOR UPDATE`, so concurrent requests for the same
//! owner or order queue behind each other across processes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

use super::{CartStore, CartTx, Catalog, OrderStore, OrderTx};
use crate::domain::aggregates::{Cart, CartItem, CatalogItem, FieldSpec, Order, OrderItem, PaymentSession};
use crate::domain::value_objects::{FieldValues, Money, OwnerId, Quantity};
use crate::{CheckoutError, Result};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self { Self { pool } }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

// =============================================================================
// Rows
// =============================================================================

#[derive(sqlx::FromRow)]
struct CatalogItemRow {
    id: Uuid, name: String, base_price: Decimal, discount_percent: Option<Decimal>,
    fields: Json<Vec<FieldSpec>>, active: bool, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl From<CatalogItemRow> for CatalogItem {
    fn from(r: CatalogItemRow) -> Self {
        Self {
            id: r.id, name: r.name, base_price: Money::new(r.base_price), discount_percent: r.discount_percent,
            fields: r.fields.0, active: r.active, created_at: r.created_at, updated_at: r.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CartRow { id: Uuid, owner_id: String, created_at: DateTime<Utc> }

#[derive(sqlx::FromRow)]
struct CartItemRow {
    id: Uuid, cart_id: Uuid, catalog_item_id: Uuid, quantity: i32, fields: Json<FieldValues>,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl TryFrom<CartItemRow> for CartItem {
    type Error = CheckoutError;
    fn try_from(r: CartItemRow) -> Result<Self> {
        Ok(Self {
            id: r.id, cart_id: r.cart_id, catalog_item_id: r.catalog_item_id,
            quantity: stored_quantity(r.quantity)?, fields: r.fields.0,
            created_at: r.created_at, updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid, owner_id: String, owner_contact: Option<String>, total: Decimal, status: String,
    payment_authority: Option<String>, payment_ref_id: Option<String>,
    created_at: DateTime<Utc>, paid_at: Option<DateTime<Utc>>,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order> {
        Ok(Order {
            id: self.id, owner_id: OwnerId::new(self.owner_id), owner_contact: self.owner_contact, items,
            total: Money::new(self.total), status: self.status.parse()?,
            payment_authority: self.payment_authority, payment_ref_id: self.payment_ref_id,
            created_at: self.created_at, paid_at: self.paid_at, events: vec![],
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid, order_id: Uuid, catalog_item_id: Uuid, item_name: String, quantity: i32,
    list_price: Decimal, discount_percent: Option<Decimal>, unit_price: Decimal, fields: Json<FieldValues>,
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = CheckoutError;
    fn try_from(r: OrderItemRow) -> Result<Self> {
        Ok(Self {
            id: r.id, order_id: r.order_id, catalog_item_id: r.catalog_item_id, item_name: r.item_name,
            quantity: stored_quantity(r.quantity)?, list_price: Money::new(r.list_price),
            discount_percent: r.discount_percent, unit_price: Money::new(r.unit_price), fields: r.fields.0,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    order_id: Uuid, authority: String, status: String, reference_id: Option<String>,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for PaymentSession {
    type Error = CheckoutError;
    fn try_from(r: SessionRow) -> Result<Self> {
        Ok(Self {
            order_id: r.order_id, authority: r.authority, status: r.status.parse()?,
            reference_id: r.reference_id, created_at: r.created_at, updated_at: r.updated_at,
        })
    }
}

fn stored_quantity(q: i32) -> Result<Quantity> {
    Quantity::new(i64::from(q)).map_err(|_| CheckoutError::Storage(format!("invalid stored quantity {q}")))
}

fn column_quantity(q: Quantity) -> Result<i32> {
    i32::try_from(q.value()).map_err(|_| CheckoutError::InvalidQuantity)
}

async fn order_items(conn: &mut PgConnection, order_ids: &[Uuid]) -> Result<Vec<OrderItem>> {
    sqlx::query_as::<_, OrderItemRow>("SELECT * FROM order_items WHERE order_id = ANY($1) ORDER BY id")
        .bind(order_ids).fetch_all(conn).await?
        .into_iter().map(OrderItem::try_from).collect()
}

async fn assemble(conn: &mut PgConnection, rows: Vec<OrderRow>) -> Result<Vec<Order>> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut items = order_items(conn, &ids).await?;
    rows.into_iter()
        .map(|row| {
            let (mine, rest): (Vec<_>, Vec<_>) = items.drain(..).partition(|i| i.order_id == row.id);
            items = rest;
            row.into_order(mine)
        })
        .collect()
}

// =============================================================================
// Catalog
// =============================================================================

#[async_trait]
impl Catalog for PgStore {
    async fn catalog_item(&self, id: Uuid) -> Result<Option<CatalogItem>> {
        tracing::debug!(%id, "loading catalog item");
        let row = sqlx::query_as::<_, CatalogItemRow>("SELECT * FROM catalog_items WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(CatalogItem::from))
    }

    async fn put_catalog_item(&self, item: &CatalogItem) -> Result<()> {
        sqlx::query("INSERT INTO catalog_items (id, name, base_price, discount_percent, fields, active, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, base_price = EXCLUDED.base_price, discount_percent = EXCLUDED.discount_percent, fields = EXCLUDED.fields, active = EXCLUDED.active, updated_at = EXCLUDED.updated_at")
            .bind(item.id).bind(&item.name).bind(item.base_price.amount()).bind(item.discount_percent)
            .bind(Json(&item.fields)).bind(item.active).bind(item.created_at).bind(item.updated_at)
            .execute(&self.pool).await?;
        Ok(())
    }
}

// =============================================================================
// Carts
// =============================================================================

#[async_trait]
impl CartStore for PgStore {
    async fn lock_cart(&self, owner: &OwnerId) -> Result<Box<dyn CartTx>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO carts (id, owner_id, created_at) VALUES ($1, $2, NOW()) ON CONFLICT (owner_id) DO NOTHING")
            .bind(Uuid::now_v7()).bind(owner.as_str()).execute(&mut *tx).await?;
        let row = sqlx::query_as::<_, CartRow>("SELECT * FROM carts WHERE owner_id = $1 FOR UPDATE")
            .bind(owner.as_str()).fetch_one(&mut *tx).await?;
        let items = sqlx::query_as::<_, CartItemRow>("SELECT * FROM cart_items WHERE cart_id = $1 ORDER BY created_at, id")
            .bind(row.id).fetch_all(&mut *tx).await?
            .into_iter().map(CartItem::try_from).collect::<Result<Vec<_>>>()?;
        let cart = Cart { id: row.id, owner_id: OwnerId::new(row.owner_id), items, created_at: row.created_at };
        Ok(Box::new(PgCartTx { tx, cart }))
    }
}

struct PgCartTx {
    tx: Transaction<'static, Postgres>,
    cart: Cart,
}

#[async_trait]
impl CartTx for PgCartTx {
    fn cart(&self) -> &Cart { &self.cart }

    async fn save_item(&mut self, item: &CartItem) -> Result<()> {
        sqlx::query("INSERT INTO cart_items (id, cart_id, catalog_item_id, quantity, fields, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (id) DO UPDATE SET quantity = EXCLUDED.quantity, fields = EXCLUDED.fields, updated_at = EXCLUDED.updated_at")
            .bind(item.id).bind(self.cart.id).bind(item.catalog_item_id).bind(column_quantity(item.quantity)?)
            .bind(Json(&item.fields)).bind(item.created_at).bind(item.updated_at)
            .execute(&mut *self.tx).await?;
        match self.cart.items.iter_mut().find(|i| i.id == item.id) {
            Some(existing) => *existing = item.clone(),
            None => self.cart.items.push(item.clone()),
        }
        Ok(())
    }

    async fn delete_item(&mut self, item_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM cart_items WHERE id = $1 AND cart_id = $2")
            .bind(item_id).bind(self.cart.id).execute(&mut *self.tx).await?;
        self.cart.items.retain(|i| i.id != item_id);
        Ok(())
    }

    async fn place_order(&mut self, order: &Order) -> Result<()> {
        sqlx::query("INSERT INTO orders (id, owner_id, owner_contact, total, status, payment_authority, payment_ref_id, created_at, paid_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)")
            .bind(order.id).bind(order.owner_id.as_str()).bind(&order.owner_contact).bind(order.total.amount())
            .bind(order.status.as_str()).bind(&order.payment_authority).bind(&order.payment_ref_id)
            .bind(order.created_at).bind(order.paid_at)
            .execute(&mut *self.tx).await?;
        for item in &order.items {
            sqlx::query("INSERT INTO order_items (id, order_id, catalog_item_id, item_name, quantity, list_price, discount_percent, unit_price, fields) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)")
                .bind(item.id).bind(order.id).bind(item.catalog_item_id).bind(&item.item_name)
                .bind(column_quantity(item.quantity)?).bind(item.list_price.amount()).bind(item.discount_percent)
                .bind(item.unit_price.amount()).bind(Json(&item.fields))
                .execute(&mut *self.tx).await?;
        }
        sqlx::query("DELETE FROM carts WHERE id = $1").bind(self.cart.id).execute(&mut *self.tx).await?;
        self.cart.clear();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

// =============================================================================
// Orders and payment sessions
// =============================================================================

#[async_trait]
impl OrderStore for PgStore {
    async fn order(&self, id: Uuid) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        let Some(row) = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1")
            .bind(id).fetch_optional(&mut *conn).await? else { return Ok(None) };
        Ok(assemble(&mut conn, vec![row]).await?.pop())
    }

    async fn orders_for_owner(&self, owner: &OwnerId) -> Result<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE owner_id = $1 ORDER BY created_at DESC")
            .bind(owner.as_str()).fetch_all(&mut *conn).await?;
        assemble(&mut conn, rows).await
    }

    async fn session(&self, order_id: Uuid) -> Result<Option<PaymentSession>> {
        sqlx::query_as::<_, SessionRow>("SELECT * FROM payment_sessions WHERE order_id = $1")
            .bind(order_id).fetch_optional(&self.pool).await?
            .map(PaymentSession::try_from).transpose()
    }

    async fn lock_order(&self, id: Uuid) -> Result<Option<Box<dyn OrderTx>>> {
        let mut tx = self.pool.begin().await?;
        let Some(row) = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id).fetch_optional(&mut *tx).await? else { return Ok(None) };
        let mut orders = assemble(&mut tx, vec![row]).await?;
        let order = orders.pop().ok_or(CheckoutError::OrderNotFound(id))?;
        let session = sqlx::query_as::<_, SessionRow>("SELECT * FROM payment_sessions WHERE order_id = $1 FOR UPDATE")
            .bind(id).fetch_optional(&mut *tx).await?
            .map(PaymentSession::try_from).transpose()?;
        Ok(Some(Box::new(PgOrderTx { tx, order, session })))
    }
}

struct PgOrderTx {
    tx: Transaction<'static, Postgres>,
    order: Order,
    session: Option<PaymentSession>,
}

#[async_trait]
impl OrderTx for PgOrderTx {
    fn order(&self) -> &Order { &self.order }
    fn session(&self) -> Option<&PaymentSession> { self.session.as_ref() }

    async fn save_order(&mut self, order: &Order) -> Result<()> {
        sqlx::query("UPDATE orders SET status = $2, payment_authority = $3, payment_ref_id = $4, paid_at = $5 WHERE id = $1")
            .bind(order.id).bind(order.status.as_str()).bind(&order.payment_authority)
            .bind(&order.payment_ref_id).bind(order.paid_at)
            .execute(&mut *self.tx).await?;
        self.order = order.clone();
        self.order.events.clear();
        Ok(())
    }

    async fn insert_session(&mut self, session: &PaymentSession) -> Result<()> {
        let inserted = sqlx::query("INSERT INTO payment_sessions (order_id, authority, status, reference_id, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (order_id) DO NOTHING")
            .bind(session.order_id).bind(&session.authority).bind(session.status.as_str())
            .bind(&session.reference_id).bind(session.created_at).bind(session.updated_at)
            .execute(&mut *self.tx).await?;
        if inserted.rows_affected() == 0 {
            return Err(CheckoutError::AlreadySessioned(session.order_id));
        }
        self.session = Some(session.clone());
        Ok(())
    }

    async fn save_session(&mut self, session: &PaymentSession) -> Result<()> {
        sqlx::query("UPDATE payment_sessions SET status = $2, reference_id = $3, updated_at = $4 WHERE order_id = $1")
            .bind(session.order_id).bind(session.status.as_str()).bind(&session.reference_id).bind(session.updated_at)
            .execute(&mut *self.tx).await?;
        self.session = Some(session.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
