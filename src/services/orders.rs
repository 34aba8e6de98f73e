//! Order reads and cancellation.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::aggregates::{Order, PaymentSession};
use crate::domain::value_objects::OwnerId;
use crate::notify::Notifier;
use crate::store::{OrderStore, Store};
use crate::{CheckoutError, Result};

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn Store>,
    notifier: Notifier,
}

impl OrderService {
    pub fn new(store: Arc<dyn Store>, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    pub async fn order(&self, id: Uuid) -> Result<Order> {
        self.store.order(id).await?.ok_or(CheckoutError::OrderNotFound(id))
    }

    pub async fn orders_for_owner(&self, owner: &OwnerId) -> Result<Vec<Order>> {
        self.store.orders_for_owner(owner).await
    }

    pub async fn session(&self, order_id: Uuid) -> Result<Option<PaymentSession>> {
        self.store.session(order_id).await
    }

    /// Cancel a pending order that never opened a payment session.
    pub async fn cancel(&self, owner: &OwnerId, order_id: Uuid) -> Result<Order> {
        let mut tx = self.store.lock_order(order_id).await?.ok_or(CheckoutError::OrderNotFound(order_id))?;
        if tx.order().owner_id() != owner {
            return Err(CheckoutError::OrderNotFound(order_id));
        }
        if tx.session().is_some() {
            return Err(CheckoutError::NotCancelable(order_id));
        }
        let mut order = tx.order().clone();
        order.cancel()?;
        tx.save_order(&order).await?;
        tx.commit().await?;
        info!(%owner, %order_id, "order canceled");
        self.notifier.publish(order.take_events());
        Ok(order)
    }
}
