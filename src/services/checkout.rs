//! Order builder: the single atomic step from a mutable cart to an
//! immutable priced order.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderItem};
use crate::domain::validation::{self, ItemRejection};
use crate::domain::value_objects::OwnerId;
use crate::notify::Notifier;
use crate::store::{CartStore, Catalog, Store};
use crate::{CheckoutError, Result};

#[derive(Clone)]
pub struct OrderBuilder {
    store: Arc<dyn Store>,
    notifier: Notifier,
    currency_scale: u32,
}

impl OrderBuilder {
    pub fn new(store: Arc<dyn Store>, notifier: Notifier, currency_scale: u32) -> Self {
        Self { store, notifier, currency_scale }
    }

    /// Validates every line, snapshots prices and field values, then stores
    /// the order and deletes the cart in one commit. Any failure leaves the
    /// cart untouched and stores nothing.
    pub async fn build_order(&self, owner: &OwnerId, contact: Option<String>) -> Result<Order> {
        let mut tx = self.store.lock_cart(owner).await?;
        let cart = tx.cart().clone();
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let mut catalog_items = Vec::with_capacity(cart.item_count());
        let mut rejections = Vec::new();
        for line in cart.items() {
            let catalog_item = self
                .store
                .catalog_item(line.catalog_item_id)
                .await?
                .filter(|c| c.active)
                .ok_or(CheckoutError::ItemUnavailable(line.catalog_item_id))?;
            if let Err(CheckoutError::MissingFields(missing)) = validation::validate(line, &catalog_item) {
                rejections.push(ItemRejection {
                    cart_item_id: line.id,
                    catalog_item_id: catalog_item.id,
                    item_name: catalog_item.name.clone(),
                    missing,
                });
            }
            catalog_items.push(catalog_item);
        }
        if !rejections.is_empty() {
            warn!(%owner, rejected = rejections.len(), "checkout rejected");
            return Err(CheckoutError::CheckoutRejected(rejections));
        }

        let order_id = Uuid::now_v7();
        let items = cart
            .items()
            .iter()
            .zip(&catalog_items)
            .map(|(line, catalog_item)| OrderItem::snapshot(order_id, line, catalog_item, self.currency_scale))
            .collect::<Result<Vec<_>>>()?;
        let mut order = Order::place(order_id, owner.clone(), contact, items)?;

        tx.place_order(&order).await?;
        tx.commit().await?;
        info!(%owner, %order_id, total = %order.total(), items = order.items().len(), "order placed");
        self.notifier.publish(order.take_events());
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{CatalogItem, FieldKind, FieldSpec, OrderStatus};
    use crate::domain::value_objects::{Money, Quantity};
    use crate::services::cart::{AddItem, CartService};
    use crate::store::{MemoryStore, OrderStore};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_build_order_snapshots_and_clears_cart() {
        let store = Arc::new(MemoryStore::new());
        let mut service = CatalogItem::create("Spotify Premium", Money::new(dec!(100000)));
        service.set_discount(Some(dec!(10))).unwrap();
        store.put_catalog_item(&service).await.unwrap();

        let owner = OwnerId::new("u-1");
        let carts = CartService::new(store.clone(), 0);
        carts.add_item(&owner, AddItem { catalog_item_id: service.id, quantity: 2, fields: BTreeMap::new() }).await.unwrap();

        let (notifier, _rx) = Notifier::channel();
        let builder = OrderBuilder::new(store.clone(), notifier, 0);
        let order = builder.build_order(&owner, Some("09121234567".into())).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.total().amount(), dec!(180000));
        assert_eq!(order.owner_contact(), Some("09121234567"));
        assert!(store.lock_cart(&owner).await.unwrap().cart().is_empty());

        assert!(matches!(builder.build_order(&owner, None).await, Err(CheckoutError::EmptyCart)));
        assert_eq!(store.orders_for_owner(&owner).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejection_lists_every_incomplete_line() {
        let store = Arc::new(MemoryStore::new());
        let service = CatalogItem::create("Netflix", Money::new(dec!(300000)))
            .with_field(FieldSpec::required("username", FieldKind::Username))
            .with_field(FieldSpec::required("password", FieldKind::Password));
        store.put_catalog_item(&service).await.unwrap();

        // Lines written straight to the store, as if the field requirements
        // were added to the service after they were put in the cart.
        let owner = OwnerId::new("u-1");
        let mut tx = store.lock_cart(&owner).await.unwrap();
        let mut cart = tx.cart().clone();
        let mut partial = BTreeMap::new();
        partial.insert("username".to_string(), "neo".to_string());
        let a = cart.add_item(service.id, Quantity::new(1).unwrap(), partial.into());
        let b = cart.add_item(service.id, Quantity::new(1).unwrap(), Default::default());
        tx.save_item(&a).await.unwrap();
        tx.save_item(&b).await.unwrap();
        tx.commit().await.unwrap();

        let (notifier, _rx) = Notifier::channel();
        let builder = OrderBuilder::new(store.clone(), notifier, 0);
        match builder.build_order(&owner, None).await {
            Err(CheckoutError::CheckoutRejected(rejections)) => {
                assert_eq!(rejections.len(), 2);
                assert_eq!(rejections[0].missing, vec!["Password".to_string()]);
                assert_eq!(rejections[1].missing, vec!["Username".to_string(), "Password".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(store.lock_cart(&owner).await.unwrap().cart().item_count(), 2);
        assert!(store.orders_for_owner(&owner).await.unwrap().is_empty());
    }
}
