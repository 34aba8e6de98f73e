//! Cart to order to payment, end to end over the in-memory store.

mod common;

use common::*;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::time::Duration;
use subscription_checkout::domain::aggregates::{FieldKind, FieldSpec, OrderStatus, SessionStatus};
use subscription_checkout::domain::value_objects::Money;
use subscription_checkout::notify::NotificationKind;
use subscription_checkout::services::{AddItem, CallbackStatus, GatewayCallback, UpdateItem};
use subscription_checkout::store::{CartStore, Catalog, OrderStore};
use subscription_checkout::CheckoutError;
use uuid::Uuid;

fn with_username(catalog_item_id: Uuid, quantity: i64, username: &str) -> AddItem {
    let mut fields = BTreeMap::new();
    fields.insert("username".to_string(), username.to_string());
    AddItem { catalog_item_id, quantity, fields }
}

fn ok(authority: &str) -> GatewayCallback {
    GatewayCallback { authority: authority.to_string(), status: CallbackStatus::Ok, amount: None }
}

#[tokio::test]
async fn test_order_total_is_frozen_at_checkout() {
    let h = harness();
    let service = seed_service(&h.store, "Netflix Premium", dec!(100000), Some(dec!(10))).await;
    let buyer = owner("u-100");

    h.state.carts.add_item(&buyer, with_username(service.id, 2, "neo")).await.unwrap();
    assert_eq!(h.state.carts.compute_total(&buyer).await.unwrap(), Money::new(dec!(180000)));

    let order = h.state.checkout.build_order(&buyer, None).await.unwrap();
    assert_eq!(order.total(), Money::new(dec!(180000)));
    assert_eq!(order.items()[0].unit_price, Money::new(dec!(90000)));
    assert_eq!(order.items()[0].discount_percent, Some(dec!(10)));
    assert_eq!(order.items()[0].fields.get("username"), Some("neo"));
    assert!(h.store.lock_cart(&buyer).await.unwrap().cart().is_empty());

    h.store.set_discount(service.id, Some(dec!(50))).await.unwrap();
    let stored = h.state.orders.order(order.id()).await.unwrap();
    assert_eq!(stored.total(), Money::new(dec!(180000)));
    assert_eq!(stored.items()[0].unit_price, Money::new(dec!(90000)));
}

#[tokio::test]
async fn test_total_sums_lines_across_services() {
    let h = harness();
    let a = seed_service(&h.store, "Spotify", dec!(59000), None).await;
    let b = seed_plain_service(&h.store, "VPN", dec!(33333)).await;
    h.store.set_discount(b.id, Some(dec!(15))).await.unwrap();
    let buyer = owner("u-101");

    h.state.carts.add_item(&buyer, with_username(a.id, 3, "trinity")).await.unwrap();
    h.state.carts.add_item(&buyer, AddItem { catalog_item_id: b.id, quantity: 1, fields: BTreeMap::new() }).await.unwrap();

    // 33333 * 0.85 = 28333.05, rounded to whole units
    let order = h.state.checkout.build_order(&buyer, None).await.unwrap();
    assert_eq!(order.total(), Money::new(dec!(177000) + dec!(28333)));
    let sum = Money::total(order.items().iter().map(|i| i.line_total().unwrap())).unwrap();
    assert_eq!(order.total(), sum);
}

#[tokio::test]
async fn test_oversized_total_fails_checkout_without_panicking() {
    let h = harness();
    let service = seed_plain_service(&h.store, "Enterprise seat", dec!(100000000000000000000)).await;
    let buyer = owner("u-109");
    let add = AddItem { catalog_item_id: service.id, quantity: 2_000_000_000, fields: BTreeMap::new() };
    h.state.carts.add_item(&buyer, add).await.unwrap();

    assert!(matches!(h.state.carts.compute_total(&buyer).await, Err(CheckoutError::AmountOutOfRange)));
    assert!(matches!(h.state.checkout.build_order(&buyer, None).await, Err(CheckoutError::AmountOutOfRange)));
    assert!(h.store.orders_for_owner(&buyer).await.unwrap().is_empty());
    assert_eq!(h.store.lock_cart(&buyer).await.unwrap().cart().item_count(), 1);
}

#[tokio::test]
async fn test_empty_cart_creates_no_order() {
    let h = harness();
    let buyer = owner("u-102");
    assert!(matches!(h.state.checkout.build_order(&buyer, None).await, Err(CheckoutError::EmptyCart)));

    let service = seed_plain_service(&h.store, "Disney+", dec!(45000)).await;
    h.state.carts.add_item(&buyer, AddItem { catalog_item_id: service.id, quantity: 1, fields: BTreeMap::new() }).await.unwrap();
    h.state.checkout.build_order(&buyer, None).await.unwrap();
    assert!(matches!(h.state.checkout.build_order(&buyer, None).await, Err(CheckoutError::EmptyCart)));
    assert_eq!(h.store.orders_for_owner(&buyer).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_username_rejects_checkout_and_keeps_cart() {
    let h = harness();
    let mut service = seed_plain_service(&h.store, "HBO Max", dec!(70000)).await;
    let buyer = owner("u-103");
    let line = h
        .state
        .carts
        .add_item(&buyer, AddItem { catalog_item_id: service.id, quantity: 1, fields: BTreeMap::new() })
        .await
        .unwrap();

    // The service starts asking for an account username after the line was added.
    service = service.with_field(FieldSpec::required("username", FieldKind::Username));
    h.store.put_catalog_item(&service).await.unwrap();

    match h.state.checkout.build_order(&buyer, None).await {
        Err(CheckoutError::CheckoutRejected(rejections)) => {
            assert_eq!(rejections.len(), 1);
            assert_eq!(rejections[0].cart_item_id, line.id);
            assert_eq!(rejections[0].missing, vec!["Username".to_string()]);
        }
        other => panic!("expected CheckoutRejected, got {other:?}"),
    }
    assert!(h.store.orders_for_owner(&buyer).await.unwrap().is_empty());
    let view = h.state.carts.view(&buyer).await.unwrap();
    assert_eq!(view.lines.len(), 1);
    assert_eq!(view.lines[0].item.id, line.id);

    // Filling the field unblocks checkout.
    let mut fields = BTreeMap::new();
    fields.insert("username".to_string(), "morpheus".to_string());
    h.state.carts.update_item(&buyer, line.id, UpdateItem { quantity: None, fields: Some(fields) }).await.unwrap();
    h.state.checkout.build_order(&buyer, None).await.unwrap();
}

#[tokio::test]
async fn test_inactive_service_blocks_checkout() {
    let h = harness();
    let mut service = seed_plain_service(&h.store, "Apple TV", dec!(40000)).await;
    let buyer = owner("u-104");
    h.state.carts.add_item(&buyer, AddItem { catalog_item_id: service.id, quantity: 1, fields: BTreeMap::new() }).await.unwrap();
    service.deactivate();
    h.store.put_catalog_item(&service).await.unwrap();

    assert!(matches!(h.state.checkout.build_order(&buyer, None).await, Err(CheckoutError::ItemUnavailable(id)) if id == service.id));
    assert!(!h.state.carts.view(&buyer).await.unwrap().lines[0].available);
}

async fn placed_order(h: &Harness, buyer: &str) -> Uuid {
    let service = seed_service(&h.store, "YouTube Premium", dec!(100000), Some(dec!(10))).await;
    let buyer = owner(buyer);
    h.state.carts.add_item(&buyer, with_username(service.id, 2, "smith")).await.unwrap();
    h.state.checkout.build_order(&buyer, Some("09120000000".into())).await.unwrap().id()
}

#[tokio::test]
async fn test_second_open_session_is_refused() {
    let h = harness();
    let order_id = placed_order(&h, "u-200").await;

    let redirect = h.state.payments.open_session(order_id).await.unwrap();
    assert!(redirect.payment_url.ends_with(&redirect.authority));
    assert!(matches!(h.state.payments.open_session(order_id).await, Err(CheckoutError::AlreadySessioned(id)) if id == order_id));
    assert_eq!(h.gateway.request_calls(), 1);

    let session = h.store.session(order_id).await.unwrap().unwrap();
    assert_eq!(session.authority, redirect.authority);
    assert_eq!(session.status, SessionStatus::Opened);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_open_session_yields_one_session() {
    let h = harness();
    let order_id = placed_order(&h, "u-201").await;
    h.gateway.set_delay(Duration::from_millis(20));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let payments = h.state.payments.clone();
            tokio::spawn(async move { payments.open_session(order_id).await })
        })
        .collect();
    let mut opened = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => opened += 1,
            Err(e) => assert!(matches!(e, CheckoutError::AlreadySessioned(_)), "unexpected {e:?}"),
        }
    }
    assert_eq!(opened, 1);
    assert_eq!(h.gateway.request_calls(), 1);
}

#[tokio::test]
async fn test_duplicate_callback_verifies_once() {
    let mut h = harness();
    let order_id = placed_order(&h, "u-300").await;
    let redirect = h.state.payments.open_session(order_id).await.unwrap();
    h.state.payments.begin_redirect(order_id).await.unwrap();

    let first = h.state.payments.handle_callback(order_id, ok(&redirect.authority)).await.unwrap();
    let second = h.state.payments.handle_callback(order_id, ok(&redirect.authority)).await.unwrap();
    assert_eq!(first.order_status, OrderStatus::Paid);
    assert_eq!(first.session_status, SessionStatus::Verified);
    assert_eq!(second.order_status, first.order_status);
    assert_eq!(second.reference_id, first.reference_id);
    assert!(second.replayed);
    assert_eq!(h.gateway.verify_calls(), 1);

    let order = h.state.orders.order(order_id).await.unwrap();
    assert_eq!(order.payment_ref_id(), Some("12345678"));
    assert!(order.paid_at().is_some());

    let notification = h.notifications.recv().await.unwrap();
    assert_eq!(notification.order_id, order_id);
    assert_eq!(notification.event_type, NotificationKind::PaymentConfirmed);
    assert_eq!(notification.owner_contact.as_deref(), Some("09120000000"));
    assert!(h.notifications.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callbacks_settle_once() {
    let mut h = harness();
    let order_id = placed_order(&h, "u-301").await;
    let redirect = h.state.payments.open_session(order_id).await.unwrap();
    h.gateway.set_delay(Duration::from_millis(30));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let payments = h.state.payments.clone();
            let callback = ok(&redirect.authority);
            tokio::spawn(async move { payments.handle_callback(order_id, callback).await })
        })
        .collect();
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap());
    }
    assert!(outcomes.iter().all(|o| o.order_status == OrderStatus::Paid));
    assert_eq!(outcomes.iter().filter(|o| o.replayed).count(), 1);
    assert_eq!(h.gateway.verify_calls(), 1);

    h.notifications.recv().await.unwrap();
    assert!(h.notifications.try_recv().is_err());
}

#[tokio::test]
async fn test_gateway_amount_mismatch_never_pays() {
    let mut h = harness();
    let order_id = placed_order(&h, "u-302").await;
    let redirect = h.state.payments.open_session(order_id).await.unwrap();
    h.gateway.set_reported_amount(Some(Money::new(dec!(1000))));

    let err = h.state.payments.handle_callback(order_id, ok(&redirect.authority)).await.unwrap_err();
    assert!(matches!(err, CheckoutError::AmountMismatch { .. }));
    let order = h.state.orders.order(order_id).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Failed);
    assert_eq!(h.store.session(order_id).await.unwrap().unwrap().status, SessionStatus::Rejected);

    // A later, honest callback cannot revive the order.
    h.gateway.set_reported_amount(None);
    let replay = h.state.payments.handle_callback(order_id, ok(&redirect.authority)).await.unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.order_status, OrderStatus::Failed);
    assert_eq!(h.gateway.verify_calls(), 1);
    assert!(h.notifications.try_recv().is_err());
}

#[tokio::test]
async fn test_callback_integrity_failures_change_nothing() {
    let h = harness();
    let order_id = placed_order(&h, "u-303").await;

    let err = h.state.payments.handle_callback(order_id, ok("A0000")).await.unwrap_err();
    assert!(matches!(err, CheckoutError::UnknownOrder(_)));
    let err = h.state.payments.handle_callback(Uuid::now_v7(), ok("A0000")).await.unwrap_err();
    assert!(matches!(err, CheckoutError::UnknownOrder(_)));

    h.state.payments.open_session(order_id).await.unwrap();
    let err = h.state.payments.handle_callback(order_id, ok("A-forged")).await.unwrap_err();
    assert!(matches!(err, CheckoutError::AuthorityMismatch(_)));
    assert!(err.is_suspicious());

    assert_eq!(h.store.session(order_id).await.unwrap().unwrap().status, SessionStatus::Opened);
    assert_eq!(h.state.orders.order(order_id).await.unwrap().status(), OrderStatus::Pending);
    assert_eq!(h.gateway.verify_calls(), 0);
}

#[tokio::test]
async fn test_gateway_failure_rejects_order() {
    let mut h = harness();
    let order_id = placed_order(&h, "u-304").await;
    let redirect = h.state.payments.open_session(order_id).await.unwrap();
    h.gateway.set_confirm(false);

    let outcome = h.state.payments.handle_callback(order_id, ok(&redirect.authority)).await.unwrap();
    assert_eq!(outcome.order_status, OrderStatus::Failed);
    assert_eq!(outcome.session_status, SessionStatus::Rejected);
    assert!(h.notifications.try_recv().is_err());

    // Terminal: the order cannot be paid again.
    assert!(matches!(h.state.payments.open_session(order_id).await, Err(CheckoutError::AlreadySessioned(_))));
}

#[tokio::test]
async fn test_timeouts_are_retryable() {
    let h = harness();
    let order_id = placed_order(&h, "u-400").await;

    h.gateway.set_delay(GATEWAY_TIMEOUT * 3);
    let err = h.state.payments.open_session(order_id).await.unwrap_err();
    assert!(matches!(err, CheckoutError::GatewayTimeout));
    assert!(err.is_retryable());
    assert!(h.store.session(order_id).await.unwrap().is_none());

    h.gateway.set_delay(Duration::ZERO);
    let redirect = h.state.payments.open_session(order_id).await.unwrap();

    h.gateway.set_delay(GATEWAY_TIMEOUT * 3);
    let err = h.state.payments.handle_callback(order_id, ok(&redirect.authority)).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(h.state.orders.order(order_id).await.unwrap().status(), OrderStatus::Pending);

    h.gateway.set_delay(Duration::ZERO);
    let outcome = h.state.payments.handle_callback(order_id, ok(&redirect.authority)).await.unwrap();
    assert_eq!(outcome.order_status, OrderStatus::Paid);
}

#[tokio::test]
async fn test_gateway_request_error_stores_no_session() {
    let h = harness();
    let order_id = placed_order(&h, "u-401").await;
    h.gateway.set_fail_request(true);
    let err = h.state.payments.open_session(order_id).await.unwrap_err();
    assert!(matches!(err, CheckoutError::Gateway(_)));
    assert!(h.store.session(order_id).await.unwrap().is_none());
    assert!(h.state.orders.order(order_id).await.unwrap().payment_authority().is_none());
}

#[tokio::test]
async fn test_cancel_only_before_payment() {
    let h = harness();
    let order_id = placed_order(&h, "u-500").await;
    let buyer = owner("u-500");

    assert!(matches!(h.state.orders.cancel(&owner("someone-else"), order_id).await, Err(CheckoutError::OrderNotFound(_))));
    let order = h.state.orders.cancel(&buyer, order_id).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Canceled);
    assert!(matches!(h.state.payments.open_session(order_id).await, Err(CheckoutError::OrderNotPending(_, OrderStatus::Canceled))));

    let paid_id = placed_order(&h, "u-501").await;
    h.state.payments.open_session(paid_id).await.unwrap();
    assert!(matches!(h.state.orders.cancel(&owner("u-501"), paid_id).await, Err(CheckoutError::NotCancelable(_))));
}
