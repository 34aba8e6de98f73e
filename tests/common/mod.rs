#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use subscription_checkout::domain::aggregates::{CatalogItem, FieldKind, FieldSpec};
use subscription_checkout::domain::value_objects::{Money, OwnerId};
use subscription_checkout::gateway::{PaymentGateway, PaymentRequest, Verification};
use subscription_checkout::http::AppState;
use subscription_checkout::notify::{Notification, Notifier};
use subscription_checkout::services::PaymentSettings;
use subscription_checkout::store::{Catalog, MemoryStore, Store};
use subscription_checkout::{CheckoutError, Result};
use tokio::sync::mpsc::UnboundedReceiver;

/// In-process gateway whose answers are set by the test.
pub struct ScriptedGateway {
    pub confirm: Mutex<bool>,
    pub fail_request: Mutex<bool>,
    pub delay: Mutex<Duration>,
    /// Amount reported back by verify; the requested amount when unset.
    pub reported_amount: Mutex<Option<Money>>,
    pub requests: AtomicUsize,
    pub verifies: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            confirm: Mutex::new(true),
            fail_request: Mutex::new(false),
            delay: Mutex::new(Duration::ZERO),
            reported_amount: Mutex::new(None),
            requests: AtomicUsize::new(0),
            verifies: AtomicUsize::new(0),
        })
    }

    pub fn set_delay(&self, delay: Duration) { *self.delay.lock().unwrap() = delay; }
    pub fn set_confirm(&self, confirm: bool) { *self.confirm.lock().unwrap() = confirm; }
    pub fn set_fail_request(&self, fail: bool) { *self.fail_request.lock().unwrap() = fail; }
    pub fn set_reported_amount(&self, amount: Option<Money>) { *self.reported_amount.lock().unwrap() = amount; }
    pub fn verify_calls(&self) -> usize { self.verifies.load(Ordering::SeqCst) }
    pub fn request_calls(&self) -> usize { self.requests.load(Ordering::SeqCst) }

    fn delay(&self) -> Duration { *self.delay.lock().unwrap() }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn request_payment(&self, _request: &PaymentRequest) -> Result<String> {
        let n = self.requests.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay()).await;
        if *self.fail_request.lock().unwrap() {
            return Err(CheckoutError::Gateway("code -9: validation error".into()));
        }
        Ok(format!("A{:0>35}", n + 1))
    }

    async fn verify_payment(&self, _authority: &str, amount: Money) -> Result<Verification> {
        self.verifies.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay()).await;
        let confirmed = *self.confirm.lock().unwrap();
        Ok(Verification {
            confirmed,
            reference_id: confirmed.then(|| "12345678".to_string()),
            amount: Some(self.reported_amount.lock().unwrap().unwrap_or(amount)),
            message: (!confirmed).then(|| "code -51: payment not successful".to_string()),
        })
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<ScriptedGateway>,
    pub notifications: UnboundedReceiver<Notification>,
    pub state: AppState,
}

pub const GATEWAY_TIMEOUT: Duration = Duration::from_millis(300);

/// Services wired to `store` and `gateway`, pricing at `currency_scale`.
pub fn app_state(
    store: Arc<dyn Store>,
    gateway: Arc<ScriptedGateway>,
    currency_scale: u32,
) -> (AppState, UnboundedReceiver<Notification>) {
    let (notifier, notifications) = Notifier::channel();
    let settings = PaymentSettings {
        callback_base_url: "https://shop.example".into(),
        start_pay_url: "https://sandbox.zarinpal.com/pg/StartPay/".into(),
        gateway_timeout: GATEWAY_TIMEOUT,
    };
    (AppState::new(store, gateway, notifier, settings, currency_scale), notifications)
}

pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let gateway = ScriptedGateway::new();
    let (state, notifications) = app_state(store.clone(), gateway.clone(), 0);
    Harness { store, gateway, notifications, state }
}

pub fn owner(id: &str) -> OwnerId { OwnerId::new(id) }

/// A streaming service priced at `price` with an optional discount, asking
/// for the buyer's account username.
pub async fn seed_service(store: &MemoryStore, name: &str, price: Decimal, discount: Option<Decimal>) -> CatalogItem {
    let mut item = CatalogItem::create(name, Money::new(price))
        .with_field(FieldSpec::required("username", FieldKind::Username));
    item.set_discount(discount).unwrap();
    store.put_catalog_item(&item).await.unwrap();
    item
}

/// A service with no custom fields.
pub async fn seed_plain_service(store: &MemoryStore, name: &str, price: Decimal) -> CatalogItem {
    let item = CatalogItem::create(name, Money::new(price));
    store.put_catalog_item(&item).await.unwrap();
    item
}
