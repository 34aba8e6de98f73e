//! Payment orchestrator.
//!
//! Every transition runs while holding the order lock from
//! [`OrderStore::lock_order`], including the gateway call it depends on.
//! Concurrent `open_session` calls for one order therefore yield a single
//! session, and concurrent callbacks settle into one terminal state with a
//! single verify call. Gateway calls are bounded by the configured timeout.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::domain::aggregates::{Order, OrderStatus, PaymentSession, SessionEvent, SessionStatus};
use crate::domain::value_objects::Money;
use crate::gateway::{PaymentGateway, PaymentMetadata, PaymentRequest};
use crate::notify::Notifier;
use crate::store::{OrderStore, OrderTx, Store};
use crate::{CheckoutError, Result};

#[derive(Clone, Debug)]
pub struct PaymentSettings {
    pub callback_base_url: String,
    pub start_pay_url: String,
    pub gateway_timeout: Duration,
}

impl From<&GatewayConfig> for PaymentSettings {
    fn from(c: &GatewayConfig) -> Self {
        Self {
            callback_base_url: c.callback_base_url.clone(),
            start_pay_url: c.start_pay_url.clone(),
            gateway_timeout: c.timeout(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PaymentRedirect {
    pub order_id: Uuid,
    pub authority: String,
    pub payment_url: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CallbackStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "NOK")]
    Nok,
}

/// Anything but `OK` is a failed or canceled payment.
impl From<&str> for CallbackStatus {
    fn from(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("OK") { Self::Ok } else { Self::Nok }
    }
}

#[derive(Clone, Debug)]
pub struct GatewayCallback {
    pub authority: String,
    pub status: CallbackStatus,
    /// Amount reported with the callback, in store currency, if any.
    pub amount: Option<Money>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PaymentOutcome {
    pub order_id: Uuid,
    pub order_status: OrderStatus,
    pub session_status: SessionStatus,
    pub reference_id: Option<String>,
    /// The session was already settled; nothing was done.
    pub replayed: bool,
}

impl PaymentOutcome {
    fn recorded(order: &Order, session: &PaymentSession, replayed: bool) -> Self {
        Self {
            order_id: order.id(),
            order_status: order.status(),
            session_status: session.status,
            reference_id: session.reference_id.clone(),
            replayed,
        }
    }
}

#[derive(Clone)]
pub struct PaymentOrchestrator {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Notifier,
    settings: PaymentSettings,
}

fn suspicious(e: CheckoutError) -> CheckoutError {
    warn!(error = %e, "suspicious payment callback");
    e
}

impl PaymentOrchestrator {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn PaymentGateway>, notifier: Notifier, settings: PaymentSettings) -> Self {
        Self { store, gateway, notifier, settings }
    }

    pub fn callback_url(&self, order_id: Uuid) -> String {
        format!("{}/api/v1/orders/{}/callback", self.settings.callback_base_url.trim_end_matches('/'), order_id)
    }

    pub fn payment_url(&self, authority: &str) -> String {
        format!("{}{}", self.settings.start_pay_url, authority)
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.settings.gateway_timeout, call)
            .await
            .map_err(|_| CheckoutError::GatewayTimeout)?
    }

    /// Opens the one payment session of a pending order. A gateway failure
    /// or timeout stores nothing, so the call can be retried.
    pub async fn open_session(&self, order_id: Uuid) -> Result<PaymentRedirect> {
        let mut tx = self.store.lock_order(order_id).await?.ok_or(CheckoutError::OrderNotFound(order_id))?;
        if tx.session().is_some() {
            warn!(%order_id, "payment session already opened");
            return Err(CheckoutError::AlreadySessioned(order_id));
        }
        let mut order = tx.order().clone();
        if order.status() != OrderStatus::Pending {
            return Err(CheckoutError::OrderNotPending(order_id, order.status()));
        }

        let request = PaymentRequest {
            amount: order.total(),
            callback_url: self.callback_url(order_id),
            description: format!("Payment for order {order_id}"),
            metadata: PaymentMetadata {
                order_id,
                owner_id: order.owner_id().clone(),
                contact: order.owner_contact().map(str::to_string),
            },
        };
        let authority = match self.bounded(self.gateway.request_payment(&request)).await {
            Ok(authority) => authority,
            Err(e) => {
                warn!(%order_id, error = %e, "could not open payment session");
                return Err(e);
            }
        };

        let session = PaymentSession::open(order_id, authority.clone());
        tx.insert_session(&session).await?;
        order.attach_authority(authority.clone())?;
        tx.save_order(&order).await?;
        tx.commit().await?;
        info!(%order_id, %authority, amount = %order.total(), "payment session opened");

        Ok(PaymentRedirect { order_id, payment_url: self.payment_url(&authority), authority })
    }

    /// Marks the buyer as sent to the gateway and returns the start-pay URL.
    pub async fn begin_redirect(&self, order_id: Uuid) -> Result<String> {
        let mut tx = self.store.lock_order(order_id).await?.ok_or(CheckoutError::UnknownOrder(order_id))?;
        let mut session = tx.session().cloned().ok_or(CheckoutError::UnknownOrder(order_id))?;
        if session.transition(SessionEvent::Redirected)? {
            tx.save_session(&session).await?;
            tx.commit().await?;
            info!(%order_id, "awaiting payment callback");
        }
        Ok(self.payment_url(&session.authority))
    }

    /// Reconciles a gateway callback. Settled sessions return their recorded
    /// outcome without touching the gateway again.
    pub async fn handle_callback(&self, order_id: Uuid, callback: GatewayCallback) -> Result<PaymentOutcome> {
        let Some(tx) = self.store.lock_order(order_id).await? else {
            return Err(suspicious(CheckoutError::UnknownOrder(order_id)));
        };
        let Some(mut session) = tx.session().cloned() else {
            return Err(suspicious(CheckoutError::UnknownOrder(order_id)));
        };
        if session.authority != callback.authority {
            return Err(suspicious(CheckoutError::AuthorityMismatch(order_id)));
        }
        let mut order = tx.order().clone();
        if session.status.is_terminal() {
            info!(%order_id, status = %session.status, "duplicate payment callback");
            return Ok(PaymentOutcome::recorded(&order, &session, true));
        }

        if callback.status != CallbackStatus::Ok {
            return self.reject(tx, order, session, "gateway reported failure").await;
        }
        if let Some(reported) = callback.amount {
            if reported != order.total() {
                return self.reject_amount(tx, order, session, reported).await;
            }
        }

        let verification = match self.bounded(self.gateway.verify_payment(&session.authority, order.total())).await {
            Ok(v) => v,
            Err(e) => {
                warn!(%order_id, error = %e, "payment verification failed, session left open");
                return Err(e);
            }
        };
        if let Some(reported) = verification.amount {
            if reported != order.total() {
                return self.reject_amount(tx, order, session, reported).await;
            }
        }
        if !verification.confirmed {
            let reason = verification.message.unwrap_or_else(|| "gateway did not confirm payment".to_string());
            return self.reject(tx, order, session, &reason).await;
        }

        session.transition(SessionEvent::Verified { reference_id: verification.reference_id.clone() })?;
        order.mark_paid(verification.reference_id)?;
        self.settle(tx, &mut order, &session).await?;
        info!(%order_id, reference_id = ?order.payment_ref_id(), "payment verified");
        Ok(PaymentOutcome::recorded(&order, &session, false))
    }

    async fn settle(&self, mut tx: Box<dyn OrderTx>, order: &mut Order, session: &PaymentSession) -> Result<()> {
        tx.save_session(session).await?;
        tx.save_order(order).await?;
        tx.commit().await?;
        self.notifier.publish(order.take_events());
        Ok(())
    }

    async fn reject(&self, tx: Box<dyn OrderTx>, mut order: Order, mut session: PaymentSession, reason: &str) -> Result<PaymentOutcome> {
        session.transition(SessionEvent::Rejected)?;
        order.mark_failed()?;
        self.settle(tx, &mut order, &session).await?;
        info!(order_id = %order.id(), reason, "payment rejected");
        Ok(PaymentOutcome::recorded(&order, &session, false))
    }

    async fn reject_amount(&self, tx: Box<dyn OrderTx>, order: Order, session: PaymentSession, reported: Money) -> Result<PaymentOutcome> {
        let expected = order.total();
        self.reject(tx, order, session, "amount mismatch").await?;
        Err(suspicious(CheckoutError::AmountMismatch { expected: expected.amount(), reported: reported.amount() }))
    }
}
