//! Notification trigger.
//!
//! Payment confirmations are pushed onto an unbounded work queue and
//! delivered by a background worker. Dispatch never blocks and never fails
//! the caller; delivery errors are logged and dropped.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::events::OrderEvent;
use crate::domain::value_objects::OwnerId;
use crate::{CheckoutError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    PaymentConfirmed,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Notification {
    pub order_id: Uuid,
    pub owner_id: OwnerId,
    pub owner_contact: Option<String>,
    pub event_type: NotificationKind,
    pub reference_id: Option<String>,
}

impl Notification {
    /// Only payment confirmations reach the owner.
    pub fn from_event(event: &OrderEvent) -> Option<Self> {
        match event {
            OrderEvent::Paid { order_id, owner_id, owner_contact, reference_id } => Some(Self {
                order_id: *order_id,
                owner_id: owner_id.clone(),
                owner_contact: owner_contact.clone(),
                event_type: NotificationKind::PaymentConfirmed,
                reference_id: reference_id.clone(),
            }),
            _ => None,
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<()>;
}

/// Publishes notifications as JSON on a NATS subject.
pub struct NatsSink {
    client: async_nats::Client,
    subject: String,
}

impl NatsSink {
    pub fn new(client: async_nats::Client, subject: impl Into<String>) -> Self {
        Self { client, subject: subject.into() }
    }
}

#[async_trait]
impl NotificationSink for NatsSink {
    async fn deliver(&self, notification: &Notification) -> Result<()> {
        let payload = serde_json::to_vec(notification).map_err(|e| CheckoutError::Notification(e.to_string()))?;
        self.client
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| CheckoutError::Notification(e.to_string()))
    }
}

pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &Notification) -> Result<()> {
        info!(order_id = %notification.order_id, owner_id = %notification.owner_id, "payment confirmed notification");
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    /// A notifier whose queue is drained by the caller.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// A notifier with a worker task delivering to `sink`.
    pub fn spawn(sink: Arc<dyn NotificationSink>) -> (Self, JoinHandle<()>) {
        let (notifier, mut rx) = Self::channel();
        let worker = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                if let Err(e) = sink.deliver(&notification).await {
                    warn!(order_id = %notification.order_id, error = %e, "notification delivery failed");
                }
            }
        });
        (notifier, worker)
    }

    pub fn dispatch(&self, notification: Notification) {
        let order_id = notification.order_id;
        if self.tx.send(notification).is_err() {
            warn!(%order_id, "notification queue closed, dropping notification");
        }
    }

    pub fn publish(&self, events: Vec<OrderEvent>) {
        for event in events {
            match Notification::from_event(&event) {
                Some(n) => self.dispatch(n),
                None => debug!(order_id = %event.order_id(), ?event, "no notification for event"),
            }
        }
    }
}
