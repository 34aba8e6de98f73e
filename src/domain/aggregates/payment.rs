//! Payment Session
//!
//! One session per order, keyed by the order id. Transitions are guarded:
//!
//! ```text
//! Opened ──redirect──▶ AwaitingCallback
//! Opened | AwaitingCallback ──verified──▶ Verified   (terminal)
//! Opened | AwaitingCallback ──rejected──▶ Rejected   (terminal)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{CheckoutError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentSession {
    pub order_id: Uuid,
    pub authority: String,
    pub status: SessionStatus,
    pub reference_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Opened,
    AwaitingCallback,
    Verified,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Redirected,
    Verified { reference_id: Option<String> },
    Rejected,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opened => "OPENED",
            Self::AwaitingCallback => "AWAITING_CALLBACK",
            Self::Verified => "VERIFIED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Verified | Self::Rejected) }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for SessionStatus {
    type Err = CheckoutError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "OPENED" => Ok(Self::Opened),
            "AWAITING_CALLBACK" => Ok(Self::AwaitingCallback),
            "VERIFIED" => Ok(Self::Verified),
            "REJECTED" => Ok(Self::Rejected),
            other => Err(CheckoutError::Storage(format!("unknown session status {other}"))),
        }
    }
}

impl PaymentSession {
    pub fn open(order_id: Uuid, authority: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            order_id, authority: authority.into(), status: SessionStatus::Opened,
            reference_id: None, created_at: now, updated_at: now,
        }
    }

    /// Applies `event`. Returns whether the status changed; a repeated
    /// redirect is accepted without change.
    pub fn transition(&mut self, event: SessionEvent) -> Result<bool> {
        use SessionStatus::*;
        let next = match (&self.status, &event) {
            (AwaitingCallback, SessionEvent::Redirected) => return Ok(false),
            (Opened, SessionEvent::Redirected) => AwaitingCallback,
            (Opened | AwaitingCallback, SessionEvent::Verified { .. }) => Verified,
            (Opened | AwaitingCallback, SessionEvent::Rejected) => Rejected,
            (from, SessionEvent::Redirected) => return Err(CheckoutError::IllegalTransition(*from, AwaitingCallback)),
            (from, SessionEvent::Verified { .. }) => return Err(CheckoutError::IllegalTransition(*from, Verified)),
            (from, SessionEvent::Rejected) => return Err(CheckoutError::IllegalTransition(*from, Rejected)),
        };
        if let SessionEvent::Verified { reference_id } = event {
            self.reference_id = reference_id;
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(true)
    }
}
