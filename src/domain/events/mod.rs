//! Domain events
use serde::Serialize;
use uuid::Uuid;

use crate::domain::value_objects::{Money, OwnerId};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: Uuid, owner_id: OwnerId, total: Money },
    Paid { order_id: Uuid, owner_id: OwnerId, owner_contact: Option<String>, reference_id: Option<String> },
    PaymentFailed { order_id: Uuid },
    Canceled { order_id: Uuid },
}

impl OrderEvent {
    pub fn order_id(&self) -> Uuid {
        match self {
            Self::Placed { order_id, .. }
            | Self::Paid { order_id, .. }
            | Self::PaymentFailed { order_id }
            | Self::Canceled { order_id } => *order_id,
        }
    }
}
