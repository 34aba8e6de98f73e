//! Aggregates module
pub mod catalog;
pub mod order;
pub mod cart;
pub mod payment;

pub use catalog::{CatalogItem, FieldKind, FieldSpec};
pub use order::{Order, OrderItem, OrderStatus};
pub use cart::{Cart, CartItem};
pub use payment::{PaymentSession, SessionEvent, SessionStatus};
