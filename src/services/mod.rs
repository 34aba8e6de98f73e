pub mod cart;
pub mod checkout;
pub mod orders;
pub mod payment;

pub use cart::{AddItem, CartLine, CartService, CartView, UpdateItem};
pub use checkout::OrderBuilder;
pub use orders::OrderService;
pub use payment::{CallbackStatus, GatewayCallback, PaymentOrchestrator, PaymentOutcome, PaymentRedirect, PaymentSettings};
