//! Checkout domain: value objects, aggregates, pricing and field validation.

pub mod aggregates;
pub mod events;
pub mod pricing;
pub mod validation;
pub mod value_objects;
