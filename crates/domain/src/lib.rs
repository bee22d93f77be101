//! Domain layer for the marketplace order core.
//!
//! This crate provides:
//! - The [`Order`] aggregate with its line-item composition rules
//!   (the total is always the sum of item subtotals)
//! - The [`OrderState`] lifecycle state machine and its transition table
//! - Catalog [`Product`]s with a guarded stock count
//!
//! Nothing here performs I/O; persistence lives in `order-store`.

pub mod catalog;
pub mod order;

pub use catalog::{CatalogError, Product};
pub use common::{Money, OrderId, ProductId, UserId};
pub use order::{
    LineItem, Order, OrderError, OrderParts, OrderState, PaymentMethod, PaymentReference,
};
