//! Checkout error types.

use std::fmt;

use common::{OrderId, ProductId};
use domain::{CatalogError, OrderError, OrderState};
use order_store::StoreError;
use thiserror::Error;

/// A record the caller referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Order(OrderId),
    Product(ProductId),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Order(id) => write!(f, "order {id}"),
            Resource::Product(id) => write!(f, "product {id}"),
        }
    }
}

/// Errors returned by the order service and the settlement coordinator.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The referenced order or product does not exist.
    #[error("Not found: {0}")]
    NotFound(Resource),

    /// The requested state change is not in the transition table.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: OrderState, to: OrderState },

    /// Settlement was attempted on an order that is not pending.
    #[error("Order {order_id} is not pending (state: {state})")]
    NotPending { order_id: OrderId, state: OrderState },

    /// The payment gateway declined, errored or timed out.
    #[error("Payment gateway failure: {0}")]
    GatewayFailure(String),

    /// The request was rejected before anything was written.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A storage write failed and was rolled back.
    #[error("Storage failure: {0}")]
    Storage(#[source] StoreError),
}

impl From<OrderError> for CheckoutError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::InvalidTransition { from, to } => Self::InvalidTransition { from, to },
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<CatalogError> for CheckoutError {
    fn from(err: CatalogError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<StoreError> for CheckoutError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::OrderNotFound(id) => Self::NotFound(Resource::Order(id)),
            StoreError::ProductNotFound(id) => Self::NotFound(Resource::Product(id)),
            StoreError::Order(e) => e.into(),
            StoreError::Catalog(e) => e.into(),
            other => Self::Storage(other),
        }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;
