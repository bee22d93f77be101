//! Order aggregate and related types.

mod aggregate;
mod state;
mod value_objects;

pub use aggregate::{Order, OrderParts};
pub use state::OrderState;
pub use value_objects::{LineItem, PaymentMethod, PaymentReference};

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// Line item quantity must be at least one.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Unit prices may be zero but never negative.
    #[error("Invalid price: {price} (must not be negative)")]
    NegativePrice { price: i64 },

    /// A subtotal or total does not fit in the money representation.
    #[error("Amount overflow while computing order total")]
    AmountOverflow,

    /// An order must be created with at least one line item.
    #[error("Order has no items")]
    NoItems,

    /// The requested state change is not in the transition table.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: OrderState, to: OrderState },

    /// Line items can only change while the order is pending.
    #[error("Items cannot be modified in {state} state")]
    ItemsLocked { state: OrderState },

    /// The settlement payload does not match the order's payment method.
    #[error("Payment method mismatch: order expects {expected}, got {actual}")]
    PaymentMethodMismatch {
        expected: PaymentMethod,
        actual: PaymentMethod,
    },

    /// A payment reference was blank.
    #[error("Payment reference must not be empty")]
    EmptyPaymentReference,

    /// A stored order in a paid-or-later state has no payment reference.
    #[error("Order in {state} state is missing its payment reference")]
    MissingPaymentReference { state: OrderState },

    /// A stored pending or cancelled order carries a payment reference.
    #[error("Order in {state} state must not carry a payment reference")]
    UnexpectedPaymentReference { state: OrderState },

    /// Unrecognised state name.
    #[error("Unknown order state: {0}")]
    UnknownState(String),

    /// Unrecognised payment method tag.
    #[error("Unknown payment method: {0}")]
    UnknownPaymentMethod(String),
}
