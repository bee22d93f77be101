//! Value objects for the order domain.

use std::str::FromStr;

use common::{Money, ProductId};
use serde::{Deserialize, Serialize};

use super::OrderError;

/// How the customer intends to pay for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Stripe,
    Paypal,
    BankTransfer,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 3] = [
        PaymentMethod::Stripe,
        PaymentMethod::Paypal,
        PaymentMethod::BankTransfer,
    ];

    /// Returns the storage/wire tag of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Stripe => "stripe",
            PaymentMethod::Paypal => "paypal",
            PaymentMethod::BankTransfer => "bank_transfer",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentMethod::ALL
            .into_iter()
            .find(|method| method.as_str() == s)
            .ok_or_else(|| OrderError::UnknownPaymentMethod(s.to_string()))
    }
}

/// Opaque identifier correlating an order with a successful payment at a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaymentReference(String);

impl PaymentReference {
    /// Creates a reference, rejecting blank values.
    pub fn new(reference: impl Into<String>) -> Result<Self, OrderError> {
        let reference = reference.into();
        if reference.trim().is_empty() {
            return Err(OrderError::EmptyPaymentReference);
        }
        Ok(Self(reference))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for PaymentReference {
    type Error = OrderError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PaymentReference> for String {
    fn from(reference: PaymentReference) -> Self {
        reference.0
    }
}

/// One product-quantity-price tuple within an order.
///
/// The unit price is captured when the item is created and never follows later
/// catalog price changes. `subtotal == quantity * unit_price` always holds, since
/// the only way to change the quantity is [`LineItem::with_quantity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineItem {
    product_id: ProductId,
    quantity: u32,
    unit_price: Money,
    subtotal: Money,
}

impl LineItem {
    /// Creates a line item after validating quantity and price.
    pub fn new(product_id: ProductId, quantity: u32, unit_price: Money) -> Result<Self, OrderError> {
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity { quantity });
        }
        if unit_price.is_negative() {
            return Err(OrderError::NegativePrice {
                price: unit_price.minor_units(),
            });
        }
        let subtotal = unit_price
            .checked_mul(quantity)
            .ok_or(OrderError::AmountOverflow)?;

        Ok(Self {
            product_id,
            quantity,
            unit_price,
            subtotal,
        })
    }

    /// Returns a copy of this item with a new quantity and recomputed subtotal.
    pub fn with_quantity(&self, quantity: u32) -> Result<Self, OrderError> {
        Self::new(self.product_id, quantity, self.unit_price)
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn unit_price(&self) -> Money {
        self.unit_price
    }

    pub fn subtotal(&self) -> Money {
        self.subtotal
    }
}
