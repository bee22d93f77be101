//! Primitive types shared by every layer of the marketplace order core.
//!
//! - Numeric identifiers assigned by the backing store ([`OrderId`], [`UserId`], [`ProductId`])
//! - [`Money`], an integer amount of currency minor units

mod ids;
mod money;

pub use ids::{OrderId, ProductId, UserId};
pub use money::{Money, MoneyParseError};
