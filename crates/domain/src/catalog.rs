//! Catalog products referenced by order line items.

use common::{Money, ProductId};
use serde::Serialize;
use thiserror::Error;

/// Errors raised by product stock guards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("Insufficient stock for product {product}: requested {requested}, available {available}")]
    InsufficientStock {
        product: String,
        requested: u32,
        available: u32,
    },

    #[error("Stock overflow for product {product}")]
    StockOverflow { product: String },

    #[error("Invalid price: {price} (must not be negative)")]
    NegativePrice { price: i64 },
}

/// A product owned by the catalog store.
///
/// The stock count can never go below zero; it only moves through
/// [`Product::decrement_stock`] and [`Product::increment_stock`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Product {
    id: Option<ProductId>,
    name: String,
    description: String,
    price: Money,
    category: String,
    artisan: String,
    stock: u32,
}

impl Product {
    /// Creates an unpersisted product.
    pub fn new(name: impl Into<String>, price: Money, stock: u32) -> Result<Self, CatalogError> {
        if price.is_negative() {
            return Err(CatalogError::NegativePrice {
                price: price.minor_units(),
            });
        }
        Ok(Self {
            id: None,
            name: name.into(),
            description: String::new(),
            price,
            category: String::new(),
            artisan: String::new(),
            stock,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Attributes the product to the artisan who made it.
    pub fn with_artisan(mut self, artisan: impl Into<String>) -> Self {
        self.artisan = artisan.into();
        self
    }

    /// Stamps the identifier assigned by the catalog store.
    pub fn into_persisted(mut self, id: ProductId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn id(&self) -> Option<ProductId> {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn price(&self) -> Money {
        self.price
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn artisan(&self) -> &str {
        &self.artisan
    }

    pub fn stock(&self) -> u32 {
        self.stock
    }

    /// Removes `quantity` units, failing without change if stock is insufficient.
    pub fn decrement_stock(&mut self, quantity: u32) -> Result<(), CatalogError> {
        self.stock = self
            .stock
            .checked_sub(quantity)
            .ok_or_else(|| CatalogError::InsufficientStock {
                product: self.label(),
                requested: quantity,
                available: self.stock,
            })?;
        Ok(())
    }

    /// Returns `quantity` units to stock.
    pub fn increment_stock(&mut self, quantity: u32) -> Result<(), CatalogError> {
        self.stock = self
            .stock
            .checked_add(quantity)
            .ok_or_else(|| CatalogError::StockOverflow {
                product: self.label(),
            })?;
        Ok(())
    }

    fn label(&self) -> String {
        match self.id {
            Some(id) => id.to_string(),
            None => self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vase() -> Product {
        Product::new("Glazed vase", Money::from_minor_units(50_000), 3)
            .unwrap()
            .with_category("ceramics")
            .with_artisan("Ana")
            .into_persisted(ProductId::new(1))
    }

    #[test]
    fn builder_sets_attributes() {
        let product = vase().with_description("Stoneware, hand thrown");
        assert_eq!(product.id(), Some(ProductId::new(1)));
        assert_eq!(product.category(), "ceramics");
        assert_eq!(product.artisan(), "Ana");
        assert_eq!(product.description(), "Stoneware, hand thrown");
        assert_eq!(product.price(), Money::from_minor_units(50_000));
    }

    #[test]
    fn negative_price_is_rejected() {
        let result = Product::new("Broken", Money::from_minor_units(-5), 1);
        assert_eq!(result, Err(CatalogError::NegativePrice { price: -5 }));
    }

    #[test]
    fn decrement_is_guarded() {
        let mut product = vase();
        product.decrement_stock(2).unwrap();
        assert_eq!(product.stock(), 1);

        let result = product.decrement_stock(2);
        assert_eq!(
            result,
            Err(CatalogError::InsufficientStock {
                product: "1".to_string(),
                requested: 2,
                available: 1
            })
        );
        assert_eq!(product.stock(), 1);
    }

    #[test]
    fn increment_restores_stock() {
        let mut product = vase();
        product.decrement_stock(3).unwrap();
        product.increment_stock(5).unwrap();
        assert_eq!(product.stock(), 5);

        let mut full = Product::new("Many", Money::zero(), u32::MAX).unwrap();
        assert!(matches!(
            full.increment_stock(1),
            Err(CatalogError::StockOverflow { .. })
        ));
    }
}
