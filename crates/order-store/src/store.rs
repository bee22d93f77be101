use async_trait::async_trait;
use common::{OrderId, ProductId, UserId};
use domain::{Order, OrderState, PaymentReference, Product};

use crate::{Result, StoreError};

/// Outcome of a conditional (compare-and-set) state write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateWrite {
    /// The stored state matched; the write committed and this is the new order.
    Applied(Order),

    /// No order with that id exists.
    Missing,

    /// The stored state was not the expected one; nothing was written.
    Conflict { actual: OrderState },
}

impl StateWrite {
    /// Returns the written order, if the write was applied.
    pub fn applied(self) -> Option<Order> {
        match self {
            StateWrite::Applied(order) => Some(order),
            _ => None,
        }
    }
}

/// Durable storage for orders and their line items.
///
/// Every write is atomic: an order row is never visible without its items, and
/// state changes are visible together with the fields that accompany them.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Loads an order with its items.
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>>;

    /// Loads every order owned by a user, oldest first.
    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Loads every order currently in `state`, oldest first.
    async fn find_by_state(&self, state: OrderState) -> Result<Vec<Order>>;

    /// Persists a new order and its items in one transaction.
    ///
    /// Returns the order with its assigned id and version 1.
    async fn create(&self, order: Order) -> Result<Order>;

    /// Replaces the stored order and all of its items in one transaction.
    ///
    /// Fails with [`StoreError::ConcurrencyConflict`] if the stored version
    /// differs from `order.version()`. Returns the order at its new version.
    async fn update(&self, order: &Order) -> Result<Order>;

    /// Deletes an order and its items. Returns false if it did not exist.
    async fn delete(&self, id: OrderId) -> Result<bool>;

    /// Moves an order from `from` to `to` only if it is currently in `from`.
    ///
    /// `to` must not be `Paid`; use [`OrderRepository::settle`] for that.
    async fn transition_state(
        &self,
        id: OrderId,
        from: OrderState,
        to: OrderState,
    ) -> Result<StateWrite>;

    /// Records `reference` and moves the order to `Paid` in a single write,
    /// only if it is currently `Pending`.
    async fn settle(&self, id: OrderId, reference: &PaymentReference) -> Result<StateWrite>;
}

/// Extension trait providing convenience methods for order repositories.
#[async_trait]
pub trait OrderRepositoryExt: OrderRepository {
    /// Loads an order, failing with [`StoreError::OrderNotFound`] if absent.
    async fn get_existing(&self, id: OrderId) -> Result<Order> {
        self.find_by_id(id)
            .await?
            .ok_or(StoreError::OrderNotFound(id))
    }

    /// Checks if an order exists.
    async fn exists(&self, id: OrderId) -> Result<bool> {
        Ok(self.find_by_id(id).await?.is_some())
    }
}

impl<T: OrderRepository + ?Sized> OrderRepositoryExt for T {}

/// Product records with guarded stock adjustments.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Loads a product.
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Inserts a product without an id, or overwrites the stored one.
    async fn save_product(&self, product: Product) -> Result<Product>;

    /// Removes `quantity` units from stock, failing with
    /// [`domain::CatalogError::InsufficientStock`] and no change if too few remain.
    async fn decrement_stock(&self, id: ProductId, quantity: u32) -> Result<Product>;

    /// Returns `quantity` units to stock.
    async fn increment_stock(&self, id: ProductId, quantity: u32) -> Result<Product>;
}

/// Checks an administrative transition before any stored state is read.
pub(crate) fn check_admin_transition(from: OrderState, to: OrderState) -> Result<()> {
    if to == OrderState::Paid {
        return Err(domain::OrderError::InvalidTransition { from, to }.into());
    }
    from.validate_transition(to)?;
    Ok(())
}
