use common::{OrderId, ProductId};
use domain::{CatalogError, OrderError};
use thiserror::Error;

/// Errors that can occur when interacting with the order or catalog store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The stored version did not match the version the caller read.
    #[error(
        "Concurrency conflict for order {order_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        order_id: OrderId,
        expected: i64,
        actual: i64,
    },

    /// The order was not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The product was not found.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// An update was attempted on an order that was never created.
    #[error("Order has not been persisted yet")]
    Unpersisted,

    /// A stored row violates an entity invariant.
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// A domain rule rejected the write.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// A stock guard rejected the write.
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// The store is not reachable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
