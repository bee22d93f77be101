//! Storage collaborators of the order core.
//!
//! - [`OrderRepository`]: transactional order + line-item persistence with
//!   conditional state writes
//! - [`CatalogStore`]: product records with guarded stock adjustment
//!
//! Both come in an in-memory flavour (tests, single process) and a PostgreSQL
//! flavour built on sqlx.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryCatalogStore, InMemoryOrderRepository};
pub use postgres::{PostgresCatalogStore, PostgresOrderRepository};
pub use store::{CatalogStore, OrderRepository, OrderRepositoryExt, StateWrite};
